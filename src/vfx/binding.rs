use crate::ui::color::{self, Color};
use crate::vfx::gradient_cache::quantize_blend_factor;
use crate::vfx::property_set::{VfxLibrary, VfxPropertySet, builtin_default};
use crate::vfx::timeline::{KeyframeResolver, Segment};
use crate::vfx::value::{Gradient, NumericRange, VfxValue};
use glam::{Vec2, Vec3};
use log::{debug, info};
use smallvec::SmallVec;
use std::f64::consts::TAU;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraTransform {
    pub translate: Vec3,
    /// Degrees around each axis.
    pub rotate: Vec3,
    pub zoom: f32,
    /// Shear angles in degrees along x and y.
    pub skew: Vec2,
    /// Screen-space shake offset already applied on top of `translate`.
    pub shake: Vec2,
}

impl Default for CameraTransform {
    fn default() -> Self {
        Self {
            translate: Vec3::ZERO,
            rotate: Vec3::ZERO,
            zoom: 1.0,
            skew: Vec2::ZERO,
            shake: Vec2::ZERO,
        }
    }
}

/// Live-game view over one difficulty's VFX set. A binding without a set is
/// valid and answers every query with the built-in defaults.
pub struct RuntimeVfxBinding {
    set: Option<Rc<VfxPropertySet>>,
    resolver: KeyframeResolver,
    lane_color_ids: SmallVec<[Option<usize>; 8]>,
    lane_opacity_ids: SmallVec<[Option<usize>; 8]>,
    lane_count: usize,
    beat_ms: f64,
}

#[inline(always)]
fn lane_color_path(lane: usize) -> String {
    format!("notes.colors.{}", lane + 1)
}

#[inline(always)]
fn lane_opacity_path(lane: usize) -> String {
    format!("lanes.{}.opacity", lane + 1)
}

fn lane_ids(
    set: Option<&VfxPropertySet>,
    lane_count: usize,
    path: fn(usize) -> String,
) -> SmallVec<[Option<usize>; 8]> {
    (0..lane_count)
        .map(|lane| set.and_then(|s| s.id_of(&path(lane))))
        .collect()
}

impl RuntimeVfxBinding {
    pub fn new(set: Option<Rc<VfxPropertySet>>, lane_count: usize, bpm: f64) -> Self {
        let lane_color_ids = lane_ids(set.as_deref(), lane_count, lane_color_path);
        let lane_opacity_ids = lane_ids(set.as_deref(), lane_count, lane_opacity_path);
        match &set {
            Some(s) => info!(
                "VFX bound for '{}' ({} properties, {} lane color overrides).",
                s.difficulty(),
                s.len(),
                lane_color_ids.iter().flatten().count()
            ),
            None => debug!("No VFX set bound; using built-in defaults."),
        }
        Self {
            set,
            resolver: KeyframeResolver::new(),
            lane_color_ids,
            lane_opacity_ids,
            lane_count,
            beat_ms: if bpm.is_finite() && bpm > 0.0 { 60_000.0 / bpm } else { 0.0 },
        }
    }

    pub fn from_library(library: &VfxLibrary, lane_count: usize, bpm: f64) -> Self {
        Self::new(library.current_set(), lane_count, bpm)
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.set.is_some()
    }

    #[inline(always)]
    pub fn begin_frame(&mut self) {
        self.resolver.begin_frame();
    }

    pub const fn resolver(&self) -> &KeyframeResolver {
        &self.resolver
    }

    fn resolve_id(&mut self, id: Option<usize>, t: f64) -> Option<VfxValue> {
        let set = self.set.as_ref()?;
        let id = id?;
        let tl = set.timeline(id)?;
        Some(self.resolver.resolve(id, tl, t))
    }

    /// The authored value of `path` at `t`, or `None` when nothing is bound
    /// for it.
    pub fn value(&mut self, path: &str, t: f64) -> Option<VfxValue> {
        let id = self.set.as_ref().and_then(|s| s.id_of(path));
        self.resolve_id(id, t)
    }

    pub fn number(&mut self, path: &str, t: f64) -> f64 {
        self.value(path, t)
            .and_then(|v| v.as_number())
            .or_else(|| builtin_default(path).and_then(|v| v.as_number()))
            .unwrap_or(0.0)
    }

    /// A range-valued property, or `None` when it is unbound or not a range.
    pub fn range(&mut self, path: &str, t: f64) -> Option<NumericRange> {
        self.value(path, t).and_then(|v| v.as_range())
    }

    pub fn flag(&mut self, path: &str, t: f64) -> bool {
        self.value(path, t)
            .and_then(|v| v.as_bool())
            .or_else(|| builtin_default(path).and_then(|v| v.as_bool()))
            .unwrap_or(false)
    }

    pub fn lane_color(&mut self, lane: usize, t: f64) -> Color {
        let id = self.lane_color_ids.get(lane).copied().flatten();
        self.resolve_id(id, t)
            .and_then(|v| v.as_color())
            .unwrap_or_else(|| color::lane_rgba(lane))
    }

    pub fn lane_opacity(&mut self, lane: usize, t: f64) -> f32 {
        let id = self.lane_opacity_ids.get(lane).copied().flatten();
        let v = match self.resolve_id(id, t).and_then(|v| v.as_number()) {
            Some(v) => v,
            None => self.number("lanes.opacity", t),
        };
        v.clamp(0.0, 1.0) as f32
    }

    #[inline(always)]
    pub const fn lane_count(&self) -> usize {
        self.lane_count
    }

    pub fn camera(&mut self, t: f64) -> CameraTransform {
        let translate = Vec3::new(
            self.number("camera.x", t) as f32,
            self.number("camera.y", t) as f32,
            self.number("camera.z", t) as f32,
        );
        let rotate = Vec3::new(
            self.number("camera.rotateX", t) as f32,
            self.number("camera.rotateY", t) as f32,
            self.number("camera.rotateZ", t) as f32,
        );
        let zoom = self.number("camera.zoom", t) as f32;
        let skew = Vec2::new(
            self.number("camera.skewX", t) as f32,
            self.number("camera.skewY", t) as f32,
        );
        let shake = shake_offset(
            self.number("camera.shakeAmp", t),
            self.number("camera.shakeFreq", t),
            t,
        );
        CameraTransform {
            translate: translate + shake.extend(0.0),
            rotate,
            zoom,
            skew,
            shake,
        }
    }

    /// Flash alpha at `t`, derived from the beat grid rather than accumulated,
    /// so it never drifts from the music.
    pub fn beat_flash(&mut self, t: f64) -> f32 {
        if self.beat_ms <= 0.0 || t < 0.0 || !self.flag("beatFlash.enabled", t) {
            return 0.0;
        }
        let intensity = self.number("beatFlash.intensity", t).clamp(0.0, 1.0);
        // Fade length as a fraction of one beat.
        let decay = self.number("beatFlash.decay", t).clamp(0.01, 1.0);
        let beats = t / self.beat_ms;
        let phase = beats - beats.floor();
        (intensity * (1.0 - phase / decay).max(0.0)) as f32
    }

    /// Background gradient at `t` with its blend factor quantized per segment,
    /// ready to hand to the snapshot cache.
    pub fn background_gradient(&mut self, t: f64) -> Gradient {
        let quantize = |f: f64, seg: Segment| quantize_blend_factor(f, seg.span_ms());
        if let Some(set) = self.set.as_ref() {
            if let Some(g) = set
                .get("background.gradient")
                .and_then(|tl| tl.sample(t, &quantize).0.as_gradient().cloned())
            {
                return g;
            }
            let top = set
                .get("background.color1")
                .and_then(|tl| tl.sample(t, &quantize).0.as_color());
            let bottom = set
                .get("background.color2")
                .and_then(|tl| tl.sample(t, &quantize).0.as_color());
            if top.is_some() || bottom.is_some() {
                return Gradient::two_stop(
                    top.unwrap_or(color::DEFAULT_BACKGROUND_TOP),
                    bottom.unwrap_or(color::DEFAULT_BACKGROUND_BOTTOM),
                );
            }
        }
        Gradient::two_stop(color::DEFAULT_BACKGROUND_TOP, color::DEFAULT_BACKGROUND_BOTTOM)
    }
}

#[inline(always)]
fn shake_offset(amp: f64, freq_hz: f64, t: f64) -> Vec2 {
    if amp == 0.0 || freq_hz <= 0.0 {
        return Vec2::ZERO;
    }
    let secs = t / 1000.0;
    // Incommensurate axis rates keep the path from tracing a plain circle.
    let x = (TAU * freq_hz * secs).sin();
    let y = (TAU * freq_hz * 1.37 * secs + 0.5).sin();
    Vec2::new((amp * x) as f32, (amp * y) as f32)
}

#[cfg(test)]
mod tests {
    use super::RuntimeVfxBinding;
    use crate::ui::color::{self, Color};
    use crate::vfx::value::NumericRange;
    use crate::vfx::property_set::VfxLibrary;

    const DOC: &str = r##"{
        "difficulties": {
            "normal": {
                "defaults": { "beatFlash.enabled": true, "beatFlash.intensity": 0.5, "beatFlash.decay": 0.5 },
                "properties": {
                    "notes.colors.1": [
                        { "timeMs": 0, "value": "#000000" },
                        { "timeMs": 100, "value": "#ffffff" }
                    ],
                    "camera.rotateZ": [ { "timeMs": 1000, "value": 90 } ],
                    "camera.skewX": [ { "timeMs": 0, "value": 15 } ],
                    "particles.size": [
                        { "timeMs": 0, "value": { "min": 1, "max": 3 } },
                        { "timeMs": 200, "value": { "min": 3, "max": 9 } }
                    ],
                    "lanes.opacity": [ { "timeMs": 0, "value": 0.5 } ],
                    "lanes.2.opacity": [ { "timeMs": 0, "value": 2.0 } ],
                    "background.color1": [ { "timeMs": 0, "value": "#ff0000" } ]
                }
            }
        }
    }"##;

    fn bound() -> RuntimeVfxBinding {
        let mut lib = VfxLibrary::from_json(DOC).expect("document");
        assert!(lib.select("Normal"));
        RuntimeVfxBinding::from_library(&lib, 4, 120.0)
    }

    #[test]
    fn missing_set_answers_with_defaults() {
        let mut b = RuntimeVfxBinding::new(None, 4, 120.0);
        assert!(!b.is_active());
        b.begin_frame();
        assert_eq!(b.value("camera.rotateZ", 10.0), None);
        assert_eq!(b.lane_color(2, 10.0), color::lane_rgba(2));
        assert_eq!(b.lane_opacity(0, 10.0), 1.0);
        let cam = b.camera(500.0);
        assert_eq!(cam.zoom, 1.0);
        assert_eq!(cam.rotate.z, 0.0);
        assert_eq!(b.beat_flash(0.0), 0.0, "beat flash is off by default");
    }

    #[test]
    fn lane_colors_follow_their_timeline() {
        let mut b = bound();
        b.begin_frame();
        assert_eq!(b.lane_color(0, 50.0), Color::rgb(128, 128, 128));
        assert_eq!(b.lane_color(1, 50.0), color::lane_rgba(1), "unbound lanes keep the palette");
    }

    #[test]
    fn camera_eases_in_from_default() {
        let mut b = bound();
        b.begin_frame();
        let cam = b.camera(500.0);
        assert!((cam.rotate.z - 45.0).abs() < 1e-4, "got {}", cam.rotate.z);
        assert_eq!(cam.shake, glam::Vec2::ZERO);
    }

    #[test]
    fn camera_carries_authored_skew() {
        let mut b = bound();
        b.begin_frame();
        let cam = b.camera(100.0);
        assert_eq!(cam.skew, glam::Vec2::new(15.0, 0.0));
        assert_eq!(RuntimeVfxBinding::new(None, 4, 120.0).camera(100.0).skew, glam::Vec2::ZERO);
    }

    #[test]
    fn range_properties_blend_componentwise() {
        let mut b = bound();
        b.begin_frame();
        assert_eq!(b.range("particles.size", 100.0), Some(NumericRange { min: 2.0, max: 6.0 }));
        assert_eq!(b.range("particles.size", 500.0), Some(NumericRange { min: 3.0, max: 9.0 }));
        assert_eq!(b.number("particles.size", 100.0), 4.0, "a range reads as its midpoint");
        assert_eq!(b.range("camera.skewX", 100.0), None, "numbers are not ranges");
        assert_eq!(b.range("missing.path", 100.0), None);
    }

    #[test]
    fn per_lane_opacity_overrides_the_shared_value() {
        let mut b = bound();
        b.begin_frame();
        assert_eq!(b.lane_opacity(0, 0.0), 0.5);
        assert_eq!(b.lane_opacity(1, 0.0), 1.0, "opacity is clamped to 1");
    }

    #[test]
    fn beat_flash_peaks_on_the_beat_and_decays() {
        let mut b = bound();
        b.begin_frame();
        // 120 bpm → 500ms per beat, decay over half a beat.
        assert!((b.beat_flash(0.0) - 0.5).abs() < 1e-6);
        assert!((b.beat_flash(125.0) - 0.25).abs() < 1e-6);
        assert_eq!(b.beat_flash(300.0), 0.0);
        assert!((b.beat_flash(100_000.0) - 0.5).abs() < 1e-6, "no drift after many beats");
    }

    #[test]
    fn background_falls_back_to_two_colors() {
        let mut b = bound();
        let g = b.background_gradient(10.0);
        assert_eq!(g.stops[0].color, Color::rgb(255, 0, 0));
        assert_eq!(g.stops[1].color, color::DEFAULT_BACKGROUND_BOTTOM);
    }
}
