use crate::ui::color::Color;
use log::debug;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// A keyframe value. Deserialized untagged from the editor's loose JSON shape:
/// `true`, `0.5`, `"#ff00aa"`, `{ "type": "linear", "stops": [...] }` or
/// `{ "min": 0, "max": 1 }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VfxValue {
    Bool(bool),
    Number(f64),
    Color(Color),
    Gradient(Gradient),
    Range(NumericRange),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Number,
    Color,
    Gradient,
    Range,
}

impl VfxValue {
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Number(_) => ValueKind::Number,
            Self::Color(_) => ValueKind::Color,
            Self::Gradient(_) => ValueKind::Gradient,
            Self::Range(_) => ValueKind::Range,
        }
    }

    /// Numeric reading of a value. A range reads as its midpoint.
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Range(r) => Some(r.mid()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(v) => Some(*v != 0.0),
            _ => None,
        }
    }

    pub const fn as_color(&self) -> Option<Color> {
        match self {
            Self::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub const fn as_gradient(&self) -> Option<&Gradient> {
        match self {
            Self::Gradient(g) => Some(g),
            _ => None,
        }
    }

    pub const fn as_range(&self) -> Option<NumericRange> {
        match self {
            Self::Range(r) => Some(*r),
            _ => None,
        }
    }

    /// Puts load-time invariants in place (gradient stops sorted).
    pub fn normalize(&mut self) {
        if let Self::Gradient(g) = self {
            g.sort_stops();
        }
    }

    /// Blends `self → to` by an already-eased factor.
    ///
    /// `f <= 0` and `f >= 1` return the endpoint unchanged so authored
    /// keyframes resolve exactly. Kinds that cannot blend (booleans,
    /// mismatched kinds) switch at `f = 0.5`.
    pub fn interpolate(&self, to: &Self, f: f64) -> Self {
        if f <= 0.0 {
            return self.clone();
        }
        if f >= 1.0 {
            return to.clone();
        }
        match (self, to) {
            (Self::Number(a), Self::Number(b)) => Self::Number(a + (b - a) * f),
            (Self::Color(a), Self::Color(b)) => Self::Color(a.lerp(*b, f)),
            (Self::Gradient(a), Self::Gradient(b)) => Self::Gradient(a.lerp(b, f)),
            (Self::Range(a), Self::Range(b)) => Self::Range(a.lerp(*b, f)),
            (Self::Bool(_), Self::Bool(_))
            | (Self::Number(_), _)
            | (Self::Color(_), _)
            | (Self::Gradient(_), _)
            | (Self::Range(_), _)
            | (Self::Bool(_), _) => step(self, to, f),
        }
    }
}

#[inline(always)]
fn step(a: &VfxValue, b: &VfxValue, f: f64) -> VfxValue {
    if f < 0.5 { a.clone() } else { b.clone() }
}

/// A 1-D numeric span, e.g. a randomized particle size band.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    #[inline(always)]
    pub fn lerp(self, to: Self, f: f64) -> Self {
        Self {
            min: self.min + (to.min - self.min) * f,
            max: self.max + (to.max - self.max) * f,
        }
    }

    #[inline(always)]
    pub const fn mid(self) -> f64 {
        (self.min + self.max) * 0.5
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum GradientKind {
    #[default]
    Linear,
    Radial,
}

impl GradientKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Radial => "radial",
        }
    }
}

impl From<String> for GradientKind {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("radial") {
            Self::Radial
        } else {
            if !s.eq_ignore_ascii_case("linear") {
                debug!("Unknown gradient type '{s}', treating as linear.");
            }
            Self::Linear
        }
    }
}

impl fmt::Display for GradientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    /// 0.0..=1.0 along the gradient axis.
    pub position: f64,
    pub color: Color,
}

pub type GradientStops = SmallVec<[GradientStop; 4]>;

pub const DEFAULT_GRADIENT_ANGLE_DEG: f64 = 180.0;

const fn default_angle() -> f64 {
    DEFAULT_GRADIENT_ANGLE_DEG
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gradient {
    #[serde(rename = "type", default)]
    pub kind: GradientKind,
    /// CSS convention: 0° points up, 90° points right.
    #[serde(default = "default_angle")]
    pub angle: f64,
    pub stops: GradientStops,
    #[serde(skip)]
    stops_sorted: bool,
}

impl PartialEq for Gradient {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.angle == other.angle && self.stops == other.stops
    }
}

impl Gradient {
    pub fn new(kind: GradientKind, angle: f64, stops: impl IntoIterator<Item = GradientStop>) -> Self {
        Self {
            kind,
            angle,
            stops: stops.into_iter().collect(),
            stops_sorted: false,
        }
    }

    pub fn two_stop(top: Color, bottom: Color) -> Self {
        let mut g = Self::new(
            GradientKind::Linear,
            DEFAULT_GRADIENT_ANGLE_DEG,
            [
                GradientStop { position: 0.0, color: top },
                GradientStop { position: 1.0, color: bottom },
            ],
        );
        g.stops_sorted = true;
        g
    }

    #[inline(always)]
    pub const fn is_sorted(&self) -> bool {
        self.stops_sorted
    }

    /// Sorts stops by position once; later calls are free.
    pub fn sort_stops(&mut self) {
        if self.stops_sorted {
            return;
        }
        self.stops
            .sort_by(|a, b| a.position.total_cmp(&b.position));
        self.stops_sorted = true;
    }

    /// Pairs stops by index; the shorter list repeats its last stop.
    pub fn lerp(&self, to: &Self, f: f64) -> Self {
        let n = self.stops.len().max(to.stops.len());
        let mut stops = GradientStops::with_capacity(n);
        for i in 0..n {
            let a = self.stops.get(i).or_else(|| self.stops.last());
            let b = to.stops.get(i).or_else(|| to.stops.last());
            match (a, b) {
                (Some(a), Some(b)) => stops.push(GradientStop {
                    position: a.position + (b.position - a.position) * f,
                    color: a.color.lerp(b.color, f),
                }),
                (Some(s), None) | (None, Some(s)) => stops.push(*s),
                (None, None) => {}
            }
        }
        Self {
            kind: if f < 0.5 { self.kind } else { to.kind },
            angle: self.angle + (to.angle - self.angle) * f,
            stops,
            // Index-paired blends of two sorted lists stay sorted.
            stops_sorted: self.stops_sorted && to.stops_sorted,
        }
    }

    /// Color at `t` along the axis. Expects sorted stops.
    pub fn color_at(&self, t: f64) -> Color {
        let Some(first) = self.stops.first() else {
            return Color::BLACK;
        };
        if t <= first.position {
            return first.color;
        }
        let idx = self.stops.partition_point(|s| s.position <= t);
        if idx >= self.stops.len() {
            return self.stops[self.stops.len() - 1].color;
        }
        let a = &self.stops[idx - 1];
        let b = &self.stops[idx];
        let span = b.position - a.position;
        if span <= f64::EPSILON {
            return b.color;
        }
        a.color.lerp(b.color, (t - a.position) / span)
    }
}

#[cfg(test)]
mod tests {
    use super::{Gradient, GradientKind, GradientStop, NumericRange, VfxValue};
    use crate::ui::color::{Color, hex};

    fn stop(position: f64, color: &str) -> GradientStop {
        GradientStop { position, color: hex(color) }
    }

    #[test]
    fn untagged_json_shapes_map_to_variants() {
        let v: Vec<VfxValue> = serde_json::from_str(
            r##"[true, 2.5, "#ff0000",
                {"type":"radial","stops":[{"position":0,"color":"#000"}]},
                {"min":1,"max":3}]"##,
        )
        .expect("values should parse");
        assert_eq!(v[0], VfxValue::Bool(true));
        assert_eq!(v[1], VfxValue::Number(2.5));
        assert_eq!(v[2], VfxValue::Color(Color::rgb(255, 0, 0)));
        assert!(matches!(&v[3], VfxValue::Gradient(g) if g.kind == GradientKind::Radial));
        assert_eq!(v[4], VfxValue::Range(NumericRange { min: 1.0, max: 3.0 }));
    }

    #[test]
    fn legacy_gradient_types_coerce_to_linear() {
        let g: Gradient = serde_json::from_str(
            r##"{"type":"conic","stops":[{"position":0,"color":"#fff"}]}"##,
        )
        .expect("unknown gradient type must still parse");
        assert_eq!(g.kind, GradientKind::Linear);
        assert_eq!(g.angle, 180.0, "missing angle falls back to top-to-bottom");
    }

    #[test]
    fn numbers_blend_linearly_and_bools_step() {
        let a = VfxValue::Number(10.0);
        let b = VfxValue::Number(20.0);
        assert_eq!(a.interpolate(&b, 0.25), VfxValue::Number(12.5));
        let t = VfxValue::Bool(true);
        let f = VfxValue::Bool(false);
        assert_eq!(t.interpolate(&f, 0.49), t);
        assert_eq!(t.interpolate(&f, 0.5), f);
    }

    #[test]
    fn mismatched_kinds_step_at_half() {
        let a = VfxValue::Number(1.0);
        let b = VfxValue::Color(Color::WHITE);
        assert_eq!(a.interpolate(&b, 0.3), a);
        assert_eq!(a.interpolate(&b, 0.7), b);
    }

    #[test]
    fn gradient_blend_repeats_last_stop_of_shorter_list() {
        let a = Gradient::new(GradientKind::Linear, 0.0, [stop(0.0, "#000000"), stop(1.0, "#000000")]);
        let b = Gradient::new(
            GradientKind::Linear,
            90.0,
            [stop(0.0, "#ffffff"), stop(0.5, "#ffffff"), stop(1.0, "#ffffff")],
        );
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid.stops.len(), 3);
        assert_eq!(mid.angle, 45.0);
        // Third stop pairs a's last stop (pos 1.0) with b's third (pos 1.0).
        assert_eq!(mid.stops[2].position, 1.0);
        // Second stop pairs pos 1.0 with pos 0.5.
        assert!((mid.stops[1].position - 0.75).abs() < 1e-12);
        assert_eq!(mid.stops[1].color, Color::rgb(128, 128, 128));
    }

    #[test]
    fn gradient_endpoints_resolve_verbatim() {
        let a = VfxValue::Gradient(Gradient::two_stop(hex("#111111"), hex("#222222")));
        let b = VfxValue::Gradient(Gradient::new(
            GradientKind::Radial,
            0.0,
            [stop(0.0, "#ffffff"), stop(0.3, "#000000"), stop(1.0, "#ff0000")],
        ));
        assert_eq!(a.interpolate(&b, 0.0), a);
        assert_eq!(a.interpolate(&b, 1.0), b);
    }

    #[test]
    fn sort_stops_runs_once_and_color_at_samples_between_stops() {
        let mut g = Gradient::new(GradientKind::Linear, 180.0, [stop(1.0, "#ffffff"), stop(0.0, "#000000")]);
        assert!(!g.is_sorted());
        g.sort_stops();
        assert!(g.is_sorted());
        assert_eq!(g.stops[0].position, 0.0);
        assert_eq!(g.color_at(-1.0), Color::BLACK);
        assert_eq!(g.color_at(0.5), Color::rgb(128, 128, 128));
        assert_eq!(g.color_at(2.0), Color::WHITE);
    }
}
