use crate::vfx::value::{Gradient, GradientKind};
use glam::Vec2;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

pub const DEFAULT_CAPACITY: usize = 12;
pub const DEFAULT_CROSSFADE_MS: f64 = 300.0;
pub const DEFAULT_BASE_WIDTH: u32 = 256;
pub const DEFAULT_BASE_HEIGHT: u32 = 144;

/// Render scale per quality tier, best first.
pub const QUALITY_TIERS: [f32; 4] = [1.0, 0.75, 0.5, 0.25];

/// Rolling-average generation cost above which quality drops a tier.
pub const SLOW_GENERATION_MS: f64 = 1.2;
/// Rolling-average generation cost below which quality climbs a tier.
pub const FAST_GENERATION_MS: f64 = 0.4;

const COST_WINDOW: usize = 8;
const QUALITY_COOLDOWN_GENERATIONS: u32 = 16;

// Segment-adaptive quantization of gradient blend factors.
const QUANT_MS_PER_STEP: f64 = 50.0;
const QUANT_MIN_STEPS: f64 = 4.0;
const QUANT_MAX_STEPS: f64 = 48.0;

/// Snaps an eased blend factor to a step count derived from the segment span,
/// so a slowly animating gradient reuses a handful of snapshots instead of
/// rasterizing one per frame. Endpoints (and overshoot) pass through.
#[inline(always)]
pub fn quantize_blend_factor(f: f64, span_ms: f64) -> f64 {
    if f <= 0.0 || f >= 1.0 || !span_ms.is_finite() {
        return f;
    }
    let steps = (span_ms / QUANT_MS_PER_STEP)
        .round()
        .clamp(QUANT_MIN_STEPS, QUANT_MAX_STEPS);
    (f * steps).round() / steps
}

/// A rasterized gradient, straight-alpha RGBA8, row-major.
#[derive(Debug)]
pub struct GradientSnapshot {
    pub width: u32,
    pub height: u32,
    pub quality: f32,
    pub pixels: Vec<u8>,
}

impl GradientSnapshot {
    #[inline(always)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        let px = self.pixels.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SnapshotKey {
    kind: GradientKind,
    angle_centideg: i64,
    stops: SmallVec<[(i32, [u8; 4]); 4]>,
    tier: u8,
}

fn snapshot_key(g: &Gradient, tier: usize) -> SnapshotKey {
    debug_assert!(g.is_sorted());
    SnapshotKey {
        kind: g.kind,
        angle_centideg: (g.angle.rem_euclid(360.0) * 100.0).round() as i64,
        stops: g
            .stops
            .iter()
            .map(|s| ((s.position * 10_000.0).round() as i32, s.color.to_rgba8()))
            .collect(),
        tier: tier as u8,
    }
}

struct CacheEntry {
    snapshot: Rc<GradientSnapshot>,
    last_used: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct GradientSnapshotCache {
    entries: FxHashMap<SnapshotKey, CacheEntry>,
    capacity: usize,
    base_width: u32,
    base_height: u32,
    tick: u64,
    tier: usize,
    costs: VecDeque<f64>,
    cooldown: u32,
    stats: CacheStats,
}

impl Default for GradientSnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_BASE_WIDTH, DEFAULT_BASE_HEIGHT)
    }
}

impl GradientSnapshotCache {
    pub fn new(capacity: usize, base_width: u32, base_height: u32) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: capacity.max(1),
            base_width: base_width.max(1),
            base_height: base_height.max(1),
            tick: 0,
            tier: 0,
            costs: VecDeque::with_capacity(COST_WINDOW),
            cooldown: 0,
            stats: CacheStats::default(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline(always)]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    #[inline(always)]
    pub fn quality_scale(&self) -> f32 {
        QUALITY_TIERS[self.tier]
    }

    /// Returns the snapshot for `gradient` at the current quality tier,
    /// rasterizing it on a miss. Equal gradients always share one snapshot.
    pub fn snapshot(&mut self, gradient: &Gradient) -> Rc<GradientSnapshot> {
        let g: Cow<'_, Gradient> = if gradient.is_sorted() {
            Cow::Borrowed(gradient)
        } else {
            let mut owned = gradient.clone();
            owned.sort_stops();
            Cow::Owned(owned)
        };
        self.tick = self.tick.wrapping_add(1);
        let key = snapshot_key(&g, self.tier);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = self.tick;
            self.stats.hits = self.stats.hits.saturating_add(1);
            return entry.snapshot.clone();
        }
        self.stats.misses = self.stats.misses.saturating_add(1);

        let scale = self.quality_scale();
        let width = ((self.base_width as f32 * scale).round() as u32).max(1);
        let height = ((self.base_height as f32 * scale).round() as u32).max(1);
        let started = Instant::now();
        let pixels = rasterize(&g, width, height);
        let cost_ms = started.elapsed().as_secs_f64() * 1000.0;
        trace!("Rasterized {} gradient {width}x{height} in {cost_ms:.3}ms.", g.kind);

        let snapshot = Rc::new(GradientSnapshot {
            width,
            height,
            quality: scale,
            pixels,
        });
        self.entries.insert(
            key,
            CacheEntry {
                snapshot: snapshot.clone(),
                last_used: self.tick,
            },
        );
        self.evict_to_capacity();
        self.record_generation_cost(cost_ms);
        snapshot
    }

    fn evict_to_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions = self.stats.evictions.saturating_add(1);
        }
    }

    /// Feeds one generation time into the rolling average and moves the
    /// quality tier when the average leaves the comfort band.
    pub fn record_generation_cost(&mut self, cost_ms: f64) {
        if self.costs.len() == COST_WINDOW {
            self.costs.pop_front();
        }
        self.costs.push_back(cost_ms.max(0.0));
        self.cooldown = self.cooldown.saturating_sub(1);
        if self.cooldown > 0 || self.costs.len() < COST_WINDOW {
            return;
        }
        let avg = self.costs.iter().sum::<f64>() / self.costs.len() as f64;
        let next = if avg > SLOW_GENERATION_MS && self.tier + 1 < QUALITY_TIERS.len() {
            self.tier + 1
        } else if avg < FAST_GENERATION_MS && self.tier > 0 {
            self.tier - 1
        } else {
            return;
        };
        debug!(
            "Gradient generation averaging {avg:.2}ms; quality {:.2}x -> {:.2}x.",
            QUALITY_TIERS[self.tier], QUALITY_TIERS[next]
        );
        self.tier = next;
        self.cooldown = QUALITY_COOLDOWN_GENERATIONS;
        self.costs.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.costs.clear();
    }
}

fn rasterize(g: &Gradient, width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width as usize) * (height as usize) * 4);
    let size = Vec2::new(width as f32, height as f32);
    let center = size * 0.5;
    // 0° points up, angles run clockwise; screen y grows downward.
    let theta = (g.angle as f32).to_radians();
    let dir = Vec2::new(theta.sin(), -theta.cos());
    let line_len = (size.x * theta.sin()).abs() + (size.y * theta.cos()).abs();
    let radius = center.length();

    for y in 0..height {
        for x in 0..width {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - center;
            let t = match g.kind {
                GradientKind::Linear if line_len > f32::EPSILON => p.dot(dir) / line_len + 0.5,
                GradientKind::Radial if radius > f32::EPSILON => p.length() / radius,
                _ => 0.0,
            };
            pixels.extend_from_slice(&g.color_at(f64::from(t)).to_rgba8());
        }
    }
    pixels
}

/// What the renderer draws behind the playfield this frame: `current` at
/// `blend_alpha` over `previous`.
#[derive(Clone, Debug)]
pub struct BackgroundFrame {
    pub current: Rc<GradientSnapshot>,
    pub previous: Option<Rc<GradientSnapshot>>,
    pub blend_alpha: f32,
}

/// Cross-fades between successive snapshots over a fixed span of game time.
#[derive(Debug)]
pub struct GradientCrossfade {
    duration_ms: f64,
    current: Option<Rc<GradientSnapshot>>,
    previous: Option<Rc<GradientSnapshot>>,
    started_ms: f64,
}

impl Default for GradientCrossfade {
    fn default() -> Self {
        Self::new(DEFAULT_CROSSFADE_MS)
    }
}

impl GradientCrossfade {
    pub const fn new(duration_ms: f64) -> Self {
        Self {
            duration_ms,
            current: None,
            previous: None,
            started_ms: 0.0,
        }
    }

    pub fn present(&mut self, snapshot: Rc<GradientSnapshot>, game_ms: f64) -> BackgroundFrame {
        let changed = self
            .current
            .as_ref()
            .is_none_or(|cur| !Rc::ptr_eq(cur, &snapshot));
        if changed {
            self.previous = self.current.take();
            self.current = Some(snapshot.clone());
            self.started_ms = game_ms;
        }

        let alpha = if self.previous.is_none() || self.duration_ms <= 0.0 {
            1.0
        } else {
            ((game_ms - self.started_ms) / self.duration_ms).clamp(0.0, 1.0)
        };
        if alpha >= 1.0 {
            self.previous = None;
        }
        BackgroundFrame {
            current: snapshot,
            previous: self.previous.clone(),
            blend_alpha: alpha as f32,
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        GradientCrossfade, GradientSnapshotCache, QUALITY_TIERS, quantize_blend_factor,
    };
    use crate::ui::color::hex;
    use crate::vfx::value::{Gradient, GradientKind, GradientStop};
    use std::rc::Rc;

    fn grad(a: &str, b: &str) -> Gradient {
        Gradient::two_stop(hex(a), hex(b))
    }

    #[test]
    fn equal_gradients_share_one_snapshot() {
        let mut cache = GradientSnapshotCache::new(12, 16, 8);
        let a = cache.snapshot(&grad("#000000", "#ffffff"));
        let b = cache.snapshot(&grad("#000000", "#ffffff"));
        assert!(Rc::ptr_eq(&a, &b), "identical input must hit the cache");
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);

        // Unsorted stops canonicalize to the same key.
        let unsorted = Gradient::new(
            GradientKind::Linear,
            180.0,
            [
                GradientStop { position: 1.0, color: hex("#ffffff") },
                GradientStop { position: 0.0, color: hex("#000000") },
            ],
        );
        let c = cache.snapshot(&unsorted);
        assert!(Rc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used_past_capacity() {
        let mut cache = GradientSnapshotCache::new(2, 4, 4);
        let first = cache.snapshot(&grad("#000000", "#111111"));
        let _ = cache.snapshot(&grad("#000000", "#222222"));
        // Touch the first so the second becomes the oldest.
        let _ = cache.snapshot(&grad("#000000", "#111111"));
        let _ = cache.snapshot(&grad("#000000", "#333333"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        let again = cache.snapshot(&grad("#000000", "#111111"));
        assert!(Rc::ptr_eq(&first, &again), "recently used entry must survive");
    }

    #[test]
    fn vertical_gradient_runs_top_to_bottom() {
        let mut cache = GradientSnapshotCache::new(4, 1, 64);
        let snap = cache.snapshot(&grad("#000000", "#ffffff"));
        let top = snap.pixel(0, 0).expect("top pixel");
        let bottom = snap.pixel(0, 63).expect("bottom pixel");
        assert!(top[0] < 8, "180° starts with the first stop at the top, got {top:?}");
        assert!(bottom[0] > 247, "and ends at the bottom, got {bottom:?}");
        assert_eq!(snap.pixel(1, 0), None);
    }

    #[test]
    fn quality_adapts_to_generation_cost_with_cooldown() {
        let mut cache = GradientSnapshotCache::new(4, 16, 16);
        for _ in 0..8 {
            cache.record_generation_cost(2.0);
        }
        assert_eq!(cache.quality_scale(), QUALITY_TIERS[1]);
        for _ in 0..8 {
            cache.record_generation_cost(2.0);
        }
        assert_eq!(cache.quality_scale(), QUALITY_TIERS[1], "cooldown holds the tier");
        for _ in 0..200 {
            cache.record_generation_cost(2.0);
        }
        assert_eq!(cache.quality_scale(), 0.25, "never drops below the lowest tier");
        for _ in 0..200 {
            cache.record_generation_cost(0.8);
        }
        assert_eq!(cache.quality_scale(), 0.25, "comfort band leaves quality alone");
        for _ in 0..200 {
            cache.record_generation_cost(0.1);
        }
        assert_eq!(cache.quality_scale(), 1.0);
    }

    #[test]
    fn quality_tier_is_part_of_the_key() {
        let mut cache = GradientSnapshotCache::new(4, 16, 16);
        let full = cache.snapshot(&grad("#000000", "#ffffff"));
        for _ in 0..8 {
            cache.record_generation_cost(5.0);
        }
        let reduced = cache.snapshot(&grad("#000000", "#ffffff"));
        assert!(!Rc::ptr_eq(&full, &reduced));
        assert_eq!(reduced.width, 12);
        assert_eq!(reduced.quality, 0.75);
    }

    #[test]
    fn crossfade_blends_over_game_time() {
        let mut cache = GradientSnapshotCache::new(4, 2, 2);
        let a = cache.snapshot(&grad("#000000", "#000000"));
        let b = cache.snapshot(&grad("#ffffff", "#ffffff"));
        let mut fade = GradientCrossfade::new(300.0);

        let f = fade.present(a.clone(), 0.0);
        assert_eq!(f.blend_alpha, 1.0);
        assert!(f.previous.is_none());

        let f = fade.present(b.clone(), 1000.0);
        assert_eq!(f.blend_alpha, 0.0);
        assert!(f.previous.as_ref().is_some_and(|p| Rc::ptr_eq(p, &a)));

        let f = fade.present(b.clone(), 1150.0);
        assert!((f.blend_alpha - 0.5).abs() < 1e-6);

        let f = fade.present(b, 1300.0);
        assert_eq!(f.blend_alpha, 1.0);
        assert!(f.previous.is_none(), "finished fades release the old snapshot");
    }

    #[test]
    fn quantization_scales_with_segment_span() {
        assert_eq!(quantize_blend_factor(0.0, 1000.0), 0.0);
        assert_eq!(quantize_blend_factor(1.0, 1000.0), 1.0);
        // 200ms span → 4 steps.
        assert_eq!(quantize_blend_factor(0.3, 200.0), 0.25);
        // 1000ms span → 20 steps.
        assert_eq!(quantize_blend_factor(0.33, 1000.0), 0.35);
        let mut prev = 0.0;
        for i in 0..=100 {
            let q = quantize_blend_factor(f64::from(i) / 100.0, 2000.0);
            assert!(q >= prev, "quantized factor must be monotonic");
            prev = q;
        }
    }
}
