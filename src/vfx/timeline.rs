use crate::vfx::easing::Easing;
use crate::vfx::value::VfxValue;
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Keyframes closer than this collapse into one (last write wins).
pub const DEFAULT_DEDUP_TOLERANCE_MS: f64 = 10.0;

/// A first keyframe within this distance of 0 is the timeline's start value.
pub const ZERO_TIME_EPSILON_MS: f64 = 1.0;

/// Resolver memo granularity.
pub const MEMO_QUANTUM_MS: f64 = 0.25;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub time_ms: f64,
    pub value: VfxValue,
    #[serde(default)]
    pub easing: Easing,
}

impl Keyframe {
    pub const fn new(time_ms: f64, value: VfxValue, easing: Easing) -> Self {
        Self { time_ms, value, easing }
    }
}

/// Where a resolved value came from, used by the segment-adaptive gradient
/// quantizer to pick a step count from the segment's span.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment {
    pub start_ms: f64,
    pub end_ms: f64,
}

impl Segment {
    #[inline(always)]
    pub fn span_ms(&self) -> f64 {
        (self.end_ms - self.start_ms).max(0.0)
    }
}

#[derive(Clone, Debug)]
pub struct PropertyTimeline {
    path: String,
    default: VfxValue,
    keyframes: Vec<Keyframe>,
    dedup_tolerance_ms: f64,
}

impl PropertyTimeline {
    pub fn new(path: impl Into<String>, default: VfxValue) -> Self {
        Self {
            path: path.into(),
            default,
            keyframes: Vec::new(),
            dedup_tolerance_ms: DEFAULT_DEDUP_TOLERANCE_MS,
        }
    }

    /// Builds a timeline from untrusted keyframes: sorts them, then
    /// collapses near-duplicates in input order.
    pub fn from_keyframes(
        path: impl Into<String>,
        default: VfxValue,
        keyframes: Vec<Keyframe>,
        dedup_tolerance_ms: f64,
    ) -> Self {
        let mut tl = Self::new(path, default);
        tl.dedup_tolerance_ms = dedup_tolerance_ms.max(0.0);
        let sorted = keyframes.windows(2).all(|w| w[0].time_ms <= w[1].time_ms);
        if !sorted {
            debug!("Timeline '{}' keyframes out of order; sorting.", tl.path);
        }
        for kf in keyframes {
            if kf.time_ms.is_finite() {
                tl.insert(kf);
            }
        }
        tl
    }

    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub const fn default_value(&self) -> &VfxValue {
        &self.default
    }

    #[inline(always)]
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Inserts keeping time order. Every existing keyframe within the dedup
    /// tolerance of the new one is replaced by it, so no two keyframes end up
    /// closer than the tolerance. Returns the index it landed at.
    pub fn insert(&mut self, kf: Keyframe) -> usize {
        let tol = self.dedup_tolerance_ms;
        let before = self.keyframes.len();
        self.keyframes.retain(|k| (k.time_ms - kf.time_ms).abs() > tol);
        let replaced = before - self.keyframes.len();
        if replaced > 1 {
            debug!(
                "Timeline '{}': keyframe at {:.1}ms replaced {replaced} neighbours.",
                self.path, kf.time_ms
            );
        }
        let idx = self.keyframes.partition_point(|k| k.time_ms <= kf.time_ms);
        self.keyframes.insert(idx, kf);
        idx
    }

    /// Removes the keyframe within tolerance of `time_ms`, if any.
    pub fn remove_near(&mut self, time_ms: f64) -> Option<Keyframe> {
        let tol = self.dedup_tolerance_ms;
        let i = self
            .keyframes
            .iter()
            .position(|k| (k.time_ms - time_ms).abs() <= tol)?;
        Some(self.keyframes.remove(i))
    }

    pub fn value_at(&self, t: f64) -> VfxValue {
        self.sample(t, &|f, _| f).0
    }

    /// Resolves the value at `t`, letting the caller remap the eased blend
    /// factor (given the active segment) before interpolation.
    pub fn sample(&self, t: f64, remap: &dyn Fn(f64, Segment) -> f64) -> (VfxValue, Option<Segment>) {
        let Some(first) = self.keyframes.first() else {
            return (self.default.clone(), None);
        };

        if t < first.time_ms {
            if first.time_ms <= ZERO_TIME_EPSILON_MS {
                return (first.value.clone(), None);
            }
            // Animate in from the default, timed from 0 with the first keyframe's easing.
            let seg = Segment { start_ms: 0.0, end_ms: first.time_ms };
            if first.easing.is_instant() {
                return (self.default.clone(), Some(seg));
            }
            let local = (t / first.time_ms).clamp(0.0, 1.0);
            let f = remap(first.easing.apply(local), seg);
            return (self.default.interpolate(&first.value, f), Some(seg));
        }

        let last = &self.keyframes[self.keyframes.len() - 1];
        if t >= last.time_ms {
            return (last.value.clone(), None);
        }

        let idx = self.keyframes.partition_point(|k| k.time_ms <= t);
        let a = &self.keyframes[idx - 1];
        let b = &self.keyframes[idx];
        let seg = Segment { start_ms: a.time_ms, end_ms: b.time_ms };
        let span = b.time_ms - a.time_ms;
        if span <= f64::EPSILON || a.easing.is_instant() {
            return (a.value.clone(), Some(seg));
        }
        let local = (t - a.time_ms) / span;
        let f = remap(a.easing.apply(local), seg);
        (a.value.interpolate(&b.value, f), Some(seg))
    }
}

/// Per-frame memo over timeline resolution. Keys are the owning set's
/// timeline index plus the quantized query time; `begin_frame` clears it.
#[derive(Debug, Default)]
pub struct KeyframeResolver {
    memo: FxHashMap<(usize, i64), VfxValue>,
    hits: u64,
    misses: u64,
}

impl KeyframeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn begin_frame(&mut self) {
        self.memo.clear();
    }

    pub fn resolve(&mut self, id: usize, timeline: &PropertyTimeline, t: f64) -> VfxValue {
        if timeline.is_empty() {
            return timeline.default_value().clone();
        }
        let key = (id, (t / MEMO_QUANTUM_MS).round() as i64);
        if let Some(v) = self.memo.get(&key) {
            self.hits += 1;
            return v.clone();
        }
        self.misses += 1;
        let v = timeline.value_at(t);
        self.memo.insert(key, v.clone());
        v
    }

    #[inline(always)]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
