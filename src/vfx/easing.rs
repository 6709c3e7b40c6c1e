//! Penner easing curves used by keyframe segments.
//!
//! Every curve maps `t ∈ [0, 1]` to a blend factor with `f(0) = 0` and
//! `f(1) = 1`. Back and elastic overshoot in between; everything else stays
//! inside the unit range.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EasingCurve {
    #[default]
    Linear,
    Quad,
    Cubic,
    Quart,
    Quint,
    Sine,
    Expo,
    Circ,
    Back,
    Elastic,
    Bounce,
    Bezier,
    Instant,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EasingStyle {
    #[serde(rename = "in")]
    In,
    #[default]
    #[serde(rename = "out")]
    Out,
    #[serde(rename = "inOut", alias = "inout", alias = "in-out")]
    InOut,
}

/// CSS `ease` control points, used when a bezier easing carries none.
pub const DEFAULT_BEZIER: [f64; 4] = [0.25, 0.1, 0.25, 1.0];

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Easing {
    pub curve: EasingCurve,
    pub style: EasingStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bezier: Option<[f64; 4]>,
}

impl Easing {
    pub const LINEAR: Self = Self::new(EasingCurve::Linear, EasingStyle::Out);
    pub const INSTANT: Self = Self::new(EasingCurve::Instant, EasingStyle::Out);

    pub const fn new(curve: EasingCurve, style: EasingStyle) -> Self {
        Self { curve, style, bezier: None }
    }

    pub const fn bezier(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            curve: EasingCurve::Bezier,
            style: EasingStyle::Out,
            bezier: Some([x1, y1, x2, y2]),
        }
    }

    #[inline(always)]
    pub const fn is_instant(&self) -> bool {
        matches!(self.curve, EasingCurve::Instant)
    }

    /// Maps a segment-local progress to a blend factor.
    pub fn apply(&self, t: f64) -> f64 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self.curve {
            EasingCurve::Linear => t,
            EasingCurve::Instant => {
                if t >= 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            EasingCurve::Bezier => {
                let [x1, y1, x2, y2] = self.bezier.unwrap_or(DEFAULT_BEZIER);
                cubic_bezier(x1, y1, x2, y2, t)
            }
            curve => match self.style {
                EasingStyle::In => ease_in(curve, t),
                EasingStyle::Out => ease_out(curve, t),
                EasingStyle::InOut => ease_in_out(curve, t),
            },
        }
    }
}

const BACK_C1: f64 = 1.70158;
const BACK_C2: f64 = BACK_C1 * 1.525;
const BACK_C3: f64 = BACK_C1 + 1.0;
const ELASTIC_C4: f64 = (2.0 * PI) / 3.0;
const ELASTIC_C5: f64 = (2.0 * PI) / 4.5;

fn ease_in(curve: EasingCurve, t: f64) -> f64 {
    match curve {
        EasingCurve::Quad => t * t,
        EasingCurve::Cubic => t * t * t,
        EasingCurve::Quart => t.powi(4),
        EasingCurve::Quint => t.powi(5),
        EasingCurve::Sine => 1.0 - (t * PI / 2.0).cos(),
        EasingCurve::Expo => {
            if t <= 0.0 {
                0.0
            } else {
                2f64.powf(10.0 * t - 10.0)
            }
        }
        EasingCurve::Circ => 1.0 - (1.0 - t * t).max(0.0).sqrt(),
        EasingCurve::Back => BACK_C3 * t * t * t - BACK_C1 * t * t,
        EasingCurve::Elastic => {
            if t <= 0.0 {
                0.0
            } else if t >= 1.0 {
                1.0
            } else {
                -(2f64.powf(10.0 * t - 10.0)) * ((t * 10.0 - 10.75) * ELASTIC_C4).sin()
            }
        }
        EasingCurve::Bounce => 1.0 - bounce_out(1.0 - t),
        EasingCurve::Linear | EasingCurve::Bezier | EasingCurve::Instant => t,
    }
}

fn ease_out(curve: EasingCurve, t: f64) -> f64 {
    match curve {
        EasingCurve::Quad => 1.0 - (1.0 - t) * (1.0 - t),
        EasingCurve::Cubic => 1.0 - (1.0 - t).powi(3),
        EasingCurve::Quart => 1.0 - (1.0 - t).powi(4),
        EasingCurve::Quint => 1.0 - (1.0 - t).powi(5),
        EasingCurve::Sine => (t * PI / 2.0).sin(),
        EasingCurve::Expo => {
            if t >= 1.0 {
                1.0
            } else {
                1.0 - 2f64.powf(-10.0 * t)
            }
        }
        EasingCurve::Circ => (1.0 - (t - 1.0) * (t - 1.0)).max(0.0).sqrt(),
        EasingCurve::Back => 1.0 + BACK_C3 * (t - 1.0).powi(3) + BACK_C1 * (t - 1.0).powi(2),
        EasingCurve::Elastic => {
            if t <= 0.0 {
                0.0
            } else if t >= 1.0 {
                1.0
            } else {
                2f64.powf(-10.0 * t) * ((t * 10.0 - 0.75) * ELASTIC_C4).sin() + 1.0
            }
        }
        EasingCurve::Bounce => bounce_out(t),
        EasingCurve::Linear | EasingCurve::Bezier | EasingCurve::Instant => t,
    }
}

fn ease_in_out(curve: EasingCurve, t: f64) -> f64 {
    match curve {
        EasingCurve::Quad => {
            if t < 0.5 {
                2.0 * t * t
            } else {
                1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
            }
        }
        EasingCurve::Cubic => {
            if t < 0.5 {
                4.0 * t * t * t
            } else {
                1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
            }
        }
        EasingCurve::Quart => {
            if t < 0.5 {
                8.0 * t.powi(4)
            } else {
                1.0 - (-2.0 * t + 2.0).powi(4) / 2.0
            }
        }
        EasingCurve::Quint => {
            if t < 0.5 {
                16.0 * t.powi(5)
            } else {
                1.0 - (-2.0 * t + 2.0).powi(5) / 2.0
            }
        }
        EasingCurve::Sine => -((PI * t).cos() - 1.0) / 2.0,
        EasingCurve::Expo => {
            if t <= 0.0 {
                0.0
            } else if t >= 1.0 {
                1.0
            } else if t < 0.5 {
                2f64.powf(20.0 * t - 10.0) / 2.0
            } else {
                (2.0 - 2f64.powf(-20.0 * t + 10.0)) / 2.0
            }
        }
        EasingCurve::Circ => {
            if t < 0.5 {
                (1.0 - (1.0 - (2.0 * t).powi(2)).max(0.0).sqrt()) / 2.0
            } else {
                ((1.0 - (-2.0 * t + 2.0).powi(2)).max(0.0).sqrt() + 1.0) / 2.0
            }
        }
        EasingCurve::Back => {
            if t < 0.5 {
                ((2.0 * t).powi(2) * ((BACK_C2 + 1.0) * 2.0 * t - BACK_C2)) / 2.0
            } else {
                ((2.0 * t - 2.0).powi(2) * ((BACK_C2 + 1.0) * (t * 2.0 - 2.0) + BACK_C2) + 2.0)
                    / 2.0
            }
        }
        EasingCurve::Elastic => {
            if t <= 0.0 {
                0.0
            } else if t >= 1.0 {
                1.0
            } else if t < 0.5 {
                -(2f64.powf(20.0 * t - 10.0) * ((20.0 * t - 11.125) * ELASTIC_C5).sin()) / 2.0
            } else {
                (2f64.powf(-20.0 * t + 10.0) * ((20.0 * t - 11.125) * ELASTIC_C5).sin()) / 2.0
                    + 1.0
            }
        }
        EasingCurve::Bounce => {
            if t < 0.5 {
                (1.0 - bounce_out(1.0 - 2.0 * t)) / 2.0
            } else {
                (1.0 + bounce_out(2.0 * t - 1.0)) / 2.0
            }
        }
        EasingCurve::Linear | EasingCurve::Bezier | EasingCurve::Instant => t,
    }
}

fn bounce_out(t: f64) -> f64 {
    const N1: f64 = 7.5625;
    const D1: f64 = 2.75;
    if t < 1.0 / D1 {
        N1 * t * t
    } else if t < 2.0 / D1 {
        let t = t - 1.5 / D1;
        N1 * t * t + 0.75
    } else if t < 2.5 / D1 {
        let t = t - 2.25 / D1;
        N1 * t * t + 0.9375
    } else {
        let t = t - 2.625 / D1;
        N1 * t * t + 0.984375
    }
}

/// CSS `cubic-bezier()` timing function: solves x(s) = t for s, returns y(s).
fn cubic_bezier(x1: f64, y1: f64, x2: f64, y2: f64, t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    if t >= 1.0 {
        return 1.0;
    }
    // Control x values outside [0, 1] make x(s) non-monotonic.
    let x1 = x1.clamp(0.0, 1.0);
    let x2 = x2.clamp(0.0, 1.0);

    let sample = |a1: f64, a2: f64, s: f64| {
        let inv = 1.0 - s;
        3.0 * inv * inv * s * a1 + 3.0 * inv * s * s * a2 + s * s * s
    };
    let slope = |a1: f64, a2: f64, s: f64| {
        let inv = 1.0 - s;
        3.0 * inv * inv * a1 + 6.0 * inv * s * (a2 - a1) + 3.0 * s * s * (1.0 - a2)
    };

    let mut s = t;
    for _ in 0..8 {
        let err = sample(x1, x2, s) - t;
        if err.abs() < 1e-7 {
            return sample(y1, y2, s);
        }
        let d = slope(x1, x2, s);
        if d.abs() < 1e-6 {
            break;
        }
        s -= err / d;
    }

    // Newton stalled on a flat spot; bisect.
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    s = t;
    for _ in 0..40 {
        let x = sample(x1, x2, s);
        if (x - t).abs() < 1e-7 {
            break;
        }
        if x < t {
            lo = s;
        } else {
            hi = s;
        }
        s = (lo + hi) * 0.5;
    }
    sample(y1, y2, s)
}
