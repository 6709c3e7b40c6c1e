// Shared timing window definitions so judgment, hold tracking and miss
// detection agree. All windows are in milliseconds, symmetric around the note.

pub const PERFECT_MS: f64 = 30.0;
pub const GREAT_MS: f64 = 65.0;
pub const GOOD_MS: f64 = 100.0;

// Outer edge of judgment: inside it a press still consumes the note (as a
// Miss past Good), beyond it on the late side the note is passed.
pub const MISS_AFTER_MS: f64 = 120.0;

// A hold head nobody pressed is broken this late.
pub const HOLD_INITIAL_MISS_MS: f64 = 150.0;

pub const DEFAULT_HOLD_RELEASE_GRACE_MS: f64 = 50.0;

#[inline(always)]
pub fn is_passed(dt_ms: f64) -> bool {
    dt_ms > MISS_AFTER_MS
}

#[inline(always)]
pub fn is_too_early(dt_ms: f64) -> bool {
    dt_ms < -MISS_AFTER_MS
}
