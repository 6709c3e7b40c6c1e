use log::debug;
use smallvec::SmallVec;

pub const DEFAULT_LOGIC_RATE_HZ: f64 = 120.0;
pub const MAX_STEPS_PER_FRAME: u32 = 8;
/// Logic trailing game time by more than this after hitting the step cap
/// snaps straight to game time.
pub const SNAP_THRESHOLD_MS: f64 = 50.0;
pub const VISUAL_EPSILON_MS: f64 = 0.5;

/// What one frame's worth of game-time movement turned into.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepPlan {
    /// Logic time after each step taken this frame, in order.
    pub logic_times: SmallVec<[f64; 8]>,
    pub visual_ms: f64,
    pub snapped: bool,
}

/// Fixed-step logic clock with interpolated visual time.
#[derive(Debug)]
pub struct FixedStepInterpolator {
    step_ms: f64,
    acc_ms: f64,
    prev_ms: f64,
    cur_ms: f64,
    last_game_ms: Option<f64>,
}

impl Default for FixedStepInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIC_RATE_HZ)
    }
}

impl FixedStepInterpolator {
    pub fn new(rate_hz: f64) -> Self {
        let rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 {
            rate_hz
        } else {
            DEFAULT_LOGIC_RATE_HZ
        };
        Self {
            step_ms: 1000.0 / rate_hz,
            acc_ms: 0.0,
            prev_ms: 0.0,
            cur_ms: 0.0,
            last_game_ms: None,
        }
    }

    #[inline(always)]
    pub const fn step_ms(&self) -> f64 {
        self.step_ms
    }

    #[inline(always)]
    pub const fn logic_ms(&self) -> f64 {
        self.cur_ms
    }

    /// Jumps logic and visual time to `game_ms` with an empty accumulator.
    pub fn reset(&mut self, game_ms: f64) {
        self.acc_ms = 0.0;
        self.prev_ms = game_ms;
        self.cur_ms = game_ms;
        self.last_game_ms = Some(game_ms);
    }

    fn pinned(&mut self, game_ms: f64) -> StepPlan {
        self.reset(game_ms);
        let mut logic_times = SmallVec::new();
        logic_times.push(game_ms);
        StepPlan {
            logic_times,
            visual_ms: game_ms,
            snapped: false,
        }
    }

    pub fn advance(&mut self, game_ms: f64) -> StepPlan {
        let Some(last) = self.last_game_ms else {
            return self.pinned(game_ms);
        };
        // Countdown runs logic in lockstep with game time.
        if game_ms < 0.0 {
            return self.pinned(game_ms);
        }
        let dt = game_ms - last;
        if dt < 0.0 {
            debug!("Game time moved back {:.1}ms; resetting the step clock.", -dt);
            return self.pinned(game_ms);
        }
        self.last_game_ms = Some(game_ms);
        self.acc_ms += dt;

        let mut plan = StepPlan::default();
        let mut steps = 0;
        while self.acc_ms >= self.step_ms && steps < MAX_STEPS_PER_FRAME {
            self.prev_ms = self.cur_ms;
            self.cur_ms += self.step_ms;
            self.acc_ms -= self.step_ms;
            plan.logic_times.push(self.cur_ms);
            steps += 1;
        }

        if self.acc_ms >= self.step_ms && game_ms - self.cur_ms > SNAP_THRESHOLD_MS {
            debug!(
                "Step cap hit {:.1}ms behind game time; snapping.",
                game_ms - self.cur_ms
            );
            self.prev_ms = game_ms;
            self.cur_ms = game_ms;
            self.acc_ms = 0.0;
            plan.logic_times.push(game_ms);
            plan.snapped = true;
        }

        let alpha = (self.acc_ms / self.step_ms).clamp(0.0, 1.0);
        let visual = self.prev_ms + (self.cur_ms - self.prev_ms) * alpha;
        plan.visual_ms = visual.min(game_ms + VISUAL_EPSILON_MS);
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedStepInterpolator, MAX_STEPS_PER_FRAME};

    #[test]
    fn countdown_keeps_logic_on_game_time() {
        let mut s = FixedStepInterpolator::new(120.0);
        for t in [-2000.0, -1983.0, -1500.0, -1.0] {
            let plan = s.advance(t);
            assert_eq!(plan.logic_times.as_slice(), &[t]);
            assert_eq!(plan.visual_ms, t);
        }
    }

    #[test]
    fn sixty_fps_takes_two_steps_per_frame() {
        let mut s = FixedStepInterpolator::new(120.0);
        s.advance(0.0);
        let mut prev_visual = 0.0;
        for i in 1..=120 {
            let game = f64::from(i) * 1000.0 / 60.0;
            let plan = s.advance(game);
            assert!(
                (1..=3).contains(&plan.logic_times.len()),
                "frame {i} took {} steps",
                plan.logic_times.len()
            );
            assert!(plan.visual_ms >= prev_visual, "visual time must not go backwards");
            assert!(plan.visual_ms <= game + 0.5);
            assert!(!plan.snapped);
            prev_visual = plan.visual_ms;
        }
        assert!((s.logic_ms() - 2000.0).abs() < s.step_ms() + 1e-6);
    }

    #[test]
    fn long_frame_caps_steps_then_snaps() {
        let mut s = FixedStepInterpolator::new(120.0);
        s.advance(0.0);
        let plan = s.advance(500.0);
        assert!(plan.snapped);
        assert_eq!(plan.logic_times.len(), MAX_STEPS_PER_FRAME as usize + 1);
        assert_eq!(plan.logic_times.last().copied(), Some(500.0));
        assert_eq!(plan.visual_ms, 500.0);
        assert_eq!(s.logic_ms(), 500.0);
    }

    #[test]
    fn small_overrun_under_snap_threshold_is_carried() {
        let mut s = FixedStepInterpolator::new(120.0);
        s.advance(0.0);
        // 9.5 steps: capped at 8, but only ~12.5ms behind.
        let game = s.step_ms() * 9.5;
        let plan = s.advance(game);
        assert!(!plan.snapped);
        assert_eq!(plan.logic_times.len(), MAX_STEPS_PER_FRAME as usize);
        let plan = s.advance(game);
        assert_eq!(plan.logic_times.len(), 1, "the backlog drains on the next frame");
    }
}
