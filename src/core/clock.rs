use log::{debug, info, warn};

pub const DEFAULT_STALL_FRAME_THRESHOLD: u32 = 30;
pub const DEFAULT_FREEZE_WATCHDOG_MS: f64 = 500.0;

// The freeze watchdog also needs a few frames of evidence, so one long
// hitch (a single slow frame) is not mistaken for a frozen clock.
const FREEZE_MIN_FRAMES: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClockState {
    pub game_time_ms: f64,
    pub visual_time_ms: f64,
    pub stalled: bool,
}

#[derive(Clone, Copy, Debug)]
struct Fallback {
    base_game_ms: f64,
    base_frame_ms: f64,
}

/// Turns hardware audio-clock readings into game time.
///
/// The audio clock is the only authority. When it stops advancing for too
/// many frames the frame clock takes over, projecting forward from the last
/// good reading, and hands control back the moment the hardware overtakes the
/// projection. Output never decreases between `reanchor` calls.
#[derive(Debug)]
pub struct ClockAuthority {
    start_at_sec: f64,
    offset_ms: f64,
    stall_frame_threshold: u32,
    freeze_watchdog_ms: f64,

    last_audio_sec: Option<f64>,
    stagnant_frames: u32,
    fallback: Option<Fallback>,
    stall_warned: bool,

    last_raw_ms: Option<f64>,
    frozen_since_ms: Option<f64>,
    frozen_frames: u32,
    floor_ms: f64,
    last_output_ms: Option<f64>,

    state: ClockState,
}

impl ClockAuthority {
    pub fn new(start_at_sec: f64, offset_ms: f64) -> Self {
        Self::with_tuning(
            start_at_sec,
            offset_ms,
            DEFAULT_STALL_FRAME_THRESHOLD,
            DEFAULT_FREEZE_WATCHDOG_MS,
        )
    }

    pub fn with_tuning(
        start_at_sec: f64,
        offset_ms: f64,
        stall_frame_threshold: u32,
        freeze_watchdog_ms: f64,
    ) -> Self {
        Self {
            start_at_sec,
            offset_ms,
            stall_frame_threshold: stall_frame_threshold.max(1),
            freeze_watchdog_ms: freeze_watchdog_ms.max(0.0),
            last_audio_sec: None,
            stagnant_frames: 0,
            fallback: None,
            stall_warned: false,
            last_raw_ms: None,
            frozen_since_ms: None,
            frozen_frames: 0,
            floor_ms: f64::NEG_INFINITY,
            last_output_ms: None,
            state: ClockState::default(),
        }
    }

    #[inline(always)]
    pub const fn state(&self) -> ClockState {
        self.state
    }

    /// Game time of the most recent `tick`.
    #[inline(always)]
    pub const fn now_ms(&self) -> f64 {
        self.state.game_time_ms
    }

    #[inline(always)]
    pub const fn is_stalled(&self) -> bool {
        self.state.stalled
    }

    #[inline(always)]
    pub fn set_visual_time(&mut self, visual_ms: f64) {
        self.state.visual_time_ms = visual_ms;
    }

    #[inline(always)]
    fn game_time_for(&self, audio_sec: f64) -> f64 {
        if audio_sec < self.start_at_sec {
            -(self.start_at_sec - audio_sec) * 1000.0
        } else {
            (audio_sec - self.start_at_sec) * 1000.0 + self.offset_ms
        }
    }

    /// Advances the clock for one frame and returns the new game time.
    pub fn tick(&mut self, audio_sec: f64, frame_now_ms: f64) -> f64 {
        let advanced = self.last_audio_sec.is_none_or(|prev| audio_sec > prev);
        self.last_audio_sec = Some(audio_sec);
        if advanced {
            self.stagnant_frames = 0;
        } else {
            self.stagnant_frames = self.stagnant_frames.saturating_add(1);
        }

        let hw_ms = self.game_time_for(audio_sec);
        let raw_ms = match self.fallback {
            Some(fb) => {
                let projected = fb.base_game_ms + (frame_now_ms - fb.base_frame_ms);
                if hw_ms > projected {
                    info!(
                        "Audio clock recovered ({:.1}ms past the frame-clock projection).",
                        hw_ms - projected
                    );
                    self.fallback = None;
                    self.stagnant_frames = 0;
                    hw_ms
                } else {
                    projected
                }
            }
            None if self.stagnant_frames > self.stall_frame_threshold => {
                if !self.stall_warned {
                    warn!(
                        "Audio clock stuck at {audio_sec:.3}s for {} frames; following the frame clock.",
                        self.stagnant_frames
                    );
                    self.stall_warned = true;
                } else {
                    debug!("Audio clock stalled again at {audio_sec:.3}s.");
                }
                // Project from what was last shown, so the handover is seamless.
                let base_game_ms = self.last_output_ms.map_or(hw_ms, |prev| prev.max(hw_ms));
                self.fallback = Some(Fallback {
                    base_game_ms,
                    base_frame_ms: frame_now_ms,
                });
                base_game_ms
            }
            None => hw_ms,
        };

        if self.fallback.is_some() {
            self.last_raw_ms = Some(raw_ms);
            self.frozen_since_ms = None;
            self.frozen_frames = 0;
        } else {
            self.update_freeze_watchdog(raw_ms, frame_now_ms);
        }

        let mut out = raw_ms.max(self.floor_ms);
        if let Some(prev) = self.last_output_ms {
            out = out.max(prev);
        }
        self.last_output_ms = Some(out);
        self.state.game_time_ms = out;
        self.state.stalled =
            self.fallback.is_some() || (self.frozen_since_ms.is_some() && out > raw_ms);
        out
    }

    // Identical raw time across frames for longer than the watchdog span
    // raises a floor that follows the wall clock. The floor only ever bounds
    // the output from below, so once the real clock passes it nothing remains.
    fn update_freeze_watchdog(&mut self, raw_ms: f64, frame_now_ms: f64) {
        let identical = self.last_raw_ms.is_some_and(|prev| prev == raw_ms);
        self.last_raw_ms = Some(raw_ms);
        if !identical {
            self.frozen_since_ms = None;
            self.frozen_frames = 0;
            return;
        }
        let since = *self.frozen_since_ms.get_or_insert(frame_now_ms);
        self.frozen_frames = self.frozen_frames.saturating_add(1);
        let gap = frame_now_ms - since;
        if gap > self.freeze_watchdog_ms && self.frozen_frames >= FREEZE_MIN_FRAMES {
            if self.floor_ms < raw_ms {
                warn!("Game time frozen at {raw_ms:.1}ms for {gap:.0}ms; forcing it forward.");
            }
            self.floor_ms = self.floor_ms.max(raw_ms + gap);
        }
    }

    /// Seek or resume: re-derives game time from a new start instant. This is
    /// the only way game time may move backwards.
    pub fn reanchor(&mut self, start_at_sec: f64, offset_ms: f64) {
        info!("Clock reanchored: start {start_at_sec:.3}s, offset {offset_ms:.0}ms.");
        self.start_at_sec = start_at_sec;
        self.offset_ms = offset_ms;
        self.stagnant_frames = 0;
        self.fallback = None;
        self.last_raw_ms = None;
        self.frozen_since_ms = None;
        self.frozen_frames = 0;
        self.floor_ms = f64::NEG_INFINITY;
        self.last_output_ms = None;
        self.state.stalled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::ClockAuthority;

    const FRAME_MS: f64 = 1000.0 / 60.0;

    #[test]
    fn counts_down_before_start_and_applies_offset_after() {
        let mut c = ClockAuthority::new(2.0, 0.0);
        assert_eq!(c.tick(1.5, 0.0), -500.0);
        let mut r = ClockAuthority::new(2.0, 30_000.0);
        assert_eq!(r.tick(1.0, 0.0), -1000.0);
        assert_eq!(r.tick(2.5, 1500.0), 30_500.0);
    }

    #[test]
    fn stall_falls_back_to_frame_clock_without_discontinuity() {
        let mut c = ClockAuthority::new(0.0, 0.0);
        let mut audio = 0.0;
        let mut frame = 0.0;
        let mut prev = f64::NEG_INFINITY;
        let mut saw_stall = false;
        for i in 0..240 {
            frame += FRAME_MS;
            // Hardware stuck between frames 60 and 120, then catches up.
            if !(60..120).contains(&i) {
                audio = frame / 1000.0;
            }
            let t = c.tick(audio, frame);
            assert!(t >= prev, "frame {i}: {t} went backwards from {prev}");
            if i > 60 && i < 120 {
                assert!(t - prev < 50.0, "frame {i}: jumped {}ms", t - prev);
            }
            saw_stall |= c.is_stalled();
            prev = t;
        }
        assert!(saw_stall, "fallback should have engaged");
        assert!(!c.is_stalled(), "hardware overtaking the projection ends the fallback");
        assert!((prev - frame).abs() < 1e-6, "back on the hardware clock");
    }

    #[test]
    fn fallback_advances_with_frame_time() {
        let mut c = ClockAuthority::new(0.0, 0.0);
        let mut frame = 0.0;
        c.tick(1.0, frame);
        for _ in 0..30 {
            frame += FRAME_MS;
            c.tick(1.0, frame);
        }
        frame += FRAME_MS;
        let engaged = c.tick(1.0, frame);
        assert!(c.is_stalled());
        assert_eq!(engaged, 1000.0, "fallback starts from the stall point");
        frame += 100.0;
        let later = c.tick(1.0, frame);
        assert!((later - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn freeze_watchdog_forces_time_forward_then_yields() {
        // Ten frames per second: too few for the stall detector to trip.
        let mut c = ClockAuthority::new(0.0, 0.0);
        let mut frame = 0.0;
        c.tick(1.0, frame);
        let mut last = 1000.0;
        for _ in 0..8 {
            frame += 100.0;
            last = c.tick(1.0, frame);
        }
        assert!(last > 1000.0, "800ms of identical time must be forced forward");
        assert!((last - 1700.0).abs() < 1e-9, "floor follows the wall gap, got {last}");
        // The real clock comes back behind the floor: output holds, never drops.
        frame += 100.0;
        assert_eq!(c.tick(1.2, frame), last);
        frame += 100.0;
        assert_eq!(c.tick(2.0, frame), 2000.0, "no bias once the real clock passes");
    }

    #[test]
    fn reanchor_is_the_only_way_back() {
        let mut c = ClockAuthority::new(0.0, 0.0);
        assert_eq!(c.tick(5.0, 0.0), 5000.0);
        assert_eq!(c.tick(4.0, 16.0), 5000.0, "hardware glitch backwards is clamped");
        c.reanchor(4.0, 1000.0);
        assert_eq!(c.tick(4.0, 32.0), 1000.0);
    }
}
