//! Audio clock seam.
//!
//! The runtime never decodes or mixes audio. It needs a monotonic hardware
//! clock, a way to schedule playback at a future instant, and a one-shot
//! readiness signal. Everything else lives behind the device implementation.

use log::{debug, info, warn};
use std::fmt;
use std::future::Future;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    NotReady(String),
    InvalidSchedule { at_sec: f64, offset_ms: f64 },
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady(why) => write!(f, "audio device not ready: {why}"),
            Self::InvalidSchedule { at_sec, offset_ms } => {
                write!(f, "cannot schedule playback at {at_sec}s with offset {offset_ms}ms")
            }
        }
    }
}

impl std::error::Error for AudioError {}

pub trait AudioClock {
    /// Hardware clock in seconds. Never goes backwards, but may stop advancing.
    fn clock_seconds(&self) -> f64;

    /// Starts the track at hardware time `at_sec`, `offset_ms` into the audio.
    fn schedule_start(&mut self, at_sec: f64, offset_ms: f64) -> Result<(), AudioError>;

    fn stop(&mut self);

    /// Resolves once the device can honour `schedule_start`.
    fn ready(&mut self) -> impl Future<Output = Result<(), AudioError>>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledStart {
    pub at_sec: f64,
    pub offset_ms: f64,
}

#[derive(Clone, Copy, Debug)]
struct Stall {
    start_sec: f64,
    end_sec: f64,
    catch_up: bool,
}

/// Deterministic stand-in for a sound device: the hardware clock follows a
/// manually advanced wall clock, with optional injected stalls.
#[derive(Debug, Default)]
pub struct SimulatedAudio {
    wall_sec: f64,
    stalls: Vec<Stall>,
    scheduled: Option<ScheduledStart>,
    playing: bool,
    fail_ready: Option<String>,
}

impl SimulatedAudio {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn advance(&mut self, dt_sec: f64) {
        if dt_sec > 0.0 {
            self.wall_sec += dt_sec;
        }
    }

    #[inline(always)]
    pub const fn wall_seconds(&self) -> f64 {
        self.wall_sec
    }

    /// Freezes the reported clock for `duration_sec` of wall time starting at
    /// `at_wall_sec`. With `catch_up` the clock jumps to wall time when the
    /// stall ends; otherwise it resumes from where it froze and stays behind.
    pub fn inject_stall(&mut self, at_wall_sec: f64, duration_sec: f64, catch_up: bool) {
        debug!("Simulated audio stall at {at_wall_sec:.3}s for {duration_sec:.3}s (catch_up={catch_up}).");
        self.stalls.push(Stall {
            start_sec: at_wall_sec,
            end_sec: at_wall_sec + duration_sec.max(0.0),
            catch_up,
        });
    }

    pub fn fail_readiness(&mut self, why: impl Into<String>) {
        self.fail_ready = Some(why.into());
    }

    #[inline(always)]
    pub const fn scheduled(&self) -> Option<ScheduledStart> {
        self.scheduled
    }

    #[inline(always)]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }
}

impl AudioClock for SimulatedAudio {
    fn clock_seconds(&self) -> f64 {
        let now = self.wall_sec;
        let mut t = now;
        for s in &self.stalls {
            if now < s.start_sec {
                continue;
            }
            let frozen = now.min(s.end_sec) - s.start_sec;
            if now < s.end_sec || !s.catch_up {
                t -= frozen;
            }
        }
        t
    }

    fn schedule_start(&mut self, at_sec: f64, offset_ms: f64) -> Result<(), AudioError> {
        if !at_sec.is_finite() || !offset_ms.is_finite() || offset_ms < 0.0 {
            return Err(AudioError::InvalidSchedule { at_sec, offset_ms });
        }
        if at_sec < self.clock_seconds() {
            warn!(
                "Playback scheduled {:.1}ms in the past; it will start immediately.",
                (self.clock_seconds() - at_sec) * 1000.0
            );
        }
        info!("Music scheduled at {at_sec:.3}s (offset {offset_ms:.0}ms).");
        self.scheduled = Some(ScheduledStart { at_sec, offset_ms });
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn ready(&mut self) -> impl Future<Output = Result<(), AudioError>> {
        let res = match self.fail_ready.take() {
            Some(why) => Err(AudioError::NotReady(why)),
            None => Ok(()),
        };
        std::future::ready(res)
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioClock, AudioError, SimulatedAudio};

    #[test]
    fn stall_freezes_then_resumes_behind() {
        let mut a = SimulatedAudio::new();
        a.inject_stall(1.0, 0.5, false);
        a.advance(1.2);
        assert!((a.clock_seconds() - 1.0).abs() < 1e-12, "frozen during the stall");
        a.advance(0.8);
        assert!((a.clock_seconds() - 1.5).abs() < 1e-12, "resumes 0.5s behind wall time");
    }

    #[test]
    fn catch_up_stall_rejoins_wall_time() {
        let mut a = SimulatedAudio::new();
        a.inject_stall(1.0, 0.5, true);
        a.advance(1.4);
        assert!((a.clock_seconds() - 1.0).abs() < 1e-12);
        a.advance(0.2);
        assert!((a.clock_seconds() - 1.6).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_finite_schedule() {
        let mut a = SimulatedAudio::new();
        assert!(matches!(
            a.schedule_start(f64::NAN, 0.0),
            Err(AudioError::InvalidSchedule { .. })
        ));
        assert!(a.schedule_start(0.5, 1200.0).is_ok());
        assert!(a.is_playing());
        let s = a.scheduled().expect("start recorded");
        assert_eq!((s.at_sec, s.offset_ms), (0.5, 1200.0));
    }

    #[test]
    fn readiness_reports_failures_once() {
        let mut a = SimulatedAudio::new();
        a.fail_readiness("device busy");
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        assert!(rt.block_on(a.ready()).is_err());
        assert!(rt.block_on(a.ready()).is_ok());
    }
}
