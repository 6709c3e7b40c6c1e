use crate::core::registry::{Handle, Registry};
use log::trace;
use smallvec::SmallVec;

/// Fires of one repeating timer allowed per poll before the rest of the
/// backlog is skipped.
pub const MAX_CATCH_UP: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fired<E> {
    pub event: E,
    /// When the fire was due, not when it was observed.
    pub target_ms: f64,
    /// 0-based count of this timer's fires.
    pub index: u64,
}

#[derive(Clone, Copy, Debug)]
struct Timer<E> {
    origin_ms: f64,
    period_ms: Option<f64>,
    fired: u64,
    event: E,
}

impl<E> Timer<E> {
    #[inline(always)]
    fn target(&self) -> f64 {
        match self.period_ms {
            // Computed from the origin every time, so error never accumulates.
            Some(p) => self.origin_ms + self.fired as f64 * p,
            None => self.origin_ms,
        }
    }
}

/// One-shot and repeating timers against a caller-supplied clock.
#[derive(Debug)]
pub struct Scheduler<E: Copy> {
    timers: Registry<Timer<E>>,
}

impl<E: Copy> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            timers: Registry::new(),
        }
    }
}

impl<E: Copy> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once(&mut self, at_ms: f64, event: E) -> Handle {
        self.timers.register(Timer {
            origin_ms: at_ms,
            period_ms: None,
            fired: 0,
            event,
        })
    }

    /// Fires at `origin_ms + n * period_ms` for n = 0, 1, 2, ...
    pub fn every(&mut self, origin_ms: f64, period_ms: f64, event: E) -> Option<Handle> {
        if !(period_ms.is_finite() && period_ms > 0.0) {
            return None;
        }
        Some(self.timers.register(Timer {
            origin_ms,
            period_ms: Some(period_ms),
            fired: 0,
            event,
        }))
    }

    pub fn cancel(&mut self, handle: Handle) -> bool {
        self.timers.unregister(handle).is_some()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Collects every fire due at or before `now_ms`, in timer order.
    pub fn poll(&mut self, now_ms: f64) -> SmallVec<[Fired<E>; 4]> {
        let mut out = SmallVec::new();
        self.timers.retain(|_, timer| {
            let Some(period) = timer.period_ms else {
                if timer.origin_ms <= now_ms {
                    out.push(Fired {
                        event: timer.event,
                        target_ms: timer.origin_ms,
                        index: 0,
                    });
                    return false;
                }
                return true;
            };
            let mut emitted = 0;
            while timer.target() <= now_ms {
                if emitted == MAX_CATCH_UP {
                    let due = ((now_ms - timer.origin_ms) / period).floor() as u64 + 1;
                    trace!("Timer skipped {} overdue fires.", due.saturating_sub(timer.fired));
                    timer.fired = due.max(timer.fired);
                    break;
                }
                out.push(Fired {
                    event: timer.event,
                    target_ms: timer.target(),
                    index: timer.fired,
                });
                timer.fired += 1;
                emitted += 1;
            }
            true
        });
        out
    }

    /// Drops every timer. Returns how many were pending.
    pub fn clear(&mut self) -> usize {
        self.timers.drain().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_CATCH_UP, Scheduler};

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Ev {
        End,
        Beat,
    }

    #[test]
    fn once_fires_exactly_once() {
        let mut s = Scheduler::new();
        s.once(100.0, Ev::End);
        assert!(s.poll(99.9).is_empty());
        let fired = s.poll(100.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].event, Ev::End);
        assert!(s.poll(1000.0).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn repeating_timer_does_not_drift() {
        let mut s = Scheduler::new();
        s.every(0.0, 1000.0 / 3.0, Ev::Beat).expect("valid period");
        let mut count = 0;
        let mut frame = 0.0;
        while frame < 100_000.0 {
            frame += 16.0;
            for f in s.poll(frame) {
                let want = f.index as f64 * 1000.0 / 3.0;
                assert!((f.target_ms - want).abs() < 1e-9, "fire {} drifted", f.index);
                count += 1;
            }
        }
        assert_eq!(count, 301, "one fire per period including the origin");
    }

    #[test]
    fn long_gap_skips_backlog() {
        let mut s = Scheduler::new();
        s.every(0.0, 10.0, Ev::Beat).expect("valid period");
        let fired = s.poll(1000.0);
        assert_eq!(fired.len() as u64, MAX_CATCH_UP);
        let next = s.poll(1010.0);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].target_ms, 1010.0);
    }

    #[test]
    fn cancel_and_clear() {
        let mut s = Scheduler::new();
        let h = s.once(5.0, Ev::End);
        s.every(0.0, 1.0, Ev::Beat).expect("valid period");
        assert!(s.every(0.0, 0.0, Ev::Beat).is_none());
        assert!(s.cancel(h));
        assert!(!s.cancel(h));
        assert_eq!(s.clear(), 1);
        assert!(s.poll(100.0).is_empty());
    }
}
