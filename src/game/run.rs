//! One play-through of a chart: the frame loop that ties the audio clock,
//! the fixed-step judgment updates and the VFX pass together.

use crate::core::audio::{AudioClock, AudioError};
use crate::core::clock::{ClockAuthority, ClockState, DEFAULT_FREEZE_WATCHDOG_MS, DEFAULT_STALL_FRAME_THRESHOLD};
use crate::core::schedule::Scheduler;
use crate::core::step::{DEFAULT_LOGIC_RATE_HZ, FixedStepInterpolator};
use crate::game::chart::Chart;
use crate::game::gameplay::{self, HoldOutcome, NoteVisualFlags};
use crate::game::stage_stats::{self, EndReason, RunResults};
use crate::game::timing_windows::{DEFAULT_HOLD_RELEASE_GRACE_MS, HOLD_INITIAL_MISS_MS};
use crate::ui::color::{self, Color};
use crate::vfx::binding::{CameraTransform, RuntimeVfxBinding};
use crate::vfx::gradient_cache::{
    BackgroundFrame, DEFAULT_BASE_HEIGHT, DEFAULT_BASE_WIDTH, DEFAULT_CAPACITY, DEFAULT_CROSSFADE_MS,
    GradientCrossfade, GradientSnapshotCache,
};
use crate::vfx::property_set::{VfxError, VfxPropertySet};
use log::{debug, info, warn};
use smallvec::SmallVec;
use std::rc::Rc;

/// How far past the receptor a note keeps being drawn.
const TRAIL_MS: f64 = 250.0;

/// Knobs for one run. Built from the user config by the binary; tests use
/// `Default`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunTuning {
    pub logic_rate_hz: f64,
    pub stall_frame_threshold: u32,
    pub freeze_watchdog_ms: f64,
    pub hold_release_grace_ms: f64,
    pub gradient_cache_capacity: usize,
    pub gradient_crossfade_ms: f64,
    pub gradient_base_width: u32,
    pub gradient_base_height: u32,
    pub scroll_lookahead_ms: f64,
    pub lead_in_ms: f64,
    pub end_of_run_linger_ms: f64,
    pub fallback_end_grace_ms: f64,
}

impl Default for RunTuning {
    fn default() -> Self {
        Self {
            logic_rate_hz: DEFAULT_LOGIC_RATE_HZ,
            stall_frame_threshold: DEFAULT_STALL_FRAME_THRESHOLD,
            freeze_watchdog_ms: DEFAULT_FREEZE_WATCHDOG_MS,
            hold_release_grace_ms: DEFAULT_HOLD_RELEASE_GRACE_MS,
            gradient_cache_capacity: DEFAULT_CAPACITY,
            gradient_crossfade_ms: DEFAULT_CROSSFADE_MS,
            gradient_base_width: DEFAULT_BASE_WIDTH,
            gradient_base_height: DEFAULT_BASE_HEIGHT,
            scroll_lookahead_ms: 1500.0,
            lead_in_ms: 2000.0,
            end_of_run_linger_ms: 1000.0,
            fallback_end_grace_ms: 5000.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WallEvent {
    ForceEnd,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BeatEvent {
    Tick,
}

/// One note as the renderer should draw it.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteVisual {
    pub note_index: usize,
    pub lane: usize,
    /// 0 at the receptor, 1 at the top of the lookahead window.
    pub head_y: f32,
    /// Hold body end, same scale as `head_y`.
    pub tail_y: Option<f32>,
    pub tint: Color,
    pub flags: NoteVisualFlags,
}

#[derive(Clone, Debug)]
pub struct RenderFrame {
    pub clock: ClockState,
    pub notes: Vec<NoteVisual>,
    pub camera: CameraTransform,
    /// `None` when this frame's VFX pass failed.
    pub background: Option<BackgroundFrame>,
    pub beat_flash: f32,
    pub lane_opacity: SmallVec<[f32; 8]>,
    /// Beat numbers that came due this frame, for an external click track.
    pub beat_ticks: SmallVec<[u64; 4]>,
    pub combo: u32,
    pub score: u64,
}

#[derive(Clone, Debug)]
pub enum FrameOutcome {
    Continue(Box<RenderFrame>),
    Finished(RunResults),
    /// The run already ended or was quit; nothing more happens.
    Stopped,
}

struct VfxFrame {
    camera: CameraTransform,
    background: BackgroundFrame,
    beat_flash: f32,
    lane_colors: SmallVec<[Color; 8]>,
    lane_opacity: SmallVec<[f32; 8]>,
}

pub struct Run<A: AudioClock> {
    audio: A,
    clock: ClockAuthority,
    stepper: FixedStepInterpolator,
    state: gameplay::State,
    vfx: RuntimeVfxBinding,
    gradients: GradientSnapshotCache,
    crossfade: GradientCrossfade,
    wall_timers: Scheduler<WallEvent>,
    beat_timers: Scheduler<BeatEvent>,
    tuning: RunTuning,
    natural_end_ms: f64,
    render_cursor: usize,
    quit: bool,
    ended: bool,
    frames: u64,
    log_timer_ms: Option<f64>,
    vfx_failures: u32,
}

impl<A: AudioClock> Run<A> {
    /// Schedules playback `lead_in_ms` from now and arms the fallback end
    /// timer. The device must already be ready.
    pub fn start(
        mut audio: A,
        chart: Chart,
        vfx_set: Option<Rc<VfxPropertySet>>,
        tuning: RunTuning,
        wall_now_ms: f64,
    ) -> Result<Self, AudioError> {
        let lead_in_ms = tuning.lead_in_ms.max(0.0);
        let start_at_sec = audio.clock_seconds() + lead_in_ms / 1000.0;
        audio.schedule_start(start_at_sec, 0.0)?;

        let natural_end_ms = chart
            .duration_ms
            .max(chart.last_note_end_ms() + HOLD_INITIAL_MISS_MS)
            + tuning.end_of_run_linger_ms.max(0.0);
        let mut wall_timers = Scheduler::new();
        wall_timers.once(
            wall_now_ms + lead_in_ms + natural_end_ms + tuning.fallback_end_grace_ms.max(0.0),
            WallEvent::ForceEnd,
        );
        let mut beat_timers = Scheduler::new();
        if beat_timers.every(0.0, chart.beat_ms(), BeatEvent::Tick).is_none() {
            debug!("No metronome for bpm {}.", chart.bpm);
        }

        let vfx = RuntimeVfxBinding::new(vfx_set, chart.lane_count, chart.bpm);
        info!(
            "Run started: {} notes, natural end at {:.0}ms, lead-in {:.0}ms.",
            chart.notes.len(),
            natural_end_ms,
            lead_in_ms
        );
        Ok(Self {
            audio,
            clock: ClockAuthority::with_tuning(
                start_at_sec,
                0.0,
                tuning.stall_frame_threshold,
                tuning.freeze_watchdog_ms,
            ),
            stepper: FixedStepInterpolator::new(tuning.logic_rate_hz),
            state: gameplay::init(chart, tuning.hold_release_grace_ms),
            vfx,
            gradients: GradientSnapshotCache::new(
                tuning.gradient_cache_capacity,
                tuning.gradient_base_width,
                tuning.gradient_base_height,
            ),
            crossfade: GradientCrossfade::new(tuning.gradient_crossfade_ms),
            wall_timers,
            beat_timers,
            tuning,
            natural_end_ms,
            render_cursor: 0,
            quit: false,
            ended: false,
            frames: 0,
            log_timer_ms: None,
            vfx_failures: 0,
        })
    }

    #[inline(always)]
    pub const fn audio(&self) -> &A {
        &self.audio
    }

    #[inline(always)]
    pub fn audio_mut(&mut self) -> &mut A {
        &mut self.audio
    }

    #[inline(always)]
    pub const fn chart(&self) -> &Chart {
        &self.state.chart
    }

    #[inline(always)]
    pub const fn gameplay(&self) -> &gameplay::State {
        &self.state
    }

    #[inline(always)]
    pub const fn clock_state(&self) -> ClockState {
        self.clock.state()
    }

    #[inline(always)]
    pub const fn natural_end_ms(&self) -> f64 {
        self.natural_end_ms
    }

    #[inline(always)]
    pub const fn is_over(&self) -> bool {
        self.quit || self.ended
    }

    /// Key edge stamped with the clock's current game time.
    pub fn key_event(&mut self, lane: usize, pressed: bool) {
        if self.is_over() {
            return;
        }
        gameplay::queue_input_edge(&mut self.state, lane, pressed, self.clock.now_ms());
    }

    /// Aborts the run. Returns the results so far, or `None` if it had
    /// already ended.
    pub fn quit(&mut self) -> Option<RunResults> {
        if self.is_over() {
            return None;
        }
        self.quit = true;
        Some(self.finish(EndReason::Quit))
    }

    fn teardown(&mut self) {
        gameplay::teardown(&mut self.state);
        let timers = self.wall_timers.clear() + self.beat_timers.clear();
        self.audio.stop();
        self.crossfade.reset();
        debug!("Run torn down ({timers} timers discarded).");
    }

    fn finish(&mut self, end: EndReason) -> RunResults {
        self.ended = true;
        self.teardown();
        let results = stage_stats::summarize(&self.state, end);
        info!(
            "Run ended ({end:?}): score {}, accuracy {:.2}%, max combo {}, P/G/Go/M {}/{}/{}/{}.",
            results.score,
            results.accuracy,
            results.max_combo,
            results.judgment_counts.perfect,
            results.judgment_counts.great,
            results.judgment_counts.good,
            results.judgment_counts.miss
        );
        results
    }

    pub fn frame(&mut self, wall_now_ms: f64) -> FrameOutcome {
        if self.is_over() {
            return FrameOutcome::Stopped;
        }
        self.frames += 1;

        let game_ms = self.clock.tick(self.audio.clock_seconds(), wall_now_ms);
        let plan = self.stepper.advance(game_ms);
        self.clock.set_visual_time(plan.visual_ms);
        for &logic_ms in &plan.logic_times {
            gameplay::update(&mut self.state, logic_ms);
        }

        if self
            .wall_timers
            .poll(wall_now_ms)
            .iter()
            .any(|f| f.event == WallEvent::ForceEnd)
        {
            warn!(
                "Natural end at {:.0}ms never arrived (game time {game_ms:.0}ms); forcing the run to end.",
                self.natural_end_ms
            );
            return FrameOutcome::Finished(self.finish(EndReason::Forced));
        }
        if self.stepper.logic_ms() >= self.natural_end_ms && gameplay::is_finished(&self.state) {
            return FrameOutcome::Finished(self.finish(EndReason::Natural));
        }

        let beat_ticks: SmallVec<[u64; 4]> = self
            .beat_timers
            .poll(game_ms)
            .iter()
            .filter(|f| f.event == BeatEvent::Tick)
            .map(|f| f.index)
            .collect();

        let vfx = match self.vfx_pass(game_ms, plan.visual_ms) {
            Ok(v) => Some(v),
            Err(e) => {
                self.vfx_failures = self.vfx_failures.saturating_add(1);
                if self.vfx_failures == 1 {
                    warn!("VFX pass failed, drawing without effects this frame: {e}");
                } else {
                    debug!("VFX pass failed again ({} total): {e}", self.vfx_failures);
                }
                None
            }
        };
        let notes = self.note_visuals(plan.visual_ms, vfx.as_ref());

        self.log_status(wall_now_ms, game_ms);

        let lanes = self.state.chart.lane_count;
        let clock = self.clock.state();
        let frame = match vfx {
            Some(v) => RenderFrame {
                clock,
                notes,
                camera: v.camera,
                background: Some(v.background),
                beat_flash: v.beat_flash,
                lane_opacity: v.lane_opacity,
                beat_ticks,
                combo: self.state.combo,
                score: self.state.score,
            },
            None => RenderFrame {
                clock,
                notes,
                camera: CameraTransform::default(),
                background: None,
                beat_flash: 0.0,
                lane_opacity: SmallVec::from_elem(1.0, lanes),
                beat_ticks,
                combo: self.state.combo,
                score: self.state.score,
            },
        };
        FrameOutcome::Continue(Box::new(frame))
    }

    fn vfx_pass(&mut self, game_ms: f64, visual_ms: f64) -> Result<VfxFrame, VfxError> {
        self.vfx.begin_frame();
        let camera = self.vfx.camera(visual_ms);
        if !(camera.translate.is_finite()
            && camera.rotate.is_finite()
            && camera.zoom.is_finite()
            && camera.skew.is_finite())
        {
            return Err(VfxError::InvalidFrameValue {
                path: "camera",
                at_ms: visual_ms,
            });
        }
        let gradient = self.vfx.background_gradient(visual_ms);
        if gradient.stops.is_empty() || !gradient.angle.is_finite() {
            return Err(VfxError::InvalidFrameValue {
                path: "background.gradient",
                at_ms: visual_ms,
            });
        }
        let snapshot = self.gradients.snapshot(&gradient);
        // Cross-fades run on game time so a stalled clock also pauses them.
        let background = self.crossfade.present(snapshot, game_ms);

        let lanes = self.vfx.lane_count();
        let lane_colors = (0..lanes).map(|l| self.vfx.lane_color(l, visual_ms)).collect();
        let lane_opacity = (0..lanes).map(|l| self.vfx.lane_opacity(l, visual_ms)).collect();
        let beat_flash = self.vfx.beat_flash(game_ms);
        Ok(VfxFrame {
            camera,
            background,
            beat_flash,
            lane_colors,
            lane_opacity,
        })
    }

    fn note_visuals(&mut self, visual_ms: f64, vfx: Option<&VfxFrame>) -> Vec<NoteVisual> {
        let lookahead = self.tuning.scroll_lookahead_ms.max(1.0);
        let notes = &self.state.chart.notes;
        while self.render_cursor < notes.len() && notes[self.render_cursor].end_ms() < visual_ms - TRAIL_MS {
            self.render_cursor += 1;
        }

        let mut out = Vec::new();
        for (i, note) in notes.iter().enumerate().skip(self.render_cursor) {
            if note.time_ms > visual_ms + lookahead {
                break;
            }
            let ns = &self.state.notes[i];
            if ns.flags.contains(NoteVisualFlags::HIDDEN) {
                continue;
            }
            if note.end_ms() < visual_ms - TRAIL_MS {
                continue;
            }
            let to_y = |t: f64| ((t - visual_ms) / lookahead) as f32;
            let active = ns.flags.contains(NoteVisualFlags::ACTIVE);
            // Held and completed heads stay pinned to the receptor.
            let pinned = active || ns.flags.contains(NoteVisualFlags::CLIPPED);
            let base = vfx
                .and_then(|v| v.lane_colors.get(note.lane).copied())
                .unwrap_or_else(|| color::lane_rgba(note.lane));
            // An unpressed hold just scrolls away undimmed.
            let tint = if active {
                color::ACTIVE_HOLD_RGBA
            } else if ns.hold == Some(HoldOutcome::BrokenEarlyRelease) {
                color::dim(base)
            } else {
                base
            };
            out.push(NoteVisual {
                note_index: i,
                lane: note.lane,
                head_y: if pinned { 0.0 } else { to_y(note.time_ms) },
                tail_y: note.is_hold().then(|| {
                    let y = to_y(note.end_ms());
                    if pinned { y.max(0.0) } else { y }
                }),
                tint,
                flags: ns.flags,
            });
        }
        out
    }

    fn log_status(&mut self, wall_now_ms: f64, game_ms: f64) {
        let last = *self.log_timer_ms.get_or_insert(wall_now_ms);
        if wall_now_ms - last < 1000.0 {
            return;
        }
        self.log_timer_ms = Some(last + 1000.0 * ((wall_now_ms - last) / 1000.0).floor());
        let (hits, misses) = self.vfx.resolver().stats();
        info!(
            "Time: {:.2}s, Combo: {}, Score: {}, Misses: {}, Stalled: {}, Frames: {}, VFX memo {}/{}, Gradient tier {:.2}",
            game_ms / 1000.0,
            self.state.combo,
            self.state.score,
            self.state.counts.miss,
            self.clock.is_stalled(),
            self.frames,
            hits,
            hits + misses,
            self.gradients.quality_scale()
        );
    }
}

/// Presses every note right as it comes due and lets go once it is done.
/// Used by the headless runner and tests.
#[derive(Debug, Default)]
pub struct Autoplay {
    next: usize,
    releases: Vec<(f64, usize)>,
}

impl Autoplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drive<A: AudioClock>(&mut self, run: &mut Run<A>) {
        let now = run.clock_state().game_time_ms;
        self.releases.retain(|&(at, lane)| {
            if at <= now {
                run.key_event(lane, false);
                false
            } else {
                true
            }
        });
        loop {
            let (time_ms, lane, end_ms) = match run.chart().notes.get(self.next) {
                Some(n) if n.time_ms <= now => (n.time_ms, n.lane, n.end_ms()),
                _ => break,
            };
            // A still-held tap in the same lane has to come up first.
            if let Some(pos) = self.releases.iter().position(|&(_, l)| l == lane) {
                self.releases.swap_remove(pos);
                run.key_event(lane, false);
            }
            run.key_event(lane, true);
            self.releases.push((end_ms.max(time_ms + 1.0), lane));
            self.next += 1;
        }
    }
}
