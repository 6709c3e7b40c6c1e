use crate::game::chart::Chart;
use crate::game::judgment::{JudgeGrade, Judgment, JudgmentCounts, classify_offset_ms, score_for};
use crate::game::timing_windows::{self, HOLD_INITIAL_MISS_MS};
use bitflags::bitflags;
use log::{debug, info, trace};
use std::collections::VecDeque;

bitflags! {
    /// Renderer-facing state of a note's sprite.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct NoteVisualFlags: u8 {
        /// Hold being held: head pinned to the receptor, body tinted.
        const ACTIVE = 1;
        /// Hold finished: body fully consumed.
        const CLIPPED = 1 << 1;
        /// Hold dropped or never started: body scrolls away dimmed.
        const BROKEN = 1 << 2;
        /// Tap hit: removed from the field.
        const HIDDEN = 1 << 3;
    }
}

impl Default for NoteVisualFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HoldOutcome {
    Completed,
    BrokenEarlyRelease,
    BrokenInitialMiss,
}

impl HoldOutcome {
    #[inline(always)]
    pub const fn is_broken(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// Mutable judgment state of one chart note.
#[derive(Clone, Debug, Default)]
pub struct NoteState {
    pub result: Option<Judgment>,
    pub hit_at_ms: Option<f64>,
    pub flags: NoteVisualFlags,
    /// Set once, only for hold notes.
    pub hold: Option<HoldOutcome>,
}

impl NoteState {
    #[inline(always)]
    pub const fn is_judged(&self) -> bool {
        self.result.is_some()
    }

    #[inline(always)]
    pub fn grade(&self) -> Option<JudgeGrade> {
        self.result.as_ref().map(|j| j.grade)
    }
}

#[derive(Clone, Debug)]
pub struct HoldState {
    pub note_index: usize,
    pub end_ms: f64,
    pub last_held_ms: f64,
}

#[derive(Copy, Clone, Debug)]
pub struct InputEdge {
    pub lane: usize,
    pub pressed: bool,
    pub event_ms: f64,
}

pub struct State {
    pub chart: Chart,
    pub notes: Vec<NoteState>,
    /// Note indices per lane, in time order.
    lane_notes: Vec<Vec<usize>>,
    lane_cursor: Vec<usize>,
    next_miss_cursor: usize,
    pub active_holds: Vec<Option<HoldState>>,
    pub lane_down: Vec<bool>,
    pending_edges: VecDeque<InputEdge>,
    pub hold_release_grace_ms: f64,

    pub combo: u32,
    pub max_combo: u32,
    pub score: u64,
    pub counts: JudgmentCounts,
    pub holds_completed: u32,
    pub holds_broken: u32,

    torn_down: bool,
}

pub fn init(chart: Chart, hold_release_grace_ms: f64) -> State {
    let lanes = chart.lane_count;
    let mut lane_notes = vec![Vec::new(); lanes];
    for (i, n) in chart.notes.iter().enumerate() {
        if let Some(l) = lane_notes.get_mut(n.lane) {
            l.push(i);
        }
    }
    let holds = chart.notes.iter().filter(|n| n.is_hold()).count();
    info!(
        "Gameplay initialized: {} notes ({} holds) across {} lanes.",
        chart.notes.len(),
        holds,
        lanes
    );
    State {
        notes: vec![NoteState::default(); chart.notes.len()],
        lane_notes,
        lane_cursor: vec![0; lanes],
        next_miss_cursor: 0,
        active_holds: vec![None; lanes],
        lane_down: vec![false; lanes],
        pending_edges: VecDeque::new(),
        hold_release_grace_ms: hold_release_grace_ms.max(0.0),
        combo: 0,
        max_combo: 0,
        score: 0,
        counts: JudgmentCounts::default(),
        holds_completed: 0,
        holds_broken: 0,
        torn_down: false,
        chart,
    }
}

pub fn queue_input_edge(state: &mut State, lane: usize, pressed: bool, event_ms: f64) {
    if state.torn_down {
        return;
    }
    if lane >= state.chart.lane_count {
        debug!("Ignoring input on lane {lane}; chart has {} lanes.", state.chart.lane_count);
        return;
    }
    state.pending_edges.push_back(InputEdge {
        lane,
        pressed,
        event_ms,
    });
}

/// Applies queued edges whose event time is at or before `up_to_ms`, in the
/// order they arrived.
pub fn process_input_edges(state: &mut State, up_to_ms: f64) {
    while let Some(edge) = state.pending_edges.front().copied() {
        if edge.event_ms > up_to_ms {
            break;
        }
        state.pending_edges.pop_front();
        let was_down = state.lane_down[edge.lane];
        state.lane_down[edge.lane] = edge.pressed;

        if let Some(hold) = state.active_holds[edge.lane].as_mut() {
            // Releases and re-presses both refresh the grace anchor.
            hold.last_held_ms = hold.last_held_ms.max(edge.event_ms);
        }
        if edge.pressed && !was_down {
            let hit = judge_a_tap(state, edge.lane, edge.event_ms);
            trace!("Lane {} press at {:.1}ms (hit={hit}).", edge.lane, edge.event_ms);
        }
    }
}

#[inline(always)]
fn bump_combo(state: &mut State, grade: JudgeGrade) -> u32 {
    state.counts.record(grade);
    if grade.breaks_combo() {
        state.combo = 0;
        return 0;
    }
    state.combo = state.combo.saturating_add(1);
    state.max_combo = state.max_combo.max(state.combo);
    let points = score_for(grade, state.combo);
    state.score = state.score.saturating_add(u64::from(points));
    points
}

/// Judges a key-down in `lane` at `event_ms`. Returns whether a note was
/// consumed.
pub fn judge_a_tap(state: &mut State, lane: usize, event_ms: f64) -> bool {
    let Some(indices) = state.lane_notes.get(lane) else {
        return false;
    };
    let mut cursor = state.lane_cursor[lane];
    // Skip the judged prefix once so later scans start past it.
    while cursor < indices.len() && state.notes[indices[cursor]].is_judged() {
        cursor += 1;
    }
    state.lane_cursor[lane] = cursor;

    let mut target = None;
    for &idx in &indices[cursor..] {
        if state.notes[idx].is_judged() {
            continue;
        }
        let dt = event_ms - state.chart.notes[idx].time_ms;
        if timing_windows::is_too_early(dt) {
            break;
        }
        if timing_windows::is_passed(dt) {
            // Left for the time-based miss pass; it must not block later notes.
            continue;
        }
        target = classify_offset_ms(dt).map(|g| (idx, g, dt));
        break;
    }
    let Some((idx, grade, dt)) = target else {
        return false;
    };

    let note_time = state.chart.notes[idx].time_ms;
    state.notes[idx].result = Some(Judgment {
        grade,
        time_error_ms: dt,
    });
    state.notes[idx].hit_at_ms = Some(event_ms);
    let points = bump_combo(state, grade);
    info!(
        "TIMING HIT: grade={grade}, lane={lane}, note_time_ms={note_time:.1}, event_ms={event_ms:.1}, \
         offset_ms={dt:.2}, combo={}, points={points}",
        state.combo
    );

    if state.chart.notes[idx].is_hold() {
        if grade == JudgeGrade::Miss {
            break_hold(state, lane, idx, HoldOutcome::BrokenInitialMiss, false);
        } else {
            state.notes[idx].flags.insert(NoteVisualFlags::ACTIVE);
            state.active_holds[lane] = Some(HoldState {
                note_index: idx,
                end_ms: state.chart.notes[idx].end_ms(),
                last_held_ms: event_ms,
            });
        }
    } else if grade != JudgeGrade::Miss {
        state.notes[idx].flags.insert(NoteVisualFlags::HIDDEN);
    }
    true
}

// `count_miss` is false when the Miss that broke the hold was already counted.
fn break_hold(state: &mut State, lane: usize, note_index: usize, outcome: HoldOutcome, count_miss: bool) {
    if state.notes[note_index].hold.is_some() {
        return;
    }
    state.notes[note_index].hold = Some(outcome);
    let flags = &mut state.notes[note_index].flags;
    flags.remove(NoteVisualFlags::ACTIVE);
    flags.insert(NoteVisualFlags::BROKEN);
    if state.active_holds[lane]
        .as_ref()
        .is_some_and(|h| h.note_index == note_index)
    {
        state.active_holds[lane] = None;
    }
    state.holds_broken = state.holds_broken.saturating_add(1);
    if count_miss {
        bump_combo(state, JudgeGrade::Miss);
    } else {
        state.combo = 0;
    }
    info!("HOLD BROKEN ({outcome:?}): lane {lane}, note {note_index}");
}

fn complete_hold(state: &mut State, lane: usize, note_index: usize) {
    if state.notes[note_index].hold.is_some() {
        return;
    }
    state.notes[note_index].hold = Some(HoldOutcome::Completed);
    let flags = &mut state.notes[note_index].flags;
    flags.remove(NoteVisualFlags::ACTIVE);
    flags.insert(NoteVisualFlags::CLIPPED);
    state.active_holds[lane] = None;
    state.holds_completed = state.holds_completed.saturating_add(1);
    info!("HOLD OK: lane {lane}, note {note_index}");
}

fn update_active_holds(state: &mut State, now_ms: f64) {
    let grace = state.hold_release_grace_ms;
    for lane in 0..state.active_holds.len() {
        let mut let_go = None;
        let mut success = None;
        if let Some(active) = state.active_holds[lane].as_mut() {
            if state.lane_down[lane] {
                active.last_held_ms = active.last_held_ms.max(now_ms.min(active.end_ms));
            }
            // A release whose grace reaches the end still completes: ties go to the player.
            let released_for_good =
                !state.lane_down[lane] && active.last_held_ms + grace < active.end_ms;
            if released_for_good && now_ms - active.last_held_ms > grace {
                let_go = Some(active.note_index);
            } else if now_ms >= active.end_ms {
                success = Some(active.note_index);
            }
        }
        if let Some(idx) = let_go {
            break_hold(state, lane, idx, HoldOutcome::BrokenEarlyRelease, true);
        }
        if let Some(idx) = success {
            complete_hold(state, lane, idx);
        }
    }
}

fn apply_time_based_misses(state: &mut State, now_ms: f64) {
    let mut cursor = state.next_miss_cursor;
    let mut prefix_resolved = true;
    let mut i = cursor;
    while i < state.notes.len() {
        let note_time = state.chart.notes[i].time_ms;
        let late = now_ms - note_time;
        if !timing_windows::is_passed(late) {
            break;
        }
        if !state.notes[i].is_judged() {
            let lane = state.chart.notes[i].lane;
            if state.chart.notes[i].is_hold() {
                if late > HOLD_INITIAL_MISS_MS {
                    state.notes[i].result = Some(Judgment {
                        grade: JudgeGrade::Miss,
                        time_error_ms: late,
                    });
                    bump_combo(state, JudgeGrade::Miss);
                    info!("MISSED (time-based): hold head {i}, lane {lane}");
                    break_hold(state, lane, i, HoldOutcome::BrokenInitialMiss, false);
                } else {
                    // Hold heads get longer; later notes are still checked.
                    prefix_resolved = false;
                }
            } else {
                state.notes[i].result = Some(Judgment {
                    grade: JudgeGrade::Miss,
                    time_error_ms: late,
                });
                bump_combo(state, JudgeGrade::Miss);
                info!("MISSED (time-based): note {i}, lane {lane}");
            }
        }
        if prefix_resolved {
            cursor = i + 1;
        }
        i += 1;
    }
    state.next_miss_cursor = cursor;
}

/// One logic step at game time `now_ms`: queued input first, then holds,
/// then misses.
pub fn update(state: &mut State, now_ms: f64) {
    if state.torn_down {
        return;
    }
    process_input_edges(state, now_ms);
    update_active_holds(state, now_ms);
    apply_time_based_misses(state, now_ms);
}

/// Every note judged and every hold resolved.
pub fn is_finished(state: &State) -> bool {
    state.notes.iter().all(NoteState::is_judged)
        && state.active_holds.iter().all(Option::is_none)
}

#[inline(always)]
pub fn pending_edge_count(state: &State) -> usize {
    state.pending_edges.len()
}

/// Stops accepting input and drops hold tracking. Idempotent.
pub fn teardown(state: &mut State) {
    if state.torn_down {
        return;
    }
    state.torn_down = true;
    state.pending_edges.clear();
    for lane in 0..state.active_holds.len() {
        if let Some(active) = state.active_holds[lane].take() {
            state.notes[active.note_index]
                .flags
                .remove(NoteVisualFlags::ACTIVE);
        }
        state.lane_down[lane] = false;
    }
    debug!("Gameplay state torn down.");
}
