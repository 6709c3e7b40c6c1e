use crate::game::gameplay::{NoteState, State};
use crate::game::judgment::{JudgeGrade, JudgmentCounts};
use serde::Serialize;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingStats {
    pub mean_abs_ms: f64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    pub max_abs_ms: f64,
    pub count: usize,
}

#[inline(always)]
fn hit_offset(n: &NoteState) -> Option<f64> {
    n.result
        .as_ref()
        .filter(|j| j.grade != JudgeGrade::Miss)
        .map(|j| j.time_error_ms)
}

pub fn compute_note_timing_stats(notes: &[NoteState]) -> TimingStats {
    // First pass: sums and maxima over non-miss judgments
    let mut sum_abs = 0.0;
    let mut sum_signed = 0.0;
    let mut max_abs = 0.0_f64;
    let mut count: usize = 0;
    for e in notes.iter().filter_map(hit_offset) {
        sum_abs += e.abs();
        sum_signed += e;
        max_abs = max_abs.max(e.abs());
        count += 1;
    }
    if count == 0 {
        return TimingStats::default();
    }

    let mean_ms = sum_signed / count as f64;
    let mean_abs_ms = sum_abs / count as f64;

    // Second pass: sample standard deviation of signed offsets
    let stddev_ms = if count > 1 {
        let sum_diff_sq: f64 = notes
            .iter()
            .filter_map(hit_offset)
            .map(|e| (e - mean_ms) * (e - mean_ms))
            .sum();
        (sum_diff_sq / (count as f64 - 1.0)).sqrt()
    } else {
        0.0
    };

    TimingStats {
        mean_abs_ms,
        mean_ms,
        stddev_ms,
        max_abs_ms: max_abs,
        count,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Every note resolved and the chart played out.
    Natural,
    /// The wall-clock fallback timer fired first.
    Forced,
    Quit,
}

/// Final results of one run, produced on natural end or abort.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResults {
    pub score: u64,
    pub accuracy: f64,
    pub max_combo: u32,
    pub judgment_counts: JudgmentCounts,
    pub holds_completed: u32,
    pub holds_broken: u32,
    pub timing: TimingStats,
    /// Notes never judged because the run stopped first.
    pub unjudged: usize,
    pub end: EndReason,
}

pub fn summarize(state: &State, end: EndReason) -> RunResults {
    RunResults {
        score: state.score,
        accuracy: state.counts.accuracy(),
        max_combo: state.max_combo,
        judgment_counts: state.counts,
        holds_completed: state.holds_completed,
        holds_broken: state.holds_broken,
        timing: compute_note_timing_stats(&state.notes),
        unjudged: state.notes.iter().filter(|n| !n.is_judged()).count(),
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::{EndReason, compute_note_timing_stats, summarize};
    use crate::game::chart::{Chart, Note};
    use crate::game::gameplay::{NoteState, init, queue_input_edge, update};
    use crate::game::judgment::{JudgeGrade, Judgment};

    fn judged(grade: JudgeGrade, err: f64) -> NoteState {
        NoteState {
            result: Some(Judgment {
                grade,
                time_error_ms: err,
            }),
            ..NoteState::default()
        }
    }

    #[test]
    fn misses_are_excluded_from_timing() {
        let notes = vec![
            judged(JudgeGrade::Perfect, -10.0),
            judged(JudgeGrade::Great, 30.0),
            judged(JudgeGrade::Miss, 400.0),
            NoteState::default(),
        ];
        let t = compute_note_timing_stats(&notes);
        assert_eq!(t.count, 2);
        assert_eq!(t.mean_ms, 10.0);
        assert_eq!(t.mean_abs_ms, 20.0);
        assert_eq!(t.max_abs_ms, 30.0);
        assert!((t.stddev_ms - 800.0_f64.sqrt()).abs() < 1e-9, "sample stddev, got {}", t.stddev_ms);
    }

    #[test]
    fn empty_run_has_zero_stats() {
        let t = compute_note_timing_stats(&[]);
        assert_eq!(t.count, 0);
        assert_eq!(t.stddev_ms, 0.0);
    }

    #[test]
    fn summary_reflects_gameplay_state() {
        let chart = Chart {
            bpm: 120.0,
            lane_count: 2,
            duration_ms: 0.0,
            notes: vec![Note::tap(1000.0, 0), Note::tap(1500.0, 1), Note::tap(2000.0, 0)],
        };
        let mut s = init(chart, 50.0);
        queue_input_edge(&mut s, 0, true, 1010.0);
        update(&mut s, 1010.0);
        queue_input_edge(&mut s, 1, true, 1480.0);
        update(&mut s, 1700.0);

        let r = summarize(&s, EndReason::Quit);
        assert_eq!(r.end, EndReason::Quit);
        assert_eq!(r.judgment_counts.perfect, 2);
        assert_eq!(r.unjudged, 1);
        assert_eq!(r.score, 200);
        assert_eq!(r.max_combo, 2);
        assert_eq!(r.accuracy, 100.0);
        assert_eq!(r.timing.count, 2);
    }
}
