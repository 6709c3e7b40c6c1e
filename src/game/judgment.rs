use crate::game::timing_windows::{GOOD_MS, GREAT_MS, MISS_AFTER_MS, PERFECT_MS};
use serde::Serialize;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum JudgeGrade {
    Perfect,
    Great,
    Good,
    Miss,
}

impl JudgeGrade {
    pub const ALL: [Self; 4] = [Self::Perfect, Self::Great, Self::Good, Self::Miss];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Perfect => "Perfect",
            Self::Great => "Great",
            Self::Good => "Good",
            Self::Miss => "Miss",
        }
    }

    pub const fn base_score(self) -> u32 {
        match self {
            Self::Perfect => 100,
            Self::Great => 80,
            Self::Good => 50,
            Self::Miss => 0,
        }
    }

    /// Weight toward accuracy.
    pub const fn accuracy_weight(self) -> f64 {
        match self {
            Self::Perfect => 1.0,
            Self::Great => 0.8,
            Self::Good => 0.5,
            Self::Miss => 0.0,
        }
    }

    #[inline(always)]
    pub const fn breaks_combo(self) -> bool {
        matches!(self, Self::Miss)
    }
}

impl fmt::Display for JudgeGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grade for a press `dt_ms` away from its note (positive = late). `None`
/// means the press does not touch the note.
///
/// Only a late press past Good is a poor hit; an early one leaves the note
/// hittable.
#[inline(always)]
pub fn classify_offset_ms(dt_ms: f64) -> Option<JudgeGrade> {
    let a = dt_ms.abs();
    if !a.is_finite() {
        return None;
    }
    if a <= PERFECT_MS {
        Some(JudgeGrade::Perfect)
    } else if a <= GREAT_MS {
        Some(JudgeGrade::Great)
    } else if a <= GOOD_MS {
        Some(JudgeGrade::Good)
    } else if dt_ms > 0.0 && a <= MISS_AFTER_MS {
        Some(JudgeGrade::Miss)
    } else {
        None
    }
}

/// Points for one judgment given the combo after it was applied.
#[inline(always)]
pub const fn score_for(grade: JudgeGrade, combo_after: u32) -> u32 {
    if grade.breaks_combo() {
        return 0;
    }
    grade.base_score() + combo_after / 10
}

#[derive(Clone, Debug)]
pub struct Judgment {
    pub grade: JudgeGrade,
    /// Signed offset from the note, positive = late.
    pub time_error_ms: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JudgmentCounts {
    pub perfect: u32,
    pub great: u32,
    pub good: u32,
    pub miss: u32,
}

impl JudgmentCounts {
    #[inline(always)]
    pub fn record(&mut self, grade: JudgeGrade) {
        let slot = match grade {
            JudgeGrade::Perfect => &mut self.perfect,
            JudgeGrade::Great => &mut self.great,
            JudgeGrade::Good => &mut self.good,
            JudgeGrade::Miss => &mut self.miss,
        };
        *slot = slot.saturating_add(1);
    }

    #[inline(always)]
    pub const fn get(&self, grade: JudgeGrade) -> u32 {
        match grade {
            JudgeGrade::Perfect => self.perfect,
            JudgeGrade::Great => self.great,
            JudgeGrade::Good => self.good,
            JudgeGrade::Miss => self.miss,
        }
    }

    #[inline(always)]
    pub const fn total(&self) -> u32 {
        self.perfect + self.great + self.good + self.miss
    }

    /// Weighted accuracy in percent, 0 when nothing has been judged.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let weighted: f64 = JudgeGrade::ALL
            .iter()
            .map(|&g| f64::from(self.get(g)) * g.accuracy_weight())
            .sum();
        weighted / f64::from(total) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::{JudgeGrade, JudgmentCounts, classify_offset_ms, score_for};

    #[test]
    fn window_edges_are_inclusive() {
        assert_eq!(classify_offset_ms(0.0), Some(JudgeGrade::Perfect));
        assert_eq!(classify_offset_ms(-30.0), Some(JudgeGrade::Perfect));
        assert_eq!(classify_offset_ms(30.01), Some(JudgeGrade::Great));
        assert_eq!(classify_offset_ms(65.0), Some(JudgeGrade::Great));
        assert_eq!(classify_offset_ms(-100.0), Some(JudgeGrade::Good));
        assert_eq!(classify_offset_ms(100.5), Some(JudgeGrade::Miss));
        assert_eq!(classify_offset_ms(120.0), Some(JudgeGrade::Miss));
        assert_eq!(classify_offset_ms(-100.5), None, "early poor presses do not consume");
        assert_eq!(classify_offset_ms(-120.0), None);
        assert_eq!(classify_offset_ms(120.1), None);
        assert_eq!(classify_offset_ms(f64::NAN), None);
    }

    #[test]
    fn combo_bonus_is_a_tenth_of_the_combo() {
        assert_eq!(score_for(JudgeGrade::Perfect, 1), 100);
        assert_eq!(score_for(JudgeGrade::Perfect, 10), 101);
        assert_eq!(score_for(JudgeGrade::Great, 25), 82);
        assert_eq!(score_for(JudgeGrade::Good, 9), 50);
        assert_eq!(score_for(JudgeGrade::Miss, 50), 0);
    }

    #[test]
    fn accuracy_weights_grades() {
        let mut c = JudgmentCounts::default();
        assert_eq!(c.accuracy(), 0.0);
        c.record(JudgeGrade::Perfect);
        c.record(JudgeGrade::Great);
        c.record(JudgeGrade::Good);
        c.record(JudgeGrade::Miss);
        assert!((c.accuracy() - 57.5).abs() < 1e-9);
        assert_eq!(c.total(), 4);
    }
}
