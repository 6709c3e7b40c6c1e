use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub time_ms: f64,
    pub lane: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_duration_ms: Option<f64>,
}

impl Note {
    pub const fn tap(time_ms: f64, lane: usize) -> Self {
        Self {
            time_ms,
            lane,
            hold_duration_ms: None,
        }
    }

    pub const fn hold(time_ms: f64, lane: usize, duration_ms: f64) -> Self {
        Self {
            time_ms,
            lane,
            hold_duration_ms: Some(duration_ms),
        }
    }

    /// A zero or negative duration plays as a tap.
    #[inline(always)]
    pub fn is_hold(&self) -> bool {
        self.hold_duration_ms.is_some_and(|d| d > 0.0)
    }

    #[inline(always)]
    pub fn end_ms(&self) -> f64 {
        match self.hold_duration_ms {
            Some(d) if d > 0.0 => self.time_ms + d,
            _ => self.time_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub bpm: f64,
    pub lane_count: usize,
    #[serde(default)]
    pub duration_ms: f64,
    pub notes: Vec<Note>,
}

#[derive(Debug)]
pub enum ChartError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    NoLanes,
    InvalidBpm(f64),
    InvalidTime { index: usize },
    LaneOutOfRange { index: usize, lane: usize, lane_count: usize },
}

impl fmt::Display for ChartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read chart: {e}"),
            Self::Parse(e) => write!(f, "malformed chart: {e}"),
            Self::NoLanes => f.write_str("chart has no lanes"),
            Self::InvalidBpm(bpm) => write!(f, "invalid bpm {bpm}"),
            Self::InvalidTime { index } => write!(f, "note {index} has a non-finite time"),
            Self::LaneOutOfRange {
                index,
                lane,
                lane_count,
            } => write!(f, "note {index} uses lane {lane} but the chart has {lane_count} lanes"),
        }
    }
}

impl std::error::Error for ChartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChartError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ChartError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

impl Chart {
    pub fn from_json(json: &str) -> Result<Self, ChartError> {
        serde_json::from_str::<Self>(json)?.validated()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChartError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let chart = Self::from_json(&text)?;
        info!(
            "Loaded chart '{}': {} notes, {} lanes, {:.1} bpm.",
            path.as_ref().display(),
            chart.notes.len(),
            chart.lane_count,
            chart.bpm
        );
        Ok(chart)
    }

    /// Rejects charts the runtime cannot play and puts notes in time order.
    pub fn validated(mut self) -> Result<Self, ChartError> {
        if self.lane_count == 0 {
            return Err(ChartError::NoLanes);
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(ChartError::InvalidBpm(self.bpm));
        }
        for (index, n) in self.notes.iter().enumerate() {
            if !n.time_ms.is_finite() || n.hold_duration_ms.is_some_and(|d| !d.is_finite()) {
                return Err(ChartError::InvalidTime { index });
            }
            if n.lane >= self.lane_count {
                return Err(ChartError::LaneOutOfRange {
                    index,
                    lane: n.lane,
                    lane_count: self.lane_count,
                });
            }
        }
        if !self.notes.windows(2).all(|w| w[0].time_ms <= w[1].time_ms) {
            warn!("Chart notes are out of order; sorting {} notes by time.", self.notes.len());
            // Stable, so same-time notes keep their authored order.
            self.notes.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            warn!("Ignoring invalid chart duration {}.", self.duration_ms);
            self.duration_ms = 0.0;
        }
        Ok(self)
    }

    #[inline(always)]
    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.bpm
    }

    /// Latest time any note needs the player, holds included.
    pub fn last_note_end_ms(&self) -> f64 {
        self.notes.iter().map(Note::end_ms).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::{Chart, ChartError};

    #[test]
    fn parses_editor_json() {
        let chart = Chart::from_json(
            r#"{"bpm":120,"laneCount":4,"durationMs":5000,
                "notes":[{"timeMs":1000,"lane":0},{"timeMs":1500,"lane":2,"holdDurationMs":400}]}"#,
        )
        .expect("valid chart");
        assert_eq!(chart.notes.len(), 2);
        assert!(!chart.notes[0].is_hold());
        assert!(chart.notes[1].is_hold());
        assert_eq!(chart.last_note_end_ms(), 1900.0);
        assert_eq!(chart.beat_ms(), 500.0);
    }

    #[test]
    fn rejects_out_of_range_lanes() {
        let err = Chart::from_json(r#"{"bpm":120,"laneCount":4,"notes":[{"timeMs":0,"lane":4}]}"#)
            .expect_err("lane 4 of 4 is out of range");
        assert!(matches!(err, ChartError::LaneOutOfRange { index: 0, lane: 4, lane_count: 4 }));
    }

    #[test]
    fn sorts_unordered_notes_stably() {
        let chart = Chart::from_json(
            r#"{"bpm":150,"laneCount":4,"notes":[
                {"timeMs":900,"lane":1},{"timeMs":100,"lane":3},{"timeMs":100,"lane":0}]}"#,
        )
        .expect("valid chart");
        let order: Vec<(f64, usize)> = chart.notes.iter().map(|n| (n.time_ms, n.lane)).collect();
        assert_eq!(order, vec![(100.0, 3), (100.0, 0), (900.0, 1)]);
        assert_eq!(chart.duration_ms, 0.0, "duration is optional");
    }

    #[test]
    fn non_positive_hold_is_a_tap() {
        let chart = Chart::from_json(
            r#"{"bpm":120,"laneCount":1,"notes":[{"timeMs":10,"lane":0,"holdDurationMs":0}]}"#,
        )
        .expect("valid chart");
        assert!(!chart.notes[0].is_hold());
        assert_eq!(chart.notes[0].end_ms(), 10.0);
    }
}
