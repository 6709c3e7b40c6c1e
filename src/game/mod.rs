pub mod chart;
pub mod gameplay;
pub mod judgment;
pub mod run;
pub mod stage_stats;
pub mod timing_windows;
