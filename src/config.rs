use crate::game::run::RunTuning;
use crate::vfx::timeline::DEFAULT_DEDUP_TOLERANCE_MS;
use ini::Ini;
use log::{info, warn};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const CONFIG_PATH: &str = "lanesync.ini";
const SECTION: Option<&str> = Some("Options");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub logic_rate_hz: f64,
    /// Frames the audio clock may sit still before the frame clock takes over.
    pub stall_frame_threshold: u32,
    pub freeze_watchdog_ms: f64,
    pub hold_release_grace_ms: f64,
    pub keyframe_dedup_tolerance_ms: f64,
    pub gradient_cache_capacity: usize,
    pub gradient_crossfade_ms: f64,
    // Full-quality snapshot size; lower tiers scale this down.
    pub gradient_base_width: u32,
    pub gradient_base_height: u32,
    pub scroll_lookahead_ms: f64,
    pub lead_in_ms: f64,
    pub end_of_run_linger_ms: f64,
    /// Extra wall-clock time past the natural end before a run is forced to end.
    pub fallback_end_grace_ms: f64,
}

impl Default for Config {
    fn default() -> Self {
        let run = RunTuning::default();
        Self {
            log_level: LogLevel::Info,
            logic_rate_hz: run.logic_rate_hz,
            stall_frame_threshold: run.stall_frame_threshold,
            freeze_watchdog_ms: run.freeze_watchdog_ms,
            hold_release_grace_ms: run.hold_release_grace_ms,
            keyframe_dedup_tolerance_ms: DEFAULT_DEDUP_TOLERANCE_MS,
            gradient_cache_capacity: run.gradient_cache_capacity,
            gradient_crossfade_ms: run.gradient_crossfade_ms,
            gradient_base_width: run.gradient_base_width,
            gradient_base_height: run.gradient_base_height,
            scroll_lookahead_ms: run.scroll_lookahead_ms,
            lead_in_ms: run.lead_in_ms,
            end_of_run_linger_ms: run.end_of_run_linger_ms,
            fallback_end_grace_ms: run.fallback_end_grace_ms,
        }
    }
}

impl Config {
    pub const fn run_tuning(&self) -> RunTuning {
        RunTuning {
            logic_rate_hz: self.logic_rate_hz,
            stall_frame_threshold: self.stall_frame_threshold,
            freeze_watchdog_ms: self.freeze_watchdog_ms,
            hold_release_grace_ms: self.hold_release_grace_ms,
            gradient_cache_capacity: self.gradient_cache_capacity,
            gradient_crossfade_ms: self.gradient_crossfade_ms,
            gradient_base_width: self.gradient_base_width,
            gradient_base_height: self.gradient_base_height,
            scroll_lookahead_ms: self.scroll_lookahead_ms,
            lead_in_ms: self.lead_in_ms,
            end_of_run_linger_ms: self.end_of_run_linger_ms,
            fallback_end_grace_ms: self.fallback_end_grace_ms,
        }
    }
}

// Global, mutable configuration instance.
static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));

// A panic while holding the lock cannot leave a Copy struct half-written.
fn lock() -> MutexGuard<'static, Config> {
    CONFIG.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// Keys in alphabetical order, as written to the file.
const OPTION_KEYS: [&str; 14] = [
    "EndOfRunLingerMs",
    "FallbackEndGraceMs",
    "FreezeWatchdogMs",
    "GradientBaseHeight",
    "GradientBaseWidth",
    "GradientCacheCapacity",
    "GradientCrossfadeMs",
    "HoldReleaseGraceMs",
    "KeyframeDedupToleranceMs",
    "LeadInMs",
    "LogLevel",
    "LogicRateHz",
    "ScrollLookaheadMs",
    "StallFrameThreshold",
];

fn to_ini(cfg: &Config) -> Ini {
    let mut conf = Ini::new();
    conf.with_section(SECTION)
        .set("EndOfRunLingerMs", cfg.end_of_run_linger_ms.to_string())
        .set("FallbackEndGraceMs", cfg.fallback_end_grace_ms.to_string())
        .set("FreezeWatchdogMs", cfg.freeze_watchdog_ms.to_string())
        .set("GradientBaseHeight", cfg.gradient_base_height.to_string())
        .set("GradientBaseWidth", cfg.gradient_base_width.to_string())
        .set("GradientCacheCapacity", cfg.gradient_cache_capacity.to_string())
        .set("GradientCrossfadeMs", cfg.gradient_crossfade_ms.to_string())
        .set("HoldReleaseGraceMs", cfg.hold_release_grace_ms.to_string())
        .set("KeyframeDedupToleranceMs", cfg.keyframe_dedup_tolerance_ms.to_string())
        .set("LeadInMs", cfg.lead_in_ms.to_string())
        .set("LogLevel", cfg.log_level.as_str())
        .set("LogicRateHz", cfg.logic_rate_hz.to_string())
        .set("ScrollLookaheadMs", cfg.scroll_lookahead_ms.to_string())
        .set("StallFrameThreshold", cfg.stall_frame_threshold.to_string());
    conf
}

fn create_default_config_file() -> Result<(), std::io::Error> {
    info!("'{CONFIG_PATH}' not found, creating with default values.");
    to_ini(&Config::default()).write_to_file(CONFIG_PATH)
}

#[inline(always)]
fn positive_f64(v: &str) -> Option<f64> {
    v.trim().parse::<f64>().ok().filter(|x| x.is_finite() && *x > 0.0)
}

#[inline(always)]
fn non_negative_f64(v: &str) -> Option<f64> {
    v.trim().parse::<f64>().ok().filter(|x| x.is_finite() && *x >= 0.0)
}

/// Reads every known key, keeping the default for anything absent or
/// unparsable.
fn from_ini(conf: &Ini) -> Config {
    let default = Config::default();
    let get = |key: &str| conf.get_from(SECTION, key);
    Config {
        log_level: get("LogLevel")
            .and_then(|v| LogLevel::from_str(v).ok())
            .unwrap_or(default.log_level),
        logic_rate_hz: get("LogicRateHz")
            .and_then(positive_f64)
            .unwrap_or(default.logic_rate_hz),
        stall_frame_threshold: get("StallFrameThreshold")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default.stall_frame_threshold),
        freeze_watchdog_ms: get("FreezeWatchdogMs")
            .and_then(positive_f64)
            .unwrap_or(default.freeze_watchdog_ms),
        hold_release_grace_ms: get("HoldReleaseGraceMs")
            .and_then(non_negative_f64)
            .unwrap_or(default.hold_release_grace_ms),
        keyframe_dedup_tolerance_ms: get("KeyframeDedupToleranceMs")
            .and_then(non_negative_f64)
            .unwrap_or(default.keyframe_dedup_tolerance_ms),
        gradient_cache_capacity: get("GradientCacheCapacity")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default.gradient_cache_capacity),
        gradient_crossfade_ms: get("GradientCrossfadeMs")
            .and_then(non_negative_f64)
            .unwrap_or(default.gradient_crossfade_ms),
        gradient_base_width: get("GradientBaseWidth")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default.gradient_base_width),
        gradient_base_height: get("GradientBaseHeight")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default.gradient_base_height),
        scroll_lookahead_ms: get("ScrollLookaheadMs")
            .and_then(positive_f64)
            .unwrap_or(default.scroll_lookahead_ms),
        lead_in_ms: get("LeadInMs")
            .and_then(non_negative_f64)
            .unwrap_or(default.lead_in_ms),
        end_of_run_linger_ms: get("EndOfRunLingerMs")
            .and_then(non_negative_f64)
            .unwrap_or(default.end_of_run_linger_ms),
        fallback_end_grace_ms: get("FallbackEndGraceMs")
            .and_then(non_negative_f64)
            .unwrap_or(default.fallback_end_grace_ms),
    }
}

pub fn load() {
    if !std::path::Path::new(CONFIG_PATH).exists()
        && let Err(e) = create_default_config_file()
    {
        warn!("Failed to create default config file: {e}");
    }

    match Ini::load_from_file(CONFIG_PATH) {
        Ok(conf) => {
            let cfg = from_ini(&conf);
            *lock() = cfg;
            info!("Configuration loaded from '{CONFIG_PATH}'.");

            // Only rewrite the file if any keys are missing.
            let missing = OPTION_KEYS
                .iter()
                .any(|key| conf.get_from(SECTION, key).is_none());
            if missing {
                info!("'{CONFIG_PATH}' is missing keys, filling in defaults.");
                if let Err(e) = to_ini(&cfg).write_to_file(CONFIG_PATH) {
                    warn!("Failed to update '{CONFIG_PATH}': {e}");
                }
            }
        }
        Err(e) => warn!("Failed to load '{CONFIG_PATH}': {e}. Using default values."),
    }
}

pub fn get() -> Config {
    *lock()
}

#[cfg(test)]
mod tests {
    use super::{Config, LogLevel, OPTION_KEYS, SECTION, from_ini, to_ini};
    use ini::Ini;

    #[test]
    fn missing_and_bad_values_fall_back() {
        let conf = Ini::load_from_str(
            "[Options]\nLogLevel=debug\nLogicRateHz=-3\nHoldReleaseGraceMs=75\nGradientCacheCapacity=zero\n",
        )
        .expect("valid ini");
        let cfg = from_ini(&conf);
        let default = Config::default();
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.logic_rate_hz, default.logic_rate_hz, "negative rate rejected");
        assert_eq!(cfg.hold_release_grace_ms, 75.0);
        assert_eq!(cfg.gradient_cache_capacity, default.gradient_cache_capacity);
        assert_eq!(cfg.run_tuning().hold_release_grace_ms, 75.0);
    }

    #[test]
    fn written_file_has_every_key_and_reads_back() {
        let cfg = Config {
            log_level: LogLevel::Trace,
            stall_frame_threshold: 12,
            lead_in_ms: 0.0,
            ..Config::default()
        };
        let conf = to_ini(&cfg);
        for key in OPTION_KEYS {
            assert!(conf.get_from(SECTION, key).is_some(), "{key} not written");
        }
        assert_eq!(from_ini(&conf), cfg);
    }

    #[test]
    fn level_names_parse_loosely() {
        assert_eq!(" WARNING ".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Off.as_level_filter(), log::LevelFilter::Off);
    }
}
