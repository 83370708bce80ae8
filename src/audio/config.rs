use serde::Deserialize;
use std::path::Path;

use crate::audio::errors::ConfigError;

// --- EQ Filter Constants ---
pub const LOW_SHELF_HZ: f32 = 320.0;
pub const MID_CENTER_HZ: f32 = 1000.0;
pub const HIGH_SHELF_HZ: f32 = 3200.0;
pub const MID_PEAK_Q_FACTOR: f32 = 0.5;
// Q factor for shelf filters (Butterworth slope)
pub const SHELF_Q_FACTOR: f32 = std::f32::consts::FRAC_1_SQRT_2;
/// dB of EQ gain per control step away from center.
pub const EQ_DB_PER_STEP: f64 = 0.4;

// --- Sweep Filter Constants ---
pub const FILTER_MIN_HZ: f64 = 40.0;
pub const LOWPASS_MAX_HZ: f64 = 8000.0;
pub const HIGHPASS_MAX_HZ: f64 = 16000.0;
pub const SWEEP_FILTER_Q_FACTOR: f32 = std::f32::consts::FRAC_1_SQRT_2;

// --- Control Ranges ---
pub const CONTROL_MIN: f64 = 0.0;
pub const CONTROL_MAX: f64 = 100.0;
pub const CONTROL_CENTER: f64 = 50.0;
pub const INITIAL_VOLUME: f64 = 85.0;
pub const MIDI_VALUE_MAX: f64 = 127.0;

// --- BPM Analyzer Constants ---
pub const BPM_MIN: f32 = 60.0;
pub const BPM_MAX: f32 = 200.0;

// --- Beat Grid Constants ---
pub const GRID_LOWPASS_HZ: f32 = 200.0;
pub const GRID_LOWPASS_Q: f32 = 1.0;
/// Amplitude (full scale = 1.0) a filtered sample must exceed to count as an onset.
pub const ONSET_THRESHOLD: f32 = 0.3;
pub const MIN_ONSETS_FOR_GRID: usize = 4;

// --- Deck Constants ---
pub const HOT_CUE_SLOTS: usize = 8;
pub const DEFAULT_LOOP_LENGTH_BEATS: f64 = 4.0;
pub const LOOP_LENGTH_PRESETS: [f64; 8] = [0.125, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0];
pub const MIN_LOOP_LENGTH_BEATS: f64 = 0.125;
pub const MAX_LOOP_LENGTH_BEATS: f64 = 32.0;
/// Floor for the clock rate while a phase correction is applied.
pub const MIN_CLOCK_RATE: f64 = 0.0625;

// --- Engine Thread Constants ---
pub const ENGINE_COMMAND_CHANNEL_SIZE: usize = 64;
pub const DEFAULT_SAMPLE_CAPACITY: usize = 1024 * 256;
/// Minimum change in dB before EQ coefficients are recalculated mid-ramp.
pub const EQ_RECALC_THRESHOLD_DB: f32 = 0.1;
/// Minimum relative cutoff change before the sweep filter is redesigned mid-ramp.
pub const FILTER_RECALC_THRESHOLD_RATIO: f32 = 0.005;

/// Tunable phase-correction parameters.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncTuning {
    /// Timing errors at or below this are left alone.
    pub deadband_seconds: f64,
    /// How long the temporary correction rate stays applied.
    pub correction_window_seconds: f64,
    /// Tempo difference that triggers a steady-state rate rewrite.
    pub bpm_epsilon: f64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        SyncTuning {
            deadband_seconds: 0.02,
            correction_window_seconds: 0.5,
            bpm_epsilon: 0.01,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub sync: SyncTuning,
    pub loop_poll_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub smoothing_time_constant_seconds: f32,
    pub jog_step_seconds: f64,
    pub initial_volume: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sync: SyncTuning::default(),
            loop_poll_interval_ms: 10,
            progress_interval_ms: 16,
            smoothing_time_constant_seconds: 0.01,
            jog_step_seconds: 0.1,
            initial_volume: INITIAL_VOLUME,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.correction_window_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "sync.correctionWindowSeconds must be positive".to_string(),
            ));
        }
        if self.sync.deadband_seconds < 0.0 || self.sync.bpm_epsilon < 0.0 {
            return Err(ConfigError::Invalid(
                "sync tolerances must not be negative".to_string(),
            ));
        }
        if self.loop_poll_interval_ms == 0 || self.progress_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll intervals must be at least 1 ms".to_string(),
            ));
        }
        if self.smoothing_time_constant_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "smoothingTimeConstantSeconds must not be negative".to_string(),
            ));
        }
        if !(CONTROL_MIN..=CONTROL_MAX).contains(&self.initial_volume) {
            return Err(ConfigError::Invalid(
                "initialVolume must be within 0-100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "sync": { "deadbandSeconds": 0.03 } }"#).unwrap();
        assert_eq!(config.sync.deadband_seconds, 0.03);
        assert_eq!(config.sync.correction_window_seconds, 0.5);
        assert_eq!(config.loop_poll_interval_ms, 10);
    }

    #[test]
    fn rejects_non_positive_window() {
        let result =
            EngineConfig::from_json_str(r#"{ "sync": { "correctionWindowSeconds": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }
}
