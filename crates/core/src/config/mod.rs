use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, VibeVizError};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub bands: BandConfig,
    #[serde(default)]
    pub beat: BeatConfig,
}

impl AppConfig {
    /// Loads a configuration from a JSON file. Missing fields fall back to
    /// their defaults so partial files are accepted.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| VibeVizError::msg(format!("invalid config file: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every tunable is inside its working range.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.fft_size < 2 || audio.fft_size % 2 != 0 {
            return Err(VibeVizError::msg(
                "fft_size must be an even value of at least 2",
            ));
        }
        if !(0.0..1.0).contains(&audio.smoothing) {
            return Err(VibeVizError::msg("smoothing must lie in [0, 1)"));
        }
        if audio.min_decibels >= audio.max_decibels {
            return Err(VibeVizError::msg("min_decibels must be below max_decibels"));
        }
        if audio.max_advance_seconds <= 0.0 {
            return Err(VibeVizError::msg("max_advance_seconds must be positive"));
        }
        if self.bands.bass_cutoff_hz >= self.bands.mid_cutoff_hz {
            return Err(VibeVizError::msg("bass cutoff must be below the mid cutoff"));
        }
        if self.beat.history == 0 {
            return Err(VibeVizError::msg(
                "beat history must hold at least one sample",
            ));
        }
        Ok(())
    }
}

/// Configuration for the analyzer node and source timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate assumed while no source is connected.
    pub fallback_sample_rate: u32,
    /// Size of the analysis window in samples. The spectrum exposes
    /// `fft_size / 2` frequency bins.
    pub fft_size: usize,
    /// Per-bin exponential magnitude smoothing factor.
    pub smoothing: f32,
    /// Magnitude mapped to byte value 0.
    pub min_decibels: f32,
    /// Magnitude mapped to byte value 255.
    pub max_decibels: f32,
    /// Upper bound on how much file audio a single analysis pull may
    /// consume, so a stalled host cannot trigger an unbounded copy.
    pub max_advance_seconds: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fallback_sample_rate: 48_000,
            fft_size: 512,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            max_advance_seconds: 1.0,
        }
    }
}

/// Frequency boundaries for the bass/mid/treble split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandConfig {
    pub bass_cutoff_hz: f32,
    pub mid_cutoff_hz: f32,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            bass_cutoff_hz: 250.0,
            mid_cutoff_hz: 4_000.0,
        }
    }
}

/// Tunables for the adaptive beat threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatConfig {
    /// Number of bass-energy samples kept in the rolling history.
    pub history: usize,
    /// A beat requires the instant energy to exceed the local average by
    /// this factor.
    pub ratio: f32,
    /// Absolute energy floor below which no beat is reported.
    pub floor: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            history: 60,
            ratio: 1.5,
            floor: 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default()
            .validate()
            .expect("defaults must validate");
    }

    #[test]
    fn empty_json_yields_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.audio.fft_size, 512);
        assert_eq!(config.beat.history, 60);
        assert_eq!(config.bands.mid_cutoff_hz, 4_000.0);
    }

    #[test]
    fn partial_json_overrides_a_single_section() {
        let config: AppConfig =
            serde_json::from_str(r#"{"beat": {"history": 30, "ratio": 2.0, "floor": 0.2}}"#)
                .unwrap();
        assert_eq!(config.beat.history, 30);
        assert_eq!(config.audio.fft_size, 512);
    }

    #[test]
    fn rejects_odd_fft_size() {
        let mut config = AppConfig::default();
        config.audio.fft_size = 511;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_band_cutoffs() {
        let mut config = AppConfig::default();
        config.bands.bass_cutoff_hz = 8_000.0;
        assert!(config.validate().is_err());
    }
}
