use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::{BandConfig, BeatConfig};

/// Per-frame summary handed to the renderer.
///
/// Every field is recomputed together on each pull; `Default` is the
/// zero/no-signal frame returned while nothing is connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    /// Normalised [0, 1] energy below the bass cutoff.
    pub bass: f32,
    /// Normalised [0, 1] energy between the bass and mid cutoffs.
    pub mid: f32,
    /// Normalised [0, 1] energy above the mid cutoff.
    pub treble: f32,
    pub is_beat: bool,
}

/// The three band energies before beat detection is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandLevels {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

/// Splits a byte magnitude spectrum into bass/mid/treble energies.
///
/// Band edges are derived from the sample rate rather than fixed bin
/// indices, so the same cutoffs hold at 22.05 kHz and 96 kHz alike:
/// `nyquist = sample_rate / 2`, `bin_hz = nyquist / bin_count`, and each
/// boundary index is `round(cutoff_hz / bin_hz)` clamped to
/// `[0, bin_count]`.
#[derive(Debug, Clone)]
pub struct FrequencyAnalyzer {
    bass_cutoff_hz: f32,
    mid_cutoff_hz: f32,
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new(&BandConfig::default())
    }
}

impl FrequencyAnalyzer {
    pub fn new(config: &BandConfig) -> Self {
        Self {
            bass_cutoff_hz: config.bass_cutoff_hz,
            mid_cutoff_hz: config.mid_cutoff_hz,
        }
    }

    /// Returns the `(bass_end, mid_end)` boundary bin indices. Both are
    /// within `[0, bin_count]` and `bass_end <= mid_end`.
    pub fn band_edges(&self, sample_rate: u32, bin_count: usize) -> (usize, usize) {
        if sample_rate == 0 || bin_count == 0 {
            return (0, 0);
        }
        let nyquist = sample_rate as f32 / 2.0;
        let bin_hz = nyquist / bin_count as f32;
        let edge = |cutoff_hz: f32| ((cutoff_hz / bin_hz).round() as usize).min(bin_count);
        let bass_end = edge(self.bass_cutoff_hz);
        let mid_end = edge(self.mid_cutoff_hz).max(bass_end);
        (bass_end, mid_end)
    }

    /// Averages the byte magnitudes of each band and normalises them to
    /// [0, 1]. Degenerate inputs (no bins, zero sample rate, empty band
    /// ranges) yield 0 for the affected band; the result never contains a
    /// NaN or infinite value.
    pub fn compute_bands(&self, magnitudes: &[u8], sample_rate: u32) -> BandLevels {
        let bin_count = magnitudes.len();
        let (bass_end, mid_end) = self.band_edges(sample_rate, bin_count);

        BandLevels {
            bass: normalised_mean(&magnitudes[..bass_end]),
            mid: normalised_mean(&magnitudes[bass_end..mid_end]),
            treble: normalised_mean(&magnitudes[mid_end..]),
        }
    }
}

fn normalised_mean(magnitudes: &[u8]) -> f32 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let sum: f32 = magnitudes.iter().map(|byte| f32::from(*byte)).sum();
    let mean = sum / magnitudes.len() as f32 / 255.0;
    if mean.is_finite() {
        mean.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Flags beats by comparing the instant bass energy against a short
/// rolling average.
///
/// The relative test (`ratio`) catches transients against a quiet
/// baseline; the absolute floor suppresses false positives during near
/// silence, where even tiny fluctuations exceed a tiny average. History
/// is evicted in O(1) once the fixed capacity is reached and must be
/// reset whenever the audio source changes so stale statistics from a
/// previous source never influence detection.
#[derive(Debug)]
pub struct BeatDetector {
    history: VecDeque<f32>,
    capacity: usize,
    ratio: f32,
    floor: f32,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(&BeatConfig::default())
    }
}

impl BeatDetector {
    pub fn new(config: &BeatConfig) -> Self {
        let capacity = config.history.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            ratio: config.ratio,
            floor: config.floor,
        }
    }

    /// Appends `bass` to the history (evicting the oldest sample at
    /// capacity) and reports whether the new sample qualifies as a beat.
    /// The local average includes the sample being tested.
    pub fn update(&mut self, bass: f32) -> bool {
        let bass = if bass.is_finite() { bass.max(0.0) } else { 0.0 };
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(bass);

        let local_average = self.history.iter().sum::<f32>() / self.history.len() as f32;
        bass > local_average * self.ratio && bass > self.floor
    }

    /// Empties the history without touching the thresholds.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges_stay_ordered_and_bounded() {
        let analyzer = FrequencyAnalyzer::default();
        for sample_rate in [0_u32, 1, 8_000, 22_050, 44_100, 48_000, 96_000, 192_000] {
            for bin_count in [0_usize, 1, 4, 16, 128, 256, 1024] {
                let (bass_end, mid_end) = analyzer.band_edges(sample_rate, bin_count);
                assert!(bass_end <= mid_end, "rate {sample_rate} bins {bin_count}");
                assert!(mid_end <= bin_count, "rate {sample_rate} bins {bin_count}");
            }
        }
    }

    #[test]
    fn band_edges_follow_the_sample_rate() {
        let analyzer = FrequencyAnalyzer::default();
        // 48 kHz, 256 bins: bin width 93.75 Hz -> 250 Hz ~ bin 3, 4 kHz ~ bin 43.
        assert_eq!(analyzer.band_edges(48_000, 256), (3, 43));
        // Halving the rate doubles the resolution of the same cutoffs.
        assert_eq!(analyzer.band_edges(24_000, 256), (5, 85));
    }

    #[test]
    fn bands_are_always_finite_and_normalised() {
        let analyzer = FrequencyAnalyzer::default();
        for sample_rate in [0_u32, 1, 22_050, 48_000] {
            for magnitudes in [vec![], vec![255_u8; 1], vec![128; 256], vec![255; 1024]] {
                let levels = analyzer.compute_bands(&magnitudes, sample_rate);
                for value in [levels.bass, levels.mid, levels.treble] {
                    assert!(value.is_finite());
                    assert!((0.0..=1.0).contains(&value));
                }
            }
        }
    }

    #[test]
    fn full_scale_spectrum_reports_full_bands() {
        let analyzer = FrequencyAnalyzer::default();
        let levels = analyzer.compute_bands(&[255; 256], 48_000);
        assert_eq!(levels.bass, 1.0);
        assert_eq!(levels.mid, 1.0);
        assert_eq!(levels.treble, 1.0);
    }

    #[test]
    fn bass_heavy_spectrum_favours_the_bass_band() {
        let analyzer = FrequencyAnalyzer::default();
        let mut magnitudes = vec![0_u8; 256];
        for value in magnitudes.iter_mut().take(3) {
            *value = 200;
        }
        let levels = analyzer.compute_bands(&magnitudes, 48_000);
        assert!(levels.bass > 0.5);
        assert_eq!(levels.mid, 0.0);
        assert_eq!(levels.treble, 0.0);
    }

    #[test]
    fn beat_fires_on_a_transient_over_a_quiet_baseline() {
        let mut detector = BeatDetector::default();
        for _ in 0..60 {
            assert!(!detector.update(0.1));
        }
        assert!(detector.update(0.5));
    }

    #[test]
    fn beat_stays_quiet_for_a_steady_signal() {
        let mut detector = BeatDetector::default();
        for _ in 0..60 {
            detector.update(0.2);
        }
        assert!(!detector.update(0.2));
    }

    #[test]
    fn beat_needs_the_absolute_floor() {
        let mut detector = BeatDetector::default();
        for _ in 0..60 {
            detector.update(0.01);
        }
        // Relative jump alone is not enough below the floor.
        assert!(!detector.update(0.2));
    }

    #[test]
    fn history_never_exceeds_capacity() {
        let mut detector = BeatDetector::default();
        for index in 0..500 {
            detector.update(index as f32 / 500.0);
            assert!(detector.len() <= 60);
        }
        assert_eq!(detector.len(), 60);
    }

    #[test]
    fn reset_discards_previous_statistics() {
        let mut detector = BeatDetector::default();
        for _ in 0..60 {
            detector.update(0.9);
        }
        detector.reset();
        assert!(detector.is_empty());
        // With a fresh history the mean equals the sample itself, so the
        // relative test cannot pass.
        assert!(!detector.update(0.9));
    }

    #[test]
    fn non_finite_energy_is_sanitised() {
        let mut detector = BeatDetector::default();
        assert!(!detector.update(f32::NAN));
        assert!(!detector.update(f32::INFINITY));
        assert_eq!(detector.len(), 2);
    }
}
