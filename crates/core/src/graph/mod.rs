use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use tracing::{debug, warn};

use crate::backend::OutputSink;
use crate::config::AudioConfig;

/// Tag for the kind of source currently wired into the graph. Feedback
/// avoidance is keyed off this tag rather than inferred from the source
/// object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Microphone,
    File,
}

/// Routing topology of the analysis chain.
///
/// The graph owns three persistent processing nodes (gain, analyzer and
/// an optional audible output) plus the edge set describing what is
/// wired. Nodes live for the whole engine lifetime and are reused across
/// source switches; wiring only mutates edges. Invariants:
///
/// - at most one source is wired into the gain node at any time;
/// - when the wired source is a microphone the analyzer → output edge
///   MUST NOT exist, so live capture can never feed back into the
///   speakers;
/// - when the wired source is a file that edge MUST exist (when a sink
///   is available) so the user hears playback.
pub struct SignalGraph {
    gain: GainNode,
    analyzer: AnalyzerNode,
    output: Option<Box<dyn OutputSink>>,
    source_kind: Option<SourceKind>,
    monitor_wired: bool,
}

impl SignalGraph {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            gain: GainNode::new(1.0),
            analyzer: AnalyzerNode::new(config),
            output: None,
            source_kind: None,
            monitor_wired: false,
        }
    }

    /// Installs (or replaces) the audible output node. Replacing the sink
    /// while a file is wired rewires the monitor edge onto the new sink.
    pub fn set_output(&mut self, sink: Box<dyn OutputSink>) {
        self.output = Some(sink);
        if self.source_kind == Some(SourceKind::File) {
            self.monitor_wired = true;
        }
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Wires `source → gain → analyzer`, and `analyzer → output` for file
    /// sources only. Existing edges are cleared first, so the call is
    /// idempotent and never leaves two sources wired.
    pub fn wire(&mut self, kind: SourceKind) {
        self.unwire_all();
        self.source_kind = Some(kind);
        self.monitor_wired = match kind {
            SourceKind::Microphone => false,
            SourceKind::File => {
                if self.output.is_none() {
                    warn!("no audible output available, file playback degrades to analysis only");
                }
                self.output.is_some()
            }
        };
        debug!(?kind, monitor = self.monitor_wired, "signal graph wired");
    }

    /// Removes every edge and clears the analyzer window. Safe to call
    /// when nothing is wired.
    pub fn unwire_all(&mut self) {
        if self.source_kind.is_none() {
            return;
        }
        self.source_kind = None;
        self.monitor_wired = false;
        self.clear_output();
        self.analyzer.reset();
    }

    /// Clamps `volume` to [0, 1] and applies it to the gain node. Without
    /// a wired source this is a no-op; the engine re-applies the current
    /// volume whenever a new source is wired.
    pub fn set_volume(&mut self, volume: f32) {
        if self.source_kind.is_none() {
            return;
        }
        self.gain.set_gain(volume);
    }

    /// Routes one block of source samples through gain and analyzer, and
    /// on to the output when the monitor edge exists. A sink failure is
    /// not propagated: the monitor edge is dropped and analysis carries
    /// on.
    pub fn process_block(&mut self, samples: &[f32]) {
        if self.source_kind.is_none() || samples.is_empty() {
            return;
        }
        let mut scaled = samples.to_vec();
        self.gain.apply(&mut scaled);
        self.analyzer.push(&scaled);
        if self.monitor_wired {
            if let Some(output) = self.output.as_mut() {
                output.write(&scaled);
            }
        }
    }

    /// Most recent byte magnitude spectrum, `fft_size / 2` bins. All
    /// zeros while no source is wired.
    pub fn pull_spectrum(&mut self) -> &[u8] {
        if self.source_kind.is_none() {
            return self.analyzer.silent_spectrum();
        }
        self.analyzer.byte_spectrum()
    }

    /// Drops queued-but-unplayed audio from the output node.
    pub fn clear_output(&mut self) {
        if let Some(output) = self.output.as_mut() {
            output.clear();
        }
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source_kind
    }

    pub fn is_monitor_wired(&self) -> bool {
        self.monitor_wired
    }

    pub fn volume(&self) -> f32 {
        self.gain.gain()
    }
}

impl fmt::Debug for SignalGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalGraph")
            .field("gain", &self.gain)
            .field("analyzer", &self.analyzer)
            .field("has_output", &self.output.is_some())
            .field("source_kind", &self.source_kind)
            .field("monitor_wired", &self.monitor_wired)
            .finish()
    }
}

/// Scalar gain applied ahead of the analyzer, so both the analysis and
/// the audible monitor observe the volume-scaled signal.
#[derive(Debug)]
pub struct GainNode {
    gain: f32,
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        let mut node = Self { gain: 1.0 };
        node.set_gain(gain);
        node
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = if gain.is_finite() {
            gain.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn apply(&self, samples: &mut [f32]) {
        for sample in samples {
            *sample *= self.gain;
        }
    }
}

/// Spectrum analyser over a rolling window of the most recent
/// `fft_size` time samples.
///
/// Mirrors the byte-magnitude interface of a Web Audio analyser node:
/// Hann-windowed forward FFT, magnitudes normalised by the window
/// length, exponential per-bin smoothing, then a linear map of
/// `20·log10(magnitude)` from `[min_decibels, max_decibels]` onto
/// `[0, 255]`. Recomputation is deferred until the spectrum is pulled,
/// so at most one smoothing step happens per rendered frame.
pub struct AnalyzerNode {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
    silent: Vec<u8>,
    dirty: bool,
}

impl AnalyzerNode {
    pub fn new(config: &AudioConfig) -> Self {
        let fft_size = config.fft_size.max(2);
        let bin_count = fft_size / 2;
        let mut planner = RealFftPlanner::new();
        let plan = planner.plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        Self {
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            window: vec![0.0; fft_size],
            plan,
            input,
            spectrum,
            scratch,
            smoothed: vec![0.0; bin_count],
            bytes: vec![0; bin_count],
            silent: vec![0; bin_count],
            dirty: false,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Appends samples to the rolling window, keeping the most recent
    /// `fft_size` of them.
    pub fn push(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        if samples.len() >= self.fft_size {
            self.window
                .copy_from_slice(&samples[samples.len() - self.fft_size..]);
        } else {
            self.window.rotate_left(samples.len());
            let start = self.fft_size - samples.len();
            self.window[start..].copy_from_slice(samples);
        }
        self.dirty = true;
    }

    /// Current byte spectrum, recomputing it first when new samples have
    /// arrived since the last pull.
    pub fn byte_spectrum(&mut self) -> &[u8] {
        if self.dirty {
            self.recompute();
            self.dirty = false;
        }
        &self.bytes
    }

    pub fn silent_spectrum(&self) -> &[u8] {
        &self.silent
    }

    /// Clears the window and every derived magnitude.
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.smoothed.fill(0.0);
        self.bytes.fill(0);
        self.dirty = false;
    }

    fn recompute(&mut self) {
        for (index, value) in self.window.iter().enumerate() {
            self.input[index] = value * hann_value(index, self.fft_size);
        }
        if let Err(err) =
            self.plan
                .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            // Keep the previous spectrum; a degraded picture beats a crash.
            warn!(%err, "spectrum computation failed");
            return;
        }

        let scale = 1.0 / self.fft_size as f32;
        let db_range = self.max_decibels - self.min_decibels;
        for (index, byte) in self.bytes.iter_mut().enumerate() {
            let magnitude = self.spectrum[index].norm() * scale;
            let smoothed =
                self.smoothing * self.smoothed[index] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[index] = smoothed;

            let db = 20.0 * smoothed.log10();
            let scaled = (db - self.min_decibels) / db_range * 255.0;
            *byte = if scaled.is_nan() {
                0
            } else {
                scaled.clamp(0.0, 255.0) as u8
            };
        }
    }
}

impl fmt::Debug for AnalyzerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerNode")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::backend::testing::FakeSink;

    fn graph() -> SignalGraph {
        SignalGraph::new(&AudioConfig::default())
    }

    fn graph_with_sink() -> (SignalGraph, Arc<Mutex<Vec<f32>>>) {
        let mut graph = graph();
        let written = Arc::new(Mutex::new(Vec::new()));
        graph.set_output(Box::new(FakeSink {
            written: Arc::clone(&written),
            clears: Arc::new(Mutex::new(0)),
        }));
        (graph, written)
    }

    fn sine(frequency_hz: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency_hz * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn microphone_wiring_never_monitors() {
        let (mut graph, _) = graph_with_sink();
        graph.wire(SourceKind::Microphone);
        assert_eq!(graph.source_kind(), Some(SourceKind::Microphone));
        assert!(!graph.is_monitor_wired());
    }

    #[test]
    fn file_wiring_monitors_when_a_sink_exists() {
        let (mut graph, _) = graph_with_sink();
        graph.wire(SourceKind::File);
        assert!(graph.is_monitor_wired());
    }

    #[test]
    fn file_wiring_degrades_without_a_sink() {
        let mut graph = graph();
        graph.wire(SourceKind::File);
        assert_eq!(graph.source_kind(), Some(SourceKind::File));
        assert!(!graph.is_monitor_wired());
    }

    #[test]
    fn wiring_is_idempotent() {
        let (mut graph, _) = graph_with_sink();
        graph.wire(SourceKind::File);
        graph.wire(SourceKind::File);
        assert_eq!(graph.source_kind(), Some(SourceKind::File));
        assert!(graph.is_monitor_wired());
    }

    #[test]
    fn switching_kinds_replaces_the_single_source_edge() {
        let (mut graph, _) = graph_with_sink();
        graph.wire(SourceKind::Microphone);
        graph.wire(SourceKind::File);
        assert_eq!(graph.source_kind(), Some(SourceKind::File));
        assert!(graph.is_monitor_wired());
        graph.wire(SourceKind::Microphone);
        assert_eq!(graph.source_kind(), Some(SourceKind::Microphone));
        assert!(!graph.is_monitor_wired());
    }

    #[test]
    fn unwire_all_is_a_safe_noop_when_empty() {
        let mut graph = graph();
        graph.unwire_all();
        graph.unwire_all();
        assert_eq!(graph.source_kind(), None);
    }

    #[test]
    fn volume_is_deferred_until_a_source_is_wired() {
        let mut graph = graph();
        graph.set_volume(0.2);
        assert_eq!(graph.volume(), 1.0);
        graph.wire(SourceKind::Microphone);
        graph.set_volume(0.2);
        assert_eq!(graph.volume(), 0.2);
    }

    #[test]
    fn volume_clamps_to_unit_range() {
        let mut graph = graph();
        graph.wire(SourceKind::Microphone);
        graph.set_volume(-1.0);
        assert_eq!(graph.volume(), 0.0);
        graph.set_volume(5.0);
        assert_eq!(graph.volume(), 1.0);
    }

    #[test]
    fn spectrum_is_silent_until_wired() {
        let mut graph = graph();
        let spectrum = graph.pull_spectrum();
        assert_eq!(spectrum.len(), 256);
        assert!(spectrum.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn monitor_receives_gain_scaled_samples_for_files_only() {
        let (mut graph, written) = graph_with_sink();
        graph.wire(SourceKind::Microphone);
        graph.set_volume(1.0);
        graph.process_block(&[0.5; 64]);
        assert!(written.lock().unwrap().is_empty());

        graph.wire(SourceKind::File);
        graph.set_volume(0.5);
        graph.process_block(&[0.5; 64]);
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 64);
        assert!(written.iter().all(|sample| (sample - 0.25).abs() < 1e-6));
    }

    #[test]
    fn a_tone_registers_in_the_spectrum() {
        let (mut graph, _) = graph_with_sink();
        graph.wire(SourceKind::File);
        graph.set_volume(1.0);
        // Several blocks so the temporal smoothing settles.
        for _ in 0..16 {
            graph.process_block(&sine(1_000.0, 48_000.0, 512));
        }
        let spectrum = graph.pull_spectrum().to_vec();
        // 1 kHz at 48 kHz / 256 bins sits near bin 10.
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by_key(|(_, byte)| **byte)
            .map(|(index, _)| index)
            .unwrap();
        assert!((9..=12).contains(&peak), "peak landed at bin {peak}");
        assert!(spectrum[peak] > 200);
        assert!(spectrum[128] < spectrum[peak] / 2);
    }

    #[test]
    fn unwiring_clears_the_spectrum() {
        let (mut graph, _) = graph_with_sink();
        graph.wire(SourceKind::File);
        for _ in 0..8 {
            graph.process_block(&sine(1_000.0, 48_000.0, 512));
        }
        assert!(graph.pull_spectrum().iter().any(|byte| *byte > 0));
        graph.unwire_all();
        assert!(graph.pull_spectrum().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn short_blocks_slide_through_the_window() {
        let mut node = AnalyzerNode::new(&AudioConfig::default());
        node.push(&[1.0; 100]);
        node.push(&[2.0; 100]);
        // The newest samples occupy the tail of the window.
        let spectrum = node.byte_spectrum();
        assert_eq!(spectrum.len(), 256);
    }
}
