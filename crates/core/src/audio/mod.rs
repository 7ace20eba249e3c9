use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisFrame, BeatDetector, FrequencyAnalyzer};
use crate::backend::{AudioBackend, CaptureStream, DecodedAudio};
use crate::config::AppConfig;
use crate::graph::{SignalGraph, SourceKind};
use crate::source::{FileSource, MicrophoneSource, SpectrumSource};
use crate::Result;

/// Lifecycle state of the engine.
///
/// `Connecting` is the transient state while a capability is being
/// acquired; analysis pulls during it return the zero frame, and a
/// `disconnect` (or another connect) issued meanwhile supersedes the
/// in-flight acquisition instead of racing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Connecting,
    Active,
}

/// Transport state owned by the engine and mirrored to the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub volume: f32,
    pub duration_seconds: f32,
    pub position_seconds: f32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            volume: 0.5,
            duration_seconds: 0.0,
            position_seconds: 0.0,
        }
    }
}

/// Ticket for an in-flight acquisition. Completing a connect with a
/// stale token releases the acquired capability instead of wiring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectToken(u64);

/// Root of the audio subsystem.
///
/// Owns the active [`SpectrumSource`], the [`SignalGraph`] and both
/// analysis components, and exposes the whole control surface the UI
/// consumes plus the pull-based query surface the renderer consumes. A
/// single logical owner thread issues all control operations; the engine
/// spawns nothing itself.
pub struct AudioEngine {
    config: AppConfig,
    backend: Box<dyn AudioBackend>,
    graph: SignalGraph,
    bands: FrequencyAnalyzer,
    beat: BeatDetector,
    source: Option<SpectrumSource>,
    state: EngineState,
    generation: u64,
    playback: PlaybackState,
    last_frame: AnalysisFrame,
    last_pull: Option<Instant>,
    output_rate: Option<u32>,
}

impl AudioEngine {
    /// Creates an engine over the given backend with default settings.
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self::build(backend, AppConfig::default())
    }

    /// Creates an engine with explicit, validated settings.
    pub fn with_config(backend: Box<dyn AudioBackend>, config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    fn build(backend: Box<dyn AudioBackend>, config: AppConfig) -> Self {
        Self {
            graph: SignalGraph::new(&config.audio),
            bands: FrequencyAnalyzer::new(&config.bands),
            beat: BeatDetector::new(&config.beat),
            config,
            backend,
            source: None,
            state: EngineState::Idle,
            generation: 0,
            playback: PlaybackState::default(),
            last_frame: AnalysisFrame::default(),
            last_pull: None,
            output_rate: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback
    }

    /// The most recently composed frame, unchanged until the next pull.
    pub fn last_frame(&self) -> AnalysisFrame {
        self.last_frame
    }

    /// Acquires exclusive microphone capture and wires it for analysis
    /// only; live input is never routed to the speakers. On failure the
    /// engine returns to `Idle` and the error surfaces to the caller.
    pub fn connect_microphone(&mut self) -> Result<()> {
        let token = self.begin_connect();
        let capture = match self.backend.acquire_capture() {
            Ok(capture) => capture,
            Err(err) => {
                self.abort_connect(token);
                return Err(err);
            }
        };
        self.finish_connect_microphone(token, capture)
    }

    /// Decodes the byte buffer and wires it for playback and analysis.
    /// Playback starts immediately and loops by default.
    pub fn connect_file(&mut self, bytes: &[u8]) -> Result<()> {
        let token = self.begin_connect();
        let decoded = match self.backend.decode(bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.abort_connect(token);
                return Err(err);
            }
        };
        self.finish_connect_file(token, decoded)
    }

    /// Tears down the active source and all graph edges synchronously.
    /// Always succeeds, idempotent, safe from any state.
    pub fn disconnect(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.teardown();
        if self.state != EngineState::Idle {
            info!("audio source disconnected");
        }
        self.state = EngineState::Idle;
    }

    /// Toggles playback. Files pause and resume their cursor; a
    /// microphone stays live and only the analysis freezes. No-op unless
    /// `Active`.
    pub fn toggle_play(&mut self) {
        if self.state != EngineState::Active {
            return;
        }
        match self.source.as_mut() {
            Some(SpectrumSource::File(_)) => {
                self.playback.is_playing = !self.playback.is_playing;
                if self.playback.is_playing {
                    // Restart timing from here so the pause gap is not
                    // consumed as playback time.
                    self.last_pull = None;
                } else {
                    self.graph.clear_output();
                }
            }
            Some(SpectrumSource::Microphone(microphone)) => {
                let suspended = !microphone.is_suspended();
                microphone.set_suspended(suspended);
                self.playback.is_playing = !suspended;
            }
            None => {}
        }
    }

    /// Clamps to [0, 1], records the value, and applies it to the gain
    /// node. The recorded value is re-applied whenever a new source is
    /// wired, so setting volume while idle is not lost.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.playback.volume = volume;
        self.graph.set_volume(volume);
    }

    /// Repositions file playback; no-op for microphone sources or while
    /// nothing is connected.
    pub fn seek(&mut self, seconds: f32) {
        if self.state != EngineState::Active {
            return;
        }
        if let Some(SpectrumSource::File(file)) = self.source.as_mut() {
            file.seek(seconds);
            self.playback.position_seconds = file.position_seconds();
            self.graph.clear_output();
        }
    }

    /// Composes the analysis frame for the current display frame.
    ///
    /// Never fails: while `Idle` or `Connecting` the zero frame comes
    /// back. Otherwise the block the source produced since the previous
    /// pull is routed through the graph, the spectrum is split into
    /// bands, and the beat detector is advanced. All four fields are
    /// recomputed together.
    pub fn get_analysis_frame(&mut self) -> AnalysisFrame {
        if self.state != EngineState::Active {
            return AnalysisFrame::default();
        }

        let dt = self.frame_delta();
        let sample_rate = self
            .source
            .as_ref()
            .map(SpectrumSource::sample_rate)
            .unwrap_or(self.config.audio.fallback_sample_rate);

        let max_advance = self.config.audio.max_advance_seconds;
        let is_playing = self.playback.is_playing;
        let block = match self.source.as_mut() {
            Some(SpectrumSource::Microphone(microphone)) => microphone.pull(),
            Some(SpectrumSource::File(file)) => {
                if is_playing {
                    file.advance(dt, max_advance)
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        };
        if let Some(SpectrumSource::File(file)) = self.source.as_ref() {
            self.playback.position_seconds = file.position_seconds();
        }

        if !block.is_empty() {
            self.graph.process_block(&block);
        }

        let levels = self.bands.compute_bands(self.graph.pull_spectrum(), sample_rate);
        let is_beat = self.beat.update(levels.bass);
        let frame = AnalysisFrame {
            bass: levels.bass,
            mid: levels.mid,
            treble: levels.treble,
            is_beat,
        };
        self.last_frame = frame;
        frame
    }

    /// Starts a connect: tears down the previous source, bumps the
    /// generation, and enters `Connecting`.
    fn begin_connect(&mut self) -> ConnectToken {
        self.generation = self.generation.wrapping_add(1);
        self.teardown();
        self.state = EngineState::Connecting;
        ConnectToken(self.generation)
    }

    fn abort_connect(&mut self, token: ConnectToken) {
        if token.0 == self.generation {
            self.state = EngineState::Idle;
        }
    }

    fn finish_connect_microphone(
        &mut self,
        token: ConnectToken,
        mut capture: Box<dyn CaptureStream>,
    ) -> Result<()> {
        if token.0 != self.generation {
            debug!("microphone acquisition superseded, stopping capture");
            capture.stop();
            return Ok(());
        }

        let sample_rate = capture.sample_rate();
        self.graph.wire(SourceKind::Microphone);
        self.source = Some(SpectrumSource::Microphone(MicrophoneSource::new(capture)));
        self.activate(true, 0.0);
        info!(sample_rate, "microphone connected");
        Ok(())
    }

    fn finish_connect_file(&mut self, token: ConnectToken, decoded: DecodedAudio) -> Result<()> {
        if token.0 != self.generation {
            debug!("file acquisition superseded, dropping decoded audio");
            return Ok(());
        }

        self.ensure_output(decoded.sample_rate());
        self.graph.wire(SourceKind::File);
        let file = FileSource::new(decoded);
        let sample_rate = file.sample_rate();
        let duration = file.duration_seconds();
        self.source = Some(SpectrumSource::File(file));
        self.activate(true, duration);
        info!(sample_rate, duration, "file connected, playback started");
        Ok(())
    }

    fn activate(&mut self, is_playing: bool, duration_seconds: f32) {
        self.graph.set_volume(self.playback.volume);
        self.beat.reset();
        self.playback.is_playing = is_playing;
        self.playback.duration_seconds = duration_seconds;
        self.playback.position_seconds = 0.0;
        self.last_pull = None;
        self.state = EngineState::Active;
    }

    /// Opens the audible output lazily, reopening only when the sample
    /// rate changes. Failure is recovered locally: the file still plays
    /// through the analysis chain, just inaudibly.
    fn ensure_output(&mut self, sample_rate: u32) {
        if self.output_rate == Some(sample_rate) && self.graph.has_output() {
            return;
        }
        match self.backend.open_output(sample_rate) {
            Ok(sink) => {
                self.graph.set_output(sink);
                self.output_rate = Some(sample_rate);
            }
            Err(err) => {
                warn!(%err, "audio output unavailable, continuing without playback monitor");
            }
        }
    }

    /// Releases the source and clears every piece of per-source state.
    /// Completes before returning so no cleanup outlives the control
    /// call that triggered it.
    fn teardown(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        self.graph.unwire_all();
        self.beat.reset();
        self.playback.is_playing = false;
        self.playback.duration_seconds = 0.0;
        self.playback.position_seconds = 0.0;
        self.last_frame = AnalysisFrame::default();
        self.last_pull = None;
    }

    fn frame_delta(&mut self) -> f32 {
        let now = Instant::now();
        let dt = self
            .last_pull
            .map(|previous| now.duration_since(previous).as_secs_f32())
            .unwrap_or(0.0);
        self.last_pull = Some(now);
        dt
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("playback", &self.playback)
            .field("graph", &self.graph)
            .finish()
    }
}
