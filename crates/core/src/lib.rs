//! Core library for the VIBE visualiser.
//!
//! The crate implements the audio acquisition, routing, and analysis
//! engine behind the visualiser: the source lifecycle (microphone or
//! decoded file, mutually exclusive), the gain-controlled signal graph
//! with feedback avoidance, and the per-frame band-energy and beat
//! analysis the renderer pulls at display rate. Rendering and UI live
//! elsewhere and only ever talk to [`AudioEngine`].

pub mod analysis;
pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod source;

pub use analysis::{AnalysisFrame, BandLevels, BeatDetector, FrequencyAnalyzer};
pub use audio::{AudioEngine, EngineState, PlaybackState};
pub use backend::{AudioBackend, CaptureStream, DecodedAudio, DeviceBackend, OutputSink};
pub use config::{AppConfig, AudioConfig, BandConfig, BeatConfig};
pub use error::{Result, VibeVizError};
pub use graph::{SignalGraph, SourceKind};
pub use source::{FileSource, MicrophoneSource, SpectrumSource};
