use std::sync::Arc;

use crate::Result;

mod device;

pub use device::DeviceBackend;

/// Fully decoded, mono audio ready for playback and analysis.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// A live microphone capture owned exclusively by the engine.
///
/// Implementations accumulate mono samples between [`drain`] calls and
/// must stop every underlying track when [`stop`] runs (or the stream is
/// dropped), so no capture indicator outlives a teardown.
///
/// [`drain`]: CaptureStream::drain
/// [`stop`]: CaptureStream::stop
pub trait CaptureStream {
    fn sample_rate(&self) -> u32;

    /// Takes the samples captured since the previous drain.
    fn drain(&mut self) -> Vec<f32>;

    /// Synchronously stops capturing. Idempotent.
    fn stop(&mut self);
}

/// An audible monitor for decoded file playback.
pub trait OutputSink {
    /// Queues mono samples for playback.
    fn write(&mut self, samples: &[f32]);

    /// Drops any queued-but-unplayed audio, used on pause and seek.
    fn clear(&mut self);
}

/// The capability-providing audio backend the host environment hands to
/// the engine. Acquisition calls are the engine's only suspension points
/// and are never issued concurrently with one another.
pub trait AudioBackend {
    /// Requests exclusive microphone capture.
    fn acquire_capture(&mut self) -> Result<Box<dyn CaptureStream>>;

    /// Decodes an encoded audio byte buffer.
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedAudio>;

    /// Opens an audible output for the given sample rate.
    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn OutputSink>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{AudioBackend, CaptureStream, DecodedAudio, OutputSink};
    use crate::{Result, VibeVizError};

    /// Capture double backed by a shared queue the test can feed.
    pub(crate) struct FakeCapture {
        sample_rate: u32,
        buffer: Arc<Mutex<VecDeque<f32>>>,
        stopped: Arc<AtomicBool>,
    }

    impl CaptureStream for FakeCapture {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn drain(&mut self) -> Vec<f32> {
            self.buffer
                .lock()
                .map(|mut buffer| buffer.drain(..).collect())
                .unwrap_or_default()
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) struct FakeSink {
        pub written: Arc<Mutex<Vec<f32>>>,
        pub clears: Arc<Mutex<usize>>,
    }

    impl OutputSink for FakeSink {
        fn write(&mut self, samples: &[f32]) {
            self.written.lock().unwrap().extend_from_slice(samples);
        }

        fn clear(&mut self) {
            *self.clears.lock().unwrap() += 1;
        }
    }

    /// Backend double. Every handle it creates is mirrored into shared
    /// vectors so tests can poke capture buffers and observe teardown
    /// after the backend has moved into the engine.
    pub(crate) struct FakeBackend {
        pub sample_rate: u32,
        pub deny_capture: Option<VibeVizError>,
        pub fail_output: bool,
        pub taps: Arc<Mutex<Vec<Arc<Mutex<VecDeque<f32>>>>>>,
        pub stops: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
        pub sink_written: Arc<Mutex<Vec<f32>>>,
        pub sink_clears: Arc<Mutex<usize>>,
        pub outputs_opened: Arc<Mutex<u32>>,
    }

    impl FakeBackend {
        pub(crate) fn new() -> Self {
            Self {
                sample_rate: 48_000,
                deny_capture: None,
                fail_output: false,
                taps: Arc::new(Mutex::new(Vec::new())),
                stops: Arc::new(Mutex::new(Vec::new())),
                sink_written: Arc::new(Mutex::new(Vec::new())),
                sink_clears: Arc::new(Mutex::new(0)),
                outputs_opened: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl AudioBackend for FakeBackend {
        fn acquire_capture(&mut self) -> Result<Box<dyn CaptureStream>> {
            if let Some(err) = self.deny_capture.take() {
                return Err(err);
            }
            let buffer = Arc::new(Mutex::new(VecDeque::new()));
            let stopped = Arc::new(AtomicBool::new(false));
            self.taps.lock().unwrap().push(Arc::clone(&buffer));
            self.stops.lock().unwrap().push(Arc::clone(&stopped));
            Ok(Box::new(FakeCapture {
                sample_rate: self.sample_rate,
                buffer,
                stopped,
            }))
        }

        fn decode(&mut self, bytes: &[u8]) -> Result<DecodedAudio> {
            if bytes.is_empty() {
                return Err(VibeVizError::DecodeError("empty buffer".into()));
            }
            let samples = bytes
                .iter()
                .map(|byte| f32::from(*byte) / 127.5 - 1.0)
                .collect();
            Ok(DecodedAudio::new(samples, self.sample_rate))
        }

        fn open_output(&mut self, _sample_rate: u32) -> Result<Box<dyn OutputSink>> {
            if self.fail_output {
                return Err(VibeVizError::GraphWiring("no output device".into()));
            }
            *self.outputs_opened.lock().unwrap() += 1;
            Ok(Box::new(FakeSink {
                written: Arc::clone(&self.sink_written),
                clears: Arc::clone(&self.sink_clears),
            }))
        }
    }
}
