use tracing::debug;

use crate::backend::{CaptureStream, DecodedAudio};
use crate::graph::SourceKind;

/// The active audio source. Exactly one variant lives at a time; the
/// engine stores `Option<SpectrumSource>` and switching variants always
/// tears the previous one down first. The engine is the exclusive owner
/// of the underlying capture stream or decoded buffer.
pub enum SpectrumSource {
    Microphone(MicrophoneSource),
    File(FileSource),
}

impl SpectrumSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Microphone(_) => SourceKind::Microphone,
            Self::File(_) => SourceKind::File,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Microphone(microphone) => microphone.sample_rate(),
            Self::File(file) => file.sample_rate(),
        }
    }

    /// Synchronously releases the underlying platform resources. Called
    /// by the engine before the source is dropped so teardown never
    /// outlives the operation that triggered it.
    pub fn release(&mut self) {
        match self {
            Self::Microphone(microphone) => microphone.release(),
            Self::File(file) => file.release(),
        }
    }
}

impl std::fmt::Debug for SpectrumSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microphone(microphone) => f
                .debug_struct("SpectrumSource::Microphone")
                .field("sample_rate", &microphone.sample_rate())
                .field("suspended", &microphone.is_suspended())
                .finish(),
            Self::File(file) => f
                .debug_struct("SpectrumSource::File")
                .field("sample_rate", &file.sample_rate())
                .field("position_seconds", &file.position_seconds())
                .finish(),
        }
    }
}

/// Live capture wrapper. A microphone is conceptually always "live";
/// pausing it only freezes analysis. While suspended the capture keeps
/// running but drained samples are discarded, so the shared buffer never
/// grows stale audio to replay on resume.
pub struct MicrophoneSource {
    capture: Box<dyn CaptureStream>,
    suspended: bool,
}

impl MicrophoneSource {
    pub fn new(capture: Box<dyn CaptureStream>) -> Self {
        Self {
            capture,
            suspended: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.capture.sample_rate()
    }

    /// Samples captured since the previous pull; empty while suspended.
    pub fn pull(&mut self) -> Vec<f32> {
        let drained = self.capture.drain();
        if self.suspended {
            Vec::new()
        } else {
            drained
        }
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn release(&mut self) {
        self.capture.stop();
        debug!("microphone capture stopped");
    }
}

/// Decoded-file playback with a frame cursor. Looping is on by default
/// so the visualisation never goes silent; a non-looping source parks at
/// the end of the buffer.
pub struct FileSource {
    audio: DecodedAudio,
    cursor: usize,
    looping: bool,
}

impl FileSource {
    pub fn new(audio: DecodedAudio) -> Self {
        Self {
            audio,
            cursor: 0,
            looping: true,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate()
    }

    pub fn duration_seconds(&self) -> f32 {
        self.audio.duration_seconds()
    }

    pub fn position_seconds(&self) -> f32 {
        if self.audio.sample_rate() == 0 {
            return 0.0;
        }
        self.cursor as f32 / self.audio.sample_rate() as f32
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Moves the cursor to `seconds`, clamped to the buffer duration.
    pub fn seek(&mut self, seconds: f32) {
        let total = self.audio.samples().len();
        let seconds = if seconds.is_finite() {
            seconds.clamp(0.0, self.duration_seconds())
        } else {
            0.0
        };
        let frame = (seconds * self.audio.sample_rate() as f32) as usize;
        self.cursor = frame.min(total);
        if self.looping && self.cursor == total {
            self.cursor = 0;
        }
    }

    /// Returns the samples the cursor crosses while advancing by `dt`
    /// seconds (bounded by `max_advance` so a stalled host cannot ask
    /// for minutes of audio at once), wrapping to the start when the end
    /// is reached and looping is enabled.
    pub fn advance(&mut self, dt: f32, max_advance: f32) -> Vec<f32> {
        let samples = self.audio.samples();
        if samples.is_empty() || !dt.is_finite() || dt <= 0.0 {
            return Vec::new();
        }

        let dt = dt.min(max_advance.max(0.0));
        let mut remaining = (dt * self.audio.sample_rate() as f32) as usize;
        let mut block = Vec::with_capacity(remaining);
        while remaining > 0 {
            if self.cursor >= samples.len() {
                if !self.looping {
                    break;
                }
                self.cursor = 0;
            }
            let take = remaining.min(samples.len() - self.cursor);
            block.extend_from_slice(&samples[self.cursor..self.cursor + take]);
            self.cursor += take;
            remaining -= take;
        }
        block
    }

    pub fn release(&mut self) {
        // Dropping the source releases the decoded buffer; there is no
        // platform handle to revoke beyond that.
        self.cursor = 0;
    }
}
