use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, FromSample, Sample, SampleFormat, SizedSample};
use rodio::{Decoder, Source};
use tracing::{debug, warn};

use super::{AudioBackend, CaptureStream, DecodedAudio, OutputSink};
use crate::{Result, VibeVizError};

/// Hardware-backed implementation of [`AudioBackend`].
///
/// Microphone capture and audible output run on cpal streams that share a
/// bounded sample queue with their callbacks; decoding goes through rodio
/// so every format it understands (WAV, FLAC, Vorbis, MP3) is accepted.
#[derive(Debug, Default)]
pub struct DeviceBackend;

impl DeviceBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for DeviceBackend {
    fn acquire_capture(&mut self) -> Result<Box<dyn CaptureStream>> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            VibeVizError::DeviceUnavailable("no default capture device".into())
        })?;
        let supported = device
            .default_input_config()
            .map_err(|err| VibeVizError::DeviceUnavailable(err.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let shared = Arc::new(Mutex::new(VecDeque::new()));

        let stream = match sample_format {
            SampleFormat::F32 => {
                build_capture_stream::<f32>(&device, &config, channels, Arc::clone(&shared))
            }
            SampleFormat::I16 => {
                build_capture_stream::<i16>(&device, &config, channels, Arc::clone(&shared))
            }
            SampleFormat::U16 => {
                build_capture_stream::<u16>(&device, &config, channels, Arc::clone(&shared))
            }
            other => {
                return Err(VibeVizError::DeviceUnavailable(format!(
                    "unsupported capture sample format {other:?}"
                )))
            }
        }
        .map_err(map_capture_error)?;

        stream
            .play()
            .map_err(|err| VibeVizError::DeviceUnavailable(err.to_string()))?;
        debug!(sample_rate, channels, "capture stream running");

        Ok(Box::new(DeviceCapture {
            stream: Some(stream),
            shared,
            sample_rate,
        }))
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedAudio> {
        if bytes.is_empty() {
            return Err(VibeVizError::DecodeError("empty byte buffer".into()));
        }

        let decoder = Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|err| VibeVizError::DecodeError(err.to_string()))?;
        let channels = decoder.channels().max(1) as usize;
        let sample_rate = decoder.sample_rate();
        let interleaved: Vec<f32> = decoder.convert_samples::<f32>().collect();
        if interleaved.is_empty() {
            return Err(VibeVizError::DecodeError("no audio frames in buffer".into()));
        }

        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        debug!(sample_rate, channels, frames = samples.len(), "decoded audio buffer");
        Ok(DecodedAudio::new(samples, sample_rate))
    }

    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn OutputSink>> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            VibeVizError::GraphWiring("no default output device".into())
        })?;
        let supported = device
            .default_output_config()
            .map_err(|err| VibeVizError::GraphWiring(err.to_string()))?;

        let sample_format = supported.sample_format();
        let channels = supported.channels() as usize;
        let device_rate = supported.sample_rate();
        let mut config: cpal::StreamConfig = supported.into();
        config.sample_rate = cpal::SampleRate(sample_rate);

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        // Cap queued audio at roughly two seconds so a paused consumer
        // cannot make the queue grow without bound.
        let limit = sample_rate.max(8_000) as usize * 2;

        let stream =
            build_output_stream(&device, &config, sample_format, channels, Arc::clone(&queue))
                .or_else(|err| {
                    debug!(%err, requested = sample_rate, "output rate rejected, using device default");
                    config.sample_rate = device_rate;
                    build_output_stream(
                        &device,
                        &config,
                        sample_format,
                        channels,
                        Arc::clone(&queue),
                    )
                })
                .map_err(|err| VibeVizError::GraphWiring(err.to_string()))?;
        stream
            .play()
            .map_err(|err| VibeVizError::GraphWiring(err.to_string()))?;

        Ok(Box::new(DeviceSink {
            stream: Some(stream),
            queue,
            limit,
        }))
    }
}

/// Live cpal input stream plus the queue its callback fills.
struct DeviceCapture {
    stream: Option<cpal::Stream>,
    shared: Arc<Mutex<VecDeque<f32>>>,
    sample_rate: u32,
}

impl CaptureStream for DeviceCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain(&mut self) -> Vec<f32> {
        self.shared
            .lock()
            .map(|mut buffer| buffer.drain(..).collect())
            .unwrap_or_default()
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                debug!(%err, "capture stream refused to pause before drop");
            }
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Output stream fed from a bounded mono queue; underruns play silence.
struct DeviceSink {
    stream: Option<cpal::Stream>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    limit: usize,
}

impl OutputSink for DeviceSink {
    fn write(&mut self, samples: &[f32]) {
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };
        queue.extend(samples.iter().copied());
        while queue.len() > self.limit {
            queue.pop_front();
        }
    }

    fn clear(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    shared: Arc<Mutex<VecDeque<f32>>>,
) -> std::result::Result<cpal::Stream, BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = channels.max(1);
    // Keep about a second of audio; an idle consumer drops the oldest
    // samples instead of growing the queue.
    let limit = config.sample_rate.0.max(8_000) as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let Ok(mut buffer) = shared.lock() else {
                return;
            };
            for frame in data.chunks(channels) {
                let sum: f32 = frame.iter().map(|sample| f32::from_sample(*sample)).sum();
                buffer.push_back(sum / channels as f32);
            }
            while buffer.len() > limit {
                buffer.pop_front();
            }
        },
        |err| warn!(%err, "capture stream error"),
        None,
    )
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    channels: usize,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> std::result::Result<cpal::Stream, BuildStreamError> {
    match sample_format {
        SampleFormat::F32 => build_output_stream_typed::<f32>(device, config, channels, queue),
        SampleFormat::I16 => build_output_stream_typed::<i16>(device, config, channels, queue),
        SampleFormat::U16 => build_output_stream_typed::<u16>(device, config, channels, queue),
        _ => Err(BuildStreamError::StreamConfigNotSupported),
    }
}

fn build_output_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> std::result::Result<cpal::Stream, BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels.max(1);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let Ok(mut queue) = queue.lock() else {
                data.fill(T::from_sample(0.0));
                return;
            };
            for frame in data.chunks_mut(channels) {
                let value = queue.pop_front().unwrap_or(0.0);
                frame.fill(T::from_sample(value));
            }
        },
        |err| warn!(%err, "output stream error"),
        None,
    )
}

fn map_capture_error(err: BuildStreamError) -> VibeVizError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            VibeVizError::DeviceUnavailable("capture device disappeared".into())
        }
        BuildStreamError::BackendSpecific { err } => {
            let description = err.description;
            let lowered = description.to_lowercase();
            if lowered.contains("denied") || lowered.contains("permission") {
                VibeVizError::PermissionDenied
            } else {
                VibeVizError::DeviceUnavailable(description)
            }
        }
        other => VibeVizError::DeviceUnavailable(other.to_string()),
    }
}
