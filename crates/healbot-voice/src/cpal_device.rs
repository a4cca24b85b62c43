//! Microphone capture through cpal.
//!
//! A `cpal::Stream` is not `Send`, so each capture owns a dedicated thread
//! that opens the input device, keeps the stream alive, and drops it when
//! told to stop. The data callback pushes every buffer it receives as a
//! 16-bit PCM fragment. Finishing wraps the fragments in a WAV container.

use std::io::Cursor;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use healbot_core::error::HealbotError;

use crate::device::{CaptureStream, Microphone};

/// Container produced by [`CpalMicrophone`] captures.
pub const WAV_MIME_TYPE: &str = "audio/wav";
pub const WAV_FILE_NAME: &str = "voice.wav";

/// Device name that selects the host's default input.
pub const DEFAULT_DEVICE: &str = "default";

type Fragments = Arc<Mutex<Vec<Vec<i16>>>>;

fn unavailable(detail: impl Into<String>) -> HealbotError {
    HealbotError::DeviceUnavailable(detail.into())
}

/// Shape of the samples the device delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcmFormat {
    channels: u16,
    sample_rate: u32,
}

/// The system microphone.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    device_name: String,
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE)
    }
}

impl CpalMicrophone {
    /// `device_name` is matched case-insensitively as a substring of the
    /// input device names; [`DEFAULT_DEVICE`] picks the host default.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, HealbotError> {
        let fragments: Fragments = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let device_name = self.device_name.clone();
        let sink = Arc::clone(&fragments);
        let worker = std::thread::Builder::new()
            .name("healbot-capture".to_string())
            .spawn(move || run_capture(&device_name, sink, ready_tx, stop_rx))
            .map_err(|e| unavailable(format!("Failed to start capture thread: {}", e)))?;

        let format = match ready_rx.await {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                join(worker);
                return Err(e);
            }
            Err(_) => {
                join(worker);
                return Err(unavailable("Capture thread exited before the device opened"));
            }
        };

        Ok(Box::new(CpalStream {
            format,
            fragments,
            stop: Some(stop_tx),
            worker: Some(worker),
        }))
    }
}

fn join(worker: JoinHandle<()>) {
    if worker.join().is_err() {
        warn!("Capture thread panicked");
    }
}

/// Body of the capture thread. Blocks until the stream is stopped or its
/// owner goes away.
fn run_capture(
    device_name: &str,
    sink: Fragments,
    ready: oneshot::Sender<Result<PcmFormat, HealbotError>>,
    stop: mpsc::Receiver<()>,
) {
    let stream = match open_stream(device_name, sink) {
        Ok((stream, format)) => {
            if ready.send(Ok(format)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            // The receiver only disappears when acquire was abandoned.
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Either an explicit stop or a dropped sender ends the capture.
    let _ = stop.recv();
    drop(stream);
    debug!("Input stream closed");
}

fn open_stream(
    device_name: &str,
    sink: Fragments,
) -> Result<(cpal::Stream, PcmFormat), HealbotError> {
    let host = cpal::default_host();

    let device = if device_name == DEFAULT_DEVICE {
        host.default_input_device()
            .ok_or_else(|| unavailable("No default input device found"))?
    } else {
        let wanted = device_name.to_lowercase();
        host.input_devices()
            .map_err(|e| unavailable(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| {
                d.name()
                    .map(|n| n.to_lowercase().contains(&wanted))
                    .unwrap_or(false)
            })
            .ok_or_else(|| unavailable(format!("Audio device '{}' not found", device_name)))?
    };
    let label = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| unavailable(format!("Failed to get input config: {}", e)))?;
    let format = PcmFormat {
        channels: supported.channels(),
        sample_rate: supported.sample_rate().0,
    };
    let config = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sink)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sink)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, sink)?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sink)?,
        other => return Err(unavailable(format!("Unsupported sample format '{}'", other))),
    };
    stream
        .play()
        .map_err(|e| unavailable(format!("Failed to start input stream: {}", e)))?;

    info!(
        device = %label,
        sample_rate = format.sample_rate,
        channels = format.channels,
        "Microphone capture started"
    );
    Ok((stream, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: Fragments,
) -> Result<cpal::Stream, HealbotError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let fragment: Vec<i16> = data.iter().map(|&s| i16::from_sample(s)).collect();
                if let Ok(mut fragments) = sink.lock() {
                    fragments.push(fragment);
                }
            },
            |err| error!(error = %err, "Audio input stream error"),
            None,
        )
        .map_err(|e| unavailable(format!("Failed to build input stream: {}", e)))
}

/// Encode interleaved 16-bit samples as a WAV file.
fn encode_wav(format: PcmFormat, fragments: &[Vec<i16>]) -> Result<Vec<u8>, HealbotError> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| HealbotError::Serialization(format!("WAV encoding: {}", e));

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    for &sample in fragments.iter().flatten() {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(cursor.into_inner())
}

struct CpalStream {
    format: PcmFormat,
    fragments: Fragments,
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalStream {
    /// Stop the device and wait for the capture thread to drop the stream.
    fn stop_capture(&mut self) {
        if let Some(stop) = self.stop.take() {
            // A finished thread has already dropped the receiver.
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            join(worker);
        }
    }
}

#[async_trait]
impl CaptureStream for CpalStream {
    async fn finish(&mut self) -> Result<Vec<Vec<u8>>, HealbotError> {
        self.stop_capture();
        let fragments = {
            let mut buffered = self.fragments.lock().map_err(|e| {
                HealbotError::InvalidState(format!("capture buffer poisoned: {}", e))
            })?;
            std::mem::take(&mut *buffered)
        };
        let samples: usize = fragments.iter().map(Vec::len).sum();
        if samples == 0 {
            return Ok(Vec::new());
        }
        debug!(fragments = fragments.len(), samples, "Encoding captured audio");
        Ok(vec![encode_wav(self.format, &fragments)?])
    }

    fn release(&mut self) {
        self.stop_capture();
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO_16K: PcmFormat = PcmFormat {
        channels: 1,
        sample_rate: 16_000,
    };

    fn detached(fragments: Vec<Vec<i16>>) -> CpalStream {
        CpalStream {
            format: MONO_16K,
            fragments: Arc::new(Mutex::new(fragments)),
            stop: None,
            worker: None,
        }
    }

    #[test]
    fn test_encode_wav_header_and_length() {
        let wav = encode_wav(MONO_16K, &[vec![1, 2], vec![3]]).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 3 * 2);
    }

    #[tokio::test]
    async fn test_finish_joins_fragments_in_order() {
        let mut stream = detached(vec![vec![10, -10], vec![20], vec![], vec![30]]);
        let out = stream.finish().await.unwrap();
        assert_eq!(out.len(), 1);

        let reader = hound::WavReader::new(Cursor::new(out[0].clone())).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![10, -10, 20, 30]);
    }

    #[tokio::test]
    async fn test_finish_without_samples_is_empty() {
        let mut stream = detached(vec![vec![], vec![]]);
        assert!(stream.finish().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finish_drains_the_buffer() {
        let mut stream = detached(vec![vec![1]]);
        assert_eq!(stream.finish().await.unwrap().len(), 1);
        assert!(stream.finish().await.unwrap().is_empty());
    }

    #[test]
    fn test_release_stops_the_capture_thread() {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            let _ = stop_rx.recv();
        });
        let mut stream = CpalStream {
            format: MONO_16K,
            fragments: Arc::default(),
            stop: Some(stop_tx),
            worker: Some(worker),
        };
        stream.release();
        assert!(stream.stop.is_none());
        assert!(stream.worker.is_none());
        stream.release();
    }

    #[test]
    fn test_default_device_name() {
        assert_eq!(CpalMicrophone::default().device_name(), DEFAULT_DEVICE);
    }
}
