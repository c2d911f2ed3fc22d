// src/audio/mod.rs - Chunked audio streams, WAV decoding and the paced output sink
pub mod actuation;

use async_trait::async_trait;
use futures_core::stream::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use actuation::{ActivationReport, AmplitudeActuationLoop, Thresholds};

/// Only signed 16-bit PCM drives the amplitude mapping.
pub const SUPPORTED_BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Unsupported sample width: {bits} bits (only 16-bit PCM is supported)")]
    UnsupportedSampleWidth { bits: u16 },
    #[error("Failed to decode audio: {0}")]
    Decode(String),
    #[error("Audio IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audio output error: {0}")]
    Sink(String),
}

impl From<hound::Error> for AudioError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => AudioError::Io(io),
            other => AudioError::Decode(other.to_string()),
        }
    }
}

/// Format tag carried by every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub integer_samples: bool,
}

impl StreamSpec {
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: SUPPORTED_BITS_PER_SAMPLE,
            integer_samples: true,
        }
    }

    pub fn ensure_supported(&self) -> Result<(), AudioError> {
        if self.bits_per_sample != SUPPORTED_BITS_PER_SAMPLE || !self.integer_samples {
            return Err(AudioError::UnsupportedSampleWidth { bits: self.bits_per_sample });
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(AudioError::Decode(format!(
                "degenerate stream: {} Hz, {} channels",
                self.sample_rate, self.channels
            )));
        }
        Ok(())
    }

    /// Wall-clock playback time of `frames` frames.
    pub fn chunk_duration(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

/// One block of interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub frames: usize,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>, channels: u16) -> Self {
        let frames = samples.len() / usize::from(channels.max(1));
        Self { samples, frames }
    }
}

pub type ChunkStream = BoxStream<'static, Result<AudioChunk, AudioError>>;

pub fn chunk_stream<S>(chunks: S) -> ChunkStream
where
    S: Stream<Item = Result<AudioChunk, AudioError>> + Send + 'static,
{
    chunks.boxed()
}

pub struct AudioStream {
    pub spec: StreamSpec,
    pub chunks: ChunkStream,
}

/// Opens assets as fixed-size chunk streams.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Read the format tag without streaming.
    async fn probe(&self, path: &Path) -> Result<StreamSpec, AudioError>;

    async fn open_stream(&self, path: &Path, chunk_frames: usize) -> Result<AudioStream, AudioError>;
}

/// Audible output. `write` returns once the chunk has been handed to the device.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn write(&self, spec: &StreamSpec, chunk: &AudioChunk) -> Result<(), AudioError>;
}

/// Holds each chunk for its playback duration, standing in for a blocking
/// device write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacedSink;

#[async_trait]
impl AudioSink for PacedSink {
    async fn write(&self, spec: &StreamSpec, chunk: &AudioChunk) -> Result<(), AudioError> {
        tokio::time::sleep(spec.chunk_duration(chunk.frames)).await;
        Ok(())
    }
}

/// WAV decoder. Decoding runs on a blocking thread and chunks flow back over a
/// small bounded channel, so at most a few chunks are buffered ahead of playback.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavFileSource;

const WAV_CHUNK_BUFFER: usize = 4;

fn wav_spec(spec: hound::WavSpec) -> StreamSpec {
    StreamSpec {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        integer_samples: spec.sample_format == hound::SampleFormat::Int,
    }
}

fn decode_wav(
    path: PathBuf,
    chunk_frames: usize,
    spec_tx: oneshot::Sender<Result<StreamSpec, AudioError>>,
    chunk_tx: mpsc::Sender<Result<AudioChunk, AudioError>>,
) {
    let mut reader = match hound::WavReader::open(&path) {
        Ok(reader) => reader,
        Err(e) => {
            let _ = spec_tx.send(Err(e.into()));
            return;
        }
    };
    let spec = wav_spec(reader.spec());
    if let Err(e) = spec.ensure_supported() {
        let _ = spec_tx.send(Err(e));
        return;
    }
    if spec_tx.send(Ok(spec)).is_err() {
        return;
    }

    let chunk_samples = chunk_frames * usize::from(spec.channels);
    let mut samples = reader.samples::<i16>();
    loop {
        let mut block = Vec::with_capacity(chunk_samples);
        for sample in samples.by_ref().take(chunk_samples) {
            match sample {
                Ok(sample) => block.push(sample),
                Err(e) => {
                    let _ = chunk_tx.blocking_send(Err(e.into()));
                    return;
                }
            }
        }
        if block.is_empty() {
            return;
        }
        if chunk_tx.blocking_send(Ok(AudioChunk::new(block, spec.channels))).is_err() {
            tracing::debug!("Stream for {} dropped before the end", path.display());
            return;
        }
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    async fn probe(&self, path: &Path) -> Result<StreamSpec, AudioError> {
        let path = path.to_path_buf();
        let spec = tokio::task::spawn_blocking(move || hound::WavReader::open(&path).map(|r| r.spec()))
            .await
            .map_err(|e| AudioError::Decode(e.to_string()))??;
        Ok(wav_spec(spec))
    }

    async fn open_stream(&self, path: &Path, chunk_frames: usize) -> Result<AudioStream, AudioError> {
        let (spec_tx, spec_rx) = oneshot::channel();
        let (chunk_tx, mut chunk_rx) = mpsc::channel(WAV_CHUNK_BUFFER);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || decode_wav(owned, chunk_frames.max(1), spec_tx, chunk_tx));

        let spec = spec_rx
            .await
            .map_err(|_| AudioError::Decode(format!("decoder for {} exited early", path.display())))??;
        tracing::debug!(
            "Opened {}: {} Hz, {} channels, {} bit",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        );

        let chunks = async_stream::stream! {
            while let Some(chunk) = chunk_rx.recv().await {
                yield chunk;
            }
        };
        Ok(AudioStream { spec, chunks: chunk_stream(chunks) })
    }
}
