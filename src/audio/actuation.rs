// src/audio/actuation.rs - Amplitude-driven body/beak actuation
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::audio::{AudioError, AudioSink, AudioSource};
use crate::config::AudioConfig;
use crate::hardware::{HardwareContext, MotorChannel};
use crate::motion::{BodyPositionPlanner, Direction, EyeBeakStateMachine};
use crate::scheduler::{ActivationError, ActivationHandler};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f32,
    pub high: f32,
}

impl From<&AudioConfig> for Thresholds {
    fn from(config: &AudioConfig) -> Self {
        Self { low: config.threshold_low, high: config.threshold_high }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDrive {
    Stop,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeakCommand {
    Close,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuation {
    pub body: BodyDrive,
    pub beak: BeakCommand,
}

/// Mean absolute sample value divided by `scale_factor`.
pub fn chunk_amplitude(samples: &[i16], scale_factor: f32) -> f32 {
    if samples.is_empty() || scale_factor <= 0.0 {
        return 0.0;
    }
    let total: u64 = samples.iter().map(|s| u64::from(s.unsigned_abs())).sum();
    (total as f64 / samples.len() as f64 / f64::from(scale_factor)) as f32
}

/// Playback time driven at `throttle`, expressed as full-speed drive time.
fn scaled_drive(played: Duration, throttle: f32) -> Duration {
    let throttle = f64::from(throttle.abs().min(1.0));
    Duration::from_nanos((played.as_nanos() as f64 * throttle).round() as u64)
}

pub fn decide(amplitude: f32, thresholds: &Thresholds) -> Actuation {
    if amplitude <= thresholds.low {
        Actuation { body: BodyDrive::Stop, beak: BeakCommand::Close }
    } else if amplitude <= thresholds.high {
        Actuation { body: BodyDrive::Forward, beak: BeakCommand::Close }
    } else {
        Actuation { body: BodyDrive::Forward, beak: BeakCommand::Open }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationReport {
    pub chunks: usize,
    pub mean_amplitude: f32,
    /// Forward body travel as full-speed drive time: playback time spent
    /// driving, scaled by the configured body throttle.
    pub body_drive: Duration,
    /// Chunks whose actuation step overran the chunk's playback time.
    pub overruns: usize,
}

/// Stops the body and closes the beak when a run ends, however it ends.
struct ReleaseOnDrop<'a> {
    ctx: &'a HardwareContext,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.ctx.motors.stop(MotorChannel::Body);
        if self.ctx.motors.throttle(MotorChannel::EyeBeak) > 0.0 {
            self.ctx.motors.stop(MotorChannel::EyeBeak);
        }
    }
}

/// Plays an asset and maps each chunk's amplitude onto the body and beak.
#[derive(Clone)]
pub struct AmplitudeActuationLoop {
    ctx: Arc<HardwareContext>,
    eyes: EyeBeakStateMachine,
    planner: BodyPositionPlanner,
    source: Arc<dyn AudioSource>,
    sink: Arc<dyn AudioSink>,
    config: AudioConfig,
}

impl AmplitudeActuationLoop {
    pub fn new(
        ctx: Arc<HardwareContext>,
        eyes: EyeBeakStateMachine,
        planner: BodyPositionPlanner,
        source: Arc<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
        config: AudioConfig,
    ) -> Self {
        Self { ctx, eyes, planner, source, sink, config }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::from(&self.config)
    }

    async fn apply(&self, actuation: Actuation) {
        match actuation.body {
            BodyDrive::Forward => self
                .ctx
                .motors
                .set_throttle(MotorChannel::Body, self.config.body_throttle),
            BodyDrive::Stop => self.ctx.motors.stop(MotorChannel::Body),
        }
        match actuation.beak {
            BeakCommand::Open => self.eyes.open_beak().await,
            BeakCommand::Close => self.eyes.close_beak(),
        }
    }

    /// Stream `asset` to the sink. Each chunk's actuation is applied before the
    /// chunk is handed over, so motion lands with the sound it follows.
    /// Both channels are released when the stream ends or fails.
    pub async fn run(&self, asset: &Path) -> Result<ActivationReport, AudioError> {
        let mut stream = self.source.open_stream(asset, self.config.chunk_frames).await?;
        stream.spec.ensure_supported()?;

        let _release = ReleaseOnDrop { ctx: &self.ctx };
        let thresholds = self.thresholds();
        let mut report = ActivationReport::default();
        let mut amplitude_sum = 0.0f64;

        tracing::info!("Playing {}", asset.display());
        while let Some(chunk) = stream.chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("Stream for {} failed after {} chunks: {}", asset.display(), report.chunks, e);
                    return Err(e);
                }
            };
            let budget = stream.spec.chunk_duration(chunk.frames);

            let started = Instant::now();
            let amplitude = chunk_amplitude(&chunk.samples, self.config.scale_factor);
            let actuation = decide(amplitude, &thresholds);
            self.apply(actuation).await;
            let spent = started.elapsed();
            if spent > budget {
                report.overruns += 1;
                tracing::warn!("Actuation overran chunk budget: {:?} > {:?}", spent, budget);
            }

            self.sink.write(&stream.spec, &chunk).await?;

            if actuation.body == BodyDrive::Forward {
                report.body_drive += scaled_drive(budget, self.config.body_throttle);
            }
            amplitude_sum += f64::from(amplitude);
            report.chunks += 1;
        }

        if report.chunks > 0 {
            report.mean_amplitude = (amplitude_sum / report.chunks as f64) as f32;
        }
        tracing::info!(
            "Mean converted amplitude is: {:.2} over {} chunks",
            report.mean_amplitude,
            report.chunks
        );
        Ok(report)
    }
}

#[async_trait]
impl ActivationHandler for AmplitudeActuationLoop {
    async fn activate(&self, asset: &Path) -> Result<(), ActivationError> {
        let report = self.run(asset).await?;
        self.planner.advance(report.body_drive, Direction::Forward);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOCK: Thresholds = Thresholds { low: 2.0, high: 15.0 };

    #[test]
    fn test_threshold_table() {
        assert_eq!(decide(1.0, &STOCK), Actuation { body: BodyDrive::Stop, beak: BeakCommand::Close });
        assert_eq!(decide(5.0, &STOCK), Actuation { body: BodyDrive::Forward, beak: BeakCommand::Close });
        assert_eq!(decide(20.0, &STOCK), Actuation { body: BodyDrive::Forward, beak: BeakCommand::Open });
    }

    #[test]
    fn test_threshold_boundaries_are_inclusive_below() {
        assert_eq!(decide(2.0, &STOCK).body, BodyDrive::Stop);
        assert_eq!(decide(15.0, &STOCK).beak, BeakCommand::Close);
        assert_eq!(decide(15.01, &STOCK).beak, BeakCommand::Open);
    }

    #[test]
    fn test_scaled_drive() {
        assert_eq!(scaled_drive(Duration::from_millis(40), 1.0), Duration::from_millis(40));
        assert_eq!(scaled_drive(Duration::from_millis(40), 0.8), Duration::from_millis(32));
        assert_eq!(scaled_drive(Duration::from_millis(40), f32::NAN), Duration::from_millis(40));
    }

    #[test]
    fn test_chunk_amplitude() {
        assert_eq!(chunk_amplitude(&[], 50.0), 0.0);
        assert_eq!(chunk_amplitude(&[100, -100, 100, -100], 50.0), 2.0);
        assert_eq!(chunk_amplitude(&[1000, -500], 50.0), 15.0);
        // i16::MIN has no positive counterpart.
        assert!((chunk_amplitude(&[i16::MIN], 1.0) - 32768.0).abs() < f32::EPSILON);
    }
}
