// src/squawker.rs - The assembled bird: startup checks, homing and the scheduling loop
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::audio::{AmplitudeActuationLoop, AudioError, AudioSink, AudioSource};
use crate::config::{Config, ConfigError};
use crate::file_manager::{AssetError, AssetLibrary};
use crate::hardware::{HardwareContext, HardwareError};
use crate::motion::{ActionTable, BodyPositionPlanner, EyeBeakStateMachine};
use crate::scheduler::{MotionCoordinator, SentinelFileSource, ShutdownHandle};

#[derive(Debug, Error)]
pub enum SquawkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Asset error: {0}")]
    Assets(#[from] AssetError),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

pub struct Squawker {
    config: Config,
    ctx: Arc<HardwareContext>,
    planner: BodyPositionPlanner,
    eyes: EyeBeakStateMachine,
    coordinator: MotionCoordinator,
}

impl Squawker {
    /// Validate the configuration and every asset before touching any motor.
    pub async fn new(
        config: Config,
        sound_dir: &Path,
        ctx: Arc<HardwareContext>,
        source: Arc<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, SquawkerError> {
        config.validate()?;
        let library = AssetLibrary::open(sound_dir).await?;
        for asset in library.assets() {
            let spec = source.probe(asset).await?;
            if let Err(e) = spec.ensure_supported() {
                tracing::error!("Cannot play {}: {}", asset.display(), e);
                return Err(e.into());
            }
        }

        let actions = ActionTable::new(config.actions.clone());
        let planner = BodyPositionPlanner::new(ctx.clone(), config.body.clone(), actions);
        let eyes = EyeBeakStateMachine::new(ctx.clone(), config.eyes.clone());
        let activation = AmplitudeActuationLoop::new(
            ctx.clone(),
            eyes.clone(),
            planner.clone(),
            source,
            sink,
            config.audio.clone(),
        );

        let mut coordinator = MotionCoordinator::new(
            ctx.clone(),
            planner.clone(),
            eyes.clone(),
            Arc::new(activation),
            library.into_assets(),
            &config,
        );
        if config.events.enabled {
            tracing::info!(
                "Watching {} for '{}' triggers",
                config.events.sentinel_path.display(),
                config.events.marker
            );
            coordinator = coordinator.with_event_source(Box::new(SentinelFileSource::new(
                config.events.sentinel_path.clone(),
                config.events.marker.clone(),
            )));
        }

        Ok(Self { config, ctx, planner, eyes, coordinator })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &MotionCoordinator {
        &self.coordinator
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.coordinator.shutdown_handle()
    }

    /// Home the body and cycle the eyes open.
    pub async fn start(&self) -> Result<(), SquawkerError> {
        tracing::info!("Starting squawker");
        self.planner.rehome().await?;
        self.eyes.full_blink().await?;
        tracing::info!("Squawker ready");
        Ok(())
    }

    /// Start up, then run the scheduling loop until shutdown is requested.
    pub async fn run(&self) -> Result<(), SquawkerError> {
        if let Err(e) = self.start().await {
            tracing::error!("Startup failed: {}", e);
            self.kill_motors();
            return Err(e);
        }
        self.coordinator.run().await;
        Ok(())
    }

    /// Zero both throttles and release the hardware.
    pub fn kill_motors(&self) {
        self.ctx.shutdown();
    }
}
