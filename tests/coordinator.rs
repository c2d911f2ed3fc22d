// Motion coordinator scenarios on the simulated bird, in paused time

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use squawker::audio::{AmplitudeActuationLoop, PacedSink, StreamSpec};
use squawker::config::{AudioConfig, Config, IntervalRange};
use squawker::hardware::{HardwareContext, MotorChannel};
use squawker::motion::{ActionTable, BodyPositionPlanner, EyeBeakStateMachine};
use squawker::scheduler::{
    ActivationError, ActivationHandler, MotionCoordinator, TaskKind, TaskState, TriggerPayload,
};
use squawker::simulator::{MemoryAudioSource, SimBird, SimMotorDriver};

/// Takes the body at a throttle no ambient task uses, and remembers when.
struct RecordingHandler {
    ctx: Arc<HardwareContext>,
    hold: Duration,
    windows: Mutex<Vec<(Instant, Instant)>>,
    idle_at_start: Mutex<Vec<bool>>,
    assets: Mutex<Vec<PathBuf>>,
}

const MARKER_THROTTLE: f32 = 0.5;

impl RecordingHandler {
    fn new(ctx: Arc<HardwareContext>, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            hold,
            windows: Mutex::new(Vec::new()),
            idle_at_start: Mutex::new(Vec::new()),
            assets: Mutex::new(Vec::new()),
        })
    }

    fn windows(&self) -> Vec<(Instant, Instant)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivationHandler for RecordingHandler {
    async fn activate(&self, asset: &Path) -> Result<(), ActivationError> {
        let start = Instant::now();
        self.idle_at_start.lock().unwrap().push(self.ctx.motors.is_idle());
        self.assets.lock().unwrap().push(asset.to_path_buf());
        self.ctx.motors.set_throttle(MotorChannel::Body, MARKER_THROTTLE);
        tokio::time::sleep(self.hold).await;
        self.ctx.motors.stop(MotorChannel::Body);
        self.windows.lock().unwrap().push((start, Instant::now()));
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.schedule.seed = Some(7);
    config
}

fn build(bird: &SimBird, handler: Arc<dyn ActivationHandler>, config: &Config) -> Arc<MotionCoordinator> {
    let ctx = bird.context();
    let planner = BodyPositionPlanner::new(ctx.clone(), config.body.clone(), ActionTable::new(config.actions.clone()));
    let eyes = EyeBeakStateMachine::new(ctx.clone(), config.eyes.clone());
    let assets = vec![PathBuf::from("/sounds/a.wav"), PathBuf::from("/sounds/b.wav")];
    Arc::new(MotionCoordinator::new(ctx, planner, eyes, handler, assets, config))
}

fn trigger(asset: Option<&str>) -> TriggerPayload {
    TriggerPayload { source: "test".to_string(), asset: asset.map(str::to_string) }
}

#[tokio::test(start_paused = true)]
async fn test_ambient_tasks_never_overlap_activations() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver.clone());
    let mechanism = bird.spawn();
    let handler = RecordingHandler::new(bird.context(), Duration::from_secs(3));
    let coordinator = build(&bird, handler.clone(), &test_config());

    let triggers = coordinator.trigger_sender();
    let shutdown = coordinator.shutdown_handle();
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(17)).await;
        triggers.send(trigger(None)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(30)).await;
    shutdown.request();
    runner.await.unwrap();
    mechanism.abort();

    let windows = handler.windows();
    assert!(windows.len() >= 12, "only {} activations ran", windows.len());
    assert!(handler.idle_at_start.lock().unwrap().iter().all(|idle| *idle));

    let commands = driver.commands();
    for (start, end) in &windows {
        let intruders: Vec<_> = commands
            .iter()
            .filter(|c| c.at > *start && c.at < *end)
            .collect();
        assert!(intruders.is_empty(), "commands during activation: {:?}", intruders);
    }

    // The ambient tasks did run in between.
    assert!(commands.iter().any(|c| c.channel == MotorChannel::Body && c.throttle.abs() == 1.0));
    assert!(commands.iter().any(|c| c.channel == MotorChannel::EyeBeak && c.throttle == -1.0));
}

#[tokio::test(start_paused = true)]
async fn test_body_task_resumes_after_drain_with_fresh_interval() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver);
    let mechanism = bird.spawn();
    let handler = RecordingHandler::new(bird.context(), Duration::from_secs(60));
    let config = test_config();
    let coordinator = build(&bird, handler.clone(), &config);

    let mut states = coordinator.subscribe_states();
    let shutdown = coordinator.shutdown_handle();
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };
    coordinator.trigger_sender().send(trigger(None)).await.unwrap();

    let mut waited_at = None;
    let mut acted_at = None;
    let next_sleep = loop {
        let (kind, state) = tokio::time::timeout(Duration::from_secs(200), states.recv())
            .await
            .expect("coordinator stalled")
            .expect("state stream lagged");
        if kind != TaskKind::Body {
            continue;
        }
        match state {
            TaskState::WaitingOnQueueDrain if waited_at.is_none() => waited_at = Some(Instant::now()),
            TaskState::Acting => acted_at = Some(Instant::now()),
            TaskState::Sleeping(pause) if acted_at.is_some() => break pause,
            _ => {}
        }
    };
    shutdown.request();
    runner.await.unwrap();
    mechanism.abort();

    let (start, end) = handler.windows()[0];
    let waited_at = waited_at.unwrap();
    assert!(waited_at > start && waited_at < end, "body task was not parked on the drain");
    assert!(acted_at.unwrap() >= end);
    assert!(IntervalRange::new(10, 40).contains(next_sleep), "redrawn interval {:?}", next_sleep);
    assert!(config.schedule.body.contains(next_sleep));
}

#[tokio::test(start_paused = true)]
async fn test_blink_and_body_never_act_together() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver.clone());
    let mechanism = bird.spawn();
    let handler = RecordingHandler::new(bird.context(), Duration::from_secs(1));
    let mut config = test_config();
    config.schedule.sound = IntervalRange::new(100_000, 100_001);
    let coordinator = build(&bird, handler.clone(), &config);

    let mut states = coordinator.subscribe_states();
    let shutdown = coordinator.shutdown_handle();
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };

    let deadline = Instant::now() + Duration::from_secs(600);
    let mut blink_started = None;
    let mut body_started = None;
    let mut blinks = Vec::new();
    let mut moves = Vec::new();
    while let Ok(received) = tokio::time::timeout_at(deadline, states.recv()).await {
        let (kind, state) = received.expect("state stream lagged");
        let (started, windows) = match kind {
            TaskKind::Blink => (&mut blink_started, &mut blinks),
            TaskKind::Body => (&mut body_started, &mut moves),
            _ => continue,
        };
        match state {
            TaskState::Acting => *started = Some(Instant::now()),
            TaskState::Sleeping(_) => {
                if let Some(start) = started.take() {
                    windows.push((start, Instant::now()));
                }
            }
            _ => {}
        }
    }
    shutdown.request();
    runner.await.unwrap();
    mechanism.abort();

    assert!(blinks.len() >= 20, "only {} blinks", blinks.len());
    assert!(moves.len() >= 10, "only {} body actions", moves.len());
    assert!(handler.windows().is_empty());
    for (blink_start, blink_end) in &blinks {
        for (move_start, move_end) in &moves {
            assert!(
                blink_end <= move_start || move_end <= blink_start,
                "blink {:?}..{:?} overlaps body action {:?}..{:?}",
                blink_start,
                blink_end,
                move_start,
                move_end
            );
        }
    }

    // Replayed in order, no command leaves both channels driven.
    let mut throttles = [0.0f32; 2];
    for command in driver.commands() {
        let slot = if command.channel == MotorChannel::Body { 0 } else { 1 };
        throttles[slot] = command.throttle;
        assert!(
            throttles[0] == 0.0 || throttles[1] == 0.0,
            "both channels driven at {:?}: {:?}",
            command.at,
            throttles
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_activation_waits_for_idle_motors() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver);
    let handler = RecordingHandler::new(bird.context(), Duration::from_secs(1));
    let coordinator = build(&bird, handler.clone(), &test_config());
    let ctx = bird.context();

    // Something outside the coordinator is still driving the eyes.
    ctx.motors.set_throttle(MotorChannel::EyeBeak, -0.3);
    let shutdown = coordinator.shutdown_handle();
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };
    coordinator.trigger_sender().send(trigger(None)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(handler.windows().is_empty());
    assert_eq!(coordinator.queue().pending(), 1);

    ctx.motors.stop(MotorChannel::EyeBeak);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handler.windows().len(), 1);
    assert_eq!(coordinator.queue().pending(), 0);

    shutdown.request();
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_trigger_can_name_its_asset() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver);
    let mechanism = bird.spawn();
    let handler = RecordingHandler::new(bird.context(), Duration::from_millis(500));
    let coordinator = build(&bird, handler.clone(), &test_config());
    let shutdown = coordinator.shutdown_handle();
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };

    let triggers = coordinator.trigger_sender();
    triggers.send(trigger(Some("b.wav"))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    triggers.send(trigger(Some("missing.wav"))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.request();
    runner.await.unwrap();
    mechanism.abort();

    let assets = handler.assets.lock().unwrap().clone();
    assert_eq!(assets[0], PathBuf::from("/sounds/b.wav"));
    assert_eq!(assets.len(), 2);
    assert!(assets[1].starts_with("/sounds"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_chunk_zeroes_both_channels() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver.clone());
    let mechanism = bird.spawn();
    let ctx = bird.context();

    let mut config = test_config();
    config.audio = AudioConfig { chunk_frames: 4, body_throttle: 0.8, ..AudioConfig::default() };
    let source = Arc::new(MemoryAudioSource::new());
    let loud: Vec<i16> = std::iter::repeat([1000i16, -1000]).take(400).flatten().collect();
    source.insert("/sounds/a.wav", StreamSpec::pcm16(100, 1), loud.clone());
    source.insert("/sounds/b.wav", StreamSpec::pcm16(100, 1), loud);

    let planner = BodyPositionPlanner::new(ctx.clone(), config.body.clone(), ActionTable::new(config.actions.clone()));
    let eyes = EyeBeakStateMachine::new(ctx.clone(), config.eyes.clone());
    let activation = Arc::new(AmplitudeActuationLoop::new(
        ctx.clone(),
        eyes.clone(),
        planner.clone(),
        source,
        Arc::new(PacedSink),
        config.audio.clone(),
    ));
    let coordinator = Arc::new(MotionCoordinator::new(
        ctx.clone(),
        planner,
        eyes,
        activation,
        vec![PathBuf::from("/sounds/a.wav"), PathBuf::from("/sounds/b.wav")],
        &config,
    ));

    let shutdown = coordinator.shutdown_handle();
    let runner = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };
    coordinator.trigger_sender().send(trigger(None)).await.unwrap();

    let mut polls = 0;
    while !(driver.throttle(MotorChannel::Body) == 0.8 && driver.throttle(MotorChannel::EyeBeak) > 0.0) {
        polls += 1;
        assert!(polls < 1000, "activation never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(15)).await;

    shutdown.request();
    runner.await.unwrap();
    mechanism.abort();

    assert_eq!(driver.throttle(MotorChannel::Body), 0.0);
    assert_eq!(driver.throttle(MotorChannel::EyeBeak), 0.0);
    assert!(ctx.is_released());
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_run_returns_immediately() {
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver.clone());
    let handler = RecordingHandler::new(bird.context(), Duration::from_secs(1));
    let coordinator = build(&bird, handler, &test_config());

    coordinator.shutdown_handle().request();
    let started = Instant::now();
    coordinator.run().await;
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(driver.release_count(), 1);
}
