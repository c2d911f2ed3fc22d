// src/simulator/mod.rs - Simulated bird: logged motor driver, switch sensors and mechanism model
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::{AudioChunk, AudioError, AudioSource, AudioStream, StreamSpec, chunk_stream};
use crate::hardware::{HardwareContext, HardwareError, MotorChannel, MotorDriver, SwitchSensor};
use crate::motion::planner::TICK;

/// Body units per tick at full throttle; one lap is 222 ticks.
pub const BODY_CYCLE: f32 = 222.0;
/// Eye cam units per tick at full reverse throttle.
pub const EYE_CYCLE: f32 = 20.0;
const HOME_WIDTH: f32 = 3.0;
const LEFT_EYE_SPAN: (f32, f32) = (0.0, 4.0);
const RIGHT_EYE_SPAN: (f32, f32) = (10.0, 14.0);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCommand {
    pub at: Instant,
    pub channel: MotorChannel,
    pub throttle: f32,
}

/// Motor driver that remembers every command it was given.
#[derive(Debug, Default)]
pub struct SimMotorDriver {
    throttles: Mutex<[f32; 2]>,
    commands: Mutex<Vec<MotorCommand>>,
    releases: AtomicUsize,
}

impl SimMotorDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throttle(&self, channel: MotorChannel) -> f32 {
        lock(&self.throttles)[channel.index()]
    }

    pub fn commands(&self) -> Vec<MotorCommand> {
        lock(&self.commands).clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.commands).clear();
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl MotorDriver for SimMotorDriver {
    fn apply(&self, channel: MotorChannel, throttle: f32) {
        lock(&self.throttles)[channel.index()] = throttle;
        lock(&self.commands).push(MotorCommand { at: Instant::now(), channel, throttle });
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SwitchLevel {
    engaged: bool,
    rising_edges: u64,
}

/// Switch whose level is set by the mechanism model or by a test.
#[derive(Debug)]
pub struct SimSwitch {
    name: &'static str,
    level: watch::Sender<SwitchLevel>,
}

impl SimSwitch {
    pub fn new(name: &'static str, engaged: bool) -> Self {
        let (level, _) = watch::channel(SwitchLevel { engaged, rising_edges: 0 });
        Self { name, level }
    }

    pub fn set(&self, engaged: bool) {
        self.level.send_if_modified(|level| {
            if level.engaged == engaged {
                return false;
            }
            if engaged {
                level.rising_edges += 1;
            }
            level.engaged = engaged;
            true
        });
    }

    /// A contact that closes and immediately opens again.
    pub fn inject_bounce(&self) {
        let engaged = self.level.borrow().engaged;
        if engaged {
            self.set(false);
        }
        self.set(true);
        self.set(false);
        if engaged {
            self.set(true);
        }
    }

    pub fn rising_edges(&self) -> u64 {
        self.level.borrow().rising_edges
    }
}

#[async_trait]
impl SwitchSensor for SimSwitch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self) -> bool {
        self.level.borrow().engaged
    }

    async fn wait_for_rising_edge(&self, timeout: Duration) -> Result<(), HardwareError> {
        let mut rx = self.level.subscribe();
        let seen = rx.borrow_and_update().rising_edges;
        let result = tokio::time::timeout(timeout, rx.wait_for(|level| level.rising_edges > seen))
            .await
            .map(|changed| changed.map(|_| ()));
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(HardwareError::SwitchClosed(self.name)),
            Err(_) => Err(HardwareError::EdgeTimeout { switch: self.name, timeout }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Mechanism {
    body_phase: f32,
    eye_phase: f32,
}

impl Mechanism {
    fn home_engaged(&self) -> bool {
        self.body_phase < HOME_WIDTH
    }

    fn left_engaged(&self) -> bool {
        (LEFT_EYE_SPAN.0..LEFT_EYE_SPAN.1).contains(&self.eye_phase)
    }

    fn right_engaged(&self) -> bool {
        (RIGHT_EYE_SPAN.0..RIGHT_EYE_SPAN.1).contains(&self.eye_phase)
    }
}

/// Mechanism model of the bird. Each tick turns the current throttles into
/// body and eye cam travel and updates the three switches to match.
///
/// The body cam advances one unit per tick at full throttle and engages the
/// home switch near 0. The eye cam only turns under reverse throttle: the left
/// switch engages near 0 (eyes open), the right one half a turn later (closed).
pub struct SimBird {
    driver: Arc<SimMotorDriver>,
    body_home: Arc<SimSwitch>,
    left_eye: Arc<SimSwitch>,
    right_eye: Arc<SimSwitch>,
    mechanism: Mutex<Mechanism>,
    ctx: Arc<HardwareContext>,
}

impl SimBird {
    /// Body away from home, eyes open.
    pub fn new(driver: Arc<SimMotorDriver>) -> Arc<Self> {
        Self::with_phases(driver, 100.0, 2.0)
    }

    pub fn with_phases(driver: Arc<SimMotorDriver>, body_phase: f32, eye_phase: f32) -> Arc<Self> {
        let mechanism = Mechanism {
            body_phase: body_phase.rem_euclid(BODY_CYCLE),
            eye_phase: eye_phase.rem_euclid(EYE_CYCLE),
        };
        let body_home = Arc::new(SimSwitch::new("body home", mechanism.home_engaged()));
        let left_eye = Arc::new(SimSwitch::new("left eye", mechanism.left_engaged()));
        let right_eye = Arc::new(SimSwitch::new("right eye", mechanism.right_engaged()));
        let ctx = Arc::new(HardwareContext::new(
            driver.clone(),
            body_home.clone(),
            left_eye.clone(),
            right_eye.clone(),
        ));
        Arc::new(Self {
            driver,
            body_home,
            left_eye,
            right_eye,
            mechanism: Mutex::new(mechanism),
            ctx,
        })
    }

    pub fn context(&self) -> Arc<HardwareContext> {
        self.ctx.clone()
    }

    pub fn driver(&self) -> &Arc<SimMotorDriver> {
        &self.driver
    }

    pub fn body_home(&self) -> &Arc<SimSwitch> {
        &self.body_home
    }

    pub fn left_eye(&self) -> &Arc<SimSwitch> {
        &self.left_eye
    }

    pub fn right_eye(&self) -> &Arc<SimSwitch> {
        &self.right_eye
    }

    pub fn body_phase(&self) -> f32 {
        lock(&self.mechanism).body_phase
    }

    pub fn eye_phase(&self) -> f32 {
        lock(&self.mechanism).eye_phase
    }

    pub fn beak_open(&self) -> bool {
        self.driver.throttle(MotorChannel::EyeBeak) > 0.0
    }

    /// Advance the mechanism by one tick.
    pub fn tick(&self) {
        let body = self.driver.throttle(MotorChannel::Body);
        let eye = self.driver.throttle(MotorChannel::EyeBeak);
        let mechanism = {
            let mut mechanism = lock(&self.mechanism);
            mechanism.body_phase = (mechanism.body_phase + body).rem_euclid(BODY_CYCLE);
            if eye < 0.0 {
                mechanism.eye_phase = (mechanism.eye_phase - eye).rem_euclid(EYE_CYCLE);
            }
            *mechanism
        };
        self.body_home.set(mechanism.home_engaged());
        self.left_eye.set(mechanism.left_engaged());
        self.right_eye.set(mechanism.right_engaged());
    }

    /// Tick the mechanism every timeline unit until the handle is aborted.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let bird = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                bird.tick();
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Clip {
    spec: StreamSpec,
    samples: Vec<i16>,
}

/// In-memory audio clips, for driving the actuation loop without files.
#[derive(Debug, Default)]
pub struct MemoryAudioSource {
    clips: Mutex<HashMap<PathBuf, Clip>>,
    fail_after: Option<usize>,
}

impl MemoryAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams yield a decode error in place of chunk number `chunks`.
    pub fn with_failure_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, spec: StreamSpec, samples: Vec<i16>) {
        lock(&self.clips).insert(path.into(), Clip { spec, samples });
    }

    fn clip(&self, path: &Path) -> Result<Clip, AudioError> {
        lock(&self.clips).get(path).cloned().ok_or_else(|| {
            AudioError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no clip named {}", path.display()),
            ))
        })
    }
}

#[async_trait]
impl AudioSource for MemoryAudioSource {
    async fn probe(&self, path: &Path) -> Result<StreamSpec, AudioError> {
        Ok(self.clip(path)?.spec)
    }

    async fn open_stream(&self, path: &Path, chunk_frames: usize) -> Result<AudioStream, AudioError> {
        let Clip { spec, samples } = self.clip(path)?;
        let chunk_samples = chunk_frames.max(1) * usize::from(spec.channels.max(1));
        let fail_after = self.fail_after;
        let chunks = async_stream::stream! {
            for (index, block) in samples.chunks(chunk_samples).enumerate() {
                if fail_after == Some(index) {
                    yield Err(AudioError::Decode(format!("simulated read failure at chunk {}", index)));
                    break;
                }
                yield Ok(AudioChunk::new(block.to_vec(), spec.channels));
            }
        };
        Ok(AudioStream { spec, chunks: chunk_stream(chunks) })
    }
}
