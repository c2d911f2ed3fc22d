// src/scheduler/mod.rs - Motion coordinator: ambient tasks, activations and their arbitration
//
// All tasks are polled inside one future, so they interleave only at their
// suspension points. Ambient tasks act only once the work queue is drained
// and the motors are idle, and claim the motors with no suspension point in
// between. The sound task only drains after the motors report idle.
pub mod events;
pub mod work_queue;

pub use events::{ExternalEventSource, SentinelFileSource, TriggerPayload};
pub use work_queue::{ActivationError, ActivationHandler, WorkItem, WorkQueue};

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::{Config, IntervalRange, ScheduleConfig};
use crate::file_manager::find_asset;
use crate::hardware::{HardwareContext, HardwareError, MotionHold, MotorChannel};
use crate::motion::{ActionTable, BodyPositionPlanner, EyeBeakStateMachine, EyeTarget};

const TRIGGER_BUFFER: usize = 8;
const STATE_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Blink,
    Body,
    Sound,
    Events,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [TaskKind::Blink, TaskKind::Body, TaskKind::Sound, TaskKind::Events];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Sleeping(Duration),
    WaitingOnQueueDrain,
    WaitingForIdle,
    Acting,
    Stopped,
}

/// The schedule's only source of randomness. Seeded for reproducible runs.
pub struct ScheduleRng {
    rng: Mutex<StdRng>,
}

impl ScheduleRng {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng: Mutex::new(rng) }
    }

    /// Whole seconds in `[min, max)`.
    pub fn draw(&self, range: &IntervalRange) -> Duration {
        if range.max_secs <= range.min_secs {
            return Duration::from_secs(range.min_secs);
        }
        let secs = self.with_rng(|rng| rng.random_range(range.min_secs..range.max_secs));
        Duration::from_secs(secs)
    }

    pub fn choose<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        self.with_rng(|rng| items.choose(rng))
    }

    pub fn choose_action<'a>(&self, actions: &'a ActionTable) -> Option<&'a str> {
        self.with_rng(|rng| actions.choose(rng))
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *rng)
    }
}

/// Requests a coordinator stop. Requests made before `run()` starts still count.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct MotionCoordinator {
    ctx: Arc<HardwareContext>,
    planner: BodyPositionPlanner,
    eyes: EyeBeakStateMachine,
    activation: Arc<dyn ActivationHandler>,
    event_handler: Option<Arc<dyn ActivationHandler>>,
    assets: Vec<PathBuf>,
    schedule: ScheduleConfig,
    blink_hold: Duration,
    rehome_every: u32,
    poll_interval: Duration,
    rng: ScheduleRng,
    queue: Arc<WorkQueue>,
    states: broadcast::Sender<(TaskKind, TaskState)>,
    trigger_tx: mpsc::Sender<TriggerPayload>,
    trigger_rx: tokio::sync::Mutex<mpsc::Receiver<TriggerPayload>>,
    event_source: tokio::sync::Mutex<Option<Box<dyn ExternalEventSource>>>,
    shutdown: ShutdownHandle,
}

impl MotionCoordinator {
    /// `activation` handles the sound task's own scheduled items; external
    /// triggers use it too unless `with_event_handler` overrides it.
    pub fn new(
        ctx: Arc<HardwareContext>,
        planner: BodyPositionPlanner,
        eyes: EyeBeakStateMachine,
        activation: Arc<dyn ActivationHandler>,
        assets: Vec<PathBuf>,
        config: &Config,
    ) -> Self {
        let (states, _) = broadcast::channel(STATE_BUFFER);
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx,
            planner,
            eyes,
            activation,
            event_handler: None,
            assets,
            schedule: config.schedule.clone(),
            blink_hold: config.eyes.blink_hold(),
            rehome_every: config.body.rehome_every,
            poll_interval: config.events.poll_interval(),
            rng: ScheduleRng::new(config.schedule.seed),
            queue: Arc::new(WorkQueue::new()),
            states,
            trigger_tx,
            trigger_rx: tokio::sync::Mutex::new(trigger_rx),
            event_source: tokio::sync::Mutex::new(None),
            shutdown: ShutdownHandle { tx: Arc::new(shutdown_tx) },
        }
    }

    pub fn with_event_source(mut self, source: Box<dyn ExternalEventSource>) -> Self {
        self.event_source = tokio::sync::Mutex::new(Some(source));
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn ActivationHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_rng(mut self, rng: ScheduleRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Inject a trigger as if an external event source had fired.
    pub fn trigger_sender(&self) -> mpsc::Sender<TriggerPayload> {
        self.trigger_tx.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn subscribe_states(&self) -> broadcast::Receiver<(TaskKind, TaskState)> {
        self.states.subscribe()
    }

    /// Run every task until shutdown is requested. Both throttles are zeroed
    /// and the hardware released on the way out, whichever task was suspended.
    pub async fn run(&self) {
        tracing::info!("Motion coordinator running with {} assets", self.assets.len());
        let mut shutdown = self.shutdown.tx.subscribe();
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                tracing::info!("Shutdown requested; stopping all tasks");
            }
            _ = async {
                tokio::join!(self.blink_task(), self.body_task(), self.sound_task(), self.event_task())
            } => {}
        }
        self.ctx.shutdown();
        for kind in TaskKind::ALL {
            self.transition(kind, TaskState::Stopped);
        }
    }

    fn transition(&self, kind: TaskKind, state: TaskState) {
        tracing::trace!("{:?} task -> {:?}", kind, state);
        let _ = self.states.send((kind, state));
    }

    async fn sleep_for(&self, kind: TaskKind, range: &IntervalRange) {
        let pause = self.rng.draw(range);
        self.transition(kind, TaskState::Sleeping(pause));
        tokio::time::sleep(pause).await;
    }

    /// Wait until no activation is queued and no other motion is in flight,
    /// then hold the motors. Whoever takes the hold first wins; the loser
    /// waits for idle again and re-checks the queue.
    async fn claim_motors(&self, kind: TaskKind) -> MotionHold<'_> {
        loop {
            self.transition(kind, TaskState::WaitingOnQueueDrain);
            self.queue.join().await;
            if self.ctx.motors.is_idle() {
                return self.ctx.motors.hold();
            }
            self.transition(kind, TaskState::WaitingForIdle);
            self.ctx.motors.wait_idle().await;
        }
    }

    async fn blink_task(&self) {
        loop {
            self.sleep_for(TaskKind::Blink, &self.schedule.blink).await;
            let _hold = self.claim_motors(TaskKind::Blink).await;
            self.transition(TaskKind::Blink, TaskState::Acting);
            if let Err(e) = self.blink_once().await {
                tracing::warn!("Blink failed: {}", e);
                self.eyes.kill();
            }
        }
    }

    async fn blink_once(&self) -> Result<(), HardwareError> {
        self.eyes.set_eyes(EyeTarget::Closed).await?;
        tokio::time::sleep(self.blink_hold).await;
        self.eyes.set_eyes(EyeTarget::Open).await?;
        Ok(())
    }

    async fn body_task(&self) {
        let mut actions_since_home = 0u32;
        loop {
            self.sleep_for(TaskKind::Body, &self.schedule.body).await;
            let _hold = self.claim_motors(TaskKind::Body).await;
            self.transition(TaskKind::Body, TaskState::Acting);
            let Some(name) = self.rng.choose_action(self.planner.actions()) else {
                tracing::warn!("No body actions configured");
                continue;
            };
            if let Err(e) = self.planner.resolve_action(name).await {
                tracing::warn!("Body action {} failed: {}", name, e);
                self.ctx.motors.stop(MotorChannel::Body);
            }

            actions_since_home += 1;
            if self.rehome_every > 0 && actions_since_home >= self.rehome_every {
                if let Err(e) = self.planner.rehome().await {
                    tracing::warn!("Periodic re-home failed: {}", e);
                }
                actions_since_home = 0;
            }
        }
    }

    async fn sound_task(&self) {
        let mut triggers = self.trigger_rx.lock().await;
        loop {
            let pause = self.rng.draw(&self.schedule.sound);
            self.transition(TaskKind::Sound, TaskState::Sleeping(pause));
            let item = tokio::select! {
                _ = tokio::time::sleep(pause) => self.scheduled_item(),
                Some(trigger) = triggers.recv() => self.external_item(trigger),
            };
            let Some(item) = item else {
                continue;
            };
            self.queue.put(item);

            self.transition(TaskKind::Sound, TaskState::WaitingForIdle);
            self.wait_for_idle().await;

            self.transition(TaskKind::Sound, TaskState::Acting);
            while let Ok(trigger) = triggers.try_recv() {
                if let Some(item) = self.external_item(trigger) {
                    self.queue.put(item);
                }
            }
            self.drain().await;
        }
    }

    async fn wait_for_idle(&self) {
        let timeout = self.schedule.idle_timeout();
        while tokio::time::timeout(timeout, self.ctx.motors.wait_idle()).await.is_err() {
            let snapshot = self.ctx.motors.snapshot();
            tracing::warn!(
                "Motors still busy after {:?} (body {:.2}, eye/beak {:.2}, {} motions held); activation deferred",
                timeout,
                snapshot.throttle(MotorChannel::Body),
                snapshot.throttle(MotorChannel::EyeBeak),
                snapshot.holds
            );
        }
    }

    /// Handle queued items in order until the queue is empty.
    async fn drain(&self) {
        while let Some(item) = self.queue.try_get() {
            let result = match &item {
                WorkItem::ScheduledSound { asset } => self.activation.activate(asset).await,
                WorkItem::ExternalEvent { source, asset, handler } => {
                    tracing::info!("Handling {} trigger", source);
                    handler.activate(asset).await
                }
            };
            if let Err(e) = result {
                tracing::error!("Activation of {} failed: {}", item.asset().display(), e);
            }
            self.ctx.motors.stop_all();
            self.queue.task_done();
        }
    }

    fn scheduled_item(&self) -> Option<WorkItem> {
        match self.rng.choose(&self.assets) {
            Some(asset) => Some(WorkItem::ScheduledSound { asset: asset.clone() }),
            None => {
                tracing::warn!("No sound assets to play");
                None
            }
        }
    }

    fn external_item(&self, trigger: TriggerPayload) -> Option<WorkItem> {
        let named = trigger.asset.as_deref().and_then(|name| {
            let found = find_asset(&self.assets, name);
            if found.is_none() {
                tracing::warn!("Trigger asked for unknown asset {}; picking one at random", name);
            }
            found
        });
        let asset = match named.or_else(|| self.rng.choose(&self.assets)) {
            Some(asset) => asset.clone(),
            None => {
                tracing::warn!("Dropping {} trigger: no sound assets", trigger.source);
                return None;
            }
        };
        let handler = self.event_handler.clone().unwrap_or_else(|| self.activation.clone());
        Some(WorkItem::ExternalEvent { source: trigger.source, asset, handler })
    }

    async fn event_task(&self) {
        let mut source = self.event_source.lock().await;
        let Some(source) = source.as_mut() else {
            return;
        };
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            self.transition(TaskKind::Events, TaskState::Sleeping(self.poll_interval));
            ticker.tick().await;
            match source.poll().await {
                Ok(Some(trigger)) => {
                    tracing::info!("External trigger from {}", trigger.source);
                    if self.trigger_tx.send(trigger).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Event source poll failed: {}", e),
            }
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|requested| *requested).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_stays_in_range() {
        let rng = ScheduleRng::new(Some(7));
        let range = IntervalRange::new(4, 14);
        for _ in 0..500 {
            assert!(range.contains(rng.draw(&range)));
        }
    }

    #[test]
    fn test_seeded_draws_repeat() {
        let range = IntervalRange::new(10, 40);
        let a = ScheduleRng::new(Some(42));
        let b = ScheduleRng::new(Some(42));
        let first: Vec<_> = (0..16).map(|_| a.draw(&range)).collect();
        let second: Vec<_> = (0..16).map(|_| b.draw(&range)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shutdown_handle_latches() {
        let (tx, _) = watch::channel(false);
        let handle = ShutdownHandle { tx: Arc::new(tx) };
        assert!(!handle.is_requested());
        handle.request();
        assert!(handle.is_requested());
    }
}
