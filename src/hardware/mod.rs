// src/hardware/mod.rs - Motor bank, switch sensors and the shared hardware context
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::motion::EyeState;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Timed out after {timeout:?} waiting for the {switch} switch")]
    EdgeTimeout { switch: &'static str, timeout: Duration },
    #[error("Eyes did not reach {target:?} after {attempts} half-blinks (last read {observed:?})")]
    NoConvergence {
        target: EyeState,
        observed: EyeState,
        attempts: u32,
    },
    #[error("The {switch} switch bounced {bounces} times without settling")]
    Chatter { switch: &'static str, bounces: u32 },
    #[error("Signal source for the {0} switch is gone")]
    SwitchClosed(&'static str),
}

/// The two physical actuators of the bird.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorChannel {
    Body,
    /// Forward opens the beak, reverse blinks the eyes.
    EyeBeak,
}

impl MotorChannel {
    pub const ALL: [MotorChannel; 2] = [MotorChannel::Body, MotorChannel::EyeBeak];

    pub(crate) fn index(self) -> usize {
        match self {
            MotorChannel::Body => 0,
            MotorChannel::EyeBeak => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MotorChannel::Body => "body",
            MotorChannel::EyeBeak => "eye/beak",
        }
    }
}

/// How the H-bridge lets the motor coast when the duty cycle is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecayMode {
    Fast,
    #[default]
    Slow,
}

/// Physical motor driver binding. Throttle writes are fast and non-blocking.
pub trait MotorDriver: Send + Sync {
    fn apply(&self, channel: MotorChannel, throttle: f32);

    fn set_decay_mode(&self, _channel: MotorChannel, _mode: DecayMode) {}

    /// Release pins and bus handles. Called once on shutdown.
    fn release(&self) {}
}

/// Binary edge-triggered switch. `read()` is true while the switch is engaged.
#[async_trait]
pub trait SwitchSensor: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self) -> bool;

    /// Resolve on the next released -> engaged transition after the call.
    async fn wait_for_rising_edge(&self, timeout: Duration) -> Result<(), HardwareError>;
}

/// Published state of both channels plus the number of ambient motions in flight.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorSnapshot {
    pub throttle: [f32; 2],
    pub decay: [DecayMode; 2],
    pub holds: usize,
}

impl MotorSnapshot {
    pub fn throttle(&self, channel: MotorChannel) -> f32 {
        self.throttle[channel.index()]
    }

    pub fn is_idle(&self) -> bool {
        self.holds == 0 && self.throttle.iter().all(|t| *t == 0.0)
    }
}

/// Owns the motor driver and broadcasts every throttle change, so waiters can
/// park on "idle" instead of polling.
pub struct MotorBank {
    driver: Arc<dyn MotorDriver>,
    state: watch::Sender<MotorSnapshot>,
}

impl MotorBank {
    pub fn new(driver: Arc<dyn MotorDriver>) -> Self {
        let (state, _) = watch::channel(MotorSnapshot::default());
        let bank = Self { driver, state };
        for channel in MotorChannel::ALL {
            bank.set_decay_mode(channel, DecayMode::Slow);
            bank.set_throttle(channel, 0.0);
        }
        bank
    }

    pub fn set_throttle(&self, channel: MotorChannel, throttle: f32) {
        let throttle = if throttle.is_finite() { throttle.clamp(-1.0, 1.0) } else { 0.0 };
        self.driver.apply(channel, throttle);
        self.state.send_if_modified(|snapshot| {
            let slot = &mut snapshot.throttle[channel.index()];
            if *slot == throttle {
                return false;
            }
            *slot = throttle;
            true
        });
        tracing::trace!("{} throttle -> {:.2}", channel.as_str(), throttle);
    }

    pub fn throttle(&self, channel: MotorChannel) -> f32 {
        self.state.borrow().throttle(channel)
    }

    pub fn set_decay_mode(&self, channel: MotorChannel, mode: DecayMode) {
        self.driver.set_decay_mode(channel, mode);
        self.state.send_modify(|snapshot| snapshot.decay[channel.index()] = mode);
    }

    pub fn decay_mode(&self, channel: MotorChannel) -> DecayMode {
        self.state.borrow().decay[channel.index()]
    }

    pub fn stop(&self, channel: MotorChannel) {
        self.set_throttle(channel, 0.0);
    }

    pub fn stop_all(&self) {
        for channel in MotorChannel::ALL {
            self.stop(channel);
        }
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MotorSnapshot> {
        self.state.subscribe()
    }

    pub fn is_idle(&self) -> bool {
        self.state.borrow().is_idle()
    }

    /// Mark an ambient motion as in flight until the returned guard drops.
    /// Keeps the bank non-idle across the pauses between moves of one action.
    pub fn hold(&self) -> MotionHold<'_> {
        self.state.send_modify(|snapshot| snapshot.holds += 1);
        MotionHold { bank: self }
    }

    /// Park until both throttles read exactly zero and no motion is held.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|snapshot| snapshot.is_idle()).await;
    }

    /// Park until the channel's throttle satisfies `ready`.
    pub async fn wait_until<F>(&self, channel: MotorChannel, ready: F)
    where
        F: Fn(f32) -> bool,
    {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|snapshot| ready(snapshot.throttle(channel))).await;
    }

    fn release(&self) {
        self.driver.release();
    }
}

pub struct MotionHold<'a> {
    bank: &'a MotorBank,
}

impl Drop for MotionHold<'_> {
    fn drop(&mut self) {
        self.bank
            .state
            .send_modify(|snapshot| snapshot.holds = snapshot.holds.saturating_sub(1));
    }
}

/// Everything the motion components share: both motors, the three switches and
/// the open-loop body position estimate.
pub struct HardwareContext {
    pub motors: MotorBank,
    pub body_home: Arc<dyn SwitchSensor>,
    pub left_eye: Arc<dyn SwitchSensor>,
    pub right_eye: Arc<dyn SwitchSensor>,
    body_position: AtomicU16,
    released: AtomicBool,
}

impl HardwareContext {
    pub fn new(
        driver: Arc<dyn MotorDriver>,
        body_home: Arc<dyn SwitchSensor>,
        left_eye: Arc<dyn SwitchSensor>,
        right_eye: Arc<dyn SwitchSensor>,
    ) -> Self {
        Self {
            motors: MotorBank::new(driver),
            body_home,
            left_eye,
            right_eye,
            body_position: AtomicU16::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Current body position estimate on the cyclic timeline.
    pub fn body_position(&self) -> u16 {
        self.body_position.load(Ordering::SeqCst)
    }

    pub(crate) fn commit_body_position(&self, position: u16) {
        self.body_position.store(position, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Zero both throttles and release the driver. Safe to call more than once;
    /// the throttles are zeroed every time.
    pub fn shutdown(&self) {
        self.motors.stop_all();
        if !self.released.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutting down hardware");
            self.motors.release();
        }
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimMotorDriver;

    #[test]
    fn test_throttle_is_clamped_and_published() {
        let driver = Arc::new(SimMotorDriver::new());
        let bank = MotorBank::new(driver.clone());
        bank.set_throttle(MotorChannel::Body, 3.0);
        assert_eq!(bank.throttle(MotorChannel::Body), 1.0);
        assert_eq!(driver.throttle(MotorChannel::Body), 1.0);
        bank.set_throttle(MotorChannel::EyeBeak, f32::NAN);
        assert_eq!(bank.throttle(MotorChannel::EyeBeak), 0.0);
        assert_eq!(bank.decay_mode(MotorChannel::Body), DecayMode::Slow);
    }

    #[test]
    fn test_hold_keeps_bank_busy() {
        let bank = MotorBank::new(Arc::new(SimMotorDriver::new()));
        assert!(bank.is_idle());
        {
            let _hold = bank.hold();
            assert!(!bank.is_idle());
        }
        assert!(bank.is_idle());
        bank.set_throttle(MotorChannel::EyeBeak, -1.0);
        assert!(!bank.is_idle());
        bank.stop_all();
        assert!(bank.is_idle());
    }

    #[tokio::test]
    async fn test_wait_idle_wakes_on_stop() {
        let bank = Arc::new(MotorBank::new(Arc::new(SimMotorDriver::new())));
        bank.set_throttle(MotorChannel::Body, 1.0);
        let waiter = {
            let bank = bank.clone();
            tokio::spawn(async move { bank.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        bank.stop(MotorChannel::Body);
        waiter.await.unwrap();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_zeroes_throttles() {
        let driver = Arc::new(SimMotorDriver::new());
        let bird = crate::simulator::SimBird::new(driver.clone());
        let ctx = bird.context();
        ctx.motors.set_throttle(MotorChannel::Body, 1.0);
        ctx.motors.set_throttle(MotorChannel::EyeBeak, -1.0);
        ctx.shutdown();
        ctx.shutdown();
        assert!(ctx.is_released());
        assert_eq!(driver.throttle(MotorChannel::Body), 0.0);
        assert_eq!(driver.throttle(MotorChannel::EyeBeak), 0.0);
        assert_eq!(driver.release_count(), 1);
    }
}
