// src/motion/eye_beak.rs - Eye/beak state machine
//
// One motor serves both mechanisms: forward opens the beak, reverse cycles the
// eyelids. Two switches report the eyelid position:
//   left engaged, right released  -> eyes open
//   left released, right engaged  -> eyes closed
//   anything else                 -> unknown (in transit, or a switch fault)
use std::sync::Arc;

use crate::config::EyeConfig;
use crate::hardware::{HardwareContext, HardwareError, MotorChannel, SwitchSensor};

/// Bounces tolerated on one edge wait before the switch is reported as chattering.
const MAX_BOUNCES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EyeState {
    Open,
    Closed,
    Unknown,
}

impl EyeState {
    pub fn from_switches(left_engaged: bool, right_engaged: bool) -> Self {
        match (left_engaged, right_engaged) {
            (true, false) => EyeState::Open,
            (false, true) => EyeState::Closed,
            _ => EyeState::Unknown,
        }
    }
}

/// States `set_eyes` can be asked to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeTarget {
    Open,
    Closed,
}

impl From<EyeTarget> for EyeState {
    fn from(target: EyeTarget) -> Self {
        match target {
            EyeTarget::Open => EyeState::Open,
            EyeTarget::Closed => EyeState::Closed,
        }
    }
}

#[derive(Clone)]
pub struct EyeBeakStateMachine {
    ctx: Arc<HardwareContext>,
    config: EyeConfig,
}

impl EyeBeakStateMachine {
    pub fn new(ctx: Arc<HardwareContext>, config: EyeConfig) -> Self {
        Self { ctx, config }
    }

    pub fn state(&self) -> EyeState {
        EyeState::from_switches(self.ctx.left_eye.read(), self.ctx.right_eye.read())
    }

    /// Reverse the motor until `switch` engages and stays engaged for the
    /// debounce window. The motor is stopped at every edge so a genuine edge
    /// never overshoots the switch; a bounce resumes the drive.
    async fn reverse_until_engaged(&self, switch: &dyn SwitchSensor) -> Result<(), HardwareError> {
        let mut bounces = 0;
        let mut retried = false;
        loop {
            self.ctx
                .motors
                .set_throttle(MotorChannel::EyeBeak, -self.config.blink_throttle);
            let edge = switch.wait_for_rising_edge(self.config.edge_timeout()).await;
            self.ctx.motors.stop(MotorChannel::EyeBeak);
            match edge {
                Ok(()) => {
                    tokio::time::sleep(self.config.debounce()).await;
                    if switch.read() {
                        return Ok(());
                    }
                    bounces += 1;
                    tracing::debug!("{} switch bounced ({})", switch.name(), bounces);
                    if bounces >= MAX_BOUNCES {
                        return Err(HardwareError::Chatter { switch: switch.name(), bounces });
                    }
                }
                Err(e) if !retried => {
                    tracing::warn!("{}; retrying once", e);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cycle the eyelids until they come back open. Only returns `Ok` once the
    /// switches read open.
    pub async fn full_blink(&self) -> Result<EyeState, HardwareError> {
        tracing::info!("Cycling one full blink");
        let left = self.ctx.left_eye.clone();
        for _ in 0..self.config.max_set_attempts {
            self.reverse_until_engaged(left.as_ref()).await?;
            let state = self.state();
            if state == EyeState::Open {
                return Ok(state);
            }
            tracing::debug!("Left switch engaged but eyes read {:?}", state);
        }
        Err(HardwareError::NoConvergence {
            target: EyeState::Open,
            observed: self.state(),
            attempts: self.config.max_set_attempts,
        })
    }

    /// Flip the eyelids: open or unknown moves to closed, closed moves to open.
    pub async fn toggle_half_blink(&self) -> Result<EyeState, HardwareError> {
        let before = self.state();
        tracing::debug!("Toggling blink state from {:?}", before);
        let switch = match before {
            EyeState::Open | EyeState::Unknown => self.ctx.right_eye.clone(),
            EyeState::Closed => self.ctx.left_eye.clone(),
        };
        self.reverse_until_engaged(switch.as_ref()).await?;
        Ok(self.state())
    }

    /// Half-blink until the eyes read `target`. Each half-blink flips the state,
    /// so failing to converge within the configured attempts is a hardware fault.
    pub async fn set_eyes(&self, target: EyeTarget) -> Result<EyeState, HardwareError> {
        let target = EyeState::from(target);
        let mut attempts = 0;
        let mut state = self.state();
        while state != target {
            if attempts >= self.config.max_set_attempts {
                return Err(HardwareError::NoConvergence { target, observed: state, attempts });
            }
            attempts += 1;
            state = self.toggle_half_blink().await?;
        }
        Ok(state)
    }

    /// Open the beak. Waits out any eyelid motion first, since forward and
    /// reverse share the motor.
    pub async fn open_beak(&self) {
        self.ctx
            .motors
            .wait_until(MotorChannel::EyeBeak, |throttle| throttle >= 0.0)
            .await;
        self.ctx
            .motors
            .set_throttle(MotorChannel::EyeBeak, self.config.beak_throttle);
    }

    /// The beak springs shut whenever the motor is not driving forward.
    pub fn close_beak(&self) {
        if self.ctx.motors.throttle(MotorChannel::EyeBeak) > 0.0 {
            self.ctx.motors.stop(MotorChannel::EyeBeak);
        }
    }

    pub fn is_beak_open(&self) -> bool {
        self.ctx.motors.throttle(MotorChannel::EyeBeak) > 0.0
    }

    pub fn kill(&self) {
        self.ctx.motors.stop(MotorChannel::EyeBeak);
    }
}
