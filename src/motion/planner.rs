// src/motion/planner.rs - Cyclic body position planner
//
// The body motor drives the figure around one mechanical loop of roughly 2.22s.
// Positions are hundredths of a second into that loop; the only sensor sits at
// position 0, so every other position is an open-loop estimate.
use std::sync::Arc;
use std::time::Duration;

use crate::config::BodyConfig;
use crate::hardware::{HardwareContext, HardwareError, MotorChannel};
use crate::motion::MotionError;
use crate::motion::actions::ActionTable;

/// Length of one position unit on the timeline.
pub const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    pub fn throttle(self, magnitude: f32) -> f32 {
        self.sign() as f32 * magnitude.abs()
    }
}

/// Result of planning a body move on the cyclic timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    /// Target after out-of-range targets were redirected home.
    pub destination: u16,
    /// Drive time in timeline units (hundredths of a second).
    pub duration: u16,
    pub direction: Direction,
}

impl MovePlan {
    pub fn is_noop(&self) -> bool {
        self.duration == 0
    }

    pub fn drive_time(&self) -> Duration {
        TICK * u32::from(self.duration)
    }
}

/// Targets outside `[0, cycle_length)` are treated as "go home".
pub fn resolve_destination(target: i32, cycle_length: u16) -> u16 {
    if target >= 0 && target < i32::from(cycle_length) {
        target as u16
    } else {
        0
    }
}

fn distances(current: u16, destination: u16, cycle_length: u16) -> (u16, u16) {
    let cycle = i32::from(cycle_length);
    let current = i32::from(current) % cycle;
    let destination = i32::from(destination);
    let forward = (cycle - current + destination).rem_euclid(cycle);
    let reverse = (current - destination).rem_euclid(cycle);
    (forward as u16, reverse as u16)
}

/// Shortest move from `current` to `target`. Ties go forward.
pub fn plan_move(current: u16, target: i32, cycle_length: u16) -> MovePlan {
    if cycle_length == 0 {
        return MovePlan { destination: 0, duration: 0, direction: Direction::Forward };
    }
    let destination = resolve_destination(target, cycle_length);
    let (forward, reverse) = distances(current, destination, cycle_length);
    if forward <= reverse {
        MovePlan { destination, duration: forward, direction: Direction::Forward }
    } else {
        MovePlan { destination, duration: reverse, direction: Direction::Reverse }
    }
}

/// Move from `current` to `target` in a forced direction.
pub fn plan_move_in(current: u16, target: i32, cycle_length: u16, direction: Direction) -> MovePlan {
    if cycle_length == 0 {
        return MovePlan { destination: 0, duration: 0, direction };
    }
    let destination = resolve_destination(target, cycle_length);
    let (forward, reverse) = distances(current, destination, cycle_length);
    let duration = match direction {
        Direction::Forward => forward,
        Direction::Reverse => reverse,
    };
    MovePlan { destination, duration, direction }
}

/// Drives the body motor along its cycle and keeps the position estimate.
#[derive(Clone)]
pub struct BodyPositionPlanner {
    ctx: Arc<HardwareContext>,
    config: BodyConfig,
    actions: ActionTable,
}

impl BodyPositionPlanner {
    pub fn new(ctx: Arc<HardwareContext>, config: BodyConfig, actions: ActionTable) -> Self {
        Self { ctx, config, actions }
    }

    pub fn position(&self) -> u16 {
        self.ctx.body_position()
    }

    pub fn cycle_length(&self) -> u16 {
        self.config.cycle_length
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn plan(&self, target: i32) -> MovePlan {
        plan_move(self.position(), target, self.config.cycle_length)
    }

    /// Drive to `target` along the shorter way round.
    pub async fn execute_move(&self, target: i32) -> MovePlan {
        self.execute_move_with(target, None).await
    }

    /// Drive to `target`, optionally in a forced direction. The committed
    /// position is where the motor should be, not where a sensor says it is.
    pub async fn execute_move_with(&self, target: i32, direction: Option<Direction>) -> MovePlan {
        let current = self.position();
        let plan = match direction {
            Some(direction) => plan_move_in(current, target, self.config.cycle_length, direction),
            None => plan_move(current, target, self.config.cycle_length),
        };
        if plan.is_noop() {
            tracing::debug!("Body position {} matches request. Not moving.", current);
            return plan;
        }

        tracing::debug!(
            "Moving {:?} for {:.2}s from {} to {}",
            plan.direction,
            plan.drive_time().as_secs_f32(),
            current,
            plan.destination
        );
        self.ctx
            .motors
            .set_throttle(MotorChannel::Body, plan.direction.throttle(self.config.move_throttle));
        tokio::time::sleep(plan.drive_time()).await;
        self.ctx.motors.stop(MotorChannel::Body);
        self.ctx.commit_body_position(plan.destination);
        plan
    }

    /// Run a named action: approach whichever end of it is nearer, then traverse
    /// to the other end.
    pub async fn resolve_action(&self, name: &str) -> Result<(), MotionError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| MotionError::UnknownAction(name.to_string()))?;
        let (approach, finish) = action.traversal_from(self.position(), self.config.cycle_length);
        tracing::info!("Running action {} ({} -> {})", name, approach, finish);
        self.execute_move(i32::from(approach)).await;
        tokio::time::sleep(self.config.action_settle()).await;
        self.execute_move(i32::from(finish)).await;
        Ok(())
    }

    /// Drive forward until the home switch engages, then reset the estimate to 0.
    /// A missed edge stops the motor and is retried once.
    pub async fn rehome(&self) -> Result<(), HardwareError> {
        tracing::info!("Homing body to position 0");
        let timeout = self.config.home_timeout();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.ctx
                .motors
                .set_throttle(MotorChannel::Body, Direction::Forward.throttle(self.config.home_throttle));
            let edge = self.ctx.body_home.wait_for_rising_edge(timeout).await;
            self.ctx.motors.stop(MotorChannel::Body);
            match edge {
                Ok(()) => break,
                Err(e) if attempt < 2 => {
                    tracing::warn!("Homing attempt {} failed: {}; retrying", attempt, e);
                }
                Err(e) => {
                    tracing::error!("Homing failed: {}", e);
                    return Err(e);
                }
            }
        }
        self.ctx.commit_body_position(0);
        Ok(())
    }

    /// Fold drive time spent outside the planner (e.g. during sound activations)
    /// into the estimate.
    pub fn advance(&self, elapsed: Duration, direction: Direction) {
        let cycle = i64::from(self.config.cycle_length);
        if cycle == 0 {
            return;
        }
        let ticks = (elapsed.as_millis() / TICK.as_millis()) as i64;
        let position = (i64::from(self.position()) + ticks * i64::from(direction.sign())).rem_euclid(cycle);
        tracing::debug!("Body estimate drifted {} ticks {:?} to {}", ticks, direction, position);
        self.ctx.commit_body_position(position as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_prefers_shorter_direction() {
        // From 50, wingshake's 20 is 30 back versus 192 forward.
        let plan = plan_move(50, 20, 222);
        assert_eq!(plan, MovePlan { destination: 20, duration: 30, direction: Direction::Reverse });

        let plan = plan_move(200, 10, 222);
        assert_eq!(plan, MovePlan { destination: 10, duration: 32, direction: Direction::Forward });
    }

    #[test]
    fn test_tie_breaks_forward() {
        let plan = plan_move(0, 111, 222);
        assert_eq!(plan.duration, 111);
        assert_eq!(plan.direction, Direction::Forward);
    }

    #[test]
    fn test_same_position_is_noop() {
        let plan = plan_move(73, 73, 222);
        assert!(plan.is_noop());
        assert_eq!(plan.drive_time(), Duration::ZERO);
    }

    #[test]
    fn test_out_of_range_goes_home() {
        assert_eq!(plan_move(50, 222, 222).destination, 0);
        assert_eq!(plan_move(50, -4, 222).destination, 0);
        assert_eq!(plan_move(0, 500, 222), MovePlan { destination: 0, duration: 0, direction: Direction::Forward });
    }

    #[test]
    fn test_forced_direction_takes_the_long_way() {
        let plan = plan_move_in(50, 20, 222, Direction::Forward);
        assert_eq!(plan.duration, 192);
        assert_eq!(plan.direction, Direction::Forward);
    }

    #[test]
    fn test_drive_time_is_hundredths() {
        let plan = plan_move(0, 45, 222);
        assert_eq!(plan.drive_time(), Duration::from_millis(450));
    }
}
