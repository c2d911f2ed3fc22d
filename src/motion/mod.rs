// src/motion/mod.rs - Body planner, named actions and the eye/beak state machine
pub mod actions;
pub mod eye_beak;
pub mod planner;

pub use actions::ActionTable;
pub use eye_beak::{EyeBeakStateMachine, EyeState, EyeTarget};
pub use planner::{BodyPositionPlanner, Direction, MovePlan, plan_move};

use thiserror::Error;

use crate::hardware::HardwareError;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Unknown body action '{0}'")]
    UnknownAction(String),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}
