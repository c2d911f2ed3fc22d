// src/lib.rs - Motion coordination and position planning for an animatronic bird
pub mod audio;
pub mod config;
pub mod file_manager;
pub mod hardware;
pub mod motion;
pub mod scheduler;
pub mod simulator;
pub mod squawker;

pub use config::{Config, load_config};
pub use hardware::{HardwareContext, HardwareError, MotorChannel};
pub use scheduler::{MotionCoordinator, ShutdownHandle, TaskKind, TaskState, WorkItem, WorkQueue};
pub use squawker::{Squawker, SquawkerError};
