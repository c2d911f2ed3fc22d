//! # Squawker Configuration
//!
//! Every tunable of the bird lives in one TOML file. All fields have defaults,
//! so an empty file (or no file at all) yields the stock behaviour.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [body]
//! cycle_length = 222
//! rehome_every = 4
//!
//! [audio]
//! threshold_low = 2.0
//! threshold_high = 15.0
//!
//! [schedule]
//! seed = 7
//! blink = { min_secs = 4, max_secs = 14 }
//!
//! [actions.wingshake]
//! start = 190
//! end = 20
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the body, eyes, audio, schedule and triggers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub body: BodyConfig,
    #[serde(default)]
    pub eyes: EyeConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub events: EventConfig,
    #[serde(default = "default_actions")]
    pub actions: BTreeMap<String, ActionDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            body: BodyConfig::default(),
            eyes: EyeConfig::default(),
            audio: AudioConfig::default(),
            schedule: ScheduleConfig::default(),
            events: EventConfig::default(),
            actions: default_actions(),
        }
    }
}

/// Body motor and cyclic timeline settings. Positions are hundredths of a second.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BodyConfig {
    #[serde(default = "default_cycle_length")]
    pub cycle_length: u16,
    #[serde(default = "default_full_throttle")]
    pub move_throttle: f32,
    #[serde(default = "default_full_throttle")]
    pub home_throttle: f32,
    #[serde(default = "default_home_timeout_ms")]
    pub home_timeout_ms: u64,
    #[serde(default = "default_action_settle_ms")]
    pub action_settle_ms: u64,
    /// Re-home after this many ambient actions. 0 disables periodic re-homing.
    #[serde(default = "default_rehome_every")]
    pub rehome_every: u32,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            cycle_length: default_cycle_length(),
            move_throttle: default_full_throttle(),
            home_throttle: default_full_throttle(),
            home_timeout_ms: default_home_timeout_ms(),
            action_settle_ms: default_action_settle_ms(),
            rehome_every: default_rehome_every(),
        }
    }
}

impl BodyConfig {
    pub fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }

    pub fn action_settle(&self) -> Duration {
        Duration::from_millis(self.action_settle_ms)
    }
}

/// Eye/beak switch handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EyeConfig {
    #[serde(default = "default_full_throttle")]
    pub blink_throttle: f32,
    #[serde(default = "default_full_throttle")]
    pub beak_throttle: f32,
    #[serde(default = "default_edge_timeout_ms")]
    pub edge_timeout_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_set_attempts")]
    pub max_set_attempts: u32,
    #[serde(default = "default_blink_hold_ms")]
    pub blink_hold_ms: u64,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            blink_throttle: default_full_throttle(),
            beak_throttle: default_full_throttle(),
            edge_timeout_ms: default_edge_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            max_set_attempts: default_max_set_attempts(),
            blink_hold_ms: default_blink_hold_ms(),
        }
    }
}

impl EyeConfig {
    pub fn edge_timeout(&self) -> Duration {
        Duration::from_millis(self.edge_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn blink_hold(&self) -> Duration {
        Duration::from_millis(self.blink_hold_ms)
    }
}

/// Amplitude-to-actuation mapping.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    #[serde(default = "default_threshold_low")]
    pub threshold_low: f32,
    #[serde(default = "default_threshold_high")]
    pub threshold_high: f32,
    #[serde(default = "default_full_throttle")]
    pub body_throttle: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            chunk_frames: default_chunk_frames(),
            scale_factor: default_scale_factor(),
            threshold_low: default_threshold_low(),
            threshold_high: default_threshold_high(),
            body_throttle: default_full_throttle(),
        }
    }
}

/// Inclusive lower / exclusive upper bound on a randomized sleep, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct IntervalRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl IntervalRange {
    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn contains(&self, interval: Duration) -> bool {
        let secs = interval.as_secs();
        secs >= self.min_secs && secs < self.max_secs && interval.subsec_nanos() == 0
    }
}

/// Randomized intervals of the ambient and sound tasks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_blink_interval")]
    pub blink: IntervalRange,
    #[serde(default = "default_body_interval")]
    pub body: IntervalRange,
    #[serde(default = "default_sound_interval")]
    pub sound: IntervalRange,
    /// Fixed seed for the schedule RNG. Unset means seeded from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            blink: default_blink_interval(),
            body: default_body_interval(),
            sound: default_sound_interval(),
            seed: None,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl ScheduleConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Simulated RFID reader: a sentinel file polled for a marker string.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sentinel_path")]
    pub sentinel_path: PathBuf,
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sentinel_path: default_sentinel_path(),
            marker: default_marker(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl EventConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A named body action: the stretch of the cycle between `start` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionDescriptor {
    pub start: u16,
    pub end: u16,
}

impl Config {
    /// Validate cross-field constraints before any hardware is engaged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cycle = self.body.cycle_length;
        if cycle == 0 {
            return Err(ConfigError::Invalid("body.cycle_length must be > 0".to_string()));
        }
        for (name, throttle) in [
            ("body.move_throttle", self.body.move_throttle),
            ("body.home_throttle", self.body.home_throttle),
            ("eyes.blink_throttle", self.eyes.blink_throttle),
            ("audio.body_throttle", self.audio.body_throttle),
            ("eyes.beak_throttle", self.eyes.beak_throttle),
        ] {
            if !(throttle > 0.0 && throttle <= 1.0) {
                return Err(ConfigError::Invalid(format!("{} must be in (0, 1], got {}", name, throttle)));
            }
        }
        if self.audio.chunk_frames == 0 {
            return Err(ConfigError::Invalid("audio.chunk_frames must be > 0".to_string()));
        }
        if self.audio.scale_factor <= 0.0 {
            return Err(ConfigError::Invalid("audio.scale_factor must be > 0".to_string()));
        }
        if self.audio.threshold_low > self.audio.threshold_high {
            return Err(ConfigError::Invalid(format!(
                "audio.threshold_low ({}) must not exceed audio.threshold_high ({})",
                self.audio.threshold_low, self.audio.threshold_high
            )));
        }
        for (name, range) in [
            ("schedule.blink", self.schedule.blink),
            ("schedule.body", self.schedule.body),
            ("schedule.sound", self.schedule.sound),
        ] {
            if range.min_secs >= range.max_secs {
                return Err(ConfigError::Invalid(format!(
                    "{} needs min_secs < max_secs, got {}..{}",
                    name, range.min_secs, range.max_secs
                )));
            }
        }
        if self.schedule.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("schedule.idle_timeout_ms must be > 0".to_string()));
        }
        if self.eyes.max_set_attempts == 0 {
            return Err(ConfigError::Invalid("eyes.max_set_attempts must be > 0".to_string()));
        }
        if self.actions.is_empty() {
            return Err(ConfigError::Invalid("at least one body action is required".to_string()));
        }
        for (name, action) in &self.actions {
            if action.start >= cycle || action.end >= cycle {
                return Err(ConfigError::Invalid(format!(
                    "action '{}' boundaries {}..{} fall outside the cycle [0, {})",
                    name, action.start, action.end, cycle
                )));
            }
        }
        if self.events.enabled && self.events.marker.trim().is_empty() {
            return Err(ConfigError::Invalid("events.marker must not be empty".to_string()));
        }
        if self.events.enabled && self.events.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("events.poll_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_cycle_length() -> u16 { 222 }
fn default_full_throttle() -> f32 { 1.0 }
fn default_home_timeout_ms() -> u64 { 5000 }
fn default_action_settle_ms() -> u64 { 300 }
fn default_rehome_every() -> u32 { 4 }
fn default_edge_timeout_ms() -> u64 { 2000 }
fn default_debounce_ms() -> u64 { 50 }
fn default_max_set_attempts() -> u32 { 3 }
fn default_blink_hold_ms() -> u64 { 100 }
fn default_chunk_frames() -> usize { 2048 }
fn default_scale_factor() -> f32 { 50.0 }
fn default_threshold_low() -> f32 { 2.0 }
fn default_threshold_high() -> f32 { 15.0 }
fn default_blink_interval() -> IntervalRange { IntervalRange::new(4, 14) }
fn default_body_interval() -> IntervalRange { IntervalRange::new(10, 40) }
fn default_sound_interval() -> IntervalRange { IntervalRange::new(30, 60) }
fn default_idle_timeout_ms() -> u64 { 10_000 }
fn default_sentinel_path() -> PathBuf { PathBuf::from("/tmp/squawker-rfid") }
fn default_marker() -> String { "rfid".to_string() }
fn default_poll_interval_ms() -> u64 { 500 }

pub fn default_actions() -> BTreeMap<String, ActionDescriptor> {
    [
        ("wingshake", 190, 20),
        ("headbob", 102, 190),
        ("lookup", 15, 65),
        ("shuffle", 65, 190),
    ]
    .into_iter()
    .map(|(name, start, end)| (name.to_string(), ActionDescriptor { start, end }))
    .collect()
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
