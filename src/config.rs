//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{GroundControlError, Result};
use crate::mission::MissionItem;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub flight: FlightConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Vehicle link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_discovery_timeout_s")]
    pub discovery_timeout_s: u64,
}

/// How the scripted flight ends
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    /// Land in place and wait for disarm
    #[default]
    Land,
    /// Command return-to-launch and do not wait
    ReturnToLaunch,
}

/// Scripted flight parameters
#[derive(Debug, Deserialize, Clone)]
pub struct FlightConfig {
    #[serde(default = "default_takeoff_altitude_m")]
    pub takeoff_altitude_m: f32,

    #[serde(default = "default_hold_s")]
    pub hold_s: u64,

    #[serde(default = "default_offboard_duration_s")]
    pub offboard_duration_s: u64,

    #[serde(default = "default_settle_s")]
    pub settle_s: u64,

    #[serde(default = "default_yaw_rate_deg_s")]
    pub yaw_rate_deg_s: f32,

    #[serde(default)]
    pub terminal: TerminalAction,
}

/// Poll intervals and optional deadlines for convergence waits
///
/// A missing deadline means wait indefinitely (until cancelled).
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_health_poll_ms")]
    pub health_poll_ms: u64,

    #[serde(default = "default_disarm_poll_ms")]
    pub disarm_poll_ms: u64,

    #[serde(default)]
    pub health_timeout_s: Option<u64>,

    #[serde(default)]
    pub takeoff_timeout_s: Option<u64>,

    #[serde(default)]
    pub landing_timeout_s: Option<u64>,
}

/// Audit log and console configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_console_level")]
    pub console_level: String,
}

/// Pre-flight mission configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MissionConfig {
    /// Upload the plan and read it back before takeoff
    #[serde(default)]
    pub upload: bool,

    /// Waypoints; empty means the built-in demo waypoint
    #[serde(default)]
    pub waypoints: Vec<MissionItem>,
}

/// Simulated vehicle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SimConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_health_delay_ticks")]
    pub health_delay_ticks: u32,

    #[serde(default = "default_climb_rate_m_s")]
    pub climb_rate_m_s: f32,

    #[serde(default = "default_descent_rate_m_s")]
    pub descent_rate_m_s: f32,

    #[serde(default = "default_cruise_speed_m_s")]
    pub cruise_speed_m_s: f32,

    #[serde(default = "default_home_latitude_deg")]
    pub home_latitude_deg: f64,

    #[serde(default = "default_home_longitude_deg")]
    pub home_longitude_deg: f64,

    #[serde(default = "default_home_absolute_altitude_m")]
    pub home_absolute_altitude_m: f32,
}

// Default value functions
fn default_url() -> String { "sim://".to_string() }
fn default_discovery_timeout_s() -> u64 { 30 }

fn default_takeoff_altitude_m() -> f32 { 10.0 }
fn default_hold_s() -> u64 { 5 }
fn default_offboard_duration_s() -> u64 { 10 }
fn default_settle_s() -> u64 { 10 }
fn default_yaw_rate_deg_s() -> f32 { 60.0 }

fn default_health_poll_ms() -> u64 { 1000 }
fn default_disarm_poll_ms() -> u64 { 1000 }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_console_level() -> String { "info".to_string() }

fn default_tick_ms() -> u64 { 100 }
fn default_health_delay_ticks() -> u32 { 20 }
fn default_climb_rate_m_s() -> f32 { 2.0 }
fn default_descent_rate_m_s() -> f32 { 1.0 }
fn default_cruise_speed_m_s() -> f32 { 5.0 }
fn default_home_latitude_deg() -> f64 { 22.681703 }
fn default_home_longitude_deg() -> f64 { 120.245649 }
fn default_home_absolute_altitude_m() -> f32 { 12.0 }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            discovery_timeout_s: default_discovery_timeout_s(),
        }
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            takeoff_altitude_m: default_takeoff_altitude_m(),
            hold_s: default_hold_s(),
            offboard_duration_s: default_offboard_duration_s(),
            settle_s: default_settle_s(),
            yaw_rate_deg_s: default_yaw_rate_deg_s(),
            terminal: TerminalAction::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            health_poll_ms: default_health_poll_ms(),
            disarm_poll_ms: default_disarm_poll_ms(),
            health_timeout_s: None,
            takeoff_timeout_s: None,
            landing_timeout_s: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            console_level: default_console_level(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            health_delay_ticks: default_health_delay_ticks(),
            climb_rate_m_s: default_climb_rate_m_s(),
            descent_rate_m_s: default_descent_rate_m_s(),
            cruise_speed_m_s: default_cruise_speed_m_s(),
            home_latitude_deg: default_home_latitude_deg(),
            home_longitude_deg: default_home_longitude_deg(),
            home_absolute_altitude_m: default_home_absolute_altitude_m(),
        }
    }
}

impl LinkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_s)
    }
}

impl TimingConfig {
    pub fn health_poll(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms)
    }

    pub fn disarm_poll(&self) -> Duration {
        Duration::from_millis(self.disarm_poll_ms)
    }

    pub fn health_timeout(&self) -> Option<Duration> {
        self.health_timeout_s.map(Duration::from_secs)
    }

    pub fn takeoff_timeout(&self) -> Option<Duration> {
        self.takeoff_timeout_s.map(Duration::from_secs)
    }

    pub fn landing_timeout(&self) -> Option<Duration> {
        self.landing_timeout_s.map(Duration::from_secs)
    }
}

fn invalid(message: impl std::fmt::Display) -> GroundControlError {
    GroundControlError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields take their defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ground_control::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.url.is_empty() {
            return Err(invalid("link url cannot be empty"));
        }

        if self.link.discovery_timeout_s == 0 || self.link.discovery_timeout_s > 3600 {
            return Err(invalid("discovery_timeout_s must be between 1 and 3600"));
        }

        if !(self.flight.takeoff_altitude_m > 0.0 && self.flight.takeoff_altitude_m <= 120.0) {
            return Err(invalid("takeoff_altitude_m must be greater than 0.0 and at most 120.0"));
        }

        if !(-360.0..=360.0).contains(&self.flight.yaw_rate_deg_s) {
            return Err(invalid("yaw_rate_deg_s must be between -360.0 and 360.0"));
        }

        if self.timing.health_poll_ms == 0 || self.timing.health_poll_ms > 60000 {
            return Err(invalid("health_poll_ms must be between 1 and 60000"));
        }

        if self.timing.disarm_poll_ms == 0 || self.timing.disarm_poll_ms > 60000 {
            return Err(invalid("disarm_poll_ms must be between 1 and 60000"));
        }

        for (name, value) in [
            ("health_timeout_s", self.timing.health_timeout_s),
            ("takeoff_timeout_s", self.timing.takeoff_timeout_s),
            ("landing_timeout_s", self.timing.landing_timeout_s),
        ] {
            if value == Some(0) {
                return Err(invalid(format!("{} must be greater than 0 when set", name)));
            }
        }

        if self.log.dir.is_empty() {
            return Err(invalid("log dir cannot be empty"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.log.console_level.as_str()) {
            return Err(invalid("console_level must be one of: trace, debug, info, warn, error"));
        }

        if self.sim.tick_ms == 0 || self.sim.tick_ms > 1000 {
            return Err(invalid("sim tick_ms must be between 1 and 1000"));
        }

        for (name, value) in [
            ("climb_rate_m_s", self.sim.climb_rate_m_s),
            ("descent_rate_m_s", self.sim.descent_rate_m_s),
            ("cruise_speed_m_s", self.sim.cruise_speed_m_s),
        ] {
            if !(value > 0.0) {
                return Err(invalid(format!("{} must be greater than 0.0", name)));
            }
        }

        Ok(())
    }
}
