//! # Vehicle Link Module
//!
//! Boundary to the vehicle: commands, queries and telemetry subscriptions.
//!
//! This module handles:
//! - The [`VehicleLink`] trait every transport implements
//! - Command result classification ([`LinkError`])
//! - Parsing connection URLs and opening a link with [`connect`]
//!
//! ## Connection URLs
//!
//! | Scheme | Example | Backed by |
//! |--------|---------|-----------|
//! | `sim://` | `sim://` | [`sim::SimulatedVehicle`] |
//! | `udpin://` | `udpin://0.0.0.0:14550` | not available in this build |
//! | `udpout://` | `udpout://192.168.1.10:14550` | not available in this build |
//! | `tcp://` | `tcp://127.0.0.1:5760` | not available in this build |
//! | `serial://` | `serial:///dev/ttyUSB0:57600` | not available in this build |

pub mod sim;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::SimConfig;
use crate::error::{GroundControlError, Result};
use crate::mission::{MissionPlan, MissionProgress};
use crate::telemetry::{FlightMode, Health, Position, VelocityBody};

/// Why the vehicle did not accept a command
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("command denied")]
    Denied,
    #[error("no response from vehicle")]
    Timeout,
    #[error("vehicle busy")]
    Busy,
    #[error("no system connected")]
    NoSystem,
    #[error("command not supported")]
    Unsupported,
    #[error("vehicle not armed")]
    NotArmed,
    #[error("no offboard setpoint sent before start")]
    NoSetpointSet,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("{0}")]
    Failed(String),
}

/// Result of a vehicle command
pub type LinkResult<T = ()> = std::result::Result<T, LinkError>;

/// Called on every flight mode update
pub type FlightModeCallback = Box<dyn Fn(FlightMode) + Send + Sync>;

/// Called on every position update
pub type PositionCallback = Box<dyn Fn(Position) + Send + Sync>;

/// Called on every mission progress update
pub type MissionProgressCallback = Box<dyn Fn(MissionProgress) + Send + Sync>;

/// Commands, queries and subscriptions offered by a connected vehicle
///
/// Subscription callbacks fire asynchronously on a thread owned by the
/// implementation. A new subscription replaces the previous one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleLink: Send + Sync {
    async fn arm(&self) -> LinkResult;

    async fn takeoff(&self) -> LinkResult;

    async fn land(&self) -> LinkResult;

    async fn return_to_launch(&self) -> LinkResult;

    async fn set_takeoff_altitude(&self, altitude_m: f32) -> LinkResult;

    async fn offboard_start(&self) -> LinkResult;

    async fn offboard_stop(&self) -> LinkResult;

    async fn set_velocity_body(&self, setpoint: VelocityBody) -> LinkResult;

    fn subscribe_flight_mode(&self, callback: FlightModeCallback);

    fn subscribe_position(&self, callback: PositionCallback);

    fn health(&self) -> Health;

    fn health_all_ok(&self) -> bool {
        self.health().all_ok()
    }

    fn armed(&self) -> bool;

    async fn upload_mission(&self, plan: MissionPlan) -> LinkResult;

    async fn download_mission(&self) -> LinkResult<MissionPlan>;

    async fn start_mission(&self) -> LinkResult;

    async fn pause_mission(&self) -> LinkResult;

    fn subscribe_mission_progress(&self, callback: MissionProgressCallback);
}

/// Parsed connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUrl {
    Simulated,
    UdpIn { host: String, port: u16 },
    UdpOut { host: String, port: u16 },
    Tcp { host: String, port: u16 },
    Serial { path: String, baud_rate: Option<u32> },
}

impl ConnectionUrl {
    /// Parse a connection URL
    ///
    /// # Errors
    ///
    /// Returns `Connection` error for an unknown scheme or malformed address
    ///
    /// # Examples
    ///
    /// ```
    /// use ground_control::link::ConnectionUrl;
    ///
    /// let url = ConnectionUrl::parse("udpin://0.0.0.0:14550")?;
    /// assert_eq!(url, ConnectionUrl::UdpIn { host: "0.0.0.0".to_string(), port: 14550 });
    /// # Ok::<(), ground_control::error::GroundControlError>(())
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| {
            GroundControlError::Connection(format!("Missing scheme in connection URL: {}", url))
        })?;

        match scheme {
            "sim" => Ok(Self::Simulated),
            "udpin" => {
                let (host, port) = parse_host_port(url, rest)?;
                Ok(Self::UdpIn { host, port })
            }
            "udpout" | "udp" => {
                let (host, port) = parse_host_port(url, rest)?;
                Ok(Self::UdpOut { host, port })
            }
            "tcp" | "tcpout" => {
                let (host, port) = parse_host_port(url, rest)?;
                Ok(Self::Tcp { host, port })
            }
            "serial" => {
                if rest.is_empty() {
                    return Err(GroundControlError::Connection(format!(
                        "Missing device path in connection URL: {}",
                        url
                    )));
                }
                match rest.rsplit_once(':') {
                    Some((path, baud)) => {
                        let baud_rate = baud.parse().map_err(|_| {
                            GroundControlError::Connection(format!(
                                "Invalid baud rate in connection URL: {}",
                                url
                            ))
                        })?;
                        Ok(Self::Serial {
                            path: path.to_string(),
                            baud_rate: Some(baud_rate),
                        })
                    }
                    None => Ok(Self::Serial {
                        path: rest.to_string(),
                        baud_rate: None,
                    }),
                }
            }
            other => Err(GroundControlError::Connection(format!(
                "Unsupported connection scheme '{}' in {}",
                other, url
            ))),
        }
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => write!(f, "sim://"),
            Self::UdpIn { host, port } => write!(f, "udpin://{}:{}", host, port),
            Self::UdpOut { host, port } => write!(f, "udpout://{}:{}", host, port),
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Serial { path, baud_rate: Some(baud) } => write!(f, "serial://{}:{}", path, baud),
            Self::Serial { path, baud_rate: None } => write!(f, "serial://{}", path),
        }
    }
}

fn parse_host_port(url: &str, rest: &str) -> Result<(String, u16)> {
    let invalid = || {
        GroundControlError::Connection(format!("Expected host:port in connection URL: {}", url))
    };

    let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Open a link to the vehicle at `url`
///
/// Waits up to `discovery_timeout` for exactly one system to appear.
///
/// # Errors
///
/// Returns `Connection` error if the URL is invalid, the transport is not
/// available in this build or no system is discovered in time
pub async fn connect(
    url: &str,
    discovery_timeout: Duration,
    sim: &SimConfig,
) -> Result<Box<dyn VehicleLink>> {
    let parsed = ConnectionUrl::parse(url)?;
    info!("Connecting to vehicle at {}", parsed);

    match parsed {
        ConnectionUrl::Simulated => {
            let vehicle = sim::SimulatedVehicle::start(sim.clone())?;
            vehicle.wait_for_discovery(discovery_timeout).await?;
            Ok(Box::new(vehicle))
        }
        other => Err(GroundControlError::Connection(format!(
            "No transport for {} in this build (use sim://)",
            other
        ))),
    }
}
