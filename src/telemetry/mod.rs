//! # Telemetry Module
//!
//! Latest known vehicle state, fed by link subscription callbacks.
//!
//! This module handles:
//! - Caching the current flight mode and position
//! - Logging flight mode changes (only on change)
//! - Logging the position at most once per 2-second window
//! - Waking waiters on every update through `watch` receivers
//!
//! The link delivers callbacks on its own thread. Each update replaces the
//! whole cached value, readers take a copy and never hold a lock.

pub mod types;

pub use types::{FlightMode, Health, Position, VelocityBody};

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::link::VehicleLink;
use crate::log_sink::LogSink;

/// Minimum spacing between two position log records
pub const POSITION_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Cache of the most recent telemetry
pub struct TelemetryCache {
    flight_mode: watch::Sender<FlightMode>,
    position: watch::Sender<Position>,
    last_position_log: Mutex<Option<Instant>>,
    log: LogSink,
}

impl std::fmt::Debug for TelemetryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCache")
            .field("flight_mode", &self.current_flight_mode())
            .field("position", &self.current_position())
            .finish_non_exhaustive()
    }
}

impl TelemetryCache {
    pub fn new(log: LogSink) -> Self {
        let (flight_mode, _) = watch::channel(FlightMode::Unknown);
        let (position, _) = watch::channel(Position::default());
        Self {
            flight_mode,
            position,
            last_position_log: Mutex::new(None),
            log,
        }
    }

    /// Register this cache's callbacks with the link
    pub fn attach(self: &Arc<Self>, link: &dyn VehicleLink) {
        let cache = Arc::clone(self);
        link.subscribe_flight_mode(Box::new(move |mode| cache.on_flight_mode(mode)));

        let cache = Arc::clone(self);
        link.subscribe_position(Box::new(move |pos| cache.on_position(pos)));
    }

    pub fn current_flight_mode(&self) -> FlightMode {
        *self.flight_mode.borrow()
    }

    pub fn current_position(&self) -> Position {
        *self.position.borrow()
    }

    /// Receiver notified on every flight mode delivery
    pub fn subscribe_flight_mode(&self) -> watch::Receiver<FlightMode> {
        self.flight_mode.subscribe()
    }

    /// Receiver notified on every position delivery
    pub fn subscribe_position(&self) -> watch::Receiver<Position> {
        self.position.subscribe()
    }

    /// Flight mode callback
    ///
    /// Logs `Flight Mode Change from <old> to <new>` only when the mode
    /// differs from the previously cached one.
    pub fn on_flight_mode(&self, mode: FlightMode) {
        let previous = self.flight_mode.send_replace(mode);
        if previous != mode {
            self.log
                .info(format!("Flight Mode Change from {} to {}", previous, mode));
        }
    }

    /// Position callback
    pub fn on_position(&self, pos: Position) {
        self.on_position_at(pos, Instant::now());
    }

    /// Position callback with an explicit arrival time
    ///
    /// The cached value is always replaced. A log record is written for the
    /// first delivery and then whenever [`POSITION_LOG_INTERVAL`] has passed
    /// since the last one.
    pub fn on_position_at(&self, pos: Position, now: Instant) {
        self.position.send_replace(pos);

        let mut last = match self.last_position_log.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due =
            last.map_or(true, |at| now.saturating_duration_since(at) >= POSITION_LOG_INTERVAL);
        if due {
            *last = Some(now);
            drop(last);
            self.log.push(format!(
                "Drone Position: Lat: {:.6}, Lon: {:.6}, Alt: {:.6}m",
                pos.latitude_deg, pos.longitude_deg, pos.relative_altitude_m
            ));
        }
    }
}
