//! # Phase Sequencer Module
//!
//! Flies the scripted sequence:
//!
//! ```text
//! Idle → HealthCheck → Arming → TakingOff → Holding → OffboardActive → Landing → Landed
//!                                                                    ↘ ReturningToLaunch
//! ```
//!
//! Each phase issues its command through the [`VehicleLink`] and then waits
//! for a convergence condition: cached altitude for takeoff, link queries
//! for health and disarm.
//!
//! ## Failure Handling
//!
//! | Command | On rejection |
//! |---------|--------------|
//! | arm, takeoff | run ends in `Failed` |
//! | offboard start/stop, land, RTL, mission | logged, run continues |
//!
//! Every wait observes the cancellation token and an optional deadline from
//! [`TimingConfig`]. Without a deadline a wait lasts until its condition
//! holds or the token is cancelled.

pub mod phase;

pub use phase::FlightPhase;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, FlightConfig, TerminalAction, TimingConfig};
use crate::error::{GroundControlError, Result};
use crate::link::VehicleLink;
use crate::log_sink::LogSink;
use crate::mission::{MissionControl, MissionPlan};
use crate::telemetry::{TelemetryCache, VelocityBody};

/// Drives one vehicle through the scripted flight
pub struct PhaseSequencer {
    link: Arc<dyn VehicleLink>,
    telemetry: Arc<TelemetryCache>,
    log: LogSink,
    flight: FlightConfig,
    timing: TimingConfig,
    mission: Option<MissionPlan>,
    cancel: CancellationToken,
    phase: FlightPhase,
}

impl std::fmt::Debug for PhaseSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSequencer")
            .field("phase", &self.phase)
            .field("flight", &self.flight)
            .finish_non_exhaustive()
    }
}

impl PhaseSequencer {
    /// Create a sequencer in phase `Idle`
    ///
    /// The telemetry cache must already be attached to `link`.
    pub fn new(
        link: Arc<dyn VehicleLink>,
        telemetry: Arc<TelemetryCache>,
        log: LogSink,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        let mission = config
            .mission
            .upload
            .then(|| MissionPlan::from_waypoints(&config.mission.waypoints));

        Self {
            link,
            telemetry,
            log,
            flight: config.flight.clone(),
            timing: config.timing.clone(),
            mission,
            cancel,
            phase: FlightPhase::Idle,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    /// Fly the whole sequence
    ///
    /// # Errors
    ///
    /// - `CommandRejected` if arm or takeoff is rejected
    /// - `Cancelled` if the token is cancelled during a wait
    /// - `Timeout` if a configured deadline passes
    ///
    /// On error the phase is `Failed`.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.fly().await;
        if let Err(e) = &result {
            self.log.error(format!("Flight aborted in phase {}: {}", self.phase, e));
            self.enter(FlightPhase::Failed);
        }
        result
    }

    async fn fly(&mut self) -> Result<()> {
        self.check_health().await?;

        if let Some(plan) = self.mission.clone() {
            self.prepare_mission(plan).await;
        }

        self.takeoff(self.flight.takeoff_altitude_m).await?;
        self.hold().await?;
        self.offboard_maneuver().await?;

        match self.flight.terminal {
            TerminalAction::Land => self.land().await,
            TerminalAction::ReturnToLaunch => {
                self.return_to_launch().await;
                Ok(())
            }
        }
    }

    fn enter(&mut self, next: FlightPhase) {
        if !self.phase.can_advance_to(next) {
            warn!("Unexpected phase transition {} -> {}", self.phase, next);
        }
        debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    /// Run `fut` until it completes, the token is cancelled or `limit` passes
    async fn bounded<F, T>(&self, limit: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let phase = self.phase;
        let limited = async move {
            match limit {
                Some(after) => timeout(after, fut)
                    .await
                    .map_err(|_| GroundControlError::Timeout { phase, after }),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GroundControlError::Cancelled { phase }),
            result = limited => result,
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        self.bounded(None, sleep(duration)).await
    }

    /// Wait until the vehicle reports healthy
    ///
    /// Calibration problems are logged once up front. Each unhealthy poll
    /// logs `Vehicle not ready` plus the missing position estimates.
    pub async fn check_health(&mut self) -> Result<()> {
        self.enter(FlightPhase::HealthCheck);
        self.log.info("Vehicle Health checking...");

        let health = self.link.health();
        if !health.is_gyrometer_calibration_ok {
            self.log.warn("  - Gyro requires calibration.");
        }
        if !health.is_accelerometer_calibration_ok {
            self.log.warn("  - Accelerometer requires calibration.");
        }
        if !health.is_magnetometer_calibration_ok {
            self.log.warn("  - Magnetometer (compass) requires calibration.");
        }

        let link = Arc::clone(&self.link);
        let log = self.log.clone();
        let poll = self.timing.health_poll();
        self.bounded(self.timing.health_timeout(), async move {
            while !link.health_all_ok() {
                let health = link.health();
                log.warn("Vehicle not ready");
                if !health.is_global_position_ok {
                    log.warn("  - Waiting for GPS fix");
                }
                if !health.is_local_position_ok {
                    log.warn("  - Waiting for local position");
                }
                if !health.is_home_position_ok {
                    log.warn("  - Waiting for home position");
                }
                if !health.is_armable {
                    log.warn("  - Vehicle not armable");
                }
                sleep(poll).await;
            }
        })
        .await?;

        self.log.info("Vehicle is ready.");
        Ok(())
    }

    /// Arm, take off and wait until the cached altitude reaches `altitude_m`
    ///
    /// The comparison is a plain `>=` with no tolerance band.
    ///
    /// # Errors
    ///
    /// Returns `CommandRejected` if arm or takeoff is rejected; nothing after
    /// the rejected command is sent.
    pub async fn takeoff(&mut self, altitude_m: f32) -> Result<()> {
        self.enter(FlightPhase::Arming);
        self.log.info("Arming ...");
        if let Err(e) = self.link.arm().await {
            self.log.error(format!("Arming failed! ({})", e));
            return Err(GroundControlError::CommandRejected { command: "arm", source: e });
        }

        self.enter(FlightPhase::TakingOff);
        if let Err(e) = self.link.set_takeoff_altitude(altitude_m).await {
            self.log.warn(format!("Setting takeoff altitude failed ({})", e));
        }

        self.log.info("Takeoff...");
        if let Err(e) = self.link.takeoff().await {
            self.log.error(format!("Takeoff failed! ({})", e));
            return Err(GroundControlError::CommandRejected { command: "takeoff", source: e });
        }

        self.log.info(format!("Wait Takeoff until altitude = {:.6}", altitude_m));
        let mut position = self.telemetry.subscribe_position();
        self.bounded(self.timing.takeoff_timeout(), async move {
            position
                .wait_for(|pos| pos.relative_altitude_m >= altitude_m)
                .await
                .map(|_| ())
                .map_err(|_| GroundControlError::Connection("Telemetry stream closed".to_string()))
        })
        .await??;

        self.log.info("Takeoff successful.");
        Ok(())
    }

    /// Hover for the configured hold time
    pub async fn hold(&mut self) -> Result<()> {
        self.enter(FlightPhase::Holding);
        let hold = Duration::from_secs(self.flight.hold_s);
        self.log.info(format!("Holding for {}s", hold.as_secs()));
        self.pause(hold).await
    }

    /// Prime a zero setpoint, start offboard control and command the yaw turn
    ///
    /// Rejections are logged and the sequence continues.
    pub async fn start_offboard_mode(&mut self) {
        self.enter(FlightPhase::OffboardActive);
        self.log.info("Start Offboard Mode");

        // The autopilot refuses offboard start until a setpoint has been streamed.
        if let Err(e) = self.link.set_velocity_body(VelocityBody::zero()).await {
            self.log.warn(format!("Offboard setpoint rejected ({})", e));
        }

        if let Err(e) = self.link.offboard_start().await {
            self.log.warn(format!("Offboard::start() failed: {}", e));
        }

        let turn = VelocityBody::yaw_rate(self.flight.yaw_rate_deg_s);
        if let Err(e) = self.link.set_velocity_body(turn).await {
            self.log.warn(format!("Offboard setpoint rejected ({})", e));
        }
    }

    /// Leave offboard control; a rejection is logged only
    pub async fn stop_offboard_mode(&mut self) {
        if let Err(e) = self.link.offboard_stop().await {
            self.log.warn(format!("Offboard::stop() failed: {}", e));
        }
        self.log.info("Stop Offboard Mode");
    }

    /// Offboard turn for the configured duration, then stop and settle
    ///
    /// Offboard is stopped even if the turn is cancelled or times out.
    pub async fn offboard_maneuver(&mut self) -> Result<()> {
        self.start_offboard_mode().await;
        let turning = self.pause(Duration::from_secs(self.flight.offboard_duration_s)).await;
        self.stop_offboard_mode().await;
        turning?;
        self.pause(Duration::from_secs(self.flight.settle_s)).await
    }

    /// Land and wait until the vehicle disarms
    ///
    /// A rejected land command is logged; the disarm wait still runs.
    pub async fn land(&mut self) -> Result<()> {
        self.enter(FlightPhase::Landing);
        self.log.info("Landing...");
        if let Err(e) = self.link.land().await {
            self.log.warn(format!("Landing failed! ({})", e));
        }

        let link = Arc::clone(&self.link);
        let poll = self.timing.disarm_poll();
        self.bounded(self.timing.landing_timeout(), async move {
            while link.armed() {
                sleep(poll).await;
            }
        })
        .await?;

        self.log.info("Disarmed.");
        self.enter(FlightPhase::Landed);
        Ok(())
    }

    /// Command return-to-launch without waiting for it to complete
    pub async fn return_to_launch(&mut self) {
        self.enter(FlightPhase::ReturningToLaunch);
        self.log.info("Return to Launch...");
        if let Err(e) = self.link.return_to_launch().await {
            self.log.warn(format!("RTL failed! ({})", e));
        }
    }

    /// Upload `plan` and read it back; failures are logged only
    pub async fn prepare_mission(&mut self, plan: MissionPlan) {
        let mission = MissionControl::new(self.link.as_ref(), &self.log);
        if mission.upload_mission(plan).await {
            mission.download_mission().await;
        }
    }
}

#[cfg(test)]
mod tests;
