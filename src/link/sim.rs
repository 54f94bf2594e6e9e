//! # Simulated Vehicle
//!
//! In-process kinematic vehicle implementing [`VehicleLink`].
//!
//! A tokio task advances the model every `tick_ms` and publishes flight mode
//! and position to the subscribers from that task, just like a real link
//! delivers telemetry from its own receive thread.
//!
//! ## Model
//!
//! - Health flags come up after `health_delay_ticks`
//! - Takeoff climbs at `climb_rate_m_s` to the takeoff altitude, then holds
//! - Land descends at `descent_rate_m_s` and disarms on touchdown
//! - Return-to-launch flies home at `cruise_speed_m_s`, then lands
//! - Offboard integrates the body-frame velocity setpoint
//! - Missions fly waypoint to waypoint, then hold

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

use super::{
    FlightModeCallback, LinkError, LinkResult, MissionProgressCallback, PositionCallback,
    VehicleLink,
};
use crate::config::SimConfig;
use crate::error::{GroundControlError, Result};
use crate::mission::{MissionPlan, MissionProgress};
use crate::telemetry::{FlightMode, Health, Position, VelocityBody};

/// Meters per degree of latitude
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Horizontal distance at which a target counts as reached
const ARRIVAL_RADIUS_M: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Climbing,
    Descending,
    Returning,
    Offboard,
    Mission,
}

#[derive(Debug)]
struct SimState {
    tick: u64,
    armed: bool,
    mode: FlightMode,
    phase: Phase,
    position: Position,
    heading_deg: f32,
    takeoff_altitude_m: f32,
    setpoint: Option<VelocityBody>,
    mission: MissionPlan,
    mission_index: usize,
}

#[derive(Default)]
struct Subscribers {
    flight_mode: Option<Arc<dyn Fn(FlightMode) + Send + Sync>>,
    position: Option<Arc<dyn Fn(Position) + Send + Sync>>,
    mission_progress: Option<Arc<dyn Fn(MissionProgress) + Send + Sync>>,
}

struct Shared {
    config: SimConfig,
    state: Mutex<SimState>,
    subscribers: Mutex<Subscribers>,
    discovered: watch::Sender<bool>,
}

/// Output of one model step, published after the state lock is released
struct Update {
    mode: FlightMode,
    position: Position,
    progress: Option<MissionProgress>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Move `position` up to `step_m` meters toward (lat, lon); true once arrived
fn fly_toward(position: &mut Position, lat: f64, lon: f64, step_m: f64) -> bool {
    let meters_per_deg_lon = METERS_PER_DEG_LAT * position.latitude_deg.to_radians().cos();
    let north = (lat - position.latitude_deg) * METERS_PER_DEG_LAT;
    let east = (lon - position.longitude_deg) * meters_per_deg_lon;
    let distance = north.hypot(east);

    if distance <= step_m.max(ARRIVAL_RADIUS_M) {
        position.latitude_deg = lat;
        position.longitude_deg = lon;
        return true;
    }

    let scale = step_m / distance;
    position.latitude_deg += north * scale / METERS_PER_DEG_LAT;
    position.longitude_deg += east * scale / meters_per_deg_lon;
    false
}

impl Shared {
    fn health_at(&self, tick: u64) -> Health {
        if tick >= u64::from(self.config.health_delay_ticks) {
            Health::all_healthy()
        } else {
            // Calibration is done at boot; position estimates arrive with the GPS fix.
            Health {
                is_gyrometer_calibration_ok: true,
                is_accelerometer_calibration_ok: true,
                is_magnetometer_calibration_ok: true,
                ..Health::default()
            }
        }
    }

    fn set_altitude(&self, state: &mut SimState, relative_altitude_m: f32) {
        state.position.relative_altitude_m = relative_altitude_m;
        state.position.absolute_altitude_m =
            self.config.home_absolute_altitude_m + relative_altitude_m;
    }

    fn touch_down(&self, state: &mut SimState) {
        self.set_altitude(state, 0.0);
        state.armed = false;
        state.mode = FlightMode::Ready;
        state.phase = Phase::Idle;
        info!("Simulated vehicle landed and disarmed");
    }

    /// Advance the model by one tick
    fn step(&self) -> Update {
        let mut state = lock(&self.state);
        let dt = self.config.tick_ms as f32 / 1000.0;
        let mut progress = None;

        state.tick += 1;

        match state.phase {
            Phase::Idle => {}
            Phase::Climbing => {
                let target = state.takeoff_altitude_m;
                let climb = self.config.climb_rate_m_s * dt;
                let alt = (state.position.relative_altitude_m + climb).min(target);
                self.set_altitude(&mut state, alt);
                if alt >= target {
                    state.mode = FlightMode::Hold;
                    state.phase = Phase::Idle;
                }
            }
            Phase::Descending => {
                let alt = state.position.relative_altitude_m - self.config.descent_rate_m_s * dt;
                if alt <= 0.0 {
                    self.touch_down(&mut state);
                } else {
                    self.set_altitude(&mut state, alt);
                }
            }
            Phase::Returning => {
                let step = f64::from(self.config.cruise_speed_m_s * dt);
                let home_lat = self.config.home_latitude_deg;
                let home_lon = self.config.home_longitude_deg;
                if fly_toward(&mut state.position, home_lat, home_lon, step) {
                    // Mode stays ReturnToLaunch while landing at home.
                    state.phase = Phase::Descending;
                }
            }
            Phase::Offboard => {
                let setpoint = state.setpoint.unwrap_or_default();
                state.heading_deg =
                    (state.heading_deg + setpoint.yawspeed_deg_s * dt).rem_euclid(360.0);

                let heading = f64::from(state.heading_deg).to_radians();
                let forward = f64::from(setpoint.forward_m_s * dt);
                let right = f64::from(setpoint.right_m_s * dt);
                let north = forward * heading.cos() - right * heading.sin();
                let east = forward * heading.sin() + right * heading.cos();
                let meters_per_deg_lon =
                    METERS_PER_DEG_LAT * state.position.latitude_deg.to_radians().cos();
                state.position.latitude_deg += north / METERS_PER_DEG_LAT;
                state.position.longitude_deg += east / meters_per_deg_lon;

                let alt = (state.position.relative_altitude_m - setpoint.down_m_s * dt).max(0.0);
                self.set_altitude(&mut state, alt);
            }
            Phase::Mission => {
                let index = state.mission_index;
                let total = state.mission.len();
                match state.mission.mission_items.get(index).cloned() {
                    Some(item) => {
                        let step = f64::from(item.speed_m_s.max(0.1) * dt);
                        let reached = fly_toward(
                            &mut state.position,
                            item.latitude_deg,
                            item.longitude_deg,
                            step,
                        );

                        let climb = self.config.climb_rate_m_s * dt;
                        let alt = state.position.relative_altitude_m;
                        let alt = if alt < item.relative_altitude_m {
                            (alt + climb).min(item.relative_altitude_m)
                        } else {
                            (alt - climb).max(item.relative_altitude_m)
                        };
                        self.set_altitude(&mut state, alt);

                        if reached && alt == item.relative_altitude_m {
                            state.mission_index += 1;
                            progress = Some(MissionProgress {
                                current: state.mission_index,
                                total,
                            });
                        }
                    }
                    None => {
                        state.mode = FlightMode::Hold;
                        state.phase = Phase::Idle;
                    }
                }
            }
        }

        Update {
            mode: state.mode,
            position: state.position,
            progress,
        }
    }

    fn publish(&self, update: Update) {
        let (flight_mode, position, mission_progress) = {
            let subscribers = lock(&self.subscribers);
            (
                subscribers.flight_mode.clone(),
                subscribers.position.clone(),
                subscribers.mission_progress.clone(),
            )
        };

        if let Some(callback) = flight_mode {
            callback(update.mode);
        }
        if let Some(callback) = position {
            callback(update.position);
        }
        if let (Some(callback), Some(progress)) = (mission_progress, update.progress) {
            callback(progress);
        }
    }
}

/// Simulated vehicle handle
///
/// The model task stops when the handle is dropped.
pub struct SimulatedVehicle {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SimulatedVehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedVehicle")
            .field("state", &*lock(&self.shared.state))
            .finish_non_exhaustive()
    }
}

impl Drop for SimulatedVehicle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SimulatedVehicle {
    /// Start the model task
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Connection` error if `tick_ms` is zero
    pub fn start(config: SimConfig) -> Result<Self> {
        if config.tick_ms == 0 {
            return Err(GroundControlError::Connection(
                "Simulated vehicle tick_ms must be greater than 0".to_string(),
            ));
        }

        let position = Position {
            latitude_deg: config.home_latitude_deg,
            longitude_deg: config.home_longitude_deg,
            absolute_altitude_m: config.home_absolute_altitude_m,
            relative_altitude_m: 0.0,
        };
        let (discovered, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(SimState {
                tick: 0,
                armed: false,
                mode: FlightMode::Ready,
                phase: Phase::Idle,
                position,
                heading_deg: 0.0,
                takeoff_altitude_m: 2.5,
                setpoint: None,
                mission: MissionPlan::default(),
                mission_index: 0,
            }),
            subscribers: Mutex::new(Subscribers::default()),
            discovered,
        });

        let task = tokio::spawn(Self::run(Arc::clone(&shared)));
        Ok(Self { shared, task })
    }

    async fn run(shared: Arc<Shared>) {
        let mut ticker = interval(Duration::from_millis(shared.config.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let update = shared.step();
            shared.discovered.send_if_modified(|found| !std::mem::replace(found, true));
            shared.publish(update);
        }
    }

    /// Wait until the vehicle has published its first telemetry
    ///
    /// # Errors
    ///
    /// Returns `Connection` error if nothing arrives within `limit`
    pub async fn wait_for_discovery(&self, limit: Duration) -> Result<()> {
        let mut rx = self.shared.discovered.subscribe();
        let found = timeout(limit, rx.wait_for(|found| *found))
            .await
            .map(|seen| seen.map(|_| ()));
        match found {
            Ok(Ok(())) => {
                info!("Discovered simulated vehicle");
                Ok(())
            }
            Ok(Err(_)) => Err(GroundControlError::Connection(
                "Simulated vehicle stopped".to_string(),
            )),
            Err(_) => Err(GroundControlError::Connection(format!(
                "No system discovered within {:?}",
                limit
            ))),
        }
    }

    /// Current flight mode as seen by the model
    pub fn flight_mode(&self) -> FlightMode {
        lock(&self.shared.state).mode
    }

    /// Current position as seen by the model
    pub fn position(&self) -> Position {
        lock(&self.shared.state).position
    }

    /// Current heading in degrees, clockwise from north
    pub fn heading_deg(&self) -> f32 {
        lock(&self.shared.state).heading_deg
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.shared.state)
    }
}

#[async_trait]
impl VehicleLink for SimulatedVehicle {
    async fn arm(&self) -> LinkResult {
        let mut state = self.state();
        if !self.shared.health_at(state.tick).all_ok() {
            return Err(LinkError::Denied);
        }
        if !state.armed {
            state.armed = true;
            state.mode = FlightMode::Hold;
            debug!("Simulated vehicle armed");
        }
        Ok(())
    }

    async fn takeoff(&self) -> LinkResult {
        let mut state = self.state();
        if !state.armed {
            return Err(LinkError::NotArmed);
        }
        state.mode = FlightMode::Takeoff;
        state.phase = Phase::Climbing;
        Ok(())
    }

    async fn land(&self) -> LinkResult {
        let mut state = self.state();
        if !state.armed {
            return Err(LinkError::NotArmed);
        }
        state.mode = FlightMode::Land;
        state.phase = Phase::Descending;
        Ok(())
    }

    async fn return_to_launch(&self) -> LinkResult {
        let mut state = self.state();
        if !state.armed {
            return Err(LinkError::NotArmed);
        }
        state.mode = FlightMode::ReturnToLaunch;
        state.phase = Phase::Returning;
        Ok(())
    }

    async fn set_takeoff_altitude(&self, altitude_m: f32) -> LinkResult {
        if !(altitude_m > 0.0) {
            return Err(LinkError::Denied);
        }
        self.state().takeoff_altitude_m = altitude_m;
        Ok(())
    }

    async fn offboard_start(&self) -> LinkResult {
        let mut state = self.state();
        if !state.armed {
            return Err(LinkError::NotArmed);
        }
        if state.setpoint.is_none() {
            return Err(LinkError::NoSetpointSet);
        }
        state.mode = FlightMode::Offboard;
        state.phase = Phase::Offboard;
        Ok(())
    }

    async fn offboard_stop(&self) -> LinkResult {
        let mut state = self.state();
        if state.phase != Phase::Offboard {
            return Err(LinkError::Failed("offboard not active".to_string()));
        }
        state.mode = FlightMode::Hold;
        state.phase = Phase::Idle;
        state.setpoint = None;
        Ok(())
    }

    async fn set_velocity_body(&self, setpoint: VelocityBody) -> LinkResult {
        self.state().setpoint = Some(setpoint);
        Ok(())
    }

    fn subscribe_flight_mode(&self, callback: FlightModeCallback) {
        lock(&self.shared.subscribers).flight_mode = Some(Arc::from(callback));
    }

    fn subscribe_position(&self, callback: PositionCallback) {
        lock(&self.shared.subscribers).position = Some(Arc::from(callback));
    }

    fn health(&self) -> Health {
        let tick = self.state().tick;
        self.shared.health_at(tick)
    }

    fn armed(&self) -> bool {
        self.state().armed
    }

    async fn upload_mission(&self, plan: MissionPlan) -> LinkResult {
        let mut state = self.state();
        if state.phase == Phase::Mission {
            return Err(LinkError::Busy);
        }
        state.mission = plan;
        state.mission_index = 0;
        Ok(())
    }

    async fn download_mission(&self) -> LinkResult<MissionPlan> {
        Ok(self.state().mission.clone())
    }

    async fn start_mission(&self) -> LinkResult {
        let mut state = self.state();
        if state.mission.is_empty() {
            return Err(LinkError::Failed("no mission uploaded".to_string()));
        }
        if !state.armed {
            return Err(LinkError::NotArmed);
        }
        state.mode = FlightMode::Mission;
        state.phase = Phase::Mission;
        Ok(())
    }

    async fn pause_mission(&self) -> LinkResult {
        let mut state = self.state();
        if state.phase != Phase::Mission {
            return Err(LinkError::Failed("mission not running".to_string()));
        }
        state.mode = FlightMode::Hold;
        state.phase = Phase::Idle;
        Ok(())
    }

    fn subscribe_mission_progress(&self, callback: MissionProgressCallback) {
        lock(&self.shared.subscribers).mission_progress = Some(Arc::from(callback));
    }
}
