use super::*;
use crate::config::SimConfig;
use crate::link::sim::SimulatedVehicle;
use crate::link::{
    FlightModeCallback, LinkError, LinkResult, MissionProgressCallback, MockVehicleLink,
    PositionCallback,
};
use crate::log_sink::destination::mocks::{FixedClock, MemoryDestination};
use crate::telemetry::{FlightMode, Health, Position};
use async_trait::async_trait;
use mockall::Sequence;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// Hand-driven link: scripted command results and an altitude feed
struct ScriptedLink {
    calls: Mutex<Vec<&'static str>>,
    arm_result: LinkResult,
    takeoff_result: LinkResult,
    land_result: LinkResult,
    unhealthy_polls: AtomicU32,
    armed_polls: AtomicU32,
    climb_per_tick: f32,
    max_ticks: u32,
    ticks: Arc<AtomicU32>,
    position: Mutex<Option<Arc<dyn Fn(Position) + Send + Sync>>>,
}

impl Default for ScriptedLink {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            arm_result: Ok(()),
            takeoff_result: Ok(()),
            land_result: Ok(()),
            unhealthy_polls: AtomicU32::new(0),
            armed_polls: AtomicU32::new(0),
            climb_per_tick: 1.0,
            max_ticks: 20,
            ticks: Arc::new(AtomicU32::new(0)),
            position: Mutex::new(None),
        }
    }
}

impl ScriptedLink {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Feed altitude `tick * climb_per_tick` every 100 ms
    fn start_climb(&self) {
        let Some(callback) = self.position.lock().unwrap().clone() else {
            return;
        };
        let ticks = Arc::clone(&self.ticks);
        let climb = self.climb_per_tick;
        let max = self.max_ticks;
        tokio::spawn(async move {
            for tick in 1..=max {
                sleep(Duration::from_millis(100)).await;
                ticks.store(tick, Ordering::SeqCst);
                callback(Position {
                    relative_altitude_m: tick as f32 * climb,
                    ..Position::default()
                });
            }
        });
    }
}

#[async_trait]
impl VehicleLink for ScriptedLink {
    async fn arm(&self) -> LinkResult {
        self.record("arm");
        self.arm_result.clone()
    }

    async fn takeoff(&self) -> LinkResult {
        self.record("takeoff");
        if self.takeoff_result.is_ok() {
            self.start_climb();
        }
        self.takeoff_result.clone()
    }

    async fn land(&self) -> LinkResult {
        self.record("land");
        self.land_result.clone()
    }

    async fn return_to_launch(&self) -> LinkResult {
        self.record("return_to_launch");
        Ok(())
    }

    async fn set_takeoff_altitude(&self, _altitude_m: f32) -> LinkResult {
        self.record("set_takeoff_altitude");
        Ok(())
    }

    async fn offboard_start(&self) -> LinkResult {
        self.record("offboard_start");
        Ok(())
    }

    async fn offboard_stop(&self) -> LinkResult {
        self.record("offboard_stop");
        Ok(())
    }

    async fn set_velocity_body(&self, _setpoint: VelocityBody) -> LinkResult {
        self.record("set_velocity_body");
        Ok(())
    }

    fn subscribe_flight_mode(&self, _callback: FlightModeCallback) {}

    fn subscribe_position(&self, callback: PositionCallback) {
        *self.position.lock().unwrap() = Some(Arc::from(callback));
    }

    fn health(&self) -> Health {
        if self.unhealthy_polls.load(Ordering::SeqCst) > 0 {
            Health {
                is_gyrometer_calibration_ok: true,
                is_accelerometer_calibration_ok: true,
                is_magnetometer_calibration_ok: false,
                ..Health::default()
            }
        } else {
            Health::all_healthy()
        }
    }

    fn health_all_ok(&self) -> bool {
        self.unhealthy_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn armed(&self) -> bool {
        self.armed_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn upload_mission(&self, _plan: MissionPlan) -> LinkResult {
        self.record("upload_mission");
        Ok(())
    }

    async fn download_mission(&self) -> LinkResult<MissionPlan> {
        self.record("download_mission");
        Ok(MissionPlan::default())
    }

    async fn start_mission(&self) -> LinkResult {
        Err(LinkError::Unsupported)
    }

    async fn pause_mission(&self) -> LinkResult {
        Err(LinkError::Unsupported)
    }

    fn subscribe_mission_progress(&self, _callback: MissionProgressCallback) {}
}

struct Harness {
    sequencer: PhaseSequencer,
    telemetry: Arc<TelemetryCache>,
    log: LogSink,
    dest: MemoryDestination,
}

impl Harness {
    fn new(link: Arc<dyn VehicleLink>, config: &Config, cancel: CancellationToken) -> Self {
        let dest = MemoryDestination::new();
        let clock = Arc::new(FixedClock::at(2024, 1, 1, 0, 0, 0));
        let log = LogSink::with_destination(dest.clone(), clock);
        let telemetry = Arc::new(TelemetryCache::new(log.clone()));
        let sequencer =
            PhaseSequencer::new(link, Arc::clone(&telemetry), log.clone(), config, cancel);
        Self {
            sequencer,
            telemetry,
            log,
            dest,
        }
    }

    /// Stop the log and return the message part of every line
    fn messages(&self) -> Vec<String> {
        self.log.shutdown();
        self.dest
            .get_lines()
            .into_iter()
            .map(|line| line.splitn(2, "] ").nth(1).unwrap_or_default().to_string())
            .collect()
    }
}

fn short_config() -> Config {
    let mut config = Config::default();
    config.flight.hold_s = 1;
    config.flight.offboard_duration_s = 2;
    config.flight.settle_s = 1;
    config.sim = SimConfig {
        health_delay_ticks: 5,
        ..SimConfig::default()
    };
    config
}

fn healthy_mock() -> MockVehicleLink {
    let mut link = MockVehicleLink::new();
    link.expect_health().returning(Health::all_healthy);
    link.expect_health_all_ok().returning(|| true);
    link
}

fn position_of(messages: &[String], needle: &str) -> usize {
    messages
        .iter()
        .position(|m| m.contains(needle))
        .unwrap_or_else(|| panic!("'{}' not logged in {:?}", needle, messages))
}

#[tokio::test(start_paused = true)]
async fn test_takeoff_converges_at_tick_ten() {
    let link = Arc::new(ScriptedLink::default());
    let harness_link: Arc<dyn VehicleLink> = link.clone();
    let mut h = Harness::new(harness_link, &short_config(), CancellationToken::new());
    h.telemetry.attach(link.as_ref());

    let start = Instant::now();
    h.sequencer.takeoff(10.0).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(link.ticks(), 10);
    assert!(elapsed >= Duration::from_millis(1000), "converged early after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1100), "converged late after {:?}", elapsed);
    assert_eq!(h.telemetry.current_position().relative_altitude_m, 10.0);
    assert_eq!(h.sequencer.phase(), FlightPhase::TakingOff);
    assert_eq!(link.calls(), vec!["arm", "set_takeoff_altitude", "takeoff"]);

    let messages = h.messages();
    let waiting = position_of(&messages, "Wait Takeoff until altitude = 10.000000");
    assert!(waiting < position_of(&messages, "Takeoff successful."));
}

#[tokio::test(start_paused = true)]
async fn test_takeoff_not_successful_below_target() {
    let link = Arc::new(ScriptedLink {
        max_ticks: 9,
        ..ScriptedLink::default()
    });
    let harness_link: Arc<dyn VehicleLink> = link.clone();
    let mut config = short_config();
    config.timing.takeoff_timeout_s = Some(5);
    let mut h = Harness::new(harness_link, &config, CancellationToken::new());
    h.telemetry.attach(link.as_ref());

    let result = h.sequencer.takeoff(10.0).await;
    assert!(matches!(
        result,
        Err(GroundControlError::Timeout { phase: FlightPhase::TakingOff, .. })
    ));
    assert_eq!(h.telemetry.current_position().relative_altitude_m, 9.0);
    assert!(!h.messages().iter().any(|m| m == "Takeoff successful."));
}

#[tokio::test(start_paused = true)]
async fn test_arm_failure_aborts_before_takeoff() {
    let mut link = healthy_mock();
    link.expect_arm().times(1).returning(|| Err(LinkError::Denied));
    link.expect_set_takeoff_altitude().never();
    link.expect_takeoff().never();
    link.expect_offboard_start().never();
    link.expect_land().never();
    link.expect_return_to_launch().never();

    let mut h = Harness::new(Arc::new(link), &short_config(), CancellationToken::new());
    let result = h.sequencer.run().await;

    match result {
        Err(GroundControlError::CommandRejected { command, source }) => {
            assert_eq!(command, "arm");
            assert_eq!(source, LinkError::Denied);
        }
        other => panic!("Expected CommandRejected, got: {:?}", other),
    }
    assert_eq!(h.sequencer.phase(), FlightPhase::Failed);

    let messages = h.messages();
    assert!(messages.iter().any(|m| m.contains("Arming failed!")));
    assert!(!messages.iter().any(|m| m.starts_with("Takeoff")));
}

#[tokio::test(start_paused = true)]
async fn test_takeoff_failure_aborts() {
    let mut link = healthy_mock();
    link.expect_arm().returning(|| Ok(()));
    link.expect_set_takeoff_altitude().returning(|_| Ok(()));
    link.expect_takeoff().times(1).returning(|| Err(LinkError::Timeout));
    link.expect_offboard_start().never();
    link.expect_set_velocity_body().never();

    let mut h = Harness::new(Arc::new(link), &short_config(), CancellationToken::new());
    let result = h.sequencer.run().await;

    assert!(matches!(
        result,
        Err(GroundControlError::CommandRejected { command: "takeoff", .. })
    ));
    assert_eq!(h.sequencer.phase(), FlightPhase::Failed);
    assert!(h.messages().iter().any(|m| m.contains("Takeoff failed!")));
}

#[tokio::test(start_paused = true)]
async fn test_offboard_start_failure_is_soft() {
    let mut link = MockVehicleLink::new();
    let mut seq = Sequence::new();
    link.expect_set_velocity_body()
        .withf(|sp| *sp == VelocityBody::zero())
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    link.expect_offboard_start()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(LinkError::Denied));
    link.expect_set_velocity_body()
        .withf(|sp| sp.yawspeed_deg_s == 60.0)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    link.expect_offboard_stop()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));

    let mut h = Harness::new(Arc::new(link), &short_config(), CancellationToken::new());
    h.sequencer.offboard_maneuver().await.unwrap();
    assert_eq!(h.sequencer.phase(), FlightPhase::OffboardActive);

    let messages = h.messages();
    assert!(messages.iter().any(|m| m == "Offboard::start() failed: command denied"));
    let started = position_of(&messages, "Start Offboard Mode");
    assert!(started < position_of(&messages, "Stop Offboard Mode"));
}

#[tokio::test(start_paused = true)]
async fn test_offboard_stop_failure_is_soft() {
    let mut link = MockVehicleLink::new();
    link.expect_set_velocity_body().times(2).returning(|_| Ok(()));
    link.expect_offboard_start().returning(|| Ok(()));
    link.expect_offboard_stop().returning(|| Err(LinkError::Busy));

    let mut h = Harness::new(Arc::new(link), &short_config(), CancellationToken::new());
    assert!(h.sequencer.offboard_maneuver().await.is_ok());
    assert!(h.messages().iter().any(|m| m == "Offboard::stop() failed: vehicle busy"));
}

#[tokio::test(start_paused = true)]
async fn test_offboard_stopped_when_cancelled() {
    let mut link = MockVehicleLink::new();
    link.expect_set_velocity_body().returning(|_| Ok(()));
    link.expect_offboard_start().returning(|| Ok(()));
    link.expect_offboard_stop().times(1).returning(|| Ok(()));

    let cancel = CancellationToken::new();
    let mut h = Harness::new(Arc::new(link), &short_config(), cancel.clone());
    tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });

    let result = h.sequencer.offboard_maneuver().await;
    assert!(matches!(
        result,
        Err(GroundControlError::Cancelled { phase: FlightPhase::OffboardActive })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_land_waits_for_disarm() {
    let link = Arc::new(ScriptedLink {
        armed_polls: AtomicU32::new(3),
        ..ScriptedLink::default()
    });
    let mut h = Harness::new(link.clone(), &short_config(), CancellationToken::new());

    let start = Instant::now();
    h.sequencer.land().await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(h.sequencer.phase(), FlightPhase::Landed);
    assert_eq!(h.messages(), vec!["Landing...", "Disarmed."]);
}

#[tokio::test(start_paused = true)]
async fn test_land_rejection_still_waits_for_disarm() {
    let link = Arc::new(ScriptedLink {
        land_result: Err(LinkError::Denied),
        armed_polls: AtomicU32::new(1),
        ..ScriptedLink::default()
    });
    let mut h = Harness::new(link.clone(), &short_config(), CancellationToken::new());

    h.sequencer.land().await.unwrap();
    assert_eq!(h.messages(), vec!["Landing...", "Landing failed! (command denied)", "Disarmed."]);
}

#[tokio::test(start_paused = true)]
async fn test_landing_timeout() {
    let link = Arc::new(ScriptedLink {
        armed_polls: AtomicU32::new(u32::MAX),
        ..ScriptedLink::default()
    });
    let mut config = short_config();
    config.timing.landing_timeout_s = Some(30);
    let mut h = Harness::new(link, &config, CancellationToken::new());

    match h.sequencer.land().await {
        Err(GroundControlError::Timeout { phase, after }) => {
            assert_eq!(phase, FlightPhase::Landing);
            assert_eq!(after, Duration::from_secs(30));
        }
        other => panic!("Expected Timeout, got: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_return_to_launch_does_not_wait() {
    let mut link = MockVehicleLink::new();
    link.expect_return_to_launch().times(1).returning(|| Err(LinkError::Denied));
    link.expect_armed().never();

    let mut h = Harness::new(Arc::new(link), &short_config(), CancellationToken::new());
    let start = Instant::now();
    h.sequencer.return_to_launch().await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(h.sequencer.phase(), FlightPhase::ReturningToLaunch);
    assert_eq!(h.messages(), vec!["Return to Launch...", "RTL failed! (command denied)"]);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_logs_each_unhealthy_poll() {
    let link = Arc::new(ScriptedLink {
        unhealthy_polls: AtomicU32::new(3),
        ..ScriptedLink::default()
    });
    let mut h = Harness::new(link, &short_config(), CancellationToken::new());

    let start = Instant::now();
    h.sequencer.check_health().await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(3));

    let messages = h.messages();
    assert_eq!(messages[0], "Vehicle Health checking...");
    assert_eq!(messages[1], "  - Magnetometer (compass) requires calibration.");
    assert_eq!(messages.iter().filter(|m| *m == "Vehicle not ready").count(), 3);
    assert!(messages.iter().any(|m| m == "  - Waiting for GPS fix"));
    assert_eq!(messages.last().unwrap(), "Vehicle is ready.");
}

#[tokio::test(start_paused = true)]
async fn test_health_check_names_unarmable_vehicle() {
    let mut link = MockVehicleLink::new();
    link.expect_health().returning(|| Health {
        is_armable: false,
        ..Health::all_healthy()
    });
    let mut polls = 0;
    link.expect_health_all_ok().returning(move || {
        polls += 1;
        polls > 2
    });

    let mut h = Harness::new(Arc::new(link), &short_config(), CancellationToken::new());
    h.sequencer.check_health().await.unwrap();

    let messages = h.messages();
    assert_eq!(messages.iter().filter(|m| *m == "Vehicle not ready").count(), 2);
    assert_eq!(messages.iter().filter(|m| *m == "  - Vehicle not armable").count(), 2);
    assert!(!messages.iter().any(|m| m.starts_with("  - Waiting for")));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_health_check() {
    let link = Arc::new(ScriptedLink {
        unhealthy_polls: AtomicU32::new(u32::MAX),
        ..ScriptedLink::default()
    });
    let cancel = CancellationToken::new();
    let mut h = Harness::new(link.clone(), &short_config(), cancel.clone());
    tokio::spawn(async move {
        sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });

    let result = h.sequencer.run().await;
    assert!(matches!(
        result,
        Err(GroundControlError::Cancelled { phase: FlightPhase::HealthCheck })
    ));
    assert_eq!(h.sequencer.phase(), FlightPhase::Failed);
    assert!(link.calls().is_empty());
    assert!(h.messages().iter().any(|m| m.starts_with("Flight aborted in phase HealthCheck")));
}

#[tokio::test(start_paused = true)]
async fn test_health_timeout() {
    let link = Arc::new(ScriptedLink {
        unhealthy_polls: AtomicU32::new(u32::MAX),
        ..ScriptedLink::default()
    });
    let mut config = short_config();
    config.timing.health_timeout_s = Some(10);
    let mut h = Harness::new(link, &config, CancellationToken::new());

    assert!(matches!(
        h.sequencer.run().await,
        Err(GroundControlError::Timeout { phase: FlightPhase::HealthCheck, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_mission_uploaded_before_takeoff() {
    let link = Arc::new(ScriptedLink {
        armed_polls: AtomicU32::new(1),
        ..ScriptedLink::default()
    });
    let harness_link: Arc<dyn VehicleLink> = link.clone();
    let mut config = short_config();
    config.mission.upload = true;
    let mut h = Harness::new(harness_link, &config, CancellationToken::new());
    h.telemetry.attach(link.as_ref());

    h.sequencer.run().await.unwrap();

    let calls = link.calls();
    assert_eq!(&calls[..3], &["upload_mission", "download_mission", "arm"]);
    assert!(h.messages().iter().any(|m| m == "Mission downloaded (MissionItems: 0)"));
}

#[tokio::test(start_paused = true)]
async fn test_full_flight_against_simulator() {
    let config = short_config();
    let vehicle = Arc::new(SimulatedVehicle::start(config.sim.clone()).unwrap());
    let link: Arc<dyn VehicleLink> = vehicle.clone();
    let mut h = Harness::new(link, &config, CancellationToken::new());
    h.telemetry.attach(vehicle.as_ref());

    h.sequencer.run().await.unwrap();

    assert_eq!(h.sequencer.phase(), FlightPhase::Landed);
    assert!(!vehicle.armed());
    assert_eq!(h.telemetry.current_flight_mode(), FlightMode::Ready);

    let messages = h.messages();
    let order = [
        "Vehicle Health checking...",
        "Arming ...",
        "Takeoff...",
        "Takeoff successful.",
        "Start Offboard Mode",
        "Stop Offboard Mode",
        "Landing...",
        "Disarmed.",
    ];
    let positions: Vec<usize> = order.iter().map(|needle| position_of(&messages, needle)).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", messages);
    assert!(messages.iter().any(|m| m == "Flight Mode Change from Takeoff to Hold"));
    assert!(messages.iter().any(|m| m == "Flight Mode Change from Hold to Offboard"));
    assert!(messages.iter().any(|m| m.starts_with("Drone Position: Lat: ")));
}

#[tokio::test(start_paused = true)]
async fn test_full_flight_ending_in_rtl() {
    let mut config = short_config();
    config.flight.terminal = TerminalAction::ReturnToLaunch;
    let vehicle = Arc::new(SimulatedVehicle::start(config.sim.clone()).unwrap());
    let link: Arc<dyn VehicleLink> = vehicle.clone();
    let mut h = Harness::new(link, &config, CancellationToken::new());
    h.telemetry.attach(vehicle.as_ref());

    h.sequencer.run().await.unwrap();

    assert_eq!(h.sequencer.phase(), FlightPhase::ReturningToLaunch);
    // No convergence wait: still airborne when the run returns.
    assert!(vehicle.armed());
    assert_eq!(vehicle.flight_mode(), FlightMode::ReturnToLaunch);
    assert!(!h.messages().iter().any(|m| m == "Disarmed."));
}
