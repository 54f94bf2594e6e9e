//! # Mission Module
//!
//! Waypoint missions: building a plan and passing it to and from the vehicle.
//!
//! Waypoint fields are not validated locally, the vehicle accepts or rejects
//! the plan on upload. Every operation here is a soft failure: the outcome
//! is logged and returned, never raised.

use serde::Deserialize;
use std::fmt;

use crate::link::VehicleLink;
use crate::log_sink::LogSink;

/// Camera action triggered when a waypoint is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAction {
    #[default]
    None,
    TakePhoto,
    StartPhotoInterval,
    StopPhotoInterval,
    StartVideo,
    StopVideo,
    StartPhotoDistance,
    StopPhotoDistance,
}

/// A single waypoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MissionItem {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub relative_altitude_m: f32,

    #[serde(default = "default_speed_m_s")]
    pub speed_m_s: f32,

    #[serde(default)]
    pub is_fly_through: bool,

    #[serde(default)]
    pub gimbal_pitch_deg: f32,

    #[serde(default)]
    pub gimbal_yaw_deg: f32,

    #[serde(default)]
    pub camera_action: CameraAction,
}

fn default_speed_m_s() -> f32 { 5.0 }

impl MissionItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        latitude_deg: f64,
        longitude_deg: f64,
        relative_altitude_m: f32,
        speed_m_s: f32,
        is_fly_through: bool,
        gimbal_pitch_deg: f32,
        gimbal_yaw_deg: f32,
        camera_action: CameraAction,
    ) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            relative_altitude_m,
            speed_m_s,
            is_fly_through,
            gimbal_pitch_deg,
            gimbal_yaw_deg,
            camera_action,
        }
    }
}

/// Ordered list of waypoints
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MissionPlan {
    pub mission_items: Vec<MissionItem>,
}

impl MissionPlan {
    pub fn new(mission_items: Vec<MissionItem>) -> Self {
        Self { mission_items }
    }

    /// Plan from configured waypoints, or the demo plan if there are none
    pub fn from_waypoints(waypoints: &[MissionItem]) -> Self {
        if waypoints.is_empty() {
            create_mission()
        } else {
            Self::new(waypoints.to_vec())
        }
    }

    pub fn len(&self) -> usize {
        self.mission_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mission_items.is_empty()
    }
}

/// Progress through an active mission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissionProgress {
    pub current: usize,
    pub total: usize,
}

impl fmt::Display for MissionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.current, self.total)
    }
}

/// Demo plan with a single waypoint 10 m above the test field
pub fn create_mission() -> MissionPlan {
    MissionPlan::new(vec![MissionItem::new(
        22.68170327054473,
        120.2456490218639658,
        10.0,
        5.0,
        false,
        0.0,
        0.0,
        CameraAction::None,
    )])
}

/// Mission operations on a connected vehicle
pub struct MissionControl<'a> {
    link: &'a dyn VehicleLink,
    log: &'a LogSink,
}

impl<'a> MissionControl<'a> {
    pub fn new(link: &'a dyn VehicleLink, log: &'a LogSink) -> Self {
        Self { link, log }
    }

    /// Upload `plan`, returning whether the vehicle accepted it
    pub async fn upload_mission(&self, plan: MissionPlan) -> bool {
        self.log.info("Uploading mission...");
        match self.link.upload_mission(plan).await {
            Ok(()) => {
                self.log.info("Mission uploaded.");
                true
            }
            Err(e) => {
                self.log.warn(format!("Mission upload failed ({})", e));
                false
            }
        }
    }

    /// Read the plan currently stored on the vehicle
    pub async fn download_mission(&self) -> Option<MissionPlan> {
        self.log.info("Downloading mission.");
        match self.link.download_mission().await {
            Ok(plan) => {
                self.log
                    .info(format!("Mission downloaded (MissionItems: {})", plan.len()));
                Some(plan)
            }
            Err(e) => {
                self.log.warn(format!("Mission download failed ({})", e));
                None
            }
        }
    }

    /// Start the uploaded mission, logging progress updates as they arrive
    pub async fn start_mission(&self) -> bool {
        let log = self.log.clone();
        self.link.subscribe_mission_progress(Box::new(move |progress| {
            log.info(format!("Mission status update: {}", progress));
        }));

        match self.link.start_mission().await {
            Ok(()) => {
                self.log.info("Started mission.");
                true
            }
            Err(e) => {
                self.log.warn(format!("Mission start failed ({})", e));
                false
            }
        }
    }

    pub async fn pause_mission(&self) -> bool {
        self.log.info("Pausing mission...");
        match self.link.pause_mission().await {
            Ok(()) => {
                self.log.info("Mission paused.");
                true
            }
            Err(e) => {
                self.log.warn(format!("Failed to pause mission ({})", e));
                false
            }
        }
    }
}
