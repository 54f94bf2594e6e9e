//! # Telemetry Types
//!
//! Vehicle state values delivered by the link: flight mode, position, health
//! and the body-frame velocity setpoint used in offboard control.
//!
//! ## Flight Modes
//!
//! Autopilots report their mode in two flavours: the generic telemetry mode
//! (Hold, Mission, Offboard, ...) and the ArduCopter numeric custom mode
//! carried in the heartbeat. Both map into the single [`FlightMode`] enum
//! through one table, [`MODE_TABLE`].

use std::fmt;

/// Vehicle flight mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlightMode {
    #[default]
    Unknown,
    // Generic telemetry modes
    Ready,
    Takeoff,
    Hold,
    Mission,
    ReturnToLaunch,
    Land,
    Offboard,
    FollowMe,
    Manual,
    Altctl,
    Posctl,
    Acro,
    Stabilized,
    Rattitude,
    // ArduCopter custom modes
    Stabilize,
    AltHold,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Circle,
    Position,
    OfLoiter,
    Drift,
    Sport,
    Flip,
    AutoTune,
    PosHold,
    Brake,
    Throw,
    AvoidAdsb,
    GuidedNoGps,
    SmartRtl,
    FlowHold,
    Follow,
    ZigZag,
    SystemId,
    AutoRotate,
    AutoRtl,
}

/// Display name and optional ArduCopter custom-mode number for every mode
///
/// ArduCopter mode 1 is ACRO, which is the same flight behaviour as the
/// generic `Acro`, so both share the entry.
pub const MODE_TABLE: &[(FlightMode, &str, Option<u32>)] = &[
    (FlightMode::Unknown, "Unknown", None),
    (FlightMode::Ready, "Ready", None),
    (FlightMode::Takeoff, "Takeoff", None),
    (FlightMode::Hold, "Hold", None),
    (FlightMode::Mission, "Mission", None),
    (FlightMode::ReturnToLaunch, "ReturnToLaunch", None),
    (FlightMode::Land, "Land", None),
    (FlightMode::Offboard, "Offboard", None),
    (FlightMode::FollowMe, "FollowMe", None),
    (FlightMode::Manual, "Manual", None),
    (FlightMode::Altctl, "Altctl", None),
    (FlightMode::Posctl, "Posctl", None),
    (FlightMode::Acro, "ACRO", Some(1)),
    (FlightMode::Stabilized, "Stabilized", None),
    (FlightMode::Rattitude, "Rattitude", None),
    (FlightMode::Stabilize, "STABILIZE", Some(0)),
    (FlightMode::AltHold, "ALT_HOLD", Some(2)),
    (FlightMode::Auto, "AUTO", Some(3)),
    (FlightMode::Guided, "GUIDED", Some(4)),
    (FlightMode::Loiter, "LOITER", Some(5)),
    (FlightMode::Rtl, "RTL", Some(6)),
    (FlightMode::Circle, "CIRCLE", Some(7)),
    (FlightMode::Position, "POSITION", Some(8)),
    (FlightMode::Land, "LAND", Some(9)),
    (FlightMode::OfLoiter, "OF_LOITER", Some(10)),
    (FlightMode::Drift, "DRIFT", Some(11)),
    (FlightMode::Sport, "SPORT", Some(13)),
    (FlightMode::Flip, "FLIP", Some(14)),
    (FlightMode::AutoTune, "AUTOTUNE", Some(15)),
    (FlightMode::PosHold, "POSHOLD", Some(16)),
    (FlightMode::Brake, "BRAKE", Some(17)),
    (FlightMode::Throw, "THROW", Some(18)),
    (FlightMode::AvoidAdsb, "AVOID_ADSB", Some(19)),
    (FlightMode::GuidedNoGps, "GUIDED_NOGPS", Some(20)),
    (FlightMode::SmartRtl, "SMART_RTL", Some(21)),
    (FlightMode::FlowHold, "FLOWHOLD", Some(22)),
    (FlightMode::Follow, "FOLLOW", Some(23)),
    (FlightMode::ZigZag, "ZIGZAG", Some(24)),
    (FlightMode::SystemId, "SYSTEMID", Some(25)),
    (FlightMode::AutoRotate, "AUTOROTATE", Some(26)),
    (FlightMode::AutoRtl, "AUTO_RTL", Some(27)),
];

impl FlightMode {
    /// Human-readable name of the mode
    ///
    /// `Land` appears twice in [`MODE_TABLE`]; the first entry wins, so it
    /// always prints as `Land`.
    pub fn name(self) -> &'static str {
        MODE_TABLE
            .iter()
            .find(|(mode, _, _)| *mode == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("Unknown")
    }

    /// Map an ArduCopter `custom_mode` number to a flight mode
    ///
    /// Unassigned numbers (12, anything above 27) map to `Unknown`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ground_control::telemetry::FlightMode;
    ///
    /// assert_eq!(FlightMode::from_custom_mode(4), FlightMode::Guided);
    /// assert_eq!(FlightMode::from_custom_mode(12), FlightMode::Unknown);
    /// ```
    pub fn from_custom_mode(custom_mode: u32) -> Self {
        MODE_TABLE
            .iter()
            .find(|(_, _, number)| *number == Some(custom_mode))
            .map(|(mode, _, _)| *mode)
            .unwrap_or(FlightMode::Unknown)
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Global position estimate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    /// Latitude in degrees
    pub latitude_deg: f64,
    /// Longitude in degrees
    pub longitude_deg: f64,
    /// Altitude above mean sea level in meters
    pub absolute_altitude_m: f32,
    /// Altitude above the takeoff point in meters
    pub relative_altitude_m: f32,
}

/// Pre-flight health flags reported by the autopilot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    pub is_gyrometer_calibration_ok: bool,
    pub is_accelerometer_calibration_ok: bool,
    pub is_magnetometer_calibration_ok: bool,
    pub is_global_position_ok: bool,
    pub is_local_position_ok: bool,
    pub is_home_position_ok: bool,
    pub is_armable: bool,
}

impl Health {
    /// A health report with every flag set
    pub fn all_healthy() -> Self {
        Self {
            is_gyrometer_calibration_ok: true,
            is_accelerometer_calibration_ok: true,
            is_magnetometer_calibration_ok: true,
            is_global_position_ok: true,
            is_local_position_ok: true,
            is_home_position_ok: true,
            is_armable: true,
        }
    }

    /// True when every flag is set
    pub fn all_ok(&self) -> bool {
        self.is_gyrometer_calibration_ok
            && self.is_accelerometer_calibration_ok
            && self.is_magnetometer_calibration_ok
            && self.is_global_position_ok
            && self.is_local_position_ok
            && self.is_home_position_ok
            && self.is_armable
    }
}

/// Body-frame velocity setpoint for offboard control
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityBody {
    pub forward_m_s: f32,
    pub right_m_s: f32,
    pub down_m_s: f32,
    pub yawspeed_deg_s: f32,
}

impl VelocityBody {
    /// Hold position with no rotation
    pub fn zero() -> Self {
        Self::default()
    }

    /// Turn in place at `deg_s` (positive is clockwise seen from above)
    pub fn yaw_rate(deg_s: f32) -> Self {
        Self {
            yawspeed_deg_s: deg_s,
            ..Self::default()
        }
    }
}
