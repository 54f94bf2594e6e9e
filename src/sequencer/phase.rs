//! Flight phases and the allowed transitions between them.

use std::fmt;

/// Stage of the scripted flight
///
/// The sequence is linear: a phase may only move forward, never back, and
/// `Landing` and `ReturningToLaunch` are alternative endings of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlightPhase {
    #[default]
    Idle,
    HealthCheck,
    Arming,
    TakingOff,
    Holding,
    OffboardActive,
    Landing,
    Landed,
    ReturningToLaunch,
    Failed,
}

impl FlightPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::HealthCheck => 1,
            Self::Arming => 2,
            Self::TakingOff => 3,
            Self::Holding => 4,
            Self::OffboardActive => 5,
            Self::Landing | Self::ReturningToLaunch => 6,
            Self::Landed => 7,
            Self::Failed => u8::MAX,
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Landed | Self::ReturningToLaunch | Self::Failed)
    }

    /// Whether the sequence may move from `self` to `next`
    ///
    /// Any non-terminal phase may fail. Otherwise phases only move forward;
    /// skipping ahead is allowed so single phases can be flown on their own.
    pub fn can_advance_to(self, next: FlightPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        if next == Self::Landed {
            return self == Self::Landing;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: [FlightPhase; 8] = [
        FlightPhase::Idle,
        FlightPhase::HealthCheck,
        FlightPhase::Arming,
        FlightPhase::TakingOff,
        FlightPhase::Holding,
        FlightPhase::OffboardActive,
        FlightPhase::Landing,
        FlightPhase::Landed,
    ];

    #[test]
    fn test_scripted_order_is_allowed() {
        for pair in SCRIPT.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_phase_reentry() {
        for (i, later) in SCRIPT.iter().enumerate() {
            for earlier in &SCRIPT[..=i] {
                assert!(!later.can_advance_to(*earlier), "{} -> {}", later, earlier);
            }
        }
    }

    #[test]
    fn test_landing_and_rtl_are_exclusive() {
        assert!(FlightPhase::OffboardActive.can_advance_to(FlightPhase::ReturningToLaunch));
        assert!(!FlightPhase::Landing.can_advance_to(FlightPhase::ReturningToLaunch));
        assert!(!FlightPhase::ReturningToLaunch.can_advance_to(FlightPhase::Landing));
        assert!(!FlightPhase::ReturningToLaunch.can_advance_to(FlightPhase::Landed));
    }

    #[test]
    fn test_landed_only_after_landing() {
        assert!(!FlightPhase::Holding.can_advance_to(FlightPhase::Landed));
        assert!(FlightPhase::Landing.can_advance_to(FlightPhase::Landed));
    }

    #[test]
    fn test_any_active_phase_can_fail() {
        for phase in &SCRIPT[..7] {
            assert!(phase.can_advance_to(FlightPhase::Failed));
        }
        assert!(!FlightPhase::Failed.can_advance_to(FlightPhase::Failed));
        assert!(!FlightPhase::Landed.can_advance_to(FlightPhase::Failed));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(FlightPhase::Landed.is_terminal());
        assert!(FlightPhase::ReturningToLaunch.is_terminal());
        assert!(FlightPhase::Failed.is_terminal());
        assert!(!FlightPhase::Landing.is_terminal());
        assert_eq!(FlightPhase::default(), FlightPhase::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(FlightPhase::OffboardActive.to_string(), "OffboardActive");
    }
}
