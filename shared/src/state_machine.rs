//! Module State Machine
//!
//! Defines the operational states, valid transitions and the safety predicate.
//! Every mutation goes through a typed operation on [`ModuleState`]; there is
//! no generic field setter.

use serde::{Deserialize, Serialize};

use crate::codec::Command;
use crate::{now_unix, safety};

/// Operational status of the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    #[default]
    Idle,
    Active,
    Safe,
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleStatus::Idle => write!(f, "IDLE"),
            ModuleStatus::Active => write!(f, "ACTIVE"),
            ModuleStatus::Safe => write!(f, "SAFE"),
        }
    }
}

/// Events that can trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEvent {
    /// Panel inspection requested (requires IDLE)
    InspectionStarted,
    /// Maneuver requested
    ManeuverStarted,
    /// Simulated work finished
    ActivityFinished,
    /// Simulated work stopped partway; status is left as it is
    ActivityAborted,
    /// Operator asked to resume operations
    Resumed,
    /// Health check completed
    HealthChecked,
    /// Administrative fault injection
    FaultInjected,
    /// Host heartbeat missed for too long
    HeartbeatLost,
    /// Host heartbeat changing again
    HeartbeatRestored,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid; carries the resulting status (may equal the old one)
    Success(ModuleStatus),
    /// Transition was invalid from current status; nothing changed
    Invalid { from: ModuleStatus, event: ModuleEvent },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// The single mutable entity of the module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleState {
    pub status: ModuleStatus,
    pub last_command: Command,
    /// Unix timestamp (seconds) of the last mutation
    pub last_updated: i64,
    /// Battery level percentage, always within 0..=100
    pub battery_level: u8,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Inspections and maneuvers currently in flight
    #[serde(skip)]
    pub activities: u32,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleState {
    /// Power-on state: IDLE, full battery, nominal temperature
    pub fn new() -> Self {
        Self {
            status: ModuleStatus::Idle,
            last_command: Command::default(),
            last_updated: now_unix(),
            battery_level: safety::BATTERY_FULL_PERCENT,
            temperature: safety::TEMPERATURE_INITIAL_C,
            activities: 0,
        }
    }

    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    /// Safety predicate gating maneuvers and resume
    pub fn is_safe(&self) -> bool {
        self.battery_level >= safety::BATTERY_MIN_PERCENT
            && self.temperature > safety::TEMPERATURE_MIN_SAFE_C
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ModuleEvent) -> TransitionResult {
        match self.next_status(event) {
            Some(status) => {
                debug_assert!(is_valid_transition(self.status, status));
                self.status = status;
                match event {
                    ModuleEvent::InspectionStarted | ModuleEvent::ManeuverStarted => {
                        self.activities += 1
                    }
                    ModuleEvent::ActivityFinished | ModuleEvent::ActivityAborted => {
                        self.activities = self.activities.saturating_sub(1)
                    }
                    _ => {}
                }
                self.touch();
                TransitionResult::Success(status)
            }
            None => TransitionResult::Invalid {
                from: self.status,
                event,
            },
        }
    }

    /// Get the next status for a given event, if the transition is valid
    fn next_status(&self, event: ModuleEvent) -> Option<ModuleStatus> {
        use ModuleEvent::*;
        use ModuleStatus::*;

        match (self.status, event) {
            (Idle, InspectionStarted) => Some(Active),
            (_, InspectionStarted) => None,

            // SAFE must pass through IDLE before going ACTIVE again
            (Idle | Active, ManeuverStarted) => Some(Active),
            (Safe, ManeuverStarted) => None,

            // SAFE is latched: finishing work does not clear it, and the
            // module stays ACTIVE while another activity is still running
            (Safe, ActivityFinished) => Some(Safe),
            (current, ActivityFinished) if self.activities > 1 => Some(current),
            (_, ActivityFinished) => Some(Idle),
            (current, ActivityAborted) => Some(current),

            (_, HealthChecked) => Some(Idle),

            (_, Resumed) if self.is_safe() => Some(Idle),
            (_, Resumed) => None,

            (_, FaultInjected | HeartbeatLost) => Some(Safe),

            (Safe, HeartbeatRestored) => Some(Idle),
            (current, HeartbeatRestored) => Some(current),
        }
    }

    /// Remember the last successfully parsed command
    pub fn record_command(&mut self, command: Command) {
        self.last_command = command;
        self.touch();
    }

    /// Reset consumables (HEAT_AND_CLEAR)
    pub fn recharge(&mut self, battery_level: u8, temperature: f64) {
        self.battery_level = battery_level.min(safety::BATTERY_FULL_PERCENT);
        self.temperature = temperature;
        self.touch();
    }

    /// Force a fault: drain consumables and latch SAFE
    pub fn inject_fault(&mut self) -> TransitionResult {
        self.battery_level = 0;
        self.temperature = 0.0;
        self.process_event(ModuleEvent::FaultInjected)
    }

    /// Apply sensor drift, clamping the result to the operating range.
    ///
    /// Both deltas are subtracted from the current values.
    pub fn apply_drift(&mut self, battery_delta: i64, temperature_delta: f64) {
        let battery = self.battery_level as i64 - battery_delta;
        self.battery_level = if battery < 0 {
            0
        } else if battery > safety::BATTERY_FULL_PERCENT as i64 {
            safety::BATTERY_CEILING_RESET_PERCENT
        } else {
            battery as u8
        };

        let temperature = self.temperature - temperature_delta;
        self.temperature = if temperature < safety::TEMPERATURE_FLOOR_C {
            safety::TEMPERATURE_FLOOR_RESET_C
        } else if temperature > safety::TEMPERATURE_CEILING_C {
            safety::TEMPERATURE_CEILING_RESET_C
        } else {
            temperature
        };
        self.touch();
    }

    /// Mark the state as freshly updated
    pub fn touch(&mut self) {
        self.last_updated = now_unix();
    }
}

/// Check if a status change is ever allowed, independent of the triggering event
pub fn is_valid_transition(from: ModuleStatus, to: ModuleStatus) -> bool {
    !matches!((from, to), (ModuleStatus::Safe, ModuleStatus::Active))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsafe_state() -> ModuleState {
        let mut state = ModuleState::new();
        state.battery_level = 10;
        state
    }

    #[test]
    fn test_initial_state() {
        let state = ModuleState::new();
        assert_eq!(state.status(), ModuleStatus::Idle);
        assert_eq!(state.battery_level, 100);
        assert_eq!(state.temperature, 75.0);
        assert!(state.last_command.name.is_empty());
        assert!(state.is_safe());
    }

    #[test]
    fn test_safety_predicate_thresholds() {
        let mut state = ModuleState::new();

        state.battery_level = 20;
        assert!(state.is_safe());
        state.battery_level = 19;
        assert!(!state.is_safe());

        state.battery_level = 50;
        state.temperature = 60.0;
        assert!(!state.is_safe(), "60.0 exactly is not above the threshold");
        state.temperature = 60.1;
        assert!(state.is_safe());
    }

    #[test]
    fn test_cold_module_is_unsafe() {
        // Documented, possibly inverted threshold: a cool module fails the
        // predicate while a hot one passes.
        let mut state = ModuleState::new();
        state.temperature = 20.0;
        assert!(!state.is_safe());
        state.temperature = 95.0;
        assert!(state.is_safe());
    }

    #[test]
    fn test_inspection_requires_idle() {
        let mut state = ModuleState::new();
        assert_eq!(
            state.process_event(ModuleEvent::InspectionStarted),
            TransitionResult::Success(ModuleStatus::Active)
        );

        let result = state.process_event(ModuleEvent::InspectionStarted);
        assert!(matches!(
            result,
            TransitionResult::Invalid { from: ModuleStatus::Active, .. }
        ));
        assert_eq!(state.status(), ModuleStatus::Active);
    }

    #[test]
    fn test_safe_never_goes_straight_to_active() {
        let mut state = ModuleState::new();
        state.process_event(ModuleEvent::HeartbeatLost);
        assert_eq!(state.status(), ModuleStatus::Safe);

        assert!(!state.process_event(ModuleEvent::ManeuverStarted).is_success());
        assert!(!state.process_event(ModuleEvent::InspectionStarted).is_success());
        assert_eq!(state.status(), ModuleStatus::Safe);

        // Through IDLE it works
        state.process_event(ModuleEvent::Resumed);
        assert_eq!(state.status(), ModuleStatus::Idle);
        assert_eq!(
            state.process_event(ModuleEvent::ManeuverStarted),
            TransitionResult::Success(ModuleStatus::Active)
        );
    }

    #[test]
    fn test_safe_is_latched() {
        let mut state = ModuleState::new();
        state.process_event(ModuleEvent::InspectionStarted);
        state.process_event(ModuleEvent::HeartbeatLost);

        state.process_event(ModuleEvent::ActivityFinished);
        assert_eq!(state.status(), ModuleStatus::Safe);
        state.process_event(ModuleEvent::ActivityAborted);
        assert_eq!(state.status(), ModuleStatus::Safe);
    }

    #[test]
    fn test_health_check_always_returns_to_idle() {
        for start in [ModuleStatus::Idle, ModuleStatus::Active, ModuleStatus::Safe] {
            let mut state = unsafe_state();
            state.status = start;
            assert_eq!(
                state.process_event(ModuleEvent::HealthChecked),
                TransitionResult::Success(ModuleStatus::Idle)
            );
        }
    }

    #[test]
    fn test_overlapping_activities_stay_active() {
        let mut state = ModuleState::new();
        state.process_event(ModuleEvent::InspectionStarted);
        state.process_event(ModuleEvent::ManeuverStarted);
        assert_eq!(state.activities, 2);

        // inspection finishes while the maneuver is still running
        state.process_event(ModuleEvent::ActivityFinished);
        assert_eq!(state.status(), ModuleStatus::Active);

        state.process_event(ModuleEvent::ActivityFinished);
        assert_eq!(state.status(), ModuleStatus::Idle);
        assert_eq!(state.activities, 0);
    }

    #[test]
    fn test_aborted_activity_releases_its_slot() {
        let mut state = ModuleState::new();
        state.process_event(ModuleEvent::ManeuverStarted);
        state.process_event(ModuleEvent::ActivityAborted);
        assert_eq!(state.status(), ModuleStatus::Active);
        assert_eq!(state.activities, 0);

        state.process_event(ModuleEvent::ManeuverStarted);
        state.process_event(ModuleEvent::ActivityFinished);
        assert_eq!(state.status(), ModuleStatus::Idle);
    }

    #[test]
    fn test_resume_when_unsafe_changes_nothing() {
        for start in [ModuleStatus::Idle, ModuleStatus::Active, ModuleStatus::Safe] {
            let mut state = unsafe_state();
            state.status = start;
            for _ in 0..5 {
                let result = state.process_event(ModuleEvent::Resumed);
                assert!(matches!(result, TransitionResult::Invalid { .. }));
                assert_eq!(state.status(), start);
            }
        }
    }

    #[test]
    fn test_heartbeat_restore_only_clears_safe() {
        let mut state = ModuleState::new();
        state.process_event(ModuleEvent::ManeuverStarted);
        state.process_event(ModuleEvent::HeartbeatRestored);
        assert_eq!(state.status(), ModuleStatus::Active);

        state.process_event(ModuleEvent::HeartbeatLost);
        state.process_event(ModuleEvent::HeartbeatRestored);
        assert_eq!(state.status(), ModuleStatus::Idle);
    }

    #[test]
    fn test_inject_fault() {
        let mut state = ModuleState::new();
        let result = state.inject_fault();
        assert_eq!(result, TransitionResult::Success(ModuleStatus::Safe));
        assert_eq!(state.battery_level, 0);
        assert_eq!(state.temperature, 0.0);
    }

    #[test]
    fn test_recharge_then_resume() {
        let mut state = ModuleState::new();
        state.inject_fault();
        assert!(!state.process_event(ModuleEvent::Resumed).is_success());

        state.recharge(100, 80.0);
        assert_eq!(
            state.process_event(ModuleEvent::Resumed),
            TransitionResult::Success(ModuleStatus::Idle)
        );
    }

    #[test]
    fn test_drift_clamping() {
        let mut state = ModuleState::new();

        state.battery_level = 3;
        state.apply_drift(5, 0.0);
        assert_eq!(state.battery_level, 0);

        state.battery_level = 98;
        state.apply_drift(-4, 0.0);
        assert_eq!(state.battery_level, 80);

        state.temperature = -48.0;
        state.apply_drift(0, 4.0);
        assert_eq!(state.temperature, -30.0);

        state.temperature = 97.0;
        state.apply_drift(0, -4.5);
        assert_eq!(state.temperature, 80.0);

        state.battery_level = 50;
        state.temperature = 50.0;
        state.apply_drift(2, 1.5);
        assert_eq!(state.battery_level, 48);
        assert_eq!(state.temperature, 48.5);
    }

    #[test]
    fn test_battery_stays_in_range_under_drift() {
        let mut state = ModuleState::new();
        for delta in [-5, 4, -5, -5, 4, 4, 4, 4, -5, 4, 4, 4, 4, 4, 4, 4, 4] {
            state.apply_drift(delta, 0.0);
            assert!(state.battery_level <= 100);
        }
    }

    #[test]
    fn test_transition_table_invariant() {
        assert!(!is_valid_transition(ModuleStatus::Safe, ModuleStatus::Active));
        assert!(is_valid_transition(ModuleStatus::Safe, ModuleStatus::Idle));
        assert!(is_valid_transition(ModuleStatus::Idle, ModuleStatus::Active));
        assert!(is_valid_transition(ModuleStatus::Active, ModuleStatus::Safe));
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ModuleStatus::Safe).unwrap();
        assert_eq!(json, "\"SAFE\"");

        let value = serde_json::to_value(ModuleState::new()).unwrap();
        assert_eq!(value["Status"], "IDLE");
        assert_eq!(value["BatteryLevel"], 100);
        assert_eq!(value["Temperature"], 75.0);
        assert!(value["LastCommand"].is_object());
    }
}
