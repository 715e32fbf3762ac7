//! Engagement state machine
//!
//! Controls are entered on the rising edge of the vehicle's own cruise
//! engagement and left on its falling edge. Main switch off always wins, even
//! over an engage edge seen in the same sample. There are no timeouts: every
//! transition is driven by the most recent decoded sample.

use crate::state::VehicleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngagementState {
    #[default]
    Disengaged,
    Engaged,
}

#[derive(Debug, Clone, Default)]
pub struct EngagementMachine {
    state: EngagementState,
    cruise_engaged_prev: bool,
}

impl EngagementMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EngagementState {
        self.state
    }

    /// Feed one decoded cruise sample; `vehicle.acc_main_on` must already hold
    /// the value decoded from the same frame.
    ///
    /// Writes `vehicle.controls_allowed`.
    pub fn on_cruise_sample(&mut self, vehicle: &mut VehicleState, cruise_engaged: bool) {
        let rising_edge = cruise_engaged && !self.cruise_engaged_prev;
        self.cruise_engaged_prev = cruise_engaged;

        let next = if !vehicle.acc_main_on() || !cruise_engaged {
            EngagementState::Disengaged
        } else if rising_edge {
            EngagementState::Engaged
        } else {
            self.state
        };

        if next != self.state {
            log::info!("Engagement {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        vehicle.controls_allowed = self.state == EngagementState::Engaged && vehicle.acc_main_on();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(
        machine: &mut EngagementMachine,
        vehicle: &mut VehicleState,
        cruise_engaged: bool,
        acc_main_on: bool,
    ) {
        vehicle.acc_main_on = acc_main_on;
        machine.on_cruise_sample(vehicle, cruise_engaged);
    }

    #[test]
    fn test_main_on_then_engage_edge() {
        let mut machine = EngagementMachine::new();
        let mut vehicle = VehicleState::default();
        sample(&mut machine, &mut vehicle, false, false);
        sample(&mut machine, &mut vehicle, false, true);
        assert!(!vehicle.controls_allowed());
        sample(&mut machine, &mut vehicle, true, true);
        assert!(vehicle.controls_allowed());
        assert_eq!(machine.state(), EngagementState::Engaged);
    }

    #[test]
    fn test_main_off_disengages_without_falling_edge() {
        let mut machine = EngagementMachine::new();
        let mut vehicle = VehicleState::default();
        sample(&mut machine, &mut vehicle, true, true);
        assert!(vehicle.controls_allowed());
        // Cruise still reported engaged, but main is off
        sample(&mut machine, &mut vehicle, true, false);
        assert!(!vehicle.controls_allowed());
        assert_eq!(machine.state(), EngagementState::Disengaged);
    }

    #[test]
    fn test_main_off_beats_same_cycle_engage() {
        let mut machine = EngagementMachine::new();
        let mut vehicle = VehicleState::default();
        sample(&mut machine, &mut vehicle, true, false);
        assert!(!vehicle.controls_allowed());
    }

    #[test]
    fn test_no_engage_without_edge() {
        let mut machine = EngagementMachine::new();
        let mut vehicle = VehicleState::default();
        sample(&mut machine, &mut vehicle, true, true);
        sample(&mut machine, &mut vehicle, true, false);
        // Main back on while cruise still reads engaged: no new rising edge
        sample(&mut machine, &mut vehicle, true, true);
        assert!(!vehicle.controls_allowed());
        sample(&mut machine, &mut vehicle, false, true);
        sample(&mut machine, &mut vehicle, true, true);
        assert!(vehicle.controls_allowed());
    }

    #[test]
    fn test_falling_edge_disengages() {
        let mut machine = EngagementMachine::new();
        let mut vehicle = VehicleState::default();
        sample(&mut machine, &mut vehicle, true, true);
        sample(&mut machine, &mut vehicle, false, true);
        assert!(!vehicle.controls_allowed());
        assert!(vehicle.acc_main_on());
    }
}
