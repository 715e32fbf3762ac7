//! Vehicle state model and the tracker that updates it
//!
//! Only authenticated frames reach the tracker. A vehicle mode decodes the
//! frame into a [`SignalUpdate`]; the tracker applies it to exactly one
//! group of [`VehicleState`] fields. `controls_allowed` is the one field the
//! tracker never writes: it belongs to the [`EngagementMachine`].

use crate::common::sample::WindowedSample;
use crate::engagement::EngagementMachine;

/// Semantic value decoded from one authenticated frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalUpdate {
    /// Raw wheel speeds FL, FR, RL, RR
    WheelSpeeds([u16; 4]),
    /// Driver-applied steering torque, bias already removed
    DriverTorque(i32),
    /// Vehicle cruise status
    CruiseStatus { cruise_engaged: bool, acc_main_on: bool },
    BrakePedal(bool),
}

/// The gateway's model of the vehicle
///
/// Read-only outside the crate; every field has exactly one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleState {
    pub(crate) vehicle_moving: bool,
    pub(crate) driver_torque: WindowedSample,
    pub(crate) cruise_engaged: bool,
    pub(crate) acc_main_on: bool,
    pub(crate) controls_allowed: bool,
    pub(crate) brake_pressed: bool,
}

impl VehicleState {
    pub fn vehicle_moving(&self) -> bool {
        self.vehicle_moving
    }

    pub fn driver_torque(&self) -> &WindowedSample {
        &self.driver_torque
    }

    pub fn cruise_engaged(&self) -> bool {
        self.cruise_engaged
    }

    pub fn acc_main_on(&self) -> bool {
        self.acc_main_on
    }

    pub fn controls_allowed(&self) -> bool {
        self.controls_allowed
    }

    pub fn brake_pressed(&self) -> bool {
        self.brake_pressed
    }
}

/// Applies decoded signals to the vehicle state
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    engagement: EngagementMachine,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engagement(&self) -> &EngagementMachine {
        &self.engagement
    }

    pub fn apply(&mut self, vehicle: &mut VehicleState, update: SignalUpdate) {
        match update {
            SignalUpdate::WheelSpeeds(speeds) => {
                // Recomputed from every frame, no hysteresis
                vehicle.vehicle_moving = speeds.iter().map(|s| *s as u32).sum::<u32>() > 0;
            }
            SignalUpdate::DriverTorque(torque) => {
                vehicle.driver_torque.update(torque);
            }
            SignalUpdate::CruiseStatus {
                cruise_engaged,
                acc_main_on,
            } => {
                vehicle.cruise_engaged = cruise_engaged;
                vehicle.acc_main_on = acc_main_on;
                self.engagement.on_cruise_sample(vehicle, cruise_engaged);
            }
            SignalUpdate::BrakePedal(pressed) => {
                vehicle.brake_pressed = pressed;
            }
        }
    }
}
