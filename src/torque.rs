//! Steering torque gate
//!
//! A steering command is allowed only if every bound holds:
//! - magnitude: `|torque| <= max_torque`
//! - steer request: nonzero torque requires the steer request bit
//! - slew: magnitude grows by at most `max_rate_up` and shrinks by at most
//!   `max_rate_down` relative to the last allowed command
//! - driver override: the command stays inside the envelope left by the
//!   driver's torque; outside it, the command must move toward zero by at
//!   least `max_rate_down` per cycle
//! - real-time delta: within each [`RT_INTERVAL_US`] window the command stays
//!   within `max_rt_delta` of the window's reference command
//!
//! While controls are not allowed only zero torque passes and the history
//! resets.

use crate::common::sample::WindowedSample;
use crate::config::TorqueLimits;
use crate::state::VehicleState;
use crate::TorqueViolation;

/// Length of the real-time delta window
pub const RT_INTERVAL_US: u64 = 250_000;

/// Decoded outbound steering command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteeringCommand {
    pub desired_torque: i32,
    pub steer_request: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Block(TorqueViolation),
}

#[derive(Debug, Clone)]
pub struct TorqueLimiter {
    limits: TorqueLimits,
    /// Last allowed command
    desired_torque_last: i32,
    /// Reference command of the current real-time window
    rt_torque_last: i32,
    ts_rt_window_start: u64,
}

impl TorqueLimiter {
    pub fn new(limits: TorqueLimits) -> Self {
        Self {
            limits,
            desired_torque_last: 0,
            rt_torque_last: 0,
            ts_rt_window_start: 0,
        }
    }

    pub fn limits(&self) -> &TorqueLimits {
        &self.limits
    }

    pub fn desired_torque_last(&self) -> i32 {
        self.desired_torque_last
    }

    pub fn rt_torque_last(&self) -> i32 {
        self.rt_torque_last
    }

    fn reset(&mut self, now_us: u64) {
        self.desired_torque_last = 0;
        self.rt_torque_last = 0;
        self.ts_rt_window_start = now_us;
    }

    /// Gate one command observed at `now_us`
    pub fn gate(&mut self, command: SteeringCommand, vehicle: &VehicleState, now_us: u64) -> GateDecision {
        let desired = command.desired_torque;

        if !vehicle.controls_allowed() {
            self.reset(now_us);
            return if desired == 0 {
                GateDecision::Allow
            } else {
                GateDecision::Block(TorqueViolation::ControlsNotAllowed)
            };
        }

        let violation = self
            .check_magnitude(desired)
            .or_else(|| Self::check_steer_request(command))
            .or_else(|| self.check_slew(desired))
            .or_else(|| self.check_driver_override(desired, vehicle.driver_torque()))
            .or_else(|| self.check_rt_delta(desired));

        // Every observed command may start a new real-time window
        if now_us.saturating_sub(self.ts_rt_window_start) > RT_INTERVAL_US {
            self.rt_torque_last = desired;
            self.ts_rt_window_start = now_us;
        }

        match violation {
            None => {
                self.desired_torque_last = desired;
                GateDecision::Allow
            }
            Some(violation) => GateDecision::Block(violation),
        }
    }

    fn check_magnitude(&self, desired: i32) -> Option<TorqueViolation> {
        (desired.abs() > self.limits.max_torque).then_some(TorqueViolation::Magnitude)
    }

    fn check_steer_request(command: SteeringCommand) -> Option<TorqueViolation> {
        (!command.steer_request && command.desired_torque != 0)
            .then_some(TorqueViolation::SteerRequestMismatch)
    }

    fn check_slew(&self, desired: i32) -> Option<TorqueViolation> {
        let last = self.desired_torque_last;
        let up = self.limits.max_rate_up;
        let down = self.limits.max_rate_down;

        let highest = if last >= 0 {
            last.saturating_add(up)
        } else {
            last.saturating_add(down).min(up)
        };
        let lowest = if last <= 0 {
            last.saturating_sub(up)
        } else {
            last.saturating_sub(down).max(-up)
        };

        (desired > highest || desired < lowest).then_some(TorqueViolation::Slew)
    }

    fn check_driver_override(&self, desired: i32, driver: &WindowedSample) -> Option<TorqueViolation> {
        let last = self.desired_torque_last;
        let l = &self.limits;

        let driver_max_limit = l.max_torque.saturating_add(
            l.driver_torque_allowance
                .saturating_add(driver.max())
                .saturating_mul(l.driver_torque_multiplier),
        );
        let driver_min_limit = l.max_torque.saturating_neg().saturating_add(
            driver
                .min()
                .saturating_sub(l.driver_torque_allowance)
                .saturating_mul(l.driver_torque_multiplier),
        );

        // Beyond the driver's envelope the command must head toward zero
        let highest = last.saturating_sub(l.max_rate_down).max(driver_max_limit.max(0));
        let lowest = last.saturating_add(l.max_rate_down).min(driver_min_limit.min(0));

        (desired > highest || desired < lowest).then_some(TorqueViolation::Override)
    }

    fn check_rt_delta(&self, desired: i32) -> Option<TorqueViolation> {
        let highest = self.rt_torque_last.max(0).saturating_add(self.limits.max_rt_delta);
        let lowest = self.rt_torque_last.min(0).saturating_sub(self.limits.max_rt_delta);

        (desired > highest || desired < lowest).then_some(TorqueViolation::RtDelta)
    }
}
