//! The safety core: one owner for all per-session state
//!
//! `SafetyCore` runs the inbound path (relay check, authentication, state
//! update, engagement) and the outbound path (relay latch, allow-list, torque
//! gate). Both paths take `&mut self` and run to completion on the caller's
//! thread.

use std::collections::HashSet;

use crate::authenticator::MessageAuthenticator;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{CoverageGap, SafetyConfig, TxEnforcement};
use crate::frame::{CanFrame, MessageKey};
use crate::state::{StateTracker, VehicleState};
use crate::torque::{GateDecision, TorqueLimiter};
use crate::{RxFault, RxStatus, SafetyMode, SafetyResult, TxFault, TxStatus};

/// Counts of every decision the core has made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyDiagnostics {
    pub rx_accepted: u64,
    pub rx_unmonitored: u64,
    pub rx_length_mismatch: u64,
    pub rx_checksum_invalid: u64,
    pub rx_counter_invalid: u64,
    pub rx_quality_invalid: u64,
    pub tx_allowed: u64,
    pub tx_bypassed: u64,
    pub tx_not_allow_listed: u64,
    pub tx_relay_malfunction: u64,
    pub tx_torque_blocked: u64,
}

impl SafetyDiagnostics {
    pub fn rx_rejected(&self) -> u64 {
        self.rx_length_mismatch + self.rx_checksum_invalid + self.rx_counter_invalid + self.rx_quality_invalid
    }

    pub fn tx_blocked(&self) -> u64 {
        self.tx_not_allow_listed + self.tx_relay_malfunction + self.tx_torque_blocked
    }

    fn record_rx(&mut self, status: RxStatus) {
        match status {
            RxStatus::Accepted => self.rx_accepted += 1,
            RxStatus::Unmonitored => self.rx_unmonitored += 1,
            RxStatus::Rejected(RxFault::LengthMismatch { .. }) => self.rx_length_mismatch += 1,
            RxStatus::Rejected(RxFault::ChecksumInvalid { .. }) => self.rx_checksum_invalid += 1,
            RxStatus::Rejected(RxFault::CounterInvalid { .. }) => self.rx_counter_invalid += 1,
            RxStatus::Rejected(RxFault::QualityFlagInvalid) => self.rx_quality_invalid += 1,
        }
    }

    fn record_tx(&mut self, status: TxStatus) {
        match status {
            TxStatus::Allowed => self.tx_allowed += 1,
            TxStatus::Bypassed(_) => self.tx_bypassed += 1,
            TxStatus::Blocked(TxFault::NotAllowListed) => self.tx_not_allow_listed += 1,
            TxStatus::Blocked(TxFault::RelayMalfunction) => self.tx_relay_malfunction += 1,
            TxStatus::Blocked(TxFault::TorqueLimitExceeded(_)) => self.tx_torque_blocked += 1,
        }
    }
}

pub struct SafetyCore<M: SafetyMode, C: Clock = MonotonicClock> {
    mode: M,
    clock: C,
    config: SafetyConfig,
    authenticator: MessageAuthenticator,
    tracker: StateTracker,
    vehicle: VehicleState,
    limiter: TorqueLimiter,
    tx_allowed: HashSet<(MessageKey, u8)>,
    relay_checked: HashSet<MessageKey>,
    relay_malfunction: bool,
    diagnostics: SafetyDiagnostics,
}

impl<M: SafetyMode> SafetyCore<M, MonotonicClock> {
    pub fn new(mode: M, config: SafetyConfig) -> SafetyResult<Self> {
        Self::with_clock(mode, config, MonotonicClock::new())
    }
}

impl<M: SafetyMode, C: Clock> SafetyCore<M, C> {
    /// Validate `config` and build a core with neutral state
    ///
    /// # Errors
    /// Returns `SafetyError::InvalidConfiguration` if the configuration is invalid
    pub fn with_clock(mode: M, config: SafetyConfig, clock: C) -> SafetyResult<Self> {
        config.validate()?;

        log::info!(
            "Safety mode {}: {} monitored RX messages, {} allowed TX messages",
            mode.name(),
            config.rx_checks.len(),
            config.tx_msgs.len()
        );
        for gap in config.coverage_gaps() {
            match gap.key {
                Some(key) => log::warn!("Coverage gap on {}: {:?}", key, gap.kind),
                None => log::warn!("Coverage gap: {:?}", gap.kind),
            }
        }

        Ok(Self {
            authenticator: MessageAuthenticator::new(&config),
            limiter: TorqueLimiter::new(config.steering),
            tx_allowed: config
                .tx_msgs
                .iter()
                .map(|msg| (msg.key(), msg.length))
                .collect(),
            relay_checked: config
                .tx_msgs
                .iter()
                .filter(|msg| msg.check_relay)
                .map(|msg| msg.key())
                .collect(),
            tracker: StateTracker::new(),
            vehicle: VehicleState::default(),
            relay_malfunction: false,
            diagnostics: SafetyDiagnostics::default(),
            mode,
            clock,
            config,
        })
    }

    /// Process one inbound frame
    ///
    /// Only accepted frames update vehicle state. The returned status is for
    /// diagnostics; callers may ignore it.
    pub fn on_rx_frame(&mut self, frame: &CanFrame) -> RxStatus {
        let now_us = self.clock.now_us();

        if self.relay_checked.contains(&frame.key()) && !self.relay_malfunction {
            log::warn!("Relay malfunction: {} received from the vehicle", frame.key());
            self.relay_malfunction = true;
        }

        let status = self.authenticator.authenticate(frame, now_us);
        match status {
            RxStatus::Accepted => {
                if let Some(update) = self.mode.decode_rx(frame) {
                    self.tracker.apply(&mut self.vehicle, update);
                }
            }
            RxStatus::Unmonitored => log::trace!("Unmonitored frame {}", frame.key()),
            RxStatus::Rejected(fault) => log::debug!("Rejected frame {}: {}", frame.key(), fault),
        }
        self.diagnostics.record_rx(status);
        status
    }

    /// Decide whether an outbound frame may be placed on the bus
    pub fn check_tx(&mut self, frame: &CanFrame) -> TxStatus {
        let now_us = self.clock.now_us();
        let status = self.gate_tx(frame, now_us);
        match status {
            TxStatus::Allowed => {}
            TxStatus::Bypassed(fault) => {
                log::warn!("Transmitting {} despite {} (enforcement bypassed)", frame.key(), fault)
            }
            TxStatus::Blocked(fault) => log::debug!("Blocked frame {}: {}", frame.key(), fault),
        }
        self.diagnostics.record_tx(status);
        status
    }

    fn gate_tx(&mut self, frame: &CanFrame, now_us: u64) -> TxStatus {
        if self.relay_malfunction {
            return TxStatus::Blocked(TxFault::RelayMalfunction);
        }
        if !self.tx_allowed.contains(&(frame.key(), frame.len())) {
            return TxStatus::Blocked(TxFault::NotAllowListed);
        }
        let Some(command) = self.mode.decode_steering(frame) else {
            return TxStatus::Allowed;
        };
        match self.limiter.gate(command, &self.vehicle, now_us) {
            GateDecision::Allow => TxStatus::Allowed,
            GateDecision::Block(violation) => {
                let fault = TxFault::TorqueLimitExceeded(violation);
                match self.config.tx_enforcement {
                    TxEnforcement::Enforced => TxStatus::Blocked(fault),
                    TxEnforcement::Bypass => TxStatus::Bypassed(fault),
                }
            }
        }
    }

    pub fn should_transmit(&mut self, frame: &CanFrame) -> bool {
        self.check_tx(frame).is_transmittable()
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn state(&self) -> &VehicleState {
        &self.vehicle
    }

    pub fn controls_allowed(&self) -> bool {
        self.vehicle.controls_allowed()
    }

    pub fn vehicle_moving(&self) -> bool {
        self.vehicle.vehicle_moving()
    }

    pub fn brake_pressed(&self) -> bool {
        self.vehicle.brake_pressed()
    }

    pub fn relay_malfunction(&self) -> bool {
        self.relay_malfunction
    }

    pub fn diagnostics(&self) -> &SafetyDiagnostics {
        &self.diagnostics
    }

    pub fn authenticator(&self) -> &MessageAuthenticator {
        &self.authenticator
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn limiter(&self) -> &TorqueLimiter {
        &self.limiter
    }

    pub fn coverage_gaps(&self) -> Vec<CoverageGap> {
        self.config.coverage_gaps()
    }

    /// Monitored messages overdue at the current time
    pub fn lagging_messages(&self) -> Vec<MessageKey> {
        self.authenticator.lagging(self.clock.now_us())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CoverageGapKind, RxCheck};
    use crate::engagement::EngagementState;
    use crate::modes::fca_giorgio::*;
    use crate::{SafetyError, TorqueViolation};

    const STEP_US: u64 = 10_000;

    struct Bench {
        core: SafetyCore<FcaGiorgio, ManualClock>,
        clock: ManualClock,
    }

    impl Bench {
        fn new() -> Self {
            Self::with_config(FcaGiorgio.default_config())
        }

        fn with_config(config: SafetyConfig) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let clock = ManualClock::new();
            let core = SafetyCore::with_clock(FcaGiorgio, config, clock.clone()).unwrap();
            Self { core, clock }
        }

        fn rx(&mut self, address: u32, payload: &[u8]) -> RxStatus {
            self.clock.advance(STEP_US);
            let frame = CanFrame::new(MAIN_BUS, address, payload).unwrap();
            self.core.on_rx_frame(&frame)
        }

        fn cruise(&mut self, status: u8) {
            let status = self.rx(ACC_1, &[0, 0, status << 5, 0, 0, 0, 0, 0]);
            assert_eq!(status, RxStatus::Accepted);
        }

        fn driver_torque(&mut self, torque: i32) {
            let raw = (torque + 2048) as u16;
            let payload = [(raw >> 4) as u8, ((raw & 0xF) << 4) as u8, 0, 0];
            for _ in 0..6 {
                self.rx(EPS_3, &payload);
            }
        }

        fn steer(&mut self, torque: i32) -> TxStatus {
            self.clock.advance(STEP_US);
            let frame = CanFrame::new(MAIN_BUS, LKA_COMMAND, &lka_command_payload(torque, true)).unwrap();
            self.core.check_tx(&frame)
        }

        fn ramp_to(&mut self, target: i32) {
            let mut torque = self.core.limiter().desired_torque_last();
            while torque != target {
                torque += (target - torque).clamp(-4, 4);
                assert_eq!(self.steer(torque), TxStatus::Allowed, "ramp at {}", torque);
            }
        }
    }

    #[test]
    fn test_wheel_speed_end_to_end() {
        let mut bench = Bench::new();
        assert_eq!(bench.rx(ABS_1, &[0u8; 8]), RxStatus::Accepted);
        assert!(!bench.core.vehicle_moving());
        // RR = 1 in the same message
        bench.rx(ABS_1, &[0, 0, 0, 0, 0, 0, 0x10, 0]);
        assert!(bench.core.vehicle_moving());
        bench.rx(ABS_1, &[0u8; 8]);
        assert!(!bench.core.vehicle_moving());
    }

    #[test]
    fn test_rejected_frame_does_not_update_state() {
        let mut bench = Bench::new();
        let status = bench.rx(ABS_1, &[0xFF; 7]);
        assert!(matches!(status, RxStatus::Rejected(RxFault::LengthMismatch { .. })));
        assert!(!bench.core.vehicle_moving());
        assert_eq!(bench.core.diagnostics().rx_rejected(), 1);
    }

    #[test]
    fn test_unmonitored_frame_not_decoded() {
        let mut config = FcaGiorgio.default_config();
        config.rx_checks.retain(|c| c.address != ABS_3);
        let mut bench = Bench::with_config(config);
        assert_eq!(bench.rx(ABS_3, &[0x08, 0, 0, 0, 0, 0, 0, 0]), RxStatus::Unmonitored);
        assert!(!bench.core.brake_pressed());
    }

    #[test]
    fn test_brake_signal() {
        let mut bench = Bench::new();
        bench.rx(ABS_3, &[0x08, 0, 0, 0, 0, 0, 0, 0]);
        assert!(bench.core.brake_pressed());
    }

    #[test]
    fn test_engagement_sequence() {
        let mut bench = Bench::new();
        bench.cruise(0);
        bench.cruise(1);
        assert!(!bench.core.controls_allowed());
        bench.cruise(2);
        assert!(bench.core.controls_allowed());
        assert_eq!(bench.core.tracker().engagement().state(), EngagementState::Engaged);
        bench.cruise(0);
        assert!(!bench.core.controls_allowed());
        assert_eq!(bench.core.tracker().engagement().state(), EngagementState::Disengaged);
        assert!(!bench.core.state().acc_main_on());
    }

    #[test]
    fn test_steering_blocked_until_engaged() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.steer(4),
            TxStatus::Blocked(TxFault::TorqueLimitExceeded(TorqueViolation::ControlsNotAllowed))
        );
        assert_eq!(bench.steer(0), TxStatus::Allowed);
        bench.cruise(1);
        bench.cruise(4);
        assert_eq!(bench.steer(4), TxStatus::Allowed);
        assert!(bench.core.should_transmit(&CanFrame::new(MAIN_BUS, LKA_COMMAND, &lka_command_payload(8, true)).unwrap()));
    }

    #[test]
    fn test_torque_boundary_through_core() {
        let mut bench = Bench::new();
        bench.cruise(1);
        bench.cruise(2);
        bench.ramp_to(300);
        assert_eq!(
            bench.steer(301),
            TxStatus::Blocked(TxFault::TorqueLimitExceeded(TorqueViolation::Magnitude))
        );
        assert_eq!(bench.core.diagnostics().tx_torque_blocked, 1);
    }

    #[test]
    fn test_driver_override_through_core() {
        let mut bench = Bench::new();
        bench.cruise(1);
        bench.cruise(2);
        bench.driver_torque(2 * STEERING_LIMITS.driver_torque_allowance);
        assert_eq!(bench.core.state().driver_torque().min(), 160);
        bench.ramp_to(-60);
        assert_eq!(
            bench.steer(-64),
            TxStatus::Blocked(TxFault::TorqueLimitExceeded(TorqueViolation::Override))
        );
    }

    #[test]
    fn test_allow_list() {
        let mut bench = Bench::new();
        let unknown = CanFrame::new(MAIN_BUS, 0x123, &[0u8; 8]).unwrap();
        assert_eq!(bench.core.check_tx(&unknown), TxStatus::Blocked(TxFault::NotAllowListed));
        let wrong_len = CanFrame::new(MAIN_BUS, LKA_HUD_1, &[0u8; 4]).unwrap();
        assert!(!bench.core.should_transmit(&wrong_len));
        let wrong_bus = CanFrame::new(CAM_BUS, LKA_HUD_1, &[0u8; 8]).unwrap();
        assert!(!bench.core.should_transmit(&wrong_bus));

        let hud = CanFrame::new(MAIN_BUS, LKA_HUD_1, &[0u8; 8]).unwrap();
        assert!(bench.core.should_transmit(&hud));
        let button = CanFrame::new(CAM_BUS, ACC_BUTTON, &[0u8; 3]).unwrap();
        assert!(bench.core.should_transmit(&button));
    }

    #[test]
    fn test_relay_malfunction_latches() {
        let mut bench = Bench::new();
        assert_eq!(bench.rx(LKA_COMMAND, &[0u8; 8]), RxStatus::Unmonitored);
        assert!(bench.core.relay_malfunction());
        let hud = CanFrame::new(MAIN_BUS, LKA_HUD_1, &[0u8; 8]).unwrap();
        assert_eq!(bench.core.check_tx(&hud), TxStatus::Blocked(TxFault::RelayMalfunction));

        // Camera-side button traffic does not trip the relay check
        let mut bench = Bench::new();
        let frame = CanFrame::new(CAM_BUS, ACC_BUTTON, &[0u8; 3]).unwrap();
        bench.core.on_rx_frame(&frame);
        assert!(!bench.core.relay_malfunction());
    }

    #[test]
    fn test_bypass_transmits_but_reports() {
        let mut config = FcaGiorgio.default_config();
        config.tx_enforcement = TxEnforcement::Bypass;
        let mut bench = Bench::with_config(config);
        assert!(bench
            .core
            .coverage_gaps()
            .iter()
            .any(|g| g.kind == CoverageGapKind::TxEnforcementBypassed));

        let fault = TxFault::TorqueLimitExceeded(TorqueViolation::ControlsNotAllowed);
        assert_eq!(bench.steer(100), TxStatus::Bypassed(fault));
        assert_eq!(bench.core.diagnostics().tx_bypassed, 1);

        // The allow-list is never bypassed
        let unknown = CanFrame::new(MAIN_BUS, 0x123, &[0u8; 8]).unwrap();
        assert!(!bench.core.should_transmit(&unknown));
    }

    #[test]
    fn test_authenticated_mode_config() {
        let mut config = FcaGiorgio.default_config();
        config.integrity.retain(|o| o.address != ABS_1);
        config.rx_checks[1] = RxCheck {
            ignore_checksum: false,
            ignore_counter: false,
            max_counter: 15,
            ..config.rx_checks[1].clone()
        };
        let mut bench = Bench::with_config(config);

        let mut payload = [0, 0, 0, 0, 0, 0, 0x10 | 0x03, 0];
        bench.core.authenticator().integrity().seal(ABS_1, &mut payload).unwrap();
        assert_eq!(bench.rx(ABS_1, &payload), RxStatus::Accepted);
        assert!(bench.core.vehicle_moving());

        // Same frame again: counter did not advance
        assert!(matches!(
            bench.rx(ABS_1, &payload),
            RxStatus::Rejected(RxFault::CounterInvalid { expected: 4, actual: 3 })
        ));

        let mut still = [0, 0, 0, 0, 0, 0, 0x04, 0];
        bench.core.authenticator().integrity().seal(ABS_1, &mut still).unwrap();
        still[7] ^= 0x5A;
        assert!(matches!(
            bench.rx(ABS_1, &still),
            RxStatus::Rejected(RxFault::ChecksumInvalid { .. })
        ));
        assert!(bench.core.vehicle_moving());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FcaGiorgio.default_config();
        config.steering.max_torque = 0;
        assert!(matches!(
            SafetyCore::new(FcaGiorgio, config),
            Err(SafetyError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_lagging_messages() {
        let mut bench = Bench::new();
        assert_eq!(bench.core.lagging_messages().len(), 4);
        bench.rx(ABS_1, &[0u8; 8]);
        bench.rx(ABS_3, &[0u8; 8]);
        bench.rx(EPS_3, &[0x80, 0, 0, 0]);
        bench.cruise(0);
        assert!(bench.core.lagging_messages().is_empty());

        // 100 Hz messages lag after 100 ms, ACC_1 (12 Hz) after ~833 ms
        bench.clock.advance(200_000);
        assert_eq!(
            bench.core.lagging_messages(),
            vec![
                MessageKey::new(MAIN_BUS, ABS_1),
                MessageKey::new(MAIN_BUS, ABS_3),
                MessageKey::new(MAIN_BUS, EPS_3),
            ]
        );
        // Lagging is reported only; engagement is untouched
        assert!(!bench.core.controls_allowed());
    }

    #[test]
    fn test_diagnostics_counts() {
        let mut bench = Bench::new();
        bench.rx(ABS_1, &[0u8; 8]);
        bench.rx(0x7FF, &[0u8; 2]);
        bench.rx(ABS_1, &[0u8; 3]);
        let frame = CanFrame::new(MAIN_BUS, LKA_HUD_2, &[0u8; 8]).unwrap();
        bench.core.should_transmit(&frame);
        let d = bench.core.diagnostics();
        assert_eq!(d.rx_accepted, 1);
        assert_eq!(d.rx_unmonitored, 1);
        assert_eq!(d.rx_length_mismatch, 1);
        assert_eq!(d.tx_allowed, 1);
        assert_eq!(d.tx_blocked(), 0);
    }
}
