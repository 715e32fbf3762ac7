//! # FCA Giorgio Safety Mode
//!
//! Giorgio-platform vehicles carry an 8-bit CRC in the last byte and a 4-bit
//! rolling counter in the low nibble of the second-to-last byte. The CRC uses
//! polynomial 0x2F with a per-message final XOR; most final XOR values are not
//! recovered yet, so the reference tables authenticate by length only and
//! record the missing checks as coverage gaps.
//!
//! # Buses
//! - bus 0: vehicle powertrain (the bus the gateway transmits on)
//! - bus 2: camera side
//!
//! # Signal layouts
//! Bit numbers are LSB-first within each byte (bit 11 = byte 1, bit 3).
//!
//! | Message     | Signal             | Layout                                                    |
//! |-------------|--------------------|-----------------------------------------------------------|
//! | ABS_1       | WHEEL_SPEED_FL     | 13 bits: `d0[7:0]` . `d1[7:3]`                            |
//! | ABS_1       | WHEEL_SPEED_FR     | 13 bits: `d1[2:0]` . `d2[7:0]` . `d3[7:6]`                |
//! | ABS_1       | WHEEL_SPEED_RL     | 13 bits: `d3[5:0]` . `d4[7:1]`                            |
//! | ABS_1       | WHEEL_SPEED_RR     | 13 bits: `d4[0]` . `d5[7:0]` . `d6[7:4]`                  |
//! | EPS_3       | EPS_TORQUE         | 12 bits: `d0[7:0]` . `d1[7:4]`, biased by 2048           |
//! | ACC_1       | CRUISE_STATUS      | 3 bits: `d2[7:5]`                                         |
//! | ABS_3       | BRAKE_PEDAL_SWITCH | bit 3                                                     |
//! | LKA_COMMAND | LKA_TORQUE         | 11 bits: `d0[7:0]` . `d1[7:5]`, biased by 1024           |
//! | LKA_COMMAND | LKA_ACTIVE         | bit 11                                                    |

use crate::common::field_ops::{get_bit, unbias};
use crate::config::{
    IntegrityOverride, IntegrityState, RxCheck, SafetyConfig, TorqueLimits, TxEnforcement, TxMsg,
};
use crate::frame::CanFrame;
use crate::state::SignalUpdate;
use crate::torque::SteeringCommand;
use crate::SafetyMode;

// Buses
pub const MAIN_BUS: u8 = 0;
pub const CAM_BUS: u8 = 2;

// Messages
pub const ABS_1: u32 = 0xEE;
pub const ABS_3: u32 = 0xFA;
pub const EPS_3: u32 = 0x122;
pub const LKA_COMMAND: u32 = 0x1F6;
pub const LKA_HUD_1: u32 = 0x4AE;
pub const LKA_HUD_2: u32 = 0x547;
pub const ACC_1: u32 = 0x5A2;
pub const ACC_BUTTON: u32 = 0x2FA;

// Signal encodings
const EPS_TORQUE_BIAS: i32 = 2048;
const LKA_TORQUE_BIAS: i32 = 1024;
const LKA_TORQUE_MASK: u16 = 0x7FF;
const LKA_ACTIVE_BIT: u16 = 11;
const BRAKE_PEDAL_SWITCH_BIT: u16 = 3;

pub const STEERING_LIMITS: TorqueLimits = TorqueLimits {
    max_torque: 300,
    max_rate_up: 4,
    max_rate_down: 4,
    max_rt_delta: 150,
    driver_torque_allowance: 80,
    driver_torque_multiplier: 3,
};

/// ACC_1.CRUISE_STATUS values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CruiseStatus {
    Off,
    /// Main switch on, cruise not engaged (1, 3, 5)
    Standby(u8),
    /// Cruise engaged (2, 4)
    Engaged(u8),
    /// Values 6 and 7 are not seen on the bus
    Unknown(u8),
}

impl CruiseStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => CruiseStatus::Off,
            2 | 4 => CruiseStatus::Engaged(raw),
            1 | 3 | 5 => CruiseStatus::Standby(raw),
            _ => CruiseStatus::Unknown(raw),
        }
    }

    pub fn cruise_engaged(&self) -> bool {
        matches!(self, CruiseStatus::Engaged(_))
    }

    pub fn acc_main_on(&self) -> bool {
        matches!(self, CruiseStatus::Engaged(_) | CruiseStatus::Standby(_))
    }
}

/// ABS_1: four 13-bit wheel speeds, FL, FR, RL, RR
pub fn decode_wheel_speeds(frame: &CanFrame) -> Option<[u16; 4]> {
    let d: [u8; 8] = frame.payload().try_into().ok()?;
    let d = d.map(u16::from);
    let fl = (d[1] >> 3) | (d[0] << 5);
    let fr = (d[3] >> 6) | (d[2] << 2) | ((d[1] & 0x7) << 10);
    let rl = (d[4] >> 1) | ((d[3] & 0x3F) << 7);
    let rr = (d[6] >> 4) | (d[5] << 4) | ((d[4] & 0x1) << 12);
    Some([fl, fr, rl, rr])
}

/// EPS_3: driver torque
pub fn decode_driver_torque(frame: &CanFrame) -> Option<i32> {
    let [b0, b1, ..] = frame.payload() else {
        return None;
    };
    let raw = ((*b1 as u32) >> 4) | ((*b0 as u32) << 4);
    Some(unbias(raw, EPS_TORQUE_BIAS))
}

/// ACC_1: cruise status
pub fn decode_cruise_status(frame: &CanFrame) -> Option<CruiseStatus> {
    let b2 = *frame.payload().get(2)?;
    Some(CruiseStatus::from_raw((b2 & 0xE0) >> 5))
}

/// ABS_3: brake pedal switch
pub fn decode_brake_pressed(frame: &CanFrame) -> Option<bool> {
    if frame.is_empty() {
        return None;
    }
    Some(get_bit(frame.payload(), BRAKE_PEDAL_SWITCH_BIT))
}

/// LKA_COMMAND: requested torque and steer request
pub fn decode_lka_command(frame: &CanFrame) -> Option<SteeringCommand> {
    let [b0, b1, ..] = frame.payload() else {
        return None;
    };
    let raw = ((*b0 as u32) << 3) | ((*b1 as u32) >> 5);
    Some(SteeringCommand {
        desired_torque: unbias(raw, LKA_TORQUE_BIAS),
        steer_request: get_bit(frame.payload(), LKA_ACTIVE_BIT),
    })
}

/// Build an LKA_COMMAND payload; torque is clamped to the 11-bit signal range
pub fn lka_command_payload(desired_torque: i32, steer_request: bool) -> [u8; 8] {
    let raw = desired_torque.saturating_add(LKA_TORQUE_BIAS).clamp(0, LKA_TORQUE_MASK as i32) as u16;
    let mut payload = [0u8; 8];
    payload[0] = (raw >> 3) as u8;
    payload[1] = ((raw & 0x7) << 5) as u8 | ((steer_request as u8) << (LKA_ACTIVE_BIT - 8));
    payload
}

/// FCA Giorgio safety mode
#[derive(Debug, Clone, Copy, Default)]
pub struct FcaGiorgio;

impl FcaGiorgio {
    fn length_only(address: u32, length: u8, frequency_hz: u32) -> RxCheck {
        RxCheck {
            bus: MAIN_BUS,
            address,
            length,
            frequency_hz,
            ignore_checksum: true,
            ignore_counter: true,
            ignore_quality_flag: true,
            max_counter: 0,
            quality_bit: None,
        }
    }

    fn tx(bus: u8, address: u32, length: u8, check_relay: bool) -> TxMsg {
        TxMsg {
            bus,
            address,
            length,
            check_relay,
        }
    }
}

impl SafetyMode for FcaGiorgio {
    fn name(&self) -> &'static str {
        "fca_giorgio"
    }

    fn default_config(&self) -> SafetyConfig {
        SafetyConfig {
            // TODO: enforce checksum and counter on ABS_1 and EPS_3 once their final XORs are recovered
            rx_checks: vec![
                Self::length_only(ACC_1, 8, 12),
                Self::length_only(ABS_1, 8, 100),
                Self::length_only(ABS_3, 8, 100),
                Self::length_only(EPS_3, 4, 100),
            ],
            tx_msgs: vec![
                Self::tx(MAIN_BUS, LKA_COMMAND, 8, true),
                Self::tx(MAIN_BUS, LKA_HUD_1, 8, true),
                Self::tx(MAIN_BUS, LKA_HUD_2, 8, true),
                Self::tx(MAIN_BUS, ACC_BUTTON, 3, false),
                Self::tx(CAM_BUS, ACC_BUTTON, 3, false),
            ],
            steering: STEERING_LIMITS,
            integrity: vec![
                IntegrityOverride {
                    address: 0xFF,
                    state: IntegrityState::Resolved { final_xor: 0xFF },
                },
                IntegrityOverride {
                    address: ABS_1,
                    state: IntegrityState::Unresolved,
                },
                IntegrityOverride {
                    address: EPS_3,
                    state: IntegrityState::Unresolved,
                },
            ],
            tx_enforcement: TxEnforcement::Enforced,
        }
    }

    fn decode_rx(&self, frame: &CanFrame) -> Option<SignalUpdate> {
        if frame.bus() != MAIN_BUS {
            return None;
        }
        match frame.address() {
            ABS_1 => decode_wheel_speeds(frame).map(SignalUpdate::WheelSpeeds),
            EPS_3 => decode_driver_torque(frame).map(SignalUpdate::DriverTorque),
            ACC_1 => decode_cruise_status(frame).map(|status| SignalUpdate::CruiseStatus {
                cruise_engaged: status.cruise_engaged(),
                acc_main_on: status.acc_main_on(),
            }),
            ABS_3 => decode_brake_pressed(frame).map(SignalUpdate::BrakePedal),
            _ => None,
        }
    }

    fn decode_steering(&self, frame: &CanFrame) -> Option<SteeringCommand> {
        if frame.address() != LKA_COMMAND {
            return None;
        }
        decode_lka_command(frame)
    }
}
