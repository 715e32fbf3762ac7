//! # CAN Gateway Safety Core
//!
//! This library implements the safety-validation core of an in-line CAN
//! gateway placed between a vehicle's native control units and an external
//! driving-assistance computer.
//!
//! ## Overview
//!
//! Every inbound frame is authenticated before it may update the gateway's
//! model of vehicle state. Authentication detects:
//! - Data corruption (via CRC-8 with a per-message final XOR)
//! - Message loss, duplication, or replay (via a 4-bit rolling counter)
//! - Malformed frames (via an exact length check)
//! - Invalid signals (via an optional quality bit)
//!
//! Every outbound steering command passes a torque gate before it may be
//! relayed onto the vehicle bus: magnitude, slew rate, real-time delta and
//! driver override bounds are enforced, and nothing but zero torque is allowed
//! while controls are not engaged.
//!
//! ## Example
//!
//! ```rust
//! use can_gateway_safety::{CanFrame, SafetyMode, SafetyResult};
//! use can_gateway_safety::modes::fca_giorgio::{FcaGiorgio, ABS_1};
//! use can_gateway_safety::safety::SafetyCore;
//!
//! # fn main() -> SafetyResult<()> {
//! let mode = FcaGiorgio;
//! let config = mode.default_config();
//! let mut core = SafetyCore::new(mode, config)?;
//!
//! // Wheel speeds all zero: the vehicle is standing still
//! let frame = CanFrame::new(0, ABS_1, &[0u8; 8])?;
//! core.on_rx_frame(&frame);
//! assert!(!core.vehicle_moving());
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod authenticator;
pub mod clock;
mod common;
pub mod config;
pub mod engagement;
pub mod frame;
pub mod modes;
pub mod safety;
pub mod state;
pub mod torque;

pub use common::counter::CounterValidator;
pub use common::crc_ops::IntegrityEngine;
pub use common::sample::WindowedSample;
pub use frame::{CanFrame, MessageKey};
pub use state::{SignalUpdate, VehicleState};
pub use torque::SteeringCommand;

/// Result type for safety core operations
pub type SafetyResult<T> = Result<T, SafetyError>;

/// Outcome of authenticating one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// Every enforced check passed; the frame may update vehicle state
    Accepted,
    /// No policy covers this (bus, address); passed through unauthenticated
    Unmonitored,
    /// A check failed; the frame is dropped from the trusted stream
    Rejected(RxFault),
}

impl RxStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RxStatus::Accepted)
    }
}

/// Reason an inbound frame was rejected
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum RxFault {
    /// Data Length check failed - incorrect length
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u8, actual: u8 },
    /// CRC check failed - data corruption detected
    #[error("checksum invalid: computed 0x{expected:02X}, received 0x{actual:02X}")]
    ChecksumInvalid { expected: u8, actual: u8 },
    /// Counter check failed - message loss, duplication or replay
    #[error("counter invalid: expected {expected}, received {actual}")]
    CounterInvalid { expected: u8, actual: u8 },
    /// Quality/validity bit reported the signal as invalid
    #[error("quality flag invalid")]
    QualityFlagInvalid,
}

/// Outcome of gating one outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// All checks passed
    Allowed,
    /// The torque gate failed but enforcement is bypassed by configuration
    Bypassed(TxFault),
    /// The frame must not be placed on the bus
    Blocked(TxFault),
}

impl TxStatus {
    /// Whether the frame may be transmitted
    pub fn is_transmittable(&self) -> bool {
        !matches!(self, TxStatus::Blocked(_))
    }
}

/// Reason an outbound frame failed the gate
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum TxFault {
    #[error("message is not on the TX allow-list")]
    NotAllowListed,
    #[error("relay malfunction latched")]
    RelayMalfunction,
    #[error("torque limit exceeded: {0}")]
    TorqueLimitExceeded(TorqueViolation),
}

/// Which torque bound a steering command violated
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum TorqueViolation {
    #[error("magnitude")]
    Magnitude,
    #[error("slew rate")]
    Slew,
    #[error("real-time delta")]
    RtDelta,
    #[error("driver override")]
    Override,
    #[error("nonzero torque without steer request")]
    SteerRequestMismatch,
    #[error("nonzero torque while controls are not allowed")]
    ControlsNotAllowed,
}

/// Safety core error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SafetyError {
    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration text could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

/// Main trait for vehicle safety modes
///
/// A mode owns everything platform-specific: the default safety tables and
/// the bit layouts of the signals the core cares about. The core itself only
/// sees semantic [`SignalUpdate`]s and [`SteeringCommand`]s.
pub trait SafetyMode {
    /// Human readable mode name, used in logs
    fn name(&self) -> &'static str;

    /// Reference RX policies, TX allow-list and torque limits for this mode
    fn default_config(&self) -> config::SafetyConfig;

    /// Decode an authenticated inbound frame into a state update
    ///
    /// Returns `None` for frames that carry no signal of interest.
    fn decode_rx(&self, frame: &CanFrame) -> Option<SignalUpdate>;

    /// Decode an outbound frame as a steering command
    ///
    /// Returns `None` if the frame is not this mode's steering command.
    fn decode_steering(&self, frame: &CanFrame) -> Option<SteeringCommand>;
}
