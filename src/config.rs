//! Safety configuration types
//!
//! The configuration is the declarative part of the core: which inbound
//! messages are authenticated and how, which outbound messages may be sent,
//! and the torque bounds for steering commands. It is built once, validated,
//! and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::common::validation;
use crate::frame::MessageKey;
use crate::{SafetyError, SafetyResult};

/// A monitored message may miss this many periods before it counts as lagging
pub const MAX_MISSED_MESSAGES: u64 = 10;

/// Authentication policy for one monitored inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxCheck {
    pub bus: u8,
    pub address: u32,
    /// Expected payload length in bytes
    pub length: u8,
    /// Nominal transmit frequency
    pub frequency_hz: u32,
    #[serde(default)]
    pub ignore_checksum: bool,
    #[serde(default)]
    pub ignore_counter: bool,
    #[serde(default)]
    pub ignore_quality_flag: bool,
    /// Largest counter value; the counter wraps to 0 after it
    #[serde(default)]
    pub max_counter: u8,
    /// Bit position of a validity flag that must read 1, if the message has one
    #[serde(default)]
    pub quality_bit: Option<u16>,
}

impl RxCheck {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.bus, self.address)
    }

    /// Number of distinct counter values
    pub fn counter_modulus(&self) -> u16 {
        self.max_counter as u16 + 1
    }

    /// Longest gap between two frames before the message is lagging
    pub fn max_interval_us(&self) -> u64 {
        (1_000_000 / self.frequency_hz.max(1) as u64) * MAX_MISSED_MESSAGES
    }
}

/// One entry of the TX allow-list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMsg {
    pub bus: u8,
    pub address: u32,
    pub length: u8,
    /// Seeing this message inbound means the relay is not isolating the ECU
    #[serde(default)]
    pub check_relay: bool,
}

impl TxMsg {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.bus, self.address)
    }
}

/// Static bounds for steering torque commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorqueLimits {
    pub max_torque: i32,
    /// Largest magnitude increase per command
    pub max_rate_up: i32,
    /// Largest magnitude decrease per command; also the minimum decrease while
    /// the command exceeds the driver override envelope
    pub max_rate_down: i32,
    /// Largest change relative to the real-time reference within one window
    pub max_rt_delta: i32,
    /// Driver torque below which the gateway keeps full authority
    pub driver_torque_allowance: i32,
    pub driver_torque_multiplier: i32,
}

/// Whether the final XOR of a message's CRC is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityState {
    Resolved { final_xor: u8 },
    /// The CRC cannot be verified until the final XOR is recovered
    Unresolved,
}

impl Default for IntegrityState {
    fn default() -> Self {
        IntegrityState::Resolved { final_xor: 0 }
    }
}

/// Per-address CRC parameter override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityOverride {
    pub address: u32,
    pub state: IntegrityState,
}

/// Whether torque gate failures block transmission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEnforcement {
    #[default]
    Enforced,
    /// Bring-up only: torque violations are reported but still transmitted
    Bypass,
}

/// Kind of weakening recorded by a [`CoverageGap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverageGapKind {
    ChecksumIgnored,
    ChecksumUnresolved,
    CounterIgnored,
    QualityFlagIgnored,
    TxEnforcementBypassed,
}

/// A check the configuration deliberately does not perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoverageGap {
    /// Affected message, `None` for gaps that apply to the whole core
    pub key: Option<MessageKey>,
    pub kind: CoverageGapKind,
}

/// Complete configuration of a safety core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub rx_checks: Vec<RxCheck>,
    pub tx_msgs: Vec<TxMsg>,
    pub steering: TorqueLimits,
    #[serde(default)]
    pub integrity: Vec<IntegrityOverride>,
    #[serde(default)]
    pub tx_enforcement: TxEnforcement,
}

impl SafetyConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(text: &str) -> SafetyResult<Self> {
        let config: SafetyConfig =
            toml::from_str(text).map_err(|e| SafetyError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> SafetyResult<Self> {
        let path = path.as_ref();
        log::info!("Loading safety configuration: {:?}", path);
        let text = std::fs::read_to_string(path)
            .map_err(|e| SafetyError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SafetyResult<String> {
        toml::to_string(self).map_err(|e| SafetyError::ConfigParse(e.to_string()))
    }

    /// Final XOR state for an address; unlisted addresses use 0
    pub fn integrity_state(&self, address: u32) -> IntegrityState {
        self.integrity
            .iter()
            .rev()
            .find(|o| o.address == address)
            .map(|o| o.state)
            .unwrap_or_default()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> SafetyResult<()> {
        let mut seen = HashSet::new();
        for check in &self.rx_checks {
            if !seen.insert(check.key()) {
                return Err(SafetyError::InvalidConfiguration(format!(
                    "Duplicate RX check for {}",
                    check.key()
                )));
            }
            validation::validate_rx_check(check, self.integrity_state(check.address))?;
        }

        let mut seen = HashSet::new();
        for msg in &self.tx_msgs {
            if !seen.insert((msg.key(), msg.length)) {
                return Err(SafetyError::InvalidConfiguration(format!(
                    "Duplicate TX entry for {}",
                    msg.key()
                )));
            }
            validation::validate_payload_length(msg.length)?;
        }

        validation::validate_torque_limits(&self.steering)
    }

    /// Every check this configuration intentionally skips
    pub fn coverage_gaps(&self) -> Vec<CoverageGap> {
        let mut gaps = Vec::new();
        for check in &self.rx_checks {
            let key = Some(check.key());
            if check.ignore_checksum {
                let kind = match self.integrity_state(check.address) {
                    IntegrityState::Unresolved => CoverageGapKind::ChecksumUnresolved,
                    IntegrityState::Resolved { .. } => CoverageGapKind::ChecksumIgnored,
                };
                gaps.push(CoverageGap { key, kind });
            }
            if check.ignore_counter {
                gaps.push(CoverageGap {
                    key,
                    kind: CoverageGapKind::CounterIgnored,
                });
            }
            if check.ignore_quality_flag {
                gaps.push(CoverageGap {
                    key,
                    kind: CoverageGapKind::QualityFlagIgnored,
                });
            }
        }
        if self.tx_enforcement == TxEnforcement::Bypass {
            gaps.push(CoverageGap {
                key: None,
                kind: CoverageGapKind::TxEnforcementBypassed,
            });
        }
        gaps
    }
}
