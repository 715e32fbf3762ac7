use crc::{Algorithm, Crc};
use std::collections::HashMap;

use crate::config::{IntegrityOverride, IntegrityState};
use crate::frame::CanFrame;
use crate::{SafetyError, SafetyResult};

/// CRC-8 with generator polynomial 0x2F, zero init and no output XOR.
/// The per-message final XOR is applied on top by [`IntegrityEngine`].
pub const CRC8_POLY_2F: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x2f,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0x3e,
    residue: 0x00,
};

/// Table-driven integrity code engine
///
/// The 256-entry lookup table is built once in [`IntegrityEngine::new`];
/// computing a code is pure table lookup. Final XOR constants are kept per
/// address and may be changed without touching the table.
pub struct IntegrityEngine {
    crc: Crc<u8>,
    overrides: HashMap<u32, IntegrityState>,
}

impl IntegrityEngine {
    pub fn new(overrides: &[IntegrityOverride]) -> Self {
        Self::with_algorithm(&CRC8_POLY_2F, overrides)
    }

    pub fn with_algorithm(algorithm: &'static Algorithm<u8>, overrides: &[IntegrityOverride]) -> Self {
        Self {
            crc: Crc::<u8>::new(algorithm),
            overrides: overrides.iter().map(|o| (o.address, o.state)).collect(),
        }
    }

    pub fn integrity_state(&self, address: u32) -> IntegrityState {
        self.overrides.get(&address).copied().unwrap_or_default()
    }

    pub fn set_override(&mut self, address: u32, state: IntegrityState) {
        self.overrides.insert(address, state);
    }

    /// Compute the integrity code over all payload bytes but the last
    ///
    /// Returns `None` for frames shorter than 2 bytes and for addresses whose
    /// final XOR is unresolved.
    pub fn compute(&self, frame: &CanFrame) -> Option<u8> {
        let payload = frame.payload();
        if payload.len() < 2 {
            return None;
        }
        match self.integrity_state(frame.address()) {
            IntegrityState::Resolved { final_xor } => {
                Some(self.crc.checksum(&payload[..payload.len() - 1]) ^ final_xor)
            }
            IntegrityState::Unresolved => None,
        }
    }

    /// The integrity byte carried by the frame
    pub fn read_checksum(frame: &CanFrame) -> Option<u8> {
        frame.payload().last().copied()
    }

    /// Write the integrity code of `payload` into its last byte
    ///
    /// Used on the sending side, e.g. by test harnesses replaying traffic.
    pub fn seal(&self, address: u32, payload: &mut [u8]) -> SafetyResult<()> {
        let len = payload.len();
        if len < 2 {
            return Err(SafetyError::InvalidFrame(format!(
                "Expected at least 2 bytes, got {} bytes",
                len
            )));
        }
        match self.integrity_state(address) {
            IntegrityState::Resolved { final_xor } => {
                payload[len - 1] = self.crc.checksum(&payload[..len - 1]) ^ final_xor;
                Ok(())
            }
            IntegrityState::Unresolved => Err(SafetyError::InvalidConfiguration(format!(
                "Final XOR of 0x{:X} is unresolved",
                address
            ))),
        }
    }
}
