//! CAN frame and message identity types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{SafetyError, SafetyResult};

/// Largest payload the core accepts (CAN-FD)
pub const MAX_PAYLOAD_LEN: usize = 64;

/// Identity of a monitored message: the bus it arrives on and its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub bus: u8,
    pub address: u32,
}

impl MessageKey {
    pub const fn new(bus: u8, address: u32) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}@bus{}", self.address, self.bus)
    }
}

/// One CAN frame as handed over by the bus driver
///
/// The payload is stored inline so a frame never allocates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    bus: u8,
    address: u32,
    len: u8,
    data: [u8; MAX_PAYLOAD_LEN],
}

impl CanFrame {
    /// Build a frame from a payload slice
    ///
    /// # Errors
    /// Returns `SafetyError::InvalidFrame` if the payload exceeds
    /// [`MAX_PAYLOAD_LEN`] bytes.
    pub fn new(bus: u8, address: u32, payload: &[u8]) -> SafetyResult<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SafetyError::InvalidFrame(format!(
                "Payload of {} bytes exceeds {} bytes",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            bus,
            address,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.bus, self.address)
    }

    /// Payload length in bytes
    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("bus", &self.bus)
            .field("address", &format_args!("0x{:X}", self.address))
            .field("payload", &self.payload())
            .finish()
    }
}
