use std::collections::HashMap;

use crate::common::field_ops::read_nibble_at;
use crate::frame::{CanFrame, MessageKey};

/// Outcome of one rolling counter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterStatus {
    /// First counter seen for this message; taken as the reference
    Initial,
    /// Counter is exactly one ahead of the previous one
    Ok,
    /// Same counter as the previous frame
    Repeated { expected: u8 },
    /// Counter skipped or went backwards
    WrongSequence { expected: u8 },
}

impl CounterStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, CounterStatus::Initial | CounterStatus::Ok)
    }
}

/// Read the rolling counter: low nibble of the second-to-last payload byte
pub fn extract_counter(frame: &CanFrame) -> Option<u8> {
    let payload = frame.payload();
    if payload.len() < 2 {
        return None;
    }
    Some(read_nibble_at(payload, ((payload.len() - 2) * 8) as u16))
}

/// Tracks the last rolling counter seen per message
///
/// A failed check re-anchors the reference to the observed counter, so one
/// dropped frame yields exactly one failure and the next in-sequence frame
/// passes again.
#[derive(Debug, Clone, Default)]
pub struct CounterValidator {
    last_seen: HashMap<MessageKey, u8>,
}

impl CounterValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self, key: MessageKey) -> Option<u8> {
        self.last_seen.get(&key).copied()
    }

    /// Counter the next frame of `key` must carry
    pub fn expected(&self, key: MessageKey, modulus: u16) -> Option<u8> {
        self.last_seen
            .get(&key)
            .map(|last| ((*last as u16 + 1) % modulus) as u8)
    }

    /// Check counter delta against the last seen value
    fn check_counter_delta(last: u8, observed: u8, modulus: u16) -> u16 {
        (modulus + observed as u16 - last as u16) % modulus
    }

    /// Check `observed` against the last counter of `key` and re-anchor
    ///
    /// A counter outside `0..modulus` is always `WrongSequence` and does not
    /// move the reference.
    pub fn validate_counter(&mut self, key: MessageKey, observed: u8, modulus: u16) -> CounterStatus {
        if observed as u16 >= modulus {
            return CounterStatus::WrongSequence {
                expected: self.expected(key, modulus).unwrap_or(0),
            };
        }
        let status = match self.last_seen.get(&key) {
            None => CounterStatus::Initial,
            Some(&last) => {
                let expected = ((last as u16 + 1) % modulus) as u8;
                match Self::check_counter_delta(last, observed, modulus) {
                    1 => CounterStatus::Ok,
                    0 => CounterStatus::Repeated { expected },
                    _ => CounterStatus::WrongSequence { expected },
                }
            }
        };
        self.last_seen.insert(key, observed);
        status
    }

    pub fn reset(&mut self) {
        self.last_seen.clear();
    }
}
