//! Inbound message authentication
//!
//! Policies are looked up by (bus, address). Messages without a policy pass
//! through unauthenticated: monitoring is opt-in per message.
//!
//! # Check order
//! length, checksum, counter, quality flag. Once the length matches, every
//! enforced check is evaluated (so the counter reference always advances) and
//! the first failure is reported.

use std::collections::HashMap;

use crate::common::counter::{extract_counter, CounterStatus, CounterValidator};
use crate::common::crc_ops::IntegrityEngine;
use crate::common::field_ops::get_bit;
use crate::config::{RxCheck, SafetyConfig};
use crate::frame::{CanFrame, MessageKey};
use crate::{RxFault, RxStatus};

pub struct MessageAuthenticator {
    policies: HashMap<MessageKey, RxCheck>,
    integrity: IntegrityEngine,
    counters: CounterValidator,
    last_rx_us: HashMap<MessageKey, u64>,
}

impl MessageAuthenticator {
    /// Build from an already validated configuration
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            policies: config
                .rx_checks
                .iter()
                .map(|check| (check.key(), check.clone()))
                .collect(),
            integrity: IntegrityEngine::new(&config.integrity),
            counters: CounterValidator::new(),
            last_rx_us: HashMap::new(),
        }
    }

    pub fn policy(&self, key: MessageKey) -> Option<&RxCheck> {
        self.policies.get(&key)
    }

    pub fn integrity(&self) -> &IntegrityEngine {
        &self.integrity
    }

    pub fn counters(&self) -> &CounterValidator {
        &self.counters
    }

    /// Authenticate one frame received at `now_us`
    pub fn authenticate(&mut self, frame: &CanFrame, now_us: u64) -> RxStatus {
        let key = frame.key();
        let Some(policy) = self.policies.get(&key) else {
            return RxStatus::Unmonitored;
        };

        if frame.len() != policy.length {
            return RxStatus::Rejected(RxFault::LengthMismatch {
                expected: policy.length,
                actual: frame.len(),
            });
        }

        let checksum_fault = if policy.ignore_checksum {
            None
        } else {
            self.check_checksum(frame)
        };

        let counter_fault = if policy.ignore_counter {
            None
        } else {
            let modulus = policy.counter_modulus();
            extract_counter(frame).and_then(|observed| {
                match self.counters.validate_counter(key, observed, modulus) {
                    CounterStatus::Initial | CounterStatus::Ok => None,
                    CounterStatus::Repeated { expected }
                    | CounterStatus::WrongSequence { expected } => Some(RxFault::CounterInvalid {
                        expected,
                        actual: observed,
                    }),
                }
            })
        };

        let quality_fault = match policy.quality_bit {
            Some(bit) if !policy.ignore_quality_flag && !get_bit(frame.payload(), bit) => {
                Some(RxFault::QualityFlagInvalid)
            }
            _ => None,
        };

        match checksum_fault.or(counter_fault).or(quality_fault) {
            Some(fault) => RxStatus::Rejected(fault),
            None => {
                self.last_rx_us.insert(key, now_us);
                RxStatus::Accepted
            }
        }
    }

    fn check_checksum(&self, frame: &CanFrame) -> Option<RxFault> {
        let received = IntegrityEngine::read_checksum(frame)?;
        let computed = self.integrity.compute(frame);
        if computed == Some(received) {
            None
        } else {
            Some(RxFault::ChecksumInvalid {
                expected: computed.unwrap_or_default(),
                actual: received,
            })
        }
    }

    /// Monitored messages not accepted within their max interval
    ///
    /// A message that has never been accepted is lagging.
    pub fn lagging(&self, now_us: u64) -> Vec<MessageKey> {
        let mut lagging: Vec<MessageKey> = self
            .policies
            .values()
            .filter(|policy| match self.last_rx_us.get(&policy.key()) {
                Some(&last) => now_us.saturating_sub(last) > policy.max_interval_us(),
                None => true,
            })
            .map(|policy| policy.key())
            .collect();
        lagging.sort();
        lagging
    }
}
