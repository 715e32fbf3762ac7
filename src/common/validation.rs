use crate::config::{IntegrityState, RxCheck, TorqueLimits};
use crate::frame::MAX_PAYLOAD_LEN;
use crate::{SafetyError, SafetyResult};

/// Checksum and counter live in the last two payload bytes
const MIN_PROTECTED_LENGTH: u8 = 2;
/// The rolling counter is a nibble
const MAX_COUNTER_MODULUS: u16 = 16;
/// Torque signals are at most 12 bits wide
pub const MAX_TORQUE_LIMIT: i32 = 2048;
pub const MAX_DRIVER_TORQUE_MULTIPLIER: i32 = 64;

pub fn validate_payload_length(length: u8) -> SafetyResult<()> {
    if length == 0 || length as usize > MAX_PAYLOAD_LEN {
        return Err(SafetyError::InvalidConfiguration(format!(
            "Length must be between 1 and {} bytes, got {}",
            MAX_PAYLOAD_LEN, length
        )));
    }
    Ok(())
}

pub fn validate_counter_modulus(modulus: u16) -> SafetyResult<()> {
    if modulus < 2 || modulus > MAX_COUNTER_MODULUS || !modulus.is_power_of_two() {
        return Err(SafetyError::InvalidConfiguration(format!(
            "Counter modulus must be a power of two between 2 and {}, got {}",
            MAX_COUNTER_MODULUS, modulus
        )));
    }
    Ok(())
}

pub fn validate_rx_check(check: &RxCheck, integrity: IntegrityState) -> SafetyResult<()> {
    validate_payload_length(check.length)?;

    if check.frequency_hz == 0 {
        return Err(SafetyError::InvalidConfiguration(format!(
            "Frequency of {} shall be larger than 0",
            check.key()
        )));
    }

    if (!check.ignore_checksum || !check.ignore_counter) && check.length < MIN_PROTECTED_LENGTH {
        return Err(SafetyError::InvalidConfiguration(format!(
            "{} checks checksum or counter but is shorter than {}B",
            check.key(),
            MIN_PROTECTED_LENGTH
        )));
    }

    if !check.ignore_counter {
        validate_counter_modulus(check.counter_modulus())?;
    }

    if !check.ignore_checksum && integrity == IntegrityState::Unresolved {
        return Err(SafetyError::InvalidConfiguration(format!(
            "{} enforces a checksum whose final XOR is unresolved",
            check.key()
        )));
    }

    if let Some(bit) = check.quality_bit {
        if bit >= check.length as u16 * 8 {
            return Err(SafetyError::InvalidConfiguration(format!(
                "Quality bit {} lies outside the {}B payload of {}",
                bit,
                check.length,
                check.key()
            )));
        }
    }
    Ok(())
}

pub fn validate_torque_limits(limits: &TorqueLimits) -> SafetyResult<()> {
    if limits.max_torque <= 0 || limits.max_rate_up <= 0 || limits.max_rate_down <= 0 {
        return Err(SafetyError::InvalidConfiguration(
            "Max torque and rate limits shall be larger than 0".into(),
        ));
    }
    if limits.max_rt_delta < limits.max_rate_up {
        return Err(SafetyError::InvalidConfiguration(format!(
            "Real-time delta {} shall not be smaller than rate up {}",
            limits.max_rt_delta, limits.max_rate_up
        )));
    }
    if limits.driver_torque_allowance < 0 || limits.driver_torque_multiplier < 0 {
        return Err(SafetyError::InvalidConfiguration(
            "Driver torque allowance and multiplier shall not be negative".into(),
        ));
    }
    let bounded = [
        ("max_torque", limits.max_torque),
        ("max_rate_up", limits.max_rate_up),
        ("max_rate_down", limits.max_rate_down),
        ("max_rt_delta", limits.max_rt_delta),
        ("driver_torque_allowance", limits.driver_torque_allowance),
    ];
    for (name, value) in bounded {
        if value > MAX_TORQUE_LIMIT {
            return Err(SafetyError::InvalidConfiguration(format!(
                "{} {} exceeds {}",
                name, value, MAX_TORQUE_LIMIT
            )));
        }
    }
    if limits.driver_torque_multiplier > MAX_DRIVER_TORQUE_MULTIPLIER {
        return Err(SafetyError::InvalidConfiguration(format!(
            "Driver torque multiplier {} exceeds {}",
            limits.driver_torque_multiplier, MAX_DRIVER_TORQUE_MULTIPLIER
        )));
    }
    Ok(())
}
