/// Read one bit, numbered LSB-first within each byte (bit 11 = byte 1, bit 3)
pub fn get_bit(data: &[u8], bit: u16) -> bool {
    let byte_idx = (bit >> 3) as usize;
    let shift = bit & 0x07;
    data.get(byte_idx)
        .map(|byte| (byte >> shift) & 0x01 == 0x01)
        .unwrap_or(false)
}

/// Generic nibble read at a bit offset within a byte
pub fn read_nibble_at(data: &[u8], bit_offset: u16) -> u8 {
    let byte_idx = (bit_offset >> 3) as usize;
    let shift = bit_offset & 0x07;
    data.get(byte_idx)
        .map(|byte| (byte >> shift) & 0x0F)
        .unwrap_or(0)
}

/// Remove the bias of an offset-encoded signed signal
pub fn unbias(raw: u32, offset: i32) -> i32 {
    raw as i32 - offset
}
