pub mod counter;
pub mod crc_ops;
pub mod field_ops;
pub mod sample;
pub mod validation;
