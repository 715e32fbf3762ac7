//! Vehicle safety modes

pub mod fca_giorgio;
