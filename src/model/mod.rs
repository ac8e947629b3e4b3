//! Data model types: sender addresses and attachment candidates.

pub mod address;
pub mod attachment;
