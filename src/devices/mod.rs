//! Device implementations
//!
//! Real MCUs are reached through `transport::SerialTransport`; this module
//! holds the host-side model of the download firmware.

pub mod decoder;
pub mod simulator;

pub use decoder::{DecodedInfo, DecodedMapping, DecodedWeight, MappingDecoder, WeightDecoder};
pub use simulator::DeviceSimulator;
