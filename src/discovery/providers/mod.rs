//! Concrete discovery transports (spec §4.E).
pub mod ble;
pub mod dnssd;

pub use ble::BleProvider;
pub use dnssd::DnsSdProvider;
