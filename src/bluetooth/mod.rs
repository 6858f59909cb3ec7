pub mod bluez;
pub mod characteristic;
pub mod peripheral;

#[cfg(test)]
pub(crate) mod mock;

pub use bluez::BluezPeripheral;
pub use characteristic::Characteristic;
pub use peripheral::{ConnectionState, Peripheral, RssiReading};
