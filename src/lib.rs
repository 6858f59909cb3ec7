//! Telemetry, trip history and commands for EGRET electric scooters over BLE
pub mod bluetooth;
pub mod error;
pub mod models;
pub mod protocol;
pub mod session;
pub mod trips;
pub mod utils;

pub use error::{CommandError, DecodeError, PeripheralError, SessionError};
pub use session::Session;
pub use trips::{FetchedTrips, TripTable};
