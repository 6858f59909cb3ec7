/// The transport capability the session drives
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::watch;

use super::characteristic::Characteristic;
use crate::error::PeripheralError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Outcome of a signal strength sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RssiReading {
    /// dBm
    Supported(i16),
    /// The backend cannot report RSSI for this connection
    Unsupported,
    TransportError(PeripheralError),
}

/// A connection-oriented BLE device as seen by the session
///
/// `observe` returns a fresh notification subscription every call; it ends
/// when the link goes away and may be requested again after reconnecting.
#[async_trait]
pub trait Peripheral: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), PeripheralError>;

    async fn disconnect(&self) -> Result<(), PeripheralError>;

    async fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>, PeripheralError>;

    async fn write(
        &self,
        characteristic: Characteristic,
        data: &[u8],
        ack_required: bool,
    ) -> Result<(), PeripheralError>;

    async fn observe(
        &self,
        characteristic: Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>, PeripheralError>;

    async fn rssi(&self) -> RssiReading;

    fn state(&self) -> watch::Receiver<ConnectionState>;
}
