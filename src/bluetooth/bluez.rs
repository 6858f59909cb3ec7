/// BlueZ backed peripheral for Linux hosts
use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic as GattCharacteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Address, Device, DeviceEvent, DeviceProperty, ErrorKind};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use super::characteristic::Characteristic;
use super::peripheral::{ConnectionState, Peripheral, RssiReading};
use crate::error::PeripheralError;

const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICE_RESOLVE_POLL: Duration = Duration::from_millis(100);

impl From<bluer::Error> for PeripheralError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            ErrorKind::NotSupported => Self::Unsupported(err.message),
            ErrorKind::NotReady
            | ErrorKind::ConnectionAttemptFailed
            | ErrorKind::ServicesUnresolved => Self::ConnectionLost(err.message),
            ErrorKind::Failed if err.message.contains("Not connected") => {
                Self::ConnectionLost(err.message)
            }
            _ => Self::Transport(err.to_string()),
        }
    }
}

pub struct BluezPeripheral {
    device: Device,
    state: Arc<watch::Sender<ConnectionState>>,
    characteristics: Mutex<HashMap<Characteristic, GattCharacteristic>>,
    events_task: JoinHandle<()>,
}

impl BluezPeripheral {
    /// Wrap a BlueZ device and start tracking its connection property
    pub async fn new(device: Device) -> bluer::Result<Self> {
        let initial = if device.is_connected().await? {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let (state, _) = watch::channel(initial);
        let state = Arc::new(state);

        let events = device.events().await?;
        let events_state = state.clone();
        let address = device.address();
        let events_task = tokio::spawn(async move {
            futures_util::pin_mut!(events);
            while let Some(event) = events.next().await {
                // connect() owns the transition to Connected once services are resolved
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    info!("Device {} disconnected", address);
                    events_state.send_replace(ConnectionState::Disconnected);
                }
            }
            debug!("Event stream for {} ended", address);
        });

        Ok(BluezPeripheral {
            device,
            state,
            characteristics: Mutex::new(HashMap::new()),
            events_task,
        })
    }

    async fn wait_for_services(&self) -> Result<(), PeripheralError> {
        let deadline = Instant::now() + SERVICE_RESOLVE_TIMEOUT;
        while !self.device.is_services_resolved().await? {
            if Instant::now() >= deadline {
                return Err(PeripheralError::Transport(
                    "timed out waiting for GATT services".into(),
                ));
            }
            sleep(SERVICE_RESOLVE_POLL).await;
        }
        Ok(())
    }

    async fn resolve_characteristics(&self) -> Result<(), PeripheralError> {
        let mut found = HashMap::new();
        for service in self.device.services().await? {
            let service_uuid = service.uuid().await?.as_u128();
            for gatt in service.characteristics().await? {
                let uuid = gatt.uuid().await?.as_u128();
                if let Some(characteristic) = Characteristic::find_by_uuid(service_uuid, uuid) {
                    debug!("Resolved {} characteristic", characteristic);
                    found.insert(characteristic, gatt);
                }
            }
        }

        for characteristic in Characteristic::ALL {
            if !found.contains_key(&characteristic) {
                warn!("Device does not expose the {} characteristic", characteristic);
            }
        }

        *self.characteristics.lock().await = found;
        Ok(())
    }

    async fn characteristic(
        &self,
        characteristic: Characteristic,
    ) -> Result<GattCharacteristic, PeripheralError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(PeripheralError::NotConnected);
        }
        self.characteristics
            .lock()
            .await
            .get(&characteristic)
            .cloned()
            .ok_or(PeripheralError::CharacteristicNotFound(characteristic))
    }
}

/// Classify BlueZ's answer to an RSSI query
fn rssi_reading(address: Address, rssi: bluer::Result<Option<i16>>) -> RssiReading {
    match rssi {
        Ok(Some(rssi)) => RssiReading::Supported(rssi),
        // BlueZ only reports RSSI while it is scanning
        Ok(None) => {
            info!(
                "Device {} reports no RSSI while connected, signal strength is unavailable",
                address
            );
            RssiReading::Unsupported
        }
        Err(e) if matches!(e.kind, ErrorKind::NotSupported) => RssiReading::Unsupported,
        Err(e) => RssiReading::TransportError(e.into()),
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

#[async_trait]
impl Peripheral for BluezPeripheral {
    async fn connect(&self) -> Result<(), PeripheralError> {
        self.state.send_replace(ConnectionState::Connecting);

        let result = async {
            if !self.device.is_connected().await? {
                self.device.connect().await?;
            }
            self.wait_for_services().await?;
            self.resolve_characteristics().await
        }
        .await;

        match result {
            Ok(()) => {
                self.state.send_replace(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), PeripheralError> {
        self.state.send_replace(ConnectionState::Disconnecting);
        self.characteristics.lock().await.clear();
        let result = self.device.disconnect().await;
        self.state.send_replace(ConnectionState::Disconnected);
        result.map_err(Into::into)
    }

    async fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>, PeripheralError> {
        let gatt = self.characteristic(characteristic).await?;
        Ok(gatt.read().await?)
    }

    async fn write(
        &self,
        characteristic: Characteristic,
        data: &[u8],
        ack_required: bool,
    ) -> Result<(), PeripheralError> {
        let gatt = self.characteristic(characteristic).await?;
        let mut request = CharacteristicWriteRequest::default();
        request.op_type = if ack_required {
            WriteOp::Request
        } else {
            WriteOp::Command
        };
        Ok(gatt.write_ext(data, &request).await?)
    }

    async fn observe(
        &self,
        characteristic: Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>, PeripheralError> {
        let gatt = self.characteristic(characteristic).await?;
        let notifications = gatt.notify().await?;
        Ok(notifications.boxed())
    }

    async fn rssi(&self) -> RssiReading {
        rssi_reading(self.device.address(), self.device.rssi().await)
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
