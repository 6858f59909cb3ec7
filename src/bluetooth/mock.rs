//! Scripted in-memory peripheral for session tests
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use super::characteristic::Characteristic;
use super::peripheral::{ConnectionState, Peripheral, RssiReading};
use crate::error::PeripheralError;

/// Gap between scripted trip frames
pub const FRAME_GAP: Duration = Duration::from_millis(10);

/// What the mock does after receiving a trip history request
#[derive(Debug, Clone)]
pub enum TripScript {
    /// Send these frames, one every `FRAME_GAP`
    Frames(Vec<Vec<u8>>),
    /// Send these frames and then drop the link
    DropAfter(Vec<Vec<u8>>),
}

#[derive(Default)]
struct Inner {
    reads: HashMap<Characteristic, Result<Vec<u8>, PeripheralError>>,
    writes: Vec<(Characteristic, Vec<u8>)>,
    subscribers: HashMap<Characteristic, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    trip_scripts: VecDeque<TripScript>,
    connect_error: Option<PeripheralError>,
    rssi: VecDeque<RssiReading>,
    log: Vec<String>,
}

#[derive(Clone)]
pub struct MockPeripheral {
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<ConnectionState>>,
    rssi_calls: Arc<AtomicUsize>,
    disconnect_calls: Arc<AtomicUsize>,
}

impl MockPeripheral {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        MockPeripheral {
            inner: Arc::new(Mutex::new(Inner::default())),
            state: Arc::new(state),
            rssi_calls: Arc::new(AtomicUsize::new(0)),
            disconnect_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_read(&self, characteristic: Characteristic, value: Vec<u8>) {
        self.inner().reads.insert(characteristic, Ok(value));
    }

    pub fn fail_connect(&self, error: PeripheralError) {
        self.inner().connect_error = Some(error);
    }

    /// Readings handed out by `rssi()` in order; the last one repeats
    pub fn script_rssi(&self, readings: Vec<RssiReading>) {
        self.inner().rssi = readings.into();
    }

    pub fn script_trips(&self, script: TripScript) {
        self.inner().trip_scripts.push_back(script);
    }

    /// Deliver a notification to every current subscriber
    pub fn notify(&self, characteristic: Characteristic, value: Vec<u8>) {
        if let Some(subscribers) = self.inner().subscribers.get_mut(&characteristic) {
            subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self, characteristic: Characteristic) -> usize {
        self.inner()
            .subscribers
            .get(&characteristic)
            .map_or(0, |subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Simulate the link dropping: subscriptions end and the state flips
    pub fn drop_link(&self) {
        self.inner().subscribers.clear();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn writes(&self) -> Vec<(Characteristic, Vec<u8>)> {
        self.inner().writes.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.inner().log.clone()
    }

    pub fn rssi_calls(&self) -> usize {
        self.rssi_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn play_trip_script(&self, script: TripScript) {
        let mock = self.clone();
        tokio::spawn(async move {
            let (frames, drop_link) = match script {
                TripScript::Frames(frames) => (frames, false),
                TripScript::DropAfter(frames) => (frames, true),
            };
            for frame in frames {
                sleep(FRAME_GAP).await;
                if frame == [4] {
                    mock.inner().log.push("trip sentinel".into());
                }
                mock.notify(Characteristic::Trips, frame);
            }
            if drop_link {
                sleep(FRAME_GAP).await;
                mock.drop_link();
            }
        });
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    async fn connect(&self) -> Result<(), PeripheralError> {
        self.state.send_replace(ConnectionState::Connecting);
        if let Some(error) = self.inner().connect_error.clone() {
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(error);
        }
        self.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PeripheralError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnecting);
        self.inner().subscribers.clear();
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    async fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>, PeripheralError> {
        self.inner()
            .reads
            .get(&characteristic)
            .cloned()
            .unwrap_or(Err(PeripheralError::CharacteristicNotFound(characteristic)))
    }

    async fn write(
        &self,
        characteristic: Characteristic,
        data: &[u8],
        _ack_required: bool,
    ) -> Result<(), PeripheralError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(PeripheralError::NotConnected);
        }
        let script = {
            let mut inner = self.inner();
            inner.writes.push((characteristic, data.to_vec()));
            if characteristic == Characteristic::Trips {
                inner.log.push("trip request".into());
                inner.trip_scripts.pop_front()
            } else {
                None
            }
        };
        if let Some(script) = script {
            self.play_trip_script(script);
        }
        Ok(())
    }

    async fn observe(
        &self,
        characteristic: Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>, PeripheralError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(PeripheralError::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner()
            .subscribers
            .entry(characteristic)
            .or_default()
            .push(tx);
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }).boxed())
    }

    async fn rssi(&self) -> RssiReading {
        self.rssi_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner();
        if inner.rssi.len() > 1 {
            inner.rssi.pop_front().unwrap_or(RssiReading::Unsupported)
        } else {
            inner
                .rssi
                .front()
                .cloned()
                .unwrap_or(RssiReading::Unsupported)
        }
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Trip start record with a fixed timestamp and 90% battery
pub fn trip_start_frame(index: u8, odo_total: u32) -> Vec<u8> {
    let mut frame = vec![index, 0];
    frame.extend(1_700_000_000u32.to_be_bytes());
    frame.push(90);
    frame.extend(&odo_total.to_be_bytes()[1..]);
    frame
}

/// Trip end record ten minutes after `trip_start_frame`, 80% battery
pub fn trip_end_frame(index: u8, odo_total: u32) -> Vec<u8> {
    let mut frame = vec![index, 1];
    frame.extend(1_700_000_600u32.to_be_bytes());
    frame.push(80);
    frame.extend(&odo_total.to_be_bytes()[1..]);
    frame.extend([0, 0, 1, 0, 0, 2, 0, 0, 3]);
    frame
}

/// Status frame with the given raw speed (0.1 km/h) and driving mode byte
pub fn status_frame(speed: u16, driving_mode: u8) -> Vec<u8> {
    let mut frame = vec![0b0000_0001];
    frame.extend(speed.to_be_bytes());
    frame.extend([10, 0, 100, 0, 80, 0, 60, 100, 0, driving_mode, 0, 0]);
    frame
}
