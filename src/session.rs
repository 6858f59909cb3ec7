/// Session controller for one scooter connection
///
/// Owns the peripheral handle and runs the background activities of a
/// connection: one notification pump per telemetry characteristic and an
/// RSSI monitor. Each successful connect starts a fresh set of these tasks
/// and stops the previous set. Trip fetches are serialized per session and
/// folded into a durable trip table that lives as long as the session.
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::bluetooth::characteristic::Characteristic;
use crate::bluetooth::peripheral::{ConnectionState, Peripheral, RssiReading};
use crate::error::{DecodeError, SessionError};
use crate::models::{Diagnostics, Odometer, ScooterStatus};
use crate::protocol::{
    decode_battery_level, decode_diagnostics, decode_odometer, decode_status, display_text,
    OperationCommand,
};
use crate::trips::{self, FetchedTrips, TripTable};
use crate::utils::{hex_frame, wait_settled};

pub const RSSI_INTERVAL: Duration = Duration::from_secs(5);
pub const DISCONNECT_DEBOUNCE: Duration = Duration::from_secs(1);
const UPDATE_CAPACITY: usize = 64;

/// A decoded value and when it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    /// Orders samples from different sources
    pub at: Instant,
    pub recorded_at: OffsetDateTime,
}

impl<T> Stamped<T> {
    fn new(value: T, at: Instant) -> Self {
        Stamped {
            value,
            at,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Current value of one telemetry characteristic
///
/// Fed by an explicit seed read and by live notifications. The sample with
/// the latest timestamp is current; a seed is stamped when its read was
/// issued so a notification that arrives during the read takes precedence.
/// Either source may never produce anything.
pub struct TelemetryView<T> {
    latest: watch::Sender<Option<Stamped<T>>>,
    updates: broadcast::Sender<Stamped<T>>,
}

impl<T: Clone> TelemetryView<T> {
    fn new() -> Self {
        let (latest, _) = watch::channel(None);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        TelemetryView { latest, updates }
    }

    fn publish(&self, sample: Stamped<T>) {
        let accepted = self.latest.send_if_modified(|current| {
            if current.as_ref().is_some_and(|c| c.at > sample.at) {
                return false;
            }
            *current = Some(sample.clone());
            true
        });
        if accepted {
            // no subscribers is fine
            let _ = self.updates.send(sample);
        }
    }

    /// Set the value from an explicit read issued at `requested`
    pub fn seed(&self, value: T, requested: Instant) {
        self.publish(Stamped::new(value, requested));
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.borrow().as_ref().map(|s| s.value.clone())
    }

    pub fn watch(&self) -> watch::Receiver<Option<Stamped<T>>> {
        self.latest.subscribe()
    }

    /// Every accepted sample, in arrival order
    pub fn subscribe(&self) -> broadcast::Receiver<Stamped<T>> {
        self.updates.subscribe()
    }
}

struct Shared<P> {
    peripheral: P,
    status: TelemetryView<ScooterStatus>,
    odometer: TelemetryView<Odometer>,
    diagnostics: TelemetryView<Diagnostics>,
    battery: TelemetryView<u8>,
    rssi: watch::Sender<Option<i16>>,
    trips: watch::Sender<TripTable>,
    trip_lock: Mutex<()>,
    command_lock: Mutex<()>,
    shutdown: CancellationToken,
    /// Cancelled when the current connection's tasks must stop
    link: watch::Sender<CancellationToken>,
}

pub struct Session<P: Peripheral> {
    shared: Arc<Shared<P>>,
}

impl<P: Peripheral> Session<P> {
    /// Take ownership of `peripheral`; nothing is connected yet
    pub fn new(peripheral: P) -> Self {
        let (rssi, _) = watch::channel(None);
        let (trips, _) = watch::channel(TripTable::new());
        let shutdown = CancellationToken::new();
        let (link, _) = watch::channel(shutdown.child_token());
        let shared = Arc::new(Shared {
            peripheral,
            status: TelemetryView::new(),
            odometer: TelemetryView::new(),
            diagnostics: TelemetryView::new(),
            battery: TelemetryView::new(),
            rssi,
            trips,
            trip_lock: Mutex::new(()),
            command_lock: Mutex::new(()),
            shutdown,
            link,
        });

        Session { shared }
    }

    /// Connect, subscribe to telemetry, seed the battery level and start
    /// RSSI monitoring
    ///
    /// A failed attempt disconnects the peripheral before returning the
    /// error; it is not retried here.
    pub async fn connect(&self) -> Result<(), SessionError> {
        info!("Connecting");
        let shared = &self.shared;

        let link = shared.shutdown.child_token();
        shared.link.send_replace(link.clone()).cancel();

        let seeded = async {
            shared.peripheral.connect().await?;
            spawn_pumps(shared, &link);
            let requested = Instant::now();
            let bytes = shared
                .peripheral
                .read(Characteristic::BatteryLevel)
                .await?;
            match decode_battery_level(&bytes) {
                Ok(level) => shared.battery.seed(level, requested),
                Err(e) => warn!("Ignoring battery level {}: {}", hex_frame(&bytes), e),
            }
            Ok::<_, SessionError>(())
        }
        .await;

        if let Err(e) = seeded {
            warn!("Connection attempt failed: {}", e);
            link.cancel();
            if let Err(e) = shared.peripheral.disconnect().await {
                debug!("Disconnect after failed connect: {}", e);
            }
            return Err(e);
        }

        spawn_rssi_monitor(shared, &link);
        info!("Connected");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        info!("Disconnecting");
        Ok(self.shared.peripheral.disconnect().await?)
    }

    /// Resolve once the link has been down for `DISCONNECT_DEBOUNCE`
    ///
    /// Bursts of state changes (adapter off and device gone arriving
    /// together) produce a single resolution.
    pub async fn disconnected(&self) -> Result<(), SessionError> {
        let mut state = self.shared.peripheral.state();
        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Err(SessionError::Closed),
            settled = wait_settled(&mut state, DISCONNECT_DEBOUNCE, |s| {
                *s == ConnectionState::Disconnected
            }) => settled.ok_or(SessionError::Closed),
        }
    }

    /// Fetch the trip history and merge it into the session's trip table
    ///
    /// Only one fetch runs at a time; later callers wait for the one in
    /// flight. Returns this fetch's own result, which is empty if the link
    /// dropped during the transfer.
    pub async fn fetch_trips(&self) -> Result<FetchedTrips, SessionError> {
        let _guard = self.shared.trip_lock.lock().await;

        let fetched = tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => return Err(SessionError::Closed),
            fetched = trips::fetch_trips(&self.shared.peripheral) => fetched?,
        };

        self.shared
            .trips
            .send_modify(|table| table.merge(fetched.trips.clone()));
        Ok(fetched)
    }

    /// Snapshot of every trip seen during this session
    pub fn trips(&self) -> TripTable {
        self.shared.trips.borrow().clone()
    }

    pub fn watch_trips(&self) -> watch::Receiver<TripTable> {
        self.shared.trips.subscribe()
    }

    pub async fn mark_trip(&self) -> Result<(), SessionError> {
        let _guard = self.shared.command_lock.lock().await;
        self.write_command(&OperationCommand::MarkTrip).await
    }

    /// Show `msg` on the scooter's display
    pub async fn send_display_text(&self, msg: &str) -> Result<(), SessionError> {
        let commands = display_text(msg)?;
        let _guard = self.shared.command_lock.lock().await;
        for command in &commands {
            self.write_command(command).await?;
        }
        debug!("Sent display text in {} frames", commands.len());
        Ok(())
    }

    async fn write_command(&self, command: &OperationCommand) -> Result<(), SessionError> {
        self.shared
            .peripheral
            .write(Characteristic::OperationCommand, &command.to_bytes(), true)
            .await?;
        Ok(())
    }

    pub fn status(&self) -> &TelemetryView<ScooterStatus> {
        &self.shared.status
    }

    pub fn odometer(&self) -> &TelemetryView<Odometer> {
        &self.shared.odometer
    }

    pub fn diagnostics(&self) -> &TelemetryView<Diagnostics> {
        &self.shared.diagnostics
    }

    /// Battery percentage
    pub fn battery(&self) -> &TelemetryView<u8> {
        &self.shared.battery
    }

    pub fn rssi(&self) -> Option<i16> {
        *self.shared.rssi.borrow()
    }

    pub fn watch_rssi(&self) -> watch::Receiver<Option<i16>> {
        self.shared.rssi.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.peripheral.state().borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.peripheral.state()
    }

    /// Stop all session activity and disconnect in the background
    ///
    /// The disconnect runs as its own task so it completes even when the
    /// caller goes away. Returns `None` if already disposed or when no
    /// runtime is available.
    pub fn dispose(&self) -> Option<JoinHandle<()>> {
        if self.shared.shutdown.is_cancelled() {
            return None;
        }
        self.shared.shutdown.cancel();

        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let shared = self.shared.clone();
        Some(runtime.spawn(async move {
            if let Err(e) = shared.peripheral.disconnect().await {
                debug!("Disconnect on dispose failed: {}", e);
            }
        }))
    }
}

impl<P: Peripheral> Drop for Session<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Run `task` until the connection behind `link` ends
///
/// The task stops when `link` is cancelled (a newer connect, a failed
/// connect or dispose) or when the peripheral leaves `Connected`.
fn spawn_for_link<P, F>(shared: &Arc<Shared<P>>, link: &CancellationToken, task: F)
where
    P: Peripheral,
    F: for<'a> FnOnce(&'a Shared<P>) -> BoxFuture<'a, ()> + Send + 'static,
{
    let shared = shared.clone();
    let link = link.clone();
    tokio::spawn(async move {
        let mut state = shared.peripheral.state();
        tokio::select! {
            biased;
            _ = link.cancelled() => {}
            _ = state.wait_for(|s| *s != ConnectionState::Connected) => {}
            _ = task(&*shared) => {}
        }
    });
}

fn spawn_rssi_monitor<P: Peripheral>(shared: &Arc<Shared<P>>, link: &CancellationToken) {
    spawn_for_link(shared, link, |shared| monitor_rssi(shared).boxed());
}

fn spawn_pumps<P: Peripheral>(shared: &Arc<Shared<P>>, link: &CancellationToken) {
    spawn_for_link(shared, link, |shared| {
        pump(shared, Characteristic::OperationStats, &shared.status, decode_status).boxed()
    });
    spawn_for_link(shared, link, |shared| {
        pump(shared, Characteristic::OperationOdo, &shared.odometer, decode_odometer).boxed()
    });
    spawn_for_link(shared, link, |shared| {
        pump(
            shared,
            Characteristic::DiagnosticsStatus,
            &shared.diagnostics,
            decode_diagnostics,
        )
        .boxed()
    });
    spawn_for_link(shared, link, |shared| {
        pump(
            shared,
            Characteristic::BatteryLevel,
            &shared.battery,
            decode_battery_level,
        )
        .boxed()
    });
}

/// Sample RSSI every `RSSI_INTERVAL`; gives up for good when unsupported
async fn monitor_rssi<P: Peripheral>(shared: &Shared<P>) {
    loop {
        match shared.peripheral.rssi().await {
            RssiReading::Supported(rssi) => {
                debug!("RSSI: {}", rssi);
                shared.rssi.send_replace(Some(rssi));
            }
            RssiReading::Unsupported => {
                warn!("RSSI is not supported");
                return;
            }
            RssiReading::TransportError(e) => debug!("RSSI sample failed: {}", e),
        }
        sleep(RSSI_INTERVAL).await;
    }
}

/// Decode notifications from `characteristic` into `view`
///
/// Undecodable frames are dropped. A subscription that ends while the link
/// is still up is not renewed until the next connect.
async fn pump<P, T>(
    shared: &Shared<P>,
    characteristic: Characteristic,
    view: &TelemetryView<T>,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
) where
    P: Peripheral,
    T: Clone,
{
    let mut frames = match shared.peripheral.observe(characteristic).await {
        Ok(frames) => frames,
        Err(e) => {
            debug!("Could not observe {}: {}", characteristic, e);
            return;
        }
    };

    while let Some(frame) = frames.next().await {
        match decode(&frame) {
            Ok(value) => view.publish(Stamped::new(value, Instant::now())),
            Err(e) => warn!(
                "Dropping {} frame {}: {}",
                characteristic,
                hex_frame(&frame),
                e
            ),
        }
    }
    debug!("{} notifications ended", characteristic);
}
