mod config;
mod database;

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, Duration, MissedTickBehavior};

use config::ScooterConfig;
use database::SampleStore;
use egret_dash::bluetooth::{BluezPeripheral, ConnectionState, Peripheral};
use egret_dash::models::{Odometer, OdometerSample, ScooterStatus, StatusSample};
use egret_dash::session::Stamped;
use egret_dash::utils::format_datetime;
use egret_dash::{Session, SessionError};

/// Resolve the configured scooter on the chosen adapter
async fn open_peripheral(
    bt: &bluer::Session,
    config: &ScooterConfig,
) -> Result<BluezPeripheral, Box<dyn std::error::Error>> {
    let adapter = match &config.adapter {
        Some(name) => bt.adapter(name)?,
        None => bt.default_adapter().await?,
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e.into());
    }

    let device = adapter.device(config.address)?;
    Ok(BluezPeripheral::new(device).await?)
}

/// Write every decoded status and odometer sample to the sample store
async fn record_samples(
    mut statuses: broadcast::Receiver<Stamped<ScooterStatus>>,
    mut odometers: broadcast::Receiver<Stamped<Odometer>>,
    mut store: Option<SampleStore>,
) {
    loop {
        tokio::select! {
            status = statuses.recv() => match status {
                Ok(stamped) => {
                    let sample = StatusSample {
                        recorded_at: stamped.recorded_at,
                        status: stamped.value,
                    };
                    debug!(
                        "Status: {:.1} km/h, mode {}, throttle {}, power {}",
                        sample.status.speed,
                        sample.status.driving_mode,
                        sample.status.throttle,
                        sample.status.power_output
                    );
                    if let Some(store) = store.as_mut() {
                        if let Err(e) = store.store_status(&sample).await {
                            error!("Failed to store status sample: {}", e);
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} status samples", missed),
                Err(RecvError::Closed) => break,
            },
            odometer = odometers.recv() => match odometer {
                Ok(stamped) => {
                    let sample = OdometerSample {
                        recorded_at: stamped.recorded_at,
                        odometer: stamped.value,
                    };
                    debug!(
                        "Odometer: total {}, trip {} hm",
                        sample.odometer.total, sample.odometer.hecto_meters
                    );
                    if let Some(store) = store.as_mut() {
                        if let Err(e) = store.store_odometer(&sample).await {
                            error!("Failed to store odometer sample: {}", e);
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} odometer samples", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Re-read the trip history while connected and report the merged table
async fn poll_trips<P: Peripheral>(scooter: Arc<Session<P>>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if scooter.connection_state() != ConnectionState::Connected {
            continue;
        }

        match scooter.fetch_trips().await {
            Ok(fetched) => {
                for index in &fetched.undecodable {
                    warn!("Trip {} could not be decoded", index);
                }
                let trips = scooter.trips();
                info!(
                    "Trips: {} fetched, {} known ({} completed, {} in progress)",
                    fetched.trips.len(),
                    trips.len(),
                    trips.completed(),
                    trips.in_progress()
                );
                for trip in trips.iter() {
                    match trip.distance() {
                        Some(distance) => debug!(
                            "  Trip {} from {}: {} units, battery {}% -> {}%",
                            trip.index,
                            format_datetime(&trip.start.timestamp),
                            distance,
                            trip.start.battery_level,
                            trip.end.as_ref().map_or(0, |end| end.battery_level)
                        ),
                        None => debug!(
                            "  Trip {} from {}: in progress",
                            trip.index,
                            format_datetime(&trip.start.timestamp)
                        ),
                    }
                }
            }
            Err(SessionError::Closed) => break,
            Err(e) => error!("Trip fetch failed: {}", e),
        }
    }
}

/// Connect, then reconnect after every settled disconnect
async fn keep_connected<P: Peripheral>(
    scooter: &Session<P>,
    config: &ScooterConfig,
) -> Result<(), SessionError> {
    loop {
        match scooter.connect().await {
            Ok(()) => {
                if let Some(battery) = scooter.battery().latest() {
                    info!("Battery: {}%", battery);
                }
                if let Some(text) = &config.display_text {
                    if let Err(e) = scooter.send_display_text(text).await {
                        warn!("Failed to send display text: {}", e);
                    }
                }
            }
            Err(e) => error!("Connect failed: {}", e),
        }

        scooter.disconnected().await?;
        info!("Reconnecting...");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ScooterConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let store = match &config.database_url {
        Some(url) => match SampleStore::connect(url).await {
            Ok(store) => Some(store),
            Err(e) => {
                error!("Failed to open sample store: {}", e);
                return Err(e.into());
            }
        },
        None => None,
    };

    let bt = bluer::Session::new().await?;
    let peripheral = open_peripheral(&bt, &config).await?;
    let scooter = Arc::new(Session::new(peripheral));

    let recorder = tokio::spawn(record_samples(
        scooter.status().subscribe(),
        scooter.odometer().subscribe(),
        store,
    ));
    let poller = tokio::spawn(poll_trips(scooter.clone(), config.trip_poll_interval));

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = tx.send(());
    });

    tokio::select! {
        result = keep_connected(scooter.as_ref(), &config) => {
            if let Err(e) = result {
                error!("Fatal error: {}", e);
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    poller.abort();
    recorder.abort();
    if let Some(disconnect) = scooter.dispose() {
        let _ = disconnect.await;
    }

    Ok(())
}
