/// Database operations for storing decoded scooter samples
use log::warn;
use tokio::time::{sleep, Duration};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use crate::database::connection::{connect_with_retry, MAX_RETRIES, WAIT_BETWEEN_RETRIES};
use egret_dash::models::{OdometerSample, StatusSample};

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS statuses (
    id BIGSERIAL PRIMARY KEY,
    recorded_at TIMESTAMPTZ NOT NULL,
    charging BOOLEAN NOT NULL,
    driving_mode TEXT NOT NULL,
    eco_mode_range REAL NOT NULL,
    error_code SMALLINT NOT NULL,
    find_my_status SMALLINT NOT NULL,
    lights_on BOOLEAN NOT NULL,
    locked BOOLEAN NOT NULL,
    power_output SMALLINT NOT NULL,
    powered_on BOOLEAN NOT NULL,
    range_factor SMALLINT NOT NULL,
    speed REAL NOT NULL,
    sport_mode_range REAL NOT NULL,
    temperature_high BOOLEAN NOT NULL,
    temperature_low BOOLEAN NOT NULL,
    throttle SMALLINT NOT NULL,
    tour_mode_range REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS odometer (
    id BIGSERIAL PRIMARY KEY,
    recorded_at TIMESTAMPTZ NOT NULL,
    hecto_meters INTEGER NOT NULL,
    total INTEGER NOT NULL,
    total_eco INTEGER NOT NULL,
    total_tour INTEGER NOT NULL,
    total_sport INTEGER NOT NULL
);
";

/// Attempts per insert when the connection is lost
const INSERT_ATTEMPTS: usize = 3;

/// The server closed the session, or the socket under it went away
fn connection_lost(e: &tokio_postgres::Error) -> bool {
    e.is_closed() || e.code() == Some(&SqlState::ADMIN_SHUTDOWN)
}

/// Sink for decoded samples, one row per sample
pub struct SampleStore {
    database_url: String,
    client: Client,
}

impl SampleStore {
    /// Connect and make sure the sample tables exist
    pub async fn connect(database_url: &str) -> Result<Self, String> {
        let client = connect_with_retry(database_url, MAX_RETRIES).await?;
        client
            .batch_execute(CREATE_TABLES)
            .await
            .map_err(|e| format!("Schema error: {}", e))?;

        Ok(SampleStore {
            database_url: database_url.to_string(),
            client,
        })
    }

    /// Run one insert, reconnecting and retrying when the connection is lost
    ///
    /// Each attempt makes a single connection attempt, so a database outage
    /// holds up the caller for a bounded time before the sample is given up.
    async fn execute_with_retry(
        &mut self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<(), String> {
        let mut lost = false;
        for attempt in 0..INSERT_ATTEMPTS {
            if lost || self.client.is_closed() {
                warn!("Database connection closed, reconnecting");
                match connect_with_retry(&self.database_url, 1).await {
                    Ok(client) => {
                        self.client = client;
                        lost = false;
                    }
                    Err(e) => warn!("Reconnect attempt {}: {}", attempt + 1, e),
                }
            }

            if !lost {
                match self.client.execute(statement, params).await {
                    Ok(_) => return Ok(()),
                    Err(e) if connection_lost(&e) || self.client.is_closed() => {
                        warn!("Insert attempt {} lost the connection: {}", attempt + 1, e);
                        lost = true;
                    }
                    Err(e) => return Err(format!("Query error: {}", e)),
                }
            }

            if attempt + 1 < INSERT_ATTEMPTS {
                sleep(Duration::from_secs(WAIT_BETWEEN_RETRIES)).await;
            }
        }

        Err("Max retries exceeded".into())
    }

    /// Store one status sample in the statuses table
    pub async fn store_status(&mut self, sample: &StatusSample) -> Result<(), String> {
        let s = &sample.status;

        self.execute_with_retry(
            "INSERT INTO statuses(recorded_at, charging, driving_mode, eco_mode_range, error_code,
                 find_my_status, lights_on, locked, power_output, powered_on, range_factor, speed,
                 sport_mode_range, temperature_high, temperature_low, throttle, tour_mode_range)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            &[
                &sample.recorded_at,
                &s.charging,
                &s.driving_mode.as_str(),
                &s.eco_mode_range,
                &i16::from(s.error_code),
                &i16::from(s.find_my_status),
                &s.lights_on,
                &s.locked,
                &i16::from(s.power_output),
                &s.powered_on,
                &i16::from(s.range_factor),
                &s.speed,
                &s.sport_mode_range,
                &s.temperature_high,
                &s.temperature_low,
                &i16::from(s.throttle),
                &s.tour_mode_range,
            ],
        )
        .await
    }

    /// Store one odometer sample in the odometer table
    pub async fn store_odometer(&mut self, sample: &OdometerSample) -> Result<(), String> {
        let odo = &sample.odometer;

        // 24-bit counters always fit an INTEGER
        self.execute_with_retry(
            "INSERT INTO odometer(recorded_at, hecto_meters, total, total_eco, total_tour, total_sport)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &sample.recorded_at,
                &i32::from(odo.hecto_meters),
                &(odo.total as i32),
                &(odo.total_eco as i32),
                &(odo.total_tour as i32),
                &(odo.total_sport as i32),
            ],
        )
        .await
    }
}
