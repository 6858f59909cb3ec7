use log::info;
use std::env;
use std::time::Duration;

const DEFAULT_TRIP_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ScooterConfig {
    pub address: bluer::Address,
    pub adapter: Option<String>,
    pub database_url: Option<String>,
    pub trip_poll_interval: Duration,
    pub display_text: Option<String>,
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl ScooterConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let address = optional_var("SCOOTER_ADDRESS")
            .ok_or("SCOOTER_ADDRESS environment variable not set")?;
        let address: bluer::Address = address
            .parse()
            .map_err(|e| format!("Invalid SCOOTER_ADDRESS '{}': {}", address, e))?;

        let trip_poll_interval = match optional_var("TRIP_POLL_INTERVAL_SECS") {
            Some(secs) => {
                let secs: u64 = secs
                    .parse()
                    .map_err(|e| format!("Invalid TRIP_POLL_INTERVAL_SECS '{}': {}", secs, e))?;
                if secs == 0 {
                    return Err("TRIP_POLL_INTERVAL_SECS must be at least 1".into());
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_TRIP_POLL_INTERVAL_SECS),
        };

        let config = ScooterConfig {
            address,
            adapter: optional_var("BLUETOOTH_ADAPTER"),
            database_url: optional_var("DATABASE_URL"),
            trip_poll_interval,
            display_text: optional_var("DISPLAY_TEXT"),
        };

        info!("Scooter: {}", config.address);
        match &config.adapter {
            Some(adapter) => info!("Adapter: {}", adapter),
            None => info!("Adapter: default"),
        }
        if config.database_url.is_none() {
            info!("DATABASE_URL not set, samples will only be logged");
        }

        Ok(config)
    }
}
