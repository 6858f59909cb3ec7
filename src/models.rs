use std::fmt;
use time::OffsetDateTime;

use crate::error::DecodeError;

/// Riding mode reported in the status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrivingMode {
    Walk = 0,
    Eco = 1,
    Tour = 2,
    Sport = 3,
}

impl DrivingMode {
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0 => Self::Walk,
            1 => Self::Eco,
            2 => Self::Tour,
            3 => Self::Sport,
            other => return Err(DecodeError::InvalidDrivingMode(other)),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Walk => "walk",
            Self::Eco => "eco",
            Self::Tour => "tour",
            Self::Sport => "sport",
        }
    }
}

impl fmt::Display for DrivingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScooterStatus {
    pub powered_on: bool,
    pub locked: bool,
    pub lights_on: bool,
    pub charging: bool,
    pub temperature_low: bool,
    pub temperature_high: bool,
    /// km/h
    pub speed: f32,
    pub power_output: u8,
    /// Remaining range per mode in km
    pub eco_mode_range: f32,
    pub tour_mode_range: f32,
    pub sport_mode_range: f32,
    pub range_factor: u8,
    pub throttle: u8,
    pub driving_mode: DrivingMode,
    pub error_code: i8,
    pub find_my_status: i8,
}

/// Cumulative distance counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Odometer {
    /// Distance since the last reset in units of 100 m
    pub hecto_meters: u16,
    pub total: u32,
    pub total_eco: u32,
    pub total_tour: u32,
    pub total_sport: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    pub motor_rpm: u16,
    /// °C
    pub motor_temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripStart {
    pub index: u8,
    pub battery_level: u8,
    pub odo_total: u32,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripEnd {
    pub index: u8,
    pub battery_level: u8,
    pub odo_eco: u32,
    pub odo_tour: u32,
    pub odo_sport: u32,
    pub odo_total: u32,
    pub timestamp: OffsetDateTime,
}

/// A trip slot; `end` is absent while the trip is in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub index: u8,
    pub start: TripStart,
    pub end: Option<TripEnd>,
}

impl Trip {
    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }

    /// Distance covered in the trip, when it has finished
    pub fn distance(&self) -> Option<u32> {
        self.end
            .as_ref()
            .map(|end| end.odo_total.saturating_sub(self.start.odo_total))
    }
}

/// A decoded status sample stamped with the moment it was decoded
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSample {
    pub recorded_at: OffsetDateTime,
    pub status: ScooterStatus,
}

/// A decoded odometer sample stamped with the moment it was decoded
#[derive(Debug, Clone, PartialEq)]
pub struct OdometerSample {
    pub recorded_at: OffsetDateTime,
    pub odometer: Odometer,
}
