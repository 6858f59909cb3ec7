/// Decoders for the scooter's telemetry frames
use time::OffsetDateTime;

use super::codec;
use crate::error::DecodeError;
use crate::models::{Diagnostics, DrivingMode, Odometer, ScooterStatus, TripEnd, TripStart};

pub const STATUS_FRAME_LEN: usize = 15;
pub const ODOMETER_FRAME_LEN: usize = 14;
pub const DIAGNOSTICS_FRAME_LEN: usize = 4;
pub const TRIP_START_FRAME_LEN: usize = 10;
pub const TRIP_END_FRAME_LEN: usize = 19;

fn require_len(frame: &'static str, bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        return Err(DecodeError::TooShort {
            frame,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Decode the operation stats frame into a `ScooterStatus`
///
/// Layout (15 bytes):
/// - Byte 0: flags, bit 0 powered on, 1 locked, 2 lights on, 3 charging,
///   4 temperature low, 5 temperature high
/// - Bytes 1-2: speed (unsigned 16-bit, 0.1 km/h)
/// - Byte 3: power output
/// - Bytes 4-5, 6-7, 8-9: eco/tour/sport range (unsigned 16-bit, 0.1 km)
/// - Byte 10: range factor
/// - Byte 11: throttle
/// - Byte 12: driving mode (0 walk, 1 eco, 2 tour, 3 sport)
/// - Byte 13: error code (signed)
/// - Byte 14: find-my status (signed)
///
/// An unknown driving mode fails the whole frame.
pub fn decode_status(bytes: &[u8]) -> Result<ScooterStatus, DecodeError> {
    require_len("status", bytes, STATUS_FRAME_LEN)?;

    Ok(ScooterStatus {
        powered_on: codec::bit(bytes, 0, 0)?,
        locked: codec::bit(bytes, 0, 1)?,
        lights_on: codec::bit(bytes, 0, 2)?,
        charging: codec::bit(bytes, 0, 3)?,
        temperature_low: codec::bit(bytes, 0, 4)?,
        temperature_high: codec::bit(bytes, 0, 5)?,
        speed: codec::tenths(bytes, 1)?,
        power_output: codec::u8(bytes, 3)?,
        eco_mode_range: codec::tenths(bytes, 4)?,
        tour_mode_range: codec::tenths(bytes, 6)?,
        sport_mode_range: codec::tenths(bytes, 8)?,
        range_factor: codec::u8(bytes, 10)?,
        throttle: codec::u8(bytes, 11)?,
        driving_mode: DrivingMode::from_byte(codec::u8(bytes, 12)?)?,
        error_code: codec::i8(bytes, 13)?,
        find_my_status: codec::i8(bytes, 14)?,
    })
}

/// Decode the operation odometer frame
///
/// Layout (14 bytes): bytes 0-1 hectometers since reset, then four
/// 24-bit counters at 2, 5, 8 and 11 for total, eco, tour and sport.
pub fn decode_odometer(bytes: &[u8]) -> Result<Odometer, DecodeError> {
    require_len("odometer", bytes, ODOMETER_FRAME_LEN)?;

    Ok(Odometer {
        hecto_meters: codec::u16(bytes, 0)?,
        total: codec::u24(bytes, 2)?,
        total_eco: codec::u24(bytes, 5)?,
        total_tour: codec::u24(bytes, 8)?,
        total_sport: codec::u24(bytes, 11)?,
    })
}

/// Decode the diagnostics status frame: motor temperature (0.1 °C) then rpm
pub fn decode_diagnostics(bytes: &[u8]) -> Result<Diagnostics, DecodeError> {
    require_len("diagnostics", bytes, DIAGNOSTICS_FRAME_LEN)?;

    Ok(Diagnostics {
        motor_temperature: codec::tenths(bytes, 0)?,
        motor_rpm: codec::u16(bytes, 2)?,
    })
}

/// Battery level characteristic: first byte is the charge percentage
pub fn decode_battery_level(bytes: &[u8]) -> Result<u8, DecodeError> {
    require_len("battery level", bytes, 1)?;
    codec::u8(bytes, 0)
}

fn trip_timestamp(bytes: &[u8]) -> Result<OffsetDateTime, DecodeError> {
    let seconds = codec::u32(bytes, 2)?;
    OffsetDateTime::from_unix_timestamp(i64::from(seconds))
        .map_err(|_| DecodeError::InvalidTimestamp(seconds))
}

/// Decode a trip start record
///
/// Byte 0 is the trip index, byte 1 the start/end discriminator (0),
/// bytes 2-5 epoch seconds, byte 6 battery level, bytes 7-9 total odometer.
pub fn decode_trip_start(bytes: &[u8]) -> Result<TripStart, DecodeError> {
    require_len("trip start", bytes, TRIP_START_FRAME_LEN)?;

    Ok(TripStart {
        index: codec::u8(bytes, 0)?,
        timestamp: trip_timestamp(bytes)?,
        battery_level: codec::u8(bytes, 6)?,
        odo_total: codec::u24(bytes, 7)?,
    })
}

/// Decode a trip end record
///
/// Same header as the start record, followed by the per-mode odometers:
/// bytes 10-12 eco, 13-15 tour, 16-18 sport.
pub fn decode_trip_end(bytes: &[u8]) -> Result<TripEnd, DecodeError> {
    require_len("trip end", bytes, TRIP_END_FRAME_LEN)?;

    Ok(TripEnd {
        index: codec::u8(bytes, 0)?,
        timestamp: trip_timestamp(bytes)?,
        battery_level: codec::u8(bytes, 6)?,
        odo_total: codec::u24(bytes, 7)?,
        odo_eco: codec::u24(bytes, 10)?,
        odo_tour: codec::u24(bytes, 13)?,
        odo_sport: codec::u24(bytes, 16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_frame() -> [u8; STATUS_FRAME_LEN] {
        [
            0b0010_1011, // powered on, locked, charging, temperature high
            0x00,
            0xfa, // 25.0 km/h
            42,
            0x01,
            0x2c, // 30.0 km
            0x00,
            0xc8, // 20.0 km
            0x00,
            0x64, // 10.0 km
            100,
            77,
            2,
            0xfe,
            1,
        ]
    }

    #[test]
    fn decodes_status_frame() {
        let status = decode_status(&status_frame()).unwrap();
        assert!(status.powered_on);
        assert!(status.locked);
        assert!(!status.lights_on);
        assert!(status.charging);
        assert!(!status.temperature_low);
        assert!(status.temperature_high);
        assert_eq!(status.speed, 25.0);
        assert_eq!(status.power_output, 42);
        assert_eq!(status.eco_mode_range, 30.0);
        assert_eq!(status.tour_mode_range, 20.0);
        assert_eq!(status.sport_mode_range, 10.0);
        assert_eq!(status.range_factor, 100);
        assert_eq!(status.throttle, 77);
        assert_eq!(status.driving_mode, DrivingMode::Tour);
        assert_eq!(status.error_code, -2);
        assert_eq!(status.find_my_status, 1);
    }

    #[test]
    fn scaled_status_fields_recover_raw_values() {
        for raw in [0u16, 1, 9, 250, 999, 12345, u16::MAX] {
            let mut frame = status_frame();
            for offset in [1, 4, 6, 8] {
                frame[offset..offset + 2].copy_from_slice(&raw.to_be_bytes());
            }
            let status = decode_status(&frame).unwrap();
            for value in [
                status.speed,
                status.eco_mode_range,
                status.tour_mode_range,
                status.sport_mode_range,
            ] {
                assert_eq!((value * 10.0).round() as u16, raw);
            }
        }
    }

    #[test]
    fn unknown_driving_mode_fails_the_frame() {
        let mut frame = status_frame();
        frame[12] = 4;
        assert_eq!(
            decode_status(&frame),
            Err(DecodeError::InvalidDrivingMode(4))
        );
    }

    #[test]
    fn short_status_frame_is_rejected() {
        let frame = status_frame();
        assert!(matches!(
            decode_status(&frame[..14]),
            Err(DecodeError::TooShort { expected: 15, actual: 14, .. })
        ));
    }

    #[test]
    fn decodes_odometer_frame() {
        let frame = [
            0x01, 0x02, // 258 hm
            0x01, 0x00, 0x00, // total 65536
            0x00, 0x01, 0x00, // eco 256
            0x00, 0x00, 0x07, // tour 7
            0xff, 0xff, 0xff, // sport
        ];
        let odo = decode_odometer(&frame).unwrap();
        assert_eq!(odo.hecto_meters, 258);
        assert_eq!(odo.total, 65536);
        assert_eq!(odo.total_eco, 256);
        assert_eq!(odo.total_tour, 7);
        assert_eq!(odo.total_sport, 0xff_ffff);
    }

    #[test]
    fn decodes_diagnostics_frame() {
        let diag = decode_diagnostics(&[0x01, 0x90, 0x0b, 0xb8]).unwrap();
        assert_eq!(diag.motor_temperature, 40.0);
        assert_eq!(diag.motor_rpm, 3000);
        assert!(decode_diagnostics(&[0x01, 0x90]).is_err());
    }

    #[test]
    fn battery_level_needs_one_byte() {
        assert_eq!(decode_battery_level(&[87]), Ok(87));
        assert!(decode_battery_level(&[]).is_err());
    }

    #[test]
    fn decodes_trip_records() {
        let mut frame = vec![3, 0];
        frame.extend(1_700_000_000u32.to_be_bytes());
        frame.push(95);
        frame.extend([0x00, 0x10, 0x00]);
        let start = decode_trip_start(&frame).unwrap();
        assert_eq!(start.index, 3);
        assert_eq!(start.battery_level, 95);
        assert_eq!(start.odo_total, 0x1000);
        assert_eq!(start.timestamp.unix_timestamp(), 1_700_000_000);

        frame[1] = 1;
        frame.extend([0, 0, 1, 0, 0, 2, 0, 0, 3]);
        let end = decode_trip_end(&frame).unwrap();
        assert_eq!(end.index, 3);
        assert_eq!(end.odo_total, 0x1000);
        assert_eq!((end.odo_eco, end.odo_tour, end.odo_sport), (1, 2, 3));
    }

    #[test]
    fn truncated_trip_end_is_rejected() {
        let frame = [1u8; TRIP_END_FRAME_LEN - 1];
        assert!(matches!(
            decode_trip_end(&frame),
            Err(DecodeError::TooShort { expected: 19, actual: 18, .. })
        ));
    }
}
