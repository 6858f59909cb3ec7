/// GATT characteristics used by the scooter
use std::fmt;

// Service UUIDs
const DIAGNOSTICS_SERVICE: u128 = 0x2B419D90_ADEF_4CA3_8652_C02093B6C84E;
const BATTERY_SERVICE: u128 = 0xF4B68C10_9E9E_4B97_A9C9_272E32453252;
const OPERATION_SERVICE: u128 = 0x7D971CD0_8EBD_4684_B771_B2362B7E922A;
const TRIPS_SERVICE: u128 = 0x3F9836D0_BCD8_4754_B1B2_216A6FDF255D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Notifies status frames
    OperationStats,
    /// Notifies odometer frames
    OperationOdo,
    /// Write-only command channel
    OperationCommand,
    DiagnosticsStatus,
    BatteryLevel,
    /// Trip history: request written and records notified on one channel
    Trips,
}

impl Characteristic {
    pub const ALL: [Characteristic; 6] = [
        Self::OperationStats,
        Self::OperationOdo,
        Self::OperationCommand,
        Self::DiagnosticsStatus,
        Self::BatteryLevel,
        Self::Trips,
    ];

    pub fn service_uuid(&self) -> u128 {
        match self {
            Self::OperationStats | Self::OperationOdo | Self::OperationCommand => {
                OPERATION_SERVICE
            }
            Self::DiagnosticsStatus => DIAGNOSTICS_SERVICE,
            Self::BatteryLevel => BATTERY_SERVICE,
            Self::Trips => TRIPS_SERVICE,
        }
    }

    pub fn uuid(&self) -> u128 {
        match self {
            Self::OperationCommand => 0x7D971CD1_8EBD_4684_B771_B2362B7E922A,
            Self::OperationStats => 0x7D971CD2_8EBD_4684_B771_B2362B7E922A,
            Self::OperationOdo => 0x7D971CD3_8EBD_4684_B771_B2362B7E922A,
            Self::DiagnosticsStatus => 0x2B419D92_ADEF_4CA3_8652_C02093B6C84E,
            Self::BatteryLevel => 0xF4B68C11_9E9E_4B97_A9C9_272E32453252,
            Self::Trips => 0x3F9836D1_BCD8_4754_B1B2_216A6FDF255D,
        }
    }

    pub fn find_by_uuid(service: u128, characteristic: u128) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.service_uuid() == service && c.uuid() == characteristic)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::OperationStats => "operation stats",
            Self::OperationOdo => "operation odometer",
            Self::OperationCommand => "operation command",
            Self::DiagnosticsStatus => "diagnostics status",
            Self::BatteryLevel => "battery level",
            Self::Trips => "trips",
        };
        f.write_str(name)
    }
}
