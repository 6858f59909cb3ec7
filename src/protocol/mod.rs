//! Scooter wire protocol: field codec, frame decoders and command encoder
pub mod codec;
pub mod command;
pub mod decode;

pub use command::{display_text, trip_history_request, OperationCommand};
pub use decode::{
    decode_battery_level, decode_diagnostics, decode_odometer, decode_status, decode_trip_end,
    decode_trip_start,
};
