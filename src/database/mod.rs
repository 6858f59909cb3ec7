pub mod connection;
pub mod operations;

pub use operations::SampleStore;
