pub mod payload;
pub mod service;

pub use service::{SensorError, SensorService};
