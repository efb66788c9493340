pub mod config;
pub mod reading;
pub mod timestamp;

pub use config::{ConfigError, TiltConfig};
pub use reading::{MalformedReading, Reading};
pub use timestamp::{Clock, Timestamp};
