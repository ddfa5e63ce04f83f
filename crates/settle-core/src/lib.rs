pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueueConfig, SettleConfig};
pub use error::{Result, SettleError};
