pub mod clock;
pub mod db;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
