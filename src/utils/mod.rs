pub mod clock;
pub mod logging;
pub mod serde_helpers;

pub use clock::{Clock, ManualClock, SystemClock};
