pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::NotificationHub;
