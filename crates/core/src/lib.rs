pub mod config;
pub mod error;
pub mod mail;
pub mod types;

pub use config::AppConfig;
pub use error::{DripError, DripResult};
