pub mod app_config;
pub mod config;
pub mod error;
pub mod hashing;
pub mod schema;
pub mod time;
pub mod types;

pub use config::Config;
pub use error::*;
pub use types::*;
