pub mod cli;
pub mod config;
pub mod error;
pub mod services;

pub use config::ApiConfig;
pub use error::{AppError, AppResult};
