//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] chaser_gateway::GatewayError),

    #[error("Detector error: {0}")]
    Detector(#[from] chaser_detector::DetectorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] chaser_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] chaser_persistence::PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
