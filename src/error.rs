use thiserror::Error;

use crate::devices::bme280::Bme280Error;

pub type Result<T> = std::result::Result<T, EnvError>;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Weather service did not answer in time")]
    Timeout,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Hardware error: {0}")]
    Hardware(#[from] Bme280Error),

    #[error("Invalid sensor address: {0}")]
    InvalidAddress(String),

    #[error("Dew point undefined for humidity {0}% (must be between 1 and 100)")]
    InvalidHumidity(f64),

    #[error("Latitude and longitude are required when an API key is given")]
    MissingCoordinates,

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
}
