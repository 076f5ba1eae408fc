pub mod data;

use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info};

use crate::devices::WeatherSource;
use crate::devices::bme280::{self, Bme280Sensor};
use crate::devices::openweather::{self, OpenWeather};
use crate::error::{EnvError, Result};
use data::DerivedRecord;

/// Settings for the OpenWeatherMap source
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub endpoint: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(api_key: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            api_key: api_key.to_string(),
            latitude,
            longitude,
            endpoint: openweather::DEFAULT_ENDPOINT.to_string(),
            timeout: openweather::DEFAULT_TIMEOUT,
        }
    }
}

/// Settings for the attached BME280
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalConfig {
    pub bus: u8,
    pub address: u16,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            bus: bme280::I2C_BUS,
            address: bme280::DEFAULT_ADDRESS,
        }
    }
}

/// Which source a run samples from, decided once from the entry-point parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceConfig {
    Remote(RemoteConfig),
    Local(LocalConfig),
}

impl SourceConfig {
    /// A non-empty credential selects the weather service; otherwise the local
    /// sensor is used and the coordinates are ignored.
    pub fn resolve(
        credential: Option<&str>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        sensor_address: &str,
    ) -> Result<Self> {
        match credential.filter(|key| !key.is_empty()) {
            Some(key) => match (latitude, longitude) {
                (Some(lat), Some(lon)) => Ok(SourceConfig::Remote(RemoteConfig::new(key, lat, lon))),
                _ => Err(EnvError::MissingCoordinates),
            },
            None => Ok(SourceConfig::Local(LocalConfig {
                address: bme280::parse_address(sensor_address)?,
                ..LocalConfig::default()
            })),
        }
    }

    /// Point the remote source at another service URL. No effect on the sensor.
    pub fn with_endpoint(self, endpoint: &str) -> Self {
        match self {
            SourceConfig::Remote(remote) => SourceConfig::Remote(RemoteConfig {
                endpoint: endpoint.to_string(),
                ..remote
            }),
            local => local,
        }
    }

    pub fn into_source(self) -> Box<dyn WeatherSource> {
        match self {
            SourceConfig::Remote(remote) => Box::new(OpenWeather::with_endpoint(
                &remote.endpoint,
                remote.timeout,
                remote.latitude,
                remote.longitude,
                &remote.api_key,
            )),
            SourceConfig::Local(local) => Box::new(Bme280Sensor::new(local.bus, local.address)),
        }
    }
}

/// Sample one reading and append it to the CSV log at `output_path`.
pub fn get_data(
    credential: Option<&str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    output_path: &Path,
    sensor_address: &str,
) -> Result<()> {
    get_data_from(
        openweather::DEFAULT_ENDPOINT,
        credential,
        latitude,
        longitude,
        output_path,
        sensor_address,
    )
}

/// [`get_data`] against a weather service at `endpoint`.
pub fn get_data_from(
    endpoint: &str,
    credential: Option<&str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    output_path: &Path,
    sensor_address: &str,
) -> Result<()> {
    let config = SourceConfig::resolve(credential, latitude, longitude, sensor_address)?
        .with_endpoint(endpoint);
    match &config {
        SourceConfig::Remote(_) => info!("API key given, sampling from OpenWeatherMap"),
        SourceConfig::Local(local) => info!(
            "No API key given, sampling BME280 at {:#04x}",
            local.address
        ),
    }
    run(config, output_path)?;
    Ok(())
}

/// Acquire from the configured source and append the derived row.
pub fn run(config: SourceConfig, output_path: &Path) -> Result<DerivedRecord> {
    let mut source = config.into_source();
    record_from(source.as_mut(), output_path)
}

/// Acquire from `source`, derive the dew point and append the row.
/// Nothing is written when acquisition fails.
pub fn record_from(source: &mut dyn WeatherSource, output_path: &Path) -> Result<DerivedRecord> {
    let measurement = source.acquire()?;
    let record = DerivedRecord::derive(measurement, &Local::now())?;
    append_record(output_path, &record)?;
    info!(
        "Appended {} °C / {} hPa / {} % / dew point {} °C to {}",
        record.temperature,
        record.pressure,
        record.humidity,
        record.dew_point,
        output_path.display()
    );
    Ok(record)
}

/// Append `record` to the log, writing the header first if the file is empty.
/// Returns whether the header was written.
pub fn append_record(path: &Path, record: &DerivedRecord) -> Result<bool> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let write_header = file.metadata()?.len() == 0;
    if write_header {
        debug!("{} is empty, writing header", path.display());
    }

    let mut writer = data::log_writer(file, write_header);
    writer.serialize(record)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(write_header)
}
