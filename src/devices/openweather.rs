use std::error::Error;
use std::io;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::acquisition::data::Measurement;
use crate::devices::WeatherSource;
use crate::error::{EnvError, Result};

pub const DEFAULT_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: MainSection,
}

#[derive(Debug, Deserialize)]
struct MainSection {
    temp: f64,
    pressure: f64,
    humidity: f64,
}

/// Current-weather client for the OpenWeatherMap API.
pub struct OpenWeather {
    agent: ureq::Agent,
    endpoint: String,
    latitude: f64,
    longitude: f64,
    api_key: String,
}

impl OpenWeather {
    pub fn new(latitude: f64, longitude: f64, api_key: &str) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, latitude, longitude, api_key)
    }

    pub fn with_endpoint(
        endpoint: &str,
        timeout: Duration,
        latitude: f64,
        longitude: f64,
        api_key: &str,
    ) -> Self {
        info!(
            "Initializing OpenWeather client for ({}, {}) at {}",
            latitude, longitude, endpoint
        );
        OpenWeather {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: endpoint.to_string(),
            latitude,
            longitude,
            api_key: api_key.to_string(),
        }
    }

    /// Request URL with the credential masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!(
            "{}?lat={}&lon={}&appid=***&units=metric",
            self.endpoint, self.latitude, self.longitude
        )
    }

    /// Issue one GET and return the reading exactly as the service reports it.
    pub fn fetch(&self) -> Result<Measurement> {
        info!("Requesting current weather: {}", self.redacted_url());
        let response = self
            .agent
            .get(&self.endpoint)
            .query("lat", &self.latitude.to_string())
            .query("lon", &self.longitude.to_string())
            .query("appid", &self.api_key)
            .query("units", "metric")
            .call()
            .map_err(request_error)?;

        let body = response
            .into_string()
            .map_err(|e| EnvError::Parse(format!("unreadable response body: {}", e)))?;
        debug!("Weather service responded: {}", body);

        let measurement = parse_response(&body)?;
        info!(
            "OpenWeather reading: {} °C, {} hPa, {} %",
            measurement.temperature, measurement.pressure, measurement.humidity
        );
        Ok(measurement)
    }
}

impl WeatherSource for OpenWeather {
    fn acquire(&mut self) -> Result<Measurement> {
        self.fetch()
    }
}

/// Extract `main.temp`, `main.pressure` and `main.humidity` from a response body.
pub fn parse_response(body: &str) -> Result<Measurement> {
    let parsed: WeatherResponse = serde_json::from_str(body)
        .map_err(|e| EnvError::Parse(format!("unexpected weather response: {}", e)))?;
    Ok(Measurement::new(
        parsed.main.temp,
        parsed.main.pressure,
        parsed.main.humidity,
    ))
}

// An error status carries no `main` section, so it is reported as a parse failure.
fn request_error(err: ureq::Error) -> EnvError {
    match err {
        ureq::Error::Status(code, response) => EnvError::Parse(format!(
            "weather service answered HTTP {}: {}",
            code,
            response.into_string().unwrap_or_default()
        )),
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                EnvError::Timeout
            } else {
                EnvError::Network(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = transport.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_service_precision() {
        let body = r#"{"coord":{"lon":-122.41,"lat":37.77},
            "main":{"temp":25.537,"feels_like":25.1,"pressure":1013,"humidity":70}}"#;
        let m = parse_response(body).unwrap();
        assert_eq!(m, Measurement::new(25.537, 1013.0, 70.0));
    }

    #[test]
    fn parse_rejects_missing_fields() {
        let body = r#"{"main":{"temp":25.5,"humidity":70}}"#;
        assert!(matches!(parse_response(body), Err(EnvError::Parse(_))));

        let body = r#"{"cod":401,"message":"Invalid API key"}"#;
        assert!(matches!(parse_response(body), Err(EnvError::Parse(_))));
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            parse_response("<html>bad gateway</html>"),
            Err(EnvError::Parse(_))
        ));
    }

    #[test]
    fn redacted_url_hides_credential() {
        let client = OpenWeather::new(37.77, -122.41, "secret-key");
        let url = client.redacted_url();
        assert_eq!(
            url,
            "https://api.openweathermap.org/data/2.5/weather?lat=37.77&lon=-122.41&appid=***&units=metric"
        );
        assert!(!url.contains("secret-key"));
    }
}
