use std::io;

use chrono::{DateTime, TimeZone};
use csv::{Terminator, Writer, WriterBuilder};
use serde::{Serialize, Serializer};

use crate::error::{EnvError, Result};

/// Timestamp layout for the `date-time` column (minute precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

// Magnus coefficients
const MAGNUS_BETA: f64 = 17.62;
const MAGNUS_LAMBDA: f64 = 243.12;

/// One temperature/pressure/humidity sample from either source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature: f64, // °C
    pub pressure: f64,    // hPa
    pub humidity: f64,    // %
}

impl Measurement {
    pub fn new(temperature: f64, pressure: f64, humidity: f64) -> Self {
        Self {
            temperature,
            pressure,
            humidity,
        }
    }

    /// Round every channel to 2 decimal places.
    pub fn rounded(self) -> Self {
        Self {
            temperature: round2(self.temperature),
            pressure: round2(self.pressure),
            humidity: round2(self.humidity),
        }
    }
}

/// A row of the CSV log. Field order and names are the file header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRecord {
    #[serde(rename = "date-time")]
    pub timestamp: String,
    #[serde(serialize_with = "shortest")]
    pub temperature: f64,
    #[serde(serialize_with = "shortest")]
    pub pressure: f64,
    #[serde(serialize_with = "shortest")]
    pub humidity: f64,
    #[serde(rename = "dew-point", serialize_with = "shortest")]
    pub dew_point: f64,
}

impl DerivedRecord {
    /// Derive the dew point and stamp the measurement with `at`.
    pub fn derive<Tz>(measurement: Measurement, at: &DateTime<Tz>) -> Result<Self>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let dew_point = round2(dew_point(measurement.temperature, measurement.humidity)?);
        Ok(Self {
            timestamp: format_timestamp(at),
            temperature: measurement.temperature,
            pressure: measurement.pressure,
            humidity: measurement.humidity,
            dew_point,
        })
    }
}

/// Dew point in °C for a temperature in °C and relative humidity in %.
pub fn dew_point(temperature: f64, humidity: f64) -> Result<f64> {
    if !(1.0..=100.0).contains(&humidity) {
        return Err(EnvError::InvalidHumidity(humidity));
    }
    let gamma =
        (MAGNUS_BETA * temperature) / (MAGNUS_LAMBDA + temperature) + (humidity / 100.0).ln();
    Ok(MAGNUS_LAMBDA * gamma / (MAGNUS_BETA - gamma))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// CSV writer for log rows. Rows end in CRLF, the line ending of existing logs.
pub fn log_writer<W: io::Write>(wtr: W, write_header: bool) -> Writer<W> {
    WriterBuilder::new()
        .has_headers(write_header)
        .terminator(Terminator::CRLF)
        .from_writer(wtr)
}

// csv writes floats through ryu ("1013.0"); the log keeps the shortest form ("1013").
fn shortest<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn dew_point_matches_magnus_reference() {
        let dp = round2(dew_point(25.5, 70.0).unwrap());
        assert_eq!(dp, 19.62);
        assert!(dp < 25.5);

        assert_eq!(round2(dew_point(20.0, 50.0).unwrap()), 9.26);
        assert_eq!(round2(dew_point(10.0, 1.0).unwrap()), -44.14);
    }

    #[test]
    fn saturated_air_dew_point_equals_temperature() {
        let dp = dew_point(12.3, 100.0).unwrap();
        assert!((dp - 12.3).abs() < 1e-9);
    }

    #[test]
    fn dew_point_rejects_humidity_out_of_range() {
        assert!(matches!(
            dew_point(20.0, 0.5),
            Err(EnvError::InvalidHumidity(h)) if h == 0.5
        ));
        assert!(matches!(
            dew_point(20.0, 100.5),
            Err(EnvError::InvalidHumidity(_))
        ));
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        let m = Measurement::new(21.456_78, 1009.123_4, 43.005_1).rounded();
        assert_eq!(m, Measurement::new(21.46, 1009.12, 43.01));
    }

    #[test]
    fn timestamp_drops_seconds() {
        let at = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 59)
            .unwrap();
        assert_eq!(format_timestamp(&at), "2024-03-09 07:05");
    }

    #[test]
    fn derive_keeps_source_precision() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = DerivedRecord::derive(Measurement::new(25.5, 1013.0, 70.0), &at).unwrap();
        assert_eq!(record.timestamp, "2024-01-02 03:04");
        assert_eq!(record.temperature, 25.5);
        assert_eq!(record.pressure, 1013.0);
        assert_eq!(record.dew_point, 19.62);
    }

    #[test]
    fn record_serializes_with_log_header() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = DerivedRecord::derive(Measurement::new(25.5, 1013.0, 70.0), &at).unwrap();

        let mut writer = log_writer(vec![], true);
        writer.serialize(&record).unwrap();
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        assert_eq!(
            out,
            "date-time,temperature,pressure,humidity,dew-point\r\n\
             2024-01-02 03:04,25.5,1013,70,19.62\r\n"
        );
    }
}
