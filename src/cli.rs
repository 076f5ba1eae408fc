use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "envlogger")]
#[command(about = "Append one temperature/pressure/humidity reading to a CSV log")]
#[command(version)]
pub struct Cli {
    #[arg(
        long,
        env = "OPENWEATHER_API_KEY",
        help = "API key for OpenWeatherMap; without it the BME280 sensor is read"
    )]
    pub api: Option<String>,

    #[arg(long, allow_negative_numbers = true, help = "Latitude for weather data")]
    pub lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true, help = "Longitude for weather data")]
    pub lon: Option<f64>,

    #[arg(long, default_value = "environment.csv", help = "File location for output")]
    pub file: PathBuf,

    #[arg(long, default_value = "0x77", help = "Address for BME280 sensor")]
    pub address: String,

    /// Accepted for compatibility with older invocations; the sensor is always on I2C bus 1.
    #[arg(long, hide = true)]
    pub port: Option<u8>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, default_value = "logs", help = "Directory for the rolling log file")]
    pub log_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_arguments() {
        let cli = Cli::try_parse_from([
            "envlogger",
            "--api",
            "api_key",
            "--lat",
            "1.0",
            "--lon",
            "-122.41",
            "--file",
            "file_location",
            "--port",
            "1",
            "--address",
            "0x76",
        ])
        .unwrap();
        assert_eq!(cli.api.as_deref(), Some("api_key"));
        assert_eq!(cli.lat, Some(1.0));
        assert_eq!(cli.lon, Some(-122.41));
        assert_eq!(cli.file, PathBuf::from("file_location"));
        assert_eq!(cli.port, Some(1));
        assert_eq!(cli.address, "0x76");
    }

    #[test]
    fn address_defaults_to_0x77() {
        let cli = Cli::try_parse_from(["envlogger", "--file", "out.csv"]).unwrap();
        assert_eq!(cli.address, "0x77");
        assert_eq!(cli.lat, None);
        assert!(!cli.verbose);
    }
}
