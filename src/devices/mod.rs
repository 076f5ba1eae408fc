pub mod bme280;
pub mod openweather;

pub use bme280::{Bme280, Bme280Sensor, RegisterBus};
pub use openweather::OpenWeather;

use crate::acquisition::data::Measurement;
use crate::error::Result;

/// A source that produces one measurement per call.
pub trait WeatherSource {
    fn acquire(&mut self) -> Result<Measurement>;
}
