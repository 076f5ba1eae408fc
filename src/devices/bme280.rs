use std::thread;
use std::time::Duration;

use rppal::i2c::I2c;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::acquisition::data::Measurement;
use crate::devices::WeatherSource;
use crate::error::{EnvError, Result};

pub const I2C_BUS: u8 = 1;
pub const DEFAULT_ADDRESS: u16 = 0x77;

const BME280_CHIP_ID: u8 = 0x60;
const BME280_CHIP_ID_ADDR: u8 = 0xD0;

const BME280_CTRL_HUM_ADDR: u8 = 0xF2;
const BME280_STATUS_ADDR: u8 = 0xF3;
const BME280_CTRL_MEAS_ADDR: u8 = 0xF4;

const BME280_DATA_ADDR: u8 = 0xF7;
const BME280_P_T_H_DATA_LEN: usize = 8;

const BME280_P_T_CALIB_DATA_ADDR: u8 = 0x88;
const BME280_P_T_CALIB_DATA_LEN: usize = 24;

const BME280_H1_CALIB_DATA_ADDR: u8 = 0xA1;

const BME280_H_CALIB_DATA_ADDR: u8 = 0xE1;
const BME280_H_CALIB_DATA_LEN: usize = 7;

const BME280_HUMIDITY_MIN: f64 = 0.0;
const BME280_HUMIDITY_MAX: f64 = 100.0;

const OVERSAMPLING_X1: u8 = 0b001;
const MODE_FORCED: u8 = 0b01;
const STATUS_MEASURING: u8 = 0b1000;

// Max conversion time with x1 oversampling on all channels is 9.3 ms.
const MEASUREMENT_WAIT: Duration = Duration::from_millis(10);
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1);
const STATUS_POLL_LIMIT: u32 = 50;

macro_rules! concat_bytes {
    ($msb:expr, $lsb:expr) => {
        (($msb as u16) << 8) | ($lsb as u16)
    };
}

#[derive(Error, Debug)]
pub enum Bme280Error {
    #[error("I2C bus error: {0}")]
    Bus(String),

    #[error("device at {address:#04x} reports chip id {chip_id:#04x}, expected a BME280")]
    UnsupportedChip { address: u16, chip_id: u8 },

    #[error("invalid sensor data: {0}")]
    InvalidData(&'static str),

    #[error("calibration data not loaded")]
    NoCalibrationData,

    #[error("device at {address:#04x} did not finish converting within {waited:?}")]
    ConversionTimeout { address: u16, waited: Duration },
}

impl From<rppal::i2c::Error> for Bme280Error {
    fn from(err: rppal::i2c::Error) -> Self {
        Bme280Error::Bus(err.to_string())
    }
}

/// Register-level access to a device on an I²C bus.
pub trait RegisterBus {
    fn select(&mut self, address: u16) -> std::result::Result<(), Bme280Error>;
    fn read_registers(
        &mut self,
        register: u8,
        buffer: &mut [u8],
    ) -> std::result::Result<(), Bme280Error>;
    fn write_register(&mut self, register: u8, value: u8)
    -> std::result::Result<(), Bme280Error>;
}

impl RegisterBus for I2c {
    fn select(&mut self, address: u16) -> std::result::Result<(), Bme280Error> {
        self.set_slave_address(address)?;
        Ok(())
    }

    fn read_registers(
        &mut self,
        register: u8,
        buffer: &mut [u8],
    ) -> std::result::Result<(), Bme280Error> {
        self.write_read(&[register], buffer)?;
        Ok(())
    }

    fn write_register(
        &mut self,
        register: u8,
        value: u8,
    ) -> std::result::Result<(), Bme280Error> {
        self.smbus_write_byte(register, value)?;
        Ok(())
    }
}

/// Factory trim values burned into the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationData {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
    dig_p1: u16,
    dig_p2: i16,
    dig_p3: i16,
    dig_p4: i16,
    dig_p5: i16,
    dig_p6: i16,
    dig_p7: i16,
    dig_p8: i16,
    dig_p9: i16,
    dig_h1: u8,
    dig_h2: i16,
    dig_h3: u8,
    dig_h4: i16,
    dig_h5: i16,
    dig_h6: i8,
}

impl CalibrationData {
    fn parse(
        pt_data: &[u8; BME280_P_T_CALIB_DATA_LEN],
        h1: u8,
        h_data: &[u8; BME280_H_CALIB_DATA_LEN],
    ) -> Self {
        CalibrationData {
            dig_t1: concat_bytes!(pt_data[1], pt_data[0]),
            dig_t2: concat_bytes!(pt_data[3], pt_data[2]) as i16,
            dig_t3: concat_bytes!(pt_data[5], pt_data[4]) as i16,
            dig_p1: concat_bytes!(pt_data[7], pt_data[6]),
            dig_p2: concat_bytes!(pt_data[9], pt_data[8]) as i16,
            dig_p3: concat_bytes!(pt_data[11], pt_data[10]) as i16,
            dig_p4: concat_bytes!(pt_data[13], pt_data[12]) as i16,
            dig_p5: concat_bytes!(pt_data[15], pt_data[14]) as i16,
            dig_p6: concat_bytes!(pt_data[17], pt_data[16]) as i16,
            dig_p7: concat_bytes!(pt_data[19], pt_data[18]) as i16,
            dig_p8: concat_bytes!(pt_data[21], pt_data[20]) as i16,
            dig_p9: concat_bytes!(pt_data[23], pt_data[22]) as i16,
            dig_h1: h1,
            dig_h2: concat_bytes!(h_data[1], h_data[0]) as i16,
            dig_h3: h_data[2],
            // H4 and H5 are 12-bit values sharing the nibbles of 0xE5
            dig_h4: ((h_data[3] as i8 as i16) << 4) | (h_data[4] as i16 & 0x0F),
            dig_h5: ((h_data[5] as i8 as i16) << 4) | (h_data[4] as i16 >> 4),
            dig_h6: h_data[6] as i8,
        }
    }

    /// Compensate raw ADC words, using the datasheet floating point formulas.
    fn compensate(&self, raw: RawSample) -> std::result::Result<Measurement, Bme280Error> {
        let t_fine = self.t_fine(raw.temperature);
        let temperature = t_fine / 5120.0;
        let pressure = self.compensate_pressure(raw.pressure, t_fine)?;
        let humidity = self.compensate_humidity(raw.humidity, t_fine);
        Ok(Measurement::new(temperature, pressure, humidity))
    }

    fn t_fine(&self, adc_t: u32) -> f64 {
        let adc_t = adc_t as f64;
        let var1 = (adc_t / 16384.0 - self.dig_t1 as f64 / 1024.0) * self.dig_t2 as f64;
        let var2 = adc_t / 131072.0 - self.dig_t1 as f64 / 8192.0;
        let var2 = var2 * var2 * self.dig_t3 as f64;
        var1 + var2
    }

    /// Pressure in hPa.
    fn compensate_pressure(
        &self,
        adc_p: u32,
        t_fine: f64,
    ) -> std::result::Result<f64, Bme280Error> {
        let var1 = t_fine / 2.0 - 64000.0;
        let var2 = var1 * var1 * self.dig_p6 as f64 / 32768.0;
        let var2 = var2 + var1 * self.dig_p5 as f64 * 2.0;
        let var2 = var2 / 4.0 + self.dig_p4 as f64 * 65536.0;
        let var1 = (self.dig_p3 as f64 * var1 * var1 / 524288.0 + self.dig_p2 as f64 * var1)
            / 524288.0;
        let var1 = (1.0 + var1 / 32768.0) * self.dig_p1 as f64;
        if var1 == 0.0 {
            return Err(Bme280Error::InvalidData("pressure compensation divides by zero"));
        }

        let pressure = 1048576.0 - adc_p as f64;
        let pressure = (pressure - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.dig_p9 as f64 * pressure * pressure / 2147483648.0;
        let var2 = pressure * self.dig_p8 as f64 / 32768.0;
        let pressure = pressure + (var1 + var2 + self.dig_p7 as f64) / 16.0;
        Ok(pressure / 100.0)
    }

    fn compensate_humidity(&self, adc_h: u32, t_fine: f64) -> f64 {
        let var1 = t_fine - 76800.0;
        let var2 = self.dig_h4 as f64 * 64.0 + self.dig_h5 as f64 / 16384.0 * var1;
        let var3 = adc_h as f64 - var2;
        let var4 = self.dig_h2 as f64 / 65536.0;
        let var5 = 1.0 + self.dig_h3 as f64 / 67108864.0 * var1;
        let var6 = 1.0 + self.dig_h6 as f64 / 67108864.0 * var1 * var5;
        let var6 = var3 * var4 * var6;

        let humidity = var6 * (1.0 - self.dig_h1 as f64 * var6 / 524288.0);
        humidity.clamp(BME280_HUMIDITY_MIN, BME280_HUMIDITY_MAX)
    }
}

#[derive(Debug, Clone, Copy)]
struct RawSample {
    pressure: u32,
    temperature: u32,
    humidity: u32,
}

impl RawSample {
    fn parse(data: [u8; BME280_P_T_H_DATA_LEN]) -> Self {
        let pressure = ((data[0] as u32) << 12) | ((data[1] as u32) << 4) | ((data[2] as u32) >> 4);
        let temperature =
            ((data[3] as u32) << 12) | ((data[4] as u32) << 4) | ((data[5] as u32) >> 4);
        let humidity = ((data[6] as u32) << 8) | data[7] as u32;
        RawSample {
            pressure,
            temperature,
            humidity,
        }
    }
}

/// BME280 driver over any [`RegisterBus`].
pub struct Bme280<B: RegisterBus> {
    bus: B,
    address: u16,
    calibration: Option<CalibrationData>,
}

impl<B: RegisterBus> Bme280<B> {
    pub fn new(mut bus: B, address: u16) -> std::result::Result<Self, Bme280Error> {
        bus.select(address)?;
        Ok(Bme280 {
            bus,
            address,
            calibration: None,
        })
    }

    pub fn verify_chip_id(&mut self) -> std::result::Result<(), Bme280Error> {
        let chip_id = self.read_reg(BME280_CHIP_ID_ADDR)?;
        if chip_id == BME280_CHIP_ID {
            debug!("BME280 found at {:#04x}", self.address);
            Ok(())
        } else {
            Err(Bme280Error::UnsupportedChip {
                address: self.address,
                chip_id,
            })
        }
    }

    pub fn load_calibration(&mut self) -> std::result::Result<&CalibrationData, Bme280Error> {
        let mut pt_data = [0u8; BME280_P_T_CALIB_DATA_LEN];
        self.bus
            .read_registers(BME280_P_T_CALIB_DATA_ADDR, &mut pt_data)?;
        let h1 = self.read_reg(BME280_H1_CALIB_DATA_ADDR)?;
        let mut h_data = [0u8; BME280_H_CALIB_DATA_LEN];
        self.bus.read_registers(BME280_H_CALIB_DATA_ADDR, &mut h_data)?;

        let calibration = CalibrationData::parse(&pt_data, h1, &h_data);
        debug!("Loaded BME280 calibration: {:?}", calibration);
        Ok(self.calibration.insert(calibration))
    }

    /// Trigger one forced-mode conversion and return the compensated reading.
    pub fn sample(&mut self) -> std::result::Result<Measurement, Bme280Error> {
        if self.calibration.is_none() {
            return Err(Bme280Error::NoCalibrationData);
        }

        // ctrl_hum only takes effect after the following ctrl_meas write
        self.bus.write_register(BME280_CTRL_HUM_ADDR, OVERSAMPLING_X1)?;
        let ctrl_meas = (OVERSAMPLING_X1 << 5) | (OVERSAMPLING_X1 << 2) | MODE_FORCED;
        self.bus.write_register(BME280_CTRL_MEAS_ADDR, ctrl_meas)?;

        thread::sleep(MEASUREMENT_WAIT);
        self.wait_for_conversion()?;

        let mut data = [0u8; BME280_P_T_H_DATA_LEN];
        self.bus.read_registers(BME280_DATA_ADDR, &mut data)?;
        let raw = RawSample::parse(data);
        debug!("BME280 raw sample: {:?}", raw);

        match self.calibration.as_ref() {
            Some(calibration) => calibration.compensate(raw),
            None => Err(Bme280Error::NoCalibrationData),
        }
    }

    fn wait_for_conversion(&mut self) -> std::result::Result<(), Bme280Error> {
        for _ in 0..STATUS_POLL_LIMIT {
            if self.read_reg(BME280_STATUS_ADDR)? & STATUS_MEASURING == 0 {
                return Ok(());
            }
            thread::sleep(STATUS_POLL_INTERVAL);
        }
        warn!("BME280 at {:#04x} is still converting", self.address);
        Err(Bme280Error::ConversionTimeout {
            address: self.address,
            waited: MEASUREMENT_WAIT + STATUS_POLL_INTERVAL * STATUS_POLL_LIMIT,
        })
    }

    fn read_reg(&mut self, register: u8) -> std::result::Result<u8, Bme280Error> {
        let mut data = [0u8; 1];
        self.bus.read_registers(register, &mut data)?;
        Ok(data[0])
    }

    pub fn release(self) -> B {
        self.bus
    }
}

/// Verify, calibrate and sample the sensor at `address`, rounded to 2 decimals.
pub fn read_sensor<B: RegisterBus>(bus: B, address: u16) -> Result<Measurement> {
    let mut sensor = Bme280::new(bus, address)?;
    sensor.verify_chip_id()?;
    sensor.load_calibration()?;
    let measurement = sensor.sample()?.rounded();
    info!(
        "BME280 reading: {} °C, {} hPa, {} %",
        measurement.temperature, measurement.pressure, measurement.humidity
    );
    Ok(measurement)
}

/// Parse a sensor address written as hex (`0x77` or `77h`) or decimal (`119`).
pub fn parse_address(address: &str) -> Result<u16> {
    let trimmed = address.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .or_else(|| trimmed.strip_suffix('h'))
        .or_else(|| trimmed.strip_suffix('H'));
    let parsed = match hex {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => trimmed.parse::<u16>(),
    };
    match parsed {
        Ok(value) if value <= 0x7F => Ok(value),
        _ => Err(EnvError::InvalidAddress(address.to_string())),
    }
}

/// Local BME280 source. The bus is opened on every acquisition and closed after it.
#[derive(Debug, Clone, Copy)]
pub struct Bme280Sensor {
    bus: u8,
    address: u16,
}

impl Bme280Sensor {
    pub fn new(bus: u8, address: u16) -> Self {
        info!("Initializing BME280 on I2C bus {} at {:#04x}", bus, address);
        Bme280Sensor { bus, address }
    }
}

impl WeatherSource for Bme280Sensor {
    fn acquire(&mut self) -> Result<Measurement> {
        let i2c = I2c::with_bus(self.bus).map_err(Bme280Error::from)?;
        read_sensor(i2c, self.address)
    }
}
