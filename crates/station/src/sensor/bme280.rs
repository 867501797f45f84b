//! BME280 combined temperature/humidity/pressure sensor over I2C.
//!
//! Forced-mode sampling at x1 oversampling, IIR filter off.  Compensation
//! follows the datasheet's double-precision reference formulas; raw
//! register values never leave this module.

use rppal::i2c::I2c;
use std::sync::{Arc, Mutex};
use std::{thread, time::Duration};

use async_trait::async_trait;

use crate::error::{InitError, ReadError};
use crate::sensor::{Measurement, Sensor};

// ── Register addresses ──────────────────────────────────────────────────────

/// Chip identification register; reads 0x60 on a BME280.
const REG_ID: u8 = 0xD0;
const CHIP_ID_BME280: u8 = 0x60;

/// Humidity oversampling control.  Must be written before `REG_CTRL_MEAS`
/// for changes to take effect.
const REG_CTRL_HUM: u8 = 0xF2;
/// Status register; bit 3 is set while a conversion is running.
const REG_STATUS: u8 = 0xF3;
/// Temperature/pressure oversampling and power mode.
const REG_CTRL_MEAS: u8 = 0xF4;
/// Standby time and IIR filter configuration.
const REG_CONFIG: u8 = 0xF5;
/// Start of the 8-byte measurement burst (press msb..hum lsb).
const REG_DATA: u8 = 0xF7;

/// Calibration blocks: 26 bytes at 0x88 (T1..P9 plus H1 at the end) and
/// 7 bytes at 0xE1 (H2..H6).
const REG_CALIB_TP: u8 = 0x88;
const REG_CALIB_H: u8 = 0xE1;

// ── Control register values ─────────────────────────────────────────────────

/// osrs_h = 001 (humidity x1).
const CTRL_HUM_X1: u8 = 0b001;
/// osrs_t = 001, osrs_p = 001, mode = 01 (forced): one conversion per write.
const CTRL_MEAS_FORCED_X1: u8 = 0b001_001_01;
/// Filter off; standby time is irrelevant in forced mode.
const CONFIG_FILTER_OFF: u8 = 0x00;

/// Measurement time at x1/x1/x1 oversampling is 9.3 ms worst case.
const CONVERSION_WAIT: Duration = Duration::from_millis(10);

/// Status register bit set while a conversion is in progress.
const STATUS_MEASURING: u8 = 1 << 3;

// ── Calibration ─────────────────────────────────────────────────────────────

/// Factory trimming parameters, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Calibration {
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

/// Decode the two calibration blocks.
///
/// All 16-bit words are little-endian.  H4/H5 share the nibble at 0xE5:
/// H4 = E4[11:4] | E5[3:0], H5 = E6[11:4] | E5[7:4], both sign-extended
/// from the top byte.
fn parse_calibration(tp: &[u8; 26], h: &[u8; 7]) -> Calibration {
    let u16le = |b: &[u8; 26], i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
    let i16le = |b: &[u8; 26], i: usize| i16::from_le_bytes([b[i], b[i + 1]]);

    Calibration {
        dig_t1: u16le(tp, 0),
        dig_t2: i16le(tp, 2),
        dig_t3: i16le(tp, 4),
        dig_p1: u16le(tp, 6),
        dig_p2: i16le(tp, 8),
        dig_p3: i16le(tp, 10),
        dig_p4: i16le(tp, 12),
        dig_p5: i16le(tp, 14),
        dig_p6: i16le(tp, 16),
        dig_p7: i16le(tp, 18),
        dig_p8: i16le(tp, 20),
        dig_p9: i16le(tp, 22),
        // tp[24] is 0xA0, reserved.
        dig_h1: tp[25],
        dig_h2: i16::from_le_bytes([h[0], h[1]]),
        dig_h3: h[2],
        dig_h4: ((h[3] as i8 as i16) << 4) | (h[4] & 0x0F) as i16,
        dig_h5: ((h[5] as i8 as i16) << 4) | ((h[4] >> 4) & 0x0F) as i16,
        dig_h6: h[6] as i8,
    }
}

// ── Raw burst decoding ──────────────────────────────────────────────────────

/// 20-bit pressure and temperature plus 16-bit humidity from one burst.
fn decode_burst(buf: &[u8; 8]) -> (i32, i32, i32) {
    let adc_p = ((buf[0] as i32) << 12) | ((buf[1] as i32) << 4) | ((buf[2] as i32) >> 4);
    let adc_t = ((buf[3] as i32) << 12) | ((buf[4] as i32) << 4) | ((buf[5] as i32) >> 4);
    let adc_h = ((buf[6] as i32) << 8) | (buf[7] as i32);
    (adc_t, adc_p, adc_h)
}

// ── Compensation (datasheet double-precision reference) ─────────────────────

/// Returns degrees Celsius and the `t_fine` carry used by the other two
/// compensations.
fn compensate_temperature(cal: &Calibration, adc_t: i32) -> (f64, f64) {
    let var1 = (adc_t as f64 / 16384.0 - cal.dig_t1 as f64 / 1024.0) * cal.dig_t2 as f64;
    let d = adc_t as f64 / 131072.0 - cal.dig_t1 as f64 / 8192.0;
    let var2 = d * d * cal.dig_t3 as f64;
    let t_fine = var1 + var2;
    (t_fine / 5120.0, t_fine)
}

/// Returns hectopascal.
fn compensate_pressure(cal: &Calibration, adc_p: i32, t_fine: f64) -> f64 {
    let mut var1 = t_fine / 2.0 - 64000.0;
    let mut var2 = var1 * var1 * cal.dig_p6 as f64 / 32768.0;
    var2 += var1 * cal.dig_p5 as f64 * 2.0;
    var2 = var2 / 4.0 + cal.dig_p4 as f64 * 65536.0;
    var1 = (cal.dig_p3 as f64 * var1 * var1 / 524288.0 + cal.dig_p2 as f64 * var1) / 524288.0;
    var1 = (1.0 + var1 / 32768.0) * cal.dig_p1 as f64;
    if var1 == 0.0 {
        return 0.0; // degenerate calibration — avoid div-by-zero
    }
    let mut p = 1048576.0 - adc_p as f64;
    p = (p - var2 / 4096.0) * 6250.0 / var1;
    var1 = cal.dig_p9 as f64 * p * p / 2147483648.0;
    var2 = p * cal.dig_p8 as f64 / 32768.0;
    p += (var1 + var2 + cal.dig_p7 as f64) / 16.0;
    p / 100.0
}

/// Returns relative humidity in percent, clamped to the sensor's 0–100
/// output range.
fn compensate_humidity(cal: &Calibration, adc_h: i32, t_fine: f64) -> f64 {
    let var_h = t_fine - 76800.0;
    let mut h = (adc_h as f64 - (cal.dig_h4 as f64 * 64.0 + cal.dig_h5 as f64 / 16384.0 * var_h))
        * (cal.dig_h2 as f64 / 65536.0
            * (1.0
                + cal.dig_h6 as f64 / 67108864.0
                    * var_h
                    * (1.0 + cal.dig_h3 as f64 / 67108864.0 * var_h)));
    h *= 1.0 - cal.dig_h1 as f64 * h / 524288.0;
    h.clamp(0.0, 100.0)
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// BME280 driver backed by `rppal::i2c`.
///
/// Construction performs the one-time device initialization: chip-id probe,
/// calibration readout, oversampling setup.  A failed open is fatal to the
/// caller; reads afterwards only ever fail transiently.
pub struct Bme280 {
    inner: Arc<Inner>,
}

struct Inner {
    dev: Mutex<I2c>,
    cal: Calibration,
}

impl Bme280 {
    pub fn open(bus: u8, addr: u16) -> Result<Self, InitError> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| InitError::Bus(e.to_string()))?;
        i2c.set_slave_address(addr)
            .map_err(|e| InitError::Bus(e.to_string()))?;

        let mut id = [0u8; 1];
        i2c.block_read(REG_ID, &mut id)
            .map_err(|e| InitError::Bus(e.to_string()))?;
        if id[0] != CHIP_ID_BME280 {
            return Err(InitError::UnknownChip {
                addr,
                found: id[0],
            });
        }

        let mut tp = [0u8; 26];
        i2c.block_read(REG_CALIB_TP, &mut tp)
            .map_err(|e| InitError::Bus(e.to_string()))?;
        let mut h = [0u8; 7];
        i2c.block_read(REG_CALIB_H, &mut h)
            .map_err(|e| InitError::Bus(e.to_string()))?;
        let cal = parse_calibration(&tp, &h);

        // Humidity oversampling must be set before ctrl_meas.
        i2c.block_write(REG_CTRL_HUM, &[CTRL_HUM_X1])
            .map_err(|e| InitError::Bus(e.to_string()))?;
        i2c.block_write(REG_CONFIG, &[CONFIG_FILTER_OFF])
            .map_err(|e| InitError::Bus(e.to_string()))?;

        tracing::info!(
            bus,
            addr = format_args!("0x{addr:02x}"),
            "bme280 initialised"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                dev: Mutex::new(i2c),
                cal,
            }),
        })
    }
}

impl Inner {
    /// One forced-mode conversion.  Blocking: runs under `spawn_blocking`.
    fn sample(&self) -> Result<Measurement, ReadError> {
        let mut dev = match self.dev.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        dev.block_write(REG_CTRL_MEAS, &[CTRL_MEAS_FORCED_X1])
            .map_err(|e| ReadError::Io(e.to_string()))?;

        thread::sleep(CONVERSION_WAIT);

        // Normally one wait suffices; poll briefly in case the conversion
        // is still running.
        for _ in 0..3 {
            let mut status = [0u8; 1];
            dev.block_read(REG_STATUS, &mut status)
                .map_err(|e| ReadError::Io(e.to_string()))?;
            if status[0] & STATUS_MEASURING == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 8];
        dev.block_read(REG_DATA, &mut buf)
            .map_err(|e| ReadError::Io(e.to_string()))?;

        let (adc_t, adc_p, adc_h) = decode_burst(&buf);
        let (temperature_c, t_fine) = compensate_temperature(&self.cal, adc_t);
        Ok(Measurement {
            temperature_c,
            humidity_pct: compensate_humidity(&self.cal, adc_h, t_fine),
            pressure_hpa: compensate_pressure(&self.cal, adc_p, t_fine),
        })
    }
}

#[async_trait]
impl Sensor for Bme280 {
    async fn read(&self) -> Result<Measurement, ReadError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.sample())
            .await
            .map_err(|e| ReadError::Io(format!("read task failed: {e}")))?
    }
}

// ===========================================================================
// Tests
// ===========================================================================
