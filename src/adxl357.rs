//! ADXL357 accelerometer driver over a register-addressed SPI bus
//!
//! Owns device configuration, data-ready synchronization, raw sample
//! retrieval, raw-to-physical conversion and offset calibration. The bus
//! handle is exclusively owned by the driver; no other component issues
//! register transfers.

use crate::bus::{DataReadyLine, RegisterBus};
use crate::error::{MonitorError, Result};
use std::time::{Duration, Instant};

// ADXL357 register addresses
const REG_DEVID_AD: u8 = 0x00;    // Analog Devices ID (always 0xAD)
const REG_STATUS: u8 = 0x04;      // Status flags
const REG_XDATA3: u8 = 0x08;      // X-axis data, high byte first
const REG_YDATA3: u8 = 0x0B;      // Y-axis data
const REG_ZDATA3: u8 = 0x0E;      // Z-axis data
const REG_OFFSET_X_H: u8 = 0x1E;  // Offset trim registers, X high
const REG_OFFSET_Z_L: u8 = 0x23;  // Offset trim registers, Z low
const REG_FILTER: u8 = 0x28;      // HPF corner (bits 6:4) | ODR (bits 3:0)
const REG_RANGE: u8 = 0x2C;       // Measurement range (low 2 bits)
const REG_POWER_CTL: u8 = 0x2D;   // Power control

// Status register bits
const STATUS_FIFO_FULL: u8 = 0x02;
const STATUS_FIFO_OVR: u8 = 0x04;

// Power control bits
const POWER_CTL_STANDBY: u8 = 0x01; // 1 = standby, 0 = measurement mode

// Expected DEVID_AD value
const DEVID_AD_VALUE: u8 = 0xAD;

// Passes attempted before calibration is reported as failed
const CALIBRATION_ATTEMPTS: usize = 3;

/// Measurement range setting.
///
/// Selects the full-scale range and, with it, the sensitivity constant
/// used to convert raw counts to g.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    /// ±10 g, 51200 LSB/g
    G10,
    /// ±20 g, 25600 LSB/g
    G20,
    /// ±40 g, 12800 LSB/g
    G40,
}

impl Range {
    /// Low 2 bits of the range register for this setting
    pub fn bits(self) -> u8 {
        match self {
            Range::G10 => 0b01,
            Range::G20 => 0b10,
            Range::G40 => 0b11,
        }
    }

    /// Sensitivity in counts per g
    pub fn sensitivity(self) -> f64 {
        match self {
            Range::G10 => 51200.0,
            Range::G20 => 25600.0,
            Range::G40 => 12800.0,
        }
    }

    /// Full-scale magnitude in g
    pub fn full_scale_g(self) -> f64 {
        match self {
            Range::G10 => 10.0,
            Range::G20 => 20.0,
            Range::G40 => 40.0,
        }
    }

    /// Parse a range from its magnitude in g (10, 20 or 40)
    pub fn from_g(g: u32) -> Result<Self> {
        match g {
            10 => Ok(Range::G10),
            20 => Ok(Range::G20),
            40 => Ok(Range::G40),
            other => Err(MonitorError::InvalidConfig(format!(
                "range must be 10, 20 or 40 g, got {}",
                other
            ))),
        }
    }
}

/// Output data rate setting (ODR nibble of the filter register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDataRate {
    Hz4000,
    Hz2000,
    Hz1000,
    Hz500,
    Hz250,
    Hz125,
}

impl OutputDataRate {
    /// ODR nibble for the filter register
    pub fn bits(self) -> u8 {
        match self {
            OutputDataRate::Hz4000 => 0b0000,
            OutputDataRate::Hz2000 => 0b0001,
            OutputDataRate::Hz1000 => 0b0010,
            OutputDataRate::Hz500 => 0b0011,
            OutputDataRate::Hz250 => 0b0100,
            OutputDataRate::Hz125 => 0b0101,
        }
    }

    /// Nominal rate in Hz
    pub fn hz(self) -> f64 {
        match self {
            OutputDataRate::Hz4000 => 4000.0,
            OutputDataRate::Hz2000 => 2000.0,
            OutputDataRate::Hz1000 => 1000.0,
            OutputDataRate::Hz500 => 500.0,
            OutputDataRate::Hz250 => 250.0,
            OutputDataRate::Hz125 => 125.0,
        }
    }

    /// Parse an ODR from its nominal rate in Hz
    pub fn from_hz(hz: u32) -> Result<Self> {
        match hz {
            4000 => Ok(OutputDataRate::Hz4000),
            2000 => Ok(OutputDataRate::Hz2000),
            1000 => Ok(OutputDataRate::Hz1000),
            500 => Ok(OutputDataRate::Hz500),
            250 => Ok(OutputDataRate::Hz250),
            125 => Ok(OutputDataRate::Hz125),
            other => Err(MonitorError::InvalidConfig(format!(
                "unsupported output data rate: {} Hz",
                other
            ))),
        }
    }
}

/// On-device high-pass filter corner (HPF nibble of the filter register).
///
/// Corner frequencies are relative to the ODR; `Off` disables the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpfCorner {
    Off,
    C24_7,
    C6_21,
    C1_55,
    C0_39,
    C0_10,
    C0_02,
}

impl HpfCorner {
    /// HPF field for bits 6:4 of the filter register
    pub fn bits(self) -> u8 {
        match self {
            HpfCorner::Off => 0b000,
            HpfCorner::C24_7 => 0b001,
            HpfCorner::C6_21 => 0b010,
            HpfCorner::C1_55 => 0b011,
            HpfCorner::C0_39 => 0b100,
            HpfCorner::C0_10 => 0b101,
            HpfCorner::C0_02 => 0b110,
        }
    }

    /// Parse a corner from its register index (0 = off, 1..=6 = corners)
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(HpfCorner::Off),
            1 => Ok(HpfCorner::C24_7),
            2 => Ok(HpfCorner::C6_21),
            3 => Ok(HpfCorner::C1_55),
            4 => Ok(HpfCorner::C0_39),
            5 => Ok(HpfCorner::C0_10),
            6 => Ok(HpfCorner::C0_02),
            other => Err(MonitorError::InvalidConfig(format!(
                "HPF corner index must be 0-6, got {}",
                other
            ))),
        }
    }
}

/// Active device configuration: range, ODR and HPF corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    pub range: Range,
    pub odr: OutputDataRate,
    pub hpf: HpfCorner,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            range: Range::G10,
            odr: OutputDataRate::Hz1000,
            hpf: HpfCorner::Off,
        }
    }
}

/// Driver life-cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Configuring,
    Ready,
    Running,
    Stopped,
}

/// Outcome of a data-ready wait. None of these are errors: timed-out and
/// unavailable are degraded modes where the caller reads best-available data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStatus {
    /// DRDY observed high within the timeout
    Ready,
    /// DRDY never went high; data may be stale
    TimedOut,
    /// No DRDY line configured; waited the full timeout blind
    Unavailable,
}

/// Timing for data-ready polling.
#[derive(Debug, Clone, Copy)]
pub struct ReadyTiming {
    /// Maximum time to wait for DRDY
    pub timeout: Duration,
    /// Sleep between polls of the DRDY line
    pub poll_interval: Duration,
}

impl Default for ReadyTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_micros(50),
        }
    }
}

/// One raw tri-axial reading, sign-extended 20-bit counts per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAxisSample {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// One tri-axial reading in physical units (g), offset-corrected,
/// stamped with monotonic seconds since the device was started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Per-axis offsets in g, subtracted from every converted sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationOffsets {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Sign-extend a 20-bit two's-complement value.
///
/// Total over `[0, 2^20 - 1]`: if bit 19 is set the result is
/// `raw - 2^20`, otherwise `raw` unchanged.
///
/// # Example
/// ```
/// use adxl357_monitor::adxl357::decode_20bit;
///
/// assert_eq!(decode_20bit(0x080000), -524288);
/// assert_eq!(decode_20bit(0x07FFFF), 524287);
/// assert_eq!(decode_20bit(0), 0);
/// ```
pub fn decode_20bit(raw: u32) -> i32 {
    if raw & 0x8_0000 != 0 {
        raw as i32 - 0x10_0000
    } else {
        raw as i32
    }
}

/// Reassemble a 20-bit raw value from the three data-register bytes.
///
/// Layout: `DATA3[7:0] << 12 | DATA2[7:0] << 4 | DATA1[7:4] >> 4`.
fn assemble_20bit(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 12) | ((bytes[1] as u32) << 4) | ((bytes[2] as u32) >> 4)
}

/// ADXL357 sensor driver.
///
/// Generic over the bus so it can run against `/dev/spidev` hardware or a
/// scripted register file in tests. All register traffic is serialized
/// through `&mut self`.
pub struct Adxl357<B: RegisterBus> {
    bus: B,
    drdy: Option<Box<dyn DataReadyLine + Send>>,
    timing: ReadyTiming,
    config: FilterConfig,
    factor: f64,
    offsets: CalibrationOffsets,
    state: DeviceState,
    epoch: Instant,
}

impl<B: RegisterBus> Adxl357<B> {
    /// Open the device: verify its identity, clear the offset trim
    /// registers and apply the default configuration.
    ///
    /// `drdy` is the optional data-ready line; without one, every
    /// [`wait_ready`](Self::wait_ready) call degrades to a blind sleep.
    pub fn new(
        bus: B,
        drdy: Option<Box<dyn DataReadyLine + Send>>,
        timing: ReadyTiming,
    ) -> Result<Self> {
        let mut sensor = Self {
            bus,
            drdy,
            timing,
            config: FilterConfig::default(),
            factor: 1.0 / FilterConfig::default().range.sensitivity(),
            offsets: CalibrationOffsets::default(),
            state: DeviceState::Uninitialized,
            epoch: Instant::now(),
        };

        let devid = sensor.bus.read_byte(REG_DEVID_AD)?;
        if devid != DEVID_AD_VALUE {
            return Err(MonitorError::InvalidDeviceId(devid));
        }

        sensor.state = DeviceState::Configuring;
        sensor.reset_offset_registers()?;
        sensor.configure(FilterConfig::default())?;

        if sensor.drdy.is_none() {
            log::warn!("no DRDY line configured; running in degraded ready-signal mode");
        }

        Ok(sensor)
    }

    /// Active configuration
    pub fn config(&self) -> FilterConfig {
        self.config
    }

    /// Current driver state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Active scale factor in g per count (`1 / sensitivity`)
    pub fn scale_factor(&self) -> f64 {
        self.factor
    }

    /// Active calibration offsets
    pub fn offsets(&self) -> CalibrationOffsets {
        self.offsets
    }

    /// Apply a new range/ODR/HPF configuration.
    ///
    /// Stops the device, writes the range field (preserving the upper bits
    /// of the range register), writes the combined HPF/ODR filter byte,
    /// then restarts. Updates the active sensitivity constant. Legal from
    /// Ready, Stopped or Running; calling from Running implies a brief
    /// standby interval.
    pub fn configure(&mut self, config: FilterConfig) -> Result<()> {
        match self.state {
            DeviceState::Configuring
            | DeviceState::Ready
            | DeviceState::Running
            | DeviceState::Stopped => {}
            other => return Err(MonitorError::InvalidState(other)),
        }
        let was_running = self.state == DeviceState::Running;

        self.set_standby(true)?;

        let range_reg = self.bus.read_byte(REG_RANGE)?;
        self.bus
            .write(REG_RANGE, (range_reg & 0b1111_1100) | config.range.bits())?;
        self.bus
            .write(REG_FILTER, (config.hpf.bits() << 4) | config.odr.bits())?;

        self.set_standby(false)?;

        self.factor = 1.0 / config.range.sensitivity();
        self.config = config;
        self.state = if was_running {
            DeviceState::Running
        } else {
            DeviceState::Ready
        };
        log::debug!(
            "configured: ±{} g, {} Hz ODR, HPF {:?}",
            config.range.full_scale_g(),
            config.odr.hz(),
            config.hpf
        );
        Ok(())
    }

    /// Block until a fresh sample is signalled or the timeout elapses.
    ///
    /// With a DRDY line the line is polled at the configured sub-interval,
    /// sleeping between polls; on timeout the caller may read stale data.
    /// Without a line the full timeout is slept and the status is
    /// [`ReadyStatus::Unavailable`] — degraded, not an error.
    pub fn wait_ready(&mut self) -> Result<ReadyStatus> {
        match self.drdy.as_mut() {
            Some(line) => {
                let start = Instant::now();
                loop {
                    if line.is_high()? {
                        return Ok(ReadyStatus::Ready);
                    }
                    if start.elapsed() >= self.timing.timeout {
                        log::warn!(
                            "timeout waiting for DRDY after {:?}",
                            self.timing.timeout
                        );
                        return Ok(ReadyStatus::TimedOut);
                    }
                    std::thread::sleep(self.timing.poll_interval);
                }
            }
            None => {
                std::thread::sleep(self.timing.timeout);
                Ok(ReadyStatus::Unavailable)
            }
        }
    }

    /// Read the three axes as sign-extended raw counts.
    ///
    /// Each axis is three bytes, high byte first, with the 20-bit value
    /// left-aligned; see [`decode_20bit`] for the sign extension.
    pub fn read_axis_raw(&mut self) -> Result<RawAxisSample> {
        self.check_measuring()?;
        let x = self.read_one_axis(REG_XDATA3)?;
        let y = self.read_one_axis(REG_YDATA3)?;
        let z = self.read_one_axis(REG_ZDATA3)?;
        Ok(RawAxisSample { x, y, z })
    }

    /// Wait for data-ready, then read one offset-corrected sample in g.
    ///
    /// Always returns a sample, even in degraded ready-signal mode.
    pub fn read_axis(&mut self) -> Result<PhysicalSample> {
        self.wait_ready()?;
        let raw = self.read_axis_raw()?;
        let timestamp = self.epoch.elapsed().as_secs_f64();
        Ok(PhysicalSample {
            timestamp,
            x: raw.x as f64 * self.factor - self.offsets.x,
            y: raw.y as f64 * self.factor - self.offsets.y,
            z: raw.z as f64 * self.factor - self.offsets.z,
        })
    }

    /// Compute and install new calibration offsets.
    ///
    /// Averages `samples` uncorrected readings taken `delay` apart on a
    /// stationary sensor, then subtracts 1 g from the z average to cancel
    /// static gravity. Replaces any prior offsets, so it may be called
    /// again at any time. An all-trivial mean (dead bus) is retried a few
    /// times and then reported as a calibration failure.
    pub fn calibrate(&mut self, samples: usize, delay: Duration) -> Result<CalibrationOffsets> {
        if samples == 0 {
            return Err(MonitorError::InvalidConfig(
                "calibration sample count must be non-zero".into(),
            ));
        }

        for attempt in 1..=CALIBRATION_ATTEMPTS {
            let (mut sum_x, mut sum_y, mut sum_z) = (0.0f64, 0.0f64, 0.0f64);
            for _ in 0..samples {
                self.wait_ready()?;
                let raw = self.read_axis_raw()?;
                sum_x += raw.x as f64 * self.factor;
                sum_y += raw.y as f64 * self.factor;
                sum_z += raw.z as f64 * self.factor;
                std::thread::sleep(delay);
            }

            let n = samples as f64;
            let (mean_x, mean_y, mean_z) = (sum_x / n, sum_y / n, sum_z / n);

            // All-zero means indicate the device is not actually producing
            // data (e.g. wiring fault that still ACKs transfers).
            let trivial = mean_x.abs() < 1e-12 && mean_y.abs() < 1e-12 && mean_z.abs() < 1e-12;
            if trivial {
                log::warn!(
                    "calibration pass {}/{} produced all-zero means, retrying",
                    attempt,
                    CALIBRATION_ATTEMPTS
                );
                continue;
            }

            self.offsets = CalibrationOffsets {
                x: mean_x,
                y: mean_y,
                z: mean_z - 1.0, // cancel static gravity on z
            };
            log::info!(
                "calibration complete: offsets (g) x={:.6} y={:.6} z={:.6}",
                self.offsets.x,
                self.offsets.y,
                self.offsets.z
            );
            return Ok(self.offsets);
        }

        Err(MonitorError::Calibration(format!(
            "all-zero offsets after {} passes",
            CALIBRATION_ATTEMPTS
        )))
    }

    /// Leave standby and start measuring. Resets the sample clock.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            DeviceState::Ready | DeviceState::Stopped => {}
            other => return Err(MonitorError::InvalidState(other)),
        }
        self.set_standby(false)?;
        self.epoch = Instant::now();
        self.state = DeviceState::Running;
        Ok(())
    }

    /// Enter standby.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            DeviceState::Running | DeviceState::Ready => {}
            other => return Err(MonitorError::InvalidState(other)),
        }
        self.set_standby(true)?;
        self.state = DeviceState::Stopped;
        Ok(())
    }

    /// Whether the device FIFO is full (status bit 1). Side-effect-free.
    pub fn is_fifo_full(&mut self) -> Result<bool> {
        Ok(self.bus.read_byte(REG_STATUS)? & STATUS_FIFO_FULL != 0)
    }

    /// Whether a FIFO sample exceeded the range (status bit 2). Side-effect-free.
    pub fn is_fifo_overrange(&mut self) -> Result<bool> {
        Ok(self.bus.read_byte(REG_STATUS)? & STATUS_FIFO_OVR != 0)
    }

    /// Clear the six on-device offset trim registers.
    pub fn reset_offset_registers(&mut self) -> Result<()> {
        for reg in REG_OFFSET_X_H..=REG_OFFSET_Z_L {
            self.bus.write(reg, 0x00)?;
        }
        Ok(())
    }

    fn read_one_axis(&mut self, base: u8) -> Result<i32> {
        let bytes = self.bus.read(base, 3)?;
        Ok(decode_20bit(assemble_20bit(&bytes)))
    }

    fn check_measuring(&self) -> Result<()> {
        match self.state {
            DeviceState::Ready | DeviceState::Running => Ok(()),
            other => Err(MonitorError::InvalidState(other)),
        }
    }

    /// Read-modify-write the standby bit of the power-control register.
    fn set_standby(&mut self, standby: bool) -> Result<()> {
        let ctl = self.bus.read_byte(REG_POWER_CTL)?;
        let new = if standby {
            ctl | POWER_CTL_STANDBY
        } else {
            ctl & !POWER_CTL_STANDBY
        };
        self.bus.write(REG_POWER_CTL, new)
    }
}

impl<B: RegisterBus> Drop for Adxl357<B> {
    fn drop(&mut self) {
        // Best-effort standby so the device is not left measuring.
        if self.state == DeviceState::Running {
            let _ = self.set_standby(true);
        }
    }
}
