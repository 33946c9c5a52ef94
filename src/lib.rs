//! ADXL357 vibration monitoring library
//!
//! Acquires tri-axial acceleration from an ADXL357 MEMS accelerometer over
//! SPI, converts raw 20-bit samples to g, and feeds a concurrent pipeline
//! that windows the stream into RMS magnitudes, raises threshold alerts,
//! persists raw samples to CSV, and reports results to an external
//! industrial controller.
//!
//! # Quick Start
//!
//! ## Reading samples
//! ```no_run
//! use adxl357_monitor::{Adxl357, ReadyTiming, SpiBus};
//!
//! let bus = SpiBus::open("/dev/spidev0.0", 5_000_000)?;
//! let mut sensor = Adxl357::new(bus, None, ReadyTiming::default())?;
//!
//! let sample = sensor.read_axis()?;
//! println!("x: {:.4} g, y: {:.4} g, z: {:.4} g", sample.x, sample.y, sample.z);
//! # Ok::<(), adxl357_monitor::MonitorError>(())
//! ```
//!
//! ## Calibration
//! ```no_run
//! use adxl357_monitor::{Adxl357, ReadyTiming, SpiBus};
//! use std::time::Duration;
//!
//! let bus = SpiBus::open("/dev/spidev0.0", 5_000_000)?;
//! let mut sensor = Adxl357::new(bus, None, ReadyTiming::default())?;
//!
//! // Average 100 stationary readings; gravity is cancelled on z.
//! let offsets = sensor.calibrate(100, Duration::from_millis(10))?;
//! println!("offsets: {:?}", offsets);
//! # Ok::<(), adxl357_monitor::MonitorError>(())
//! ```
//!
//! ## Running the full pipeline
//! ```no_run
//! use adxl357_monitor::{
//!     Adxl357, MonitorConfig, NullController, ReadyTiming, SpiBus, VibrationMonitor,
//! };
//! use std::sync::atomic::AtomicBool;
//! use std::sync::{Arc, Mutex};
//!
//! let bus = SpiBus::open("/dev/spidev0.0", 5_000_000)?;
//! let sensor = Adxl357::new(bus, None, ReadyTiming::default())?;
//!
//! let monitor = VibrationMonitor::new(MonitorConfig::default())?;
//! let shutdown = Arc::new(AtomicBool::new(false));
//! let controller = Arc::new(Mutex::new(NullController));
//!
//! let summary = monitor.run(sensor, controller, shutdown)?;
//! println!("{} samples, {} windows, {} alerts", summary.samples, summary.windows, summary.alerts);
//! # Ok::<(), adxl357_monitor::MonitorError>(())
//! ```

pub mod adxl357;
pub mod bus;
pub mod csv_format;
pub mod error;
pub mod monitor;
pub mod plc;
pub mod queue;
pub mod rms;
pub mod threshold;

// Re-export public API
pub use adxl357::{
    decode_20bit, Adxl357, CalibrationOffsets, DeviceState, FilterConfig, HpfCorner,
    OutputDataRate, PhysicalSample, Range, RawAxisSample, ReadyStatus, ReadyTiming,
};
pub use bus::{DataReadyLine, RegisterBus};
#[cfg(feature = "hardware")]
pub use bus::{CdevReadyLine, SpiBus};
pub use csv_format::{CsvSink, CSV_HEADER};
pub use error::{MonitorError, Result};
pub use monitor::{MonitorConfig, RunSummary, VibrationMonitor};
pub use plc::{Controller, NullController, RUN_ACTIVE};
pub use queue::{OverflowPolicy, PopOutcome, PushOutcome, SampleReceiver, SampleSender};
pub use rms::{RmsAggregator, RmsWindow};
pub use threshold::ThresholdMonitor;
