//! Error types for the ADXL357 vibration monitor

use thiserror::Error;

use crate::adxl357::DeviceState;

/// Error type for monitor operations
#[derive(Error, Debug)]
pub enum MonitorError {
    /// SPI transport failure; fatal to the in-flight register access
    #[error("bus transport error: {0}")]
    Bus(String),

    /// GPIO (data-ready line) access failure
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// File or OS-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid DEVID_AD response
    #[error("invalid DEVID_AD response: expected 0xAD, got 0x{0:02X}")]
    InvalidDeviceId(u8),

    /// Operation attempted in a state that does not permit it
    #[error("operation not permitted in {0:?} state")]
    InvalidState(DeviceState),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Offset calibration failed
    #[error("calibration failed: {0}")]
    Calibration(String),

    /// External controller read/write failure
    #[error("controller error: {0}")]
    Controller(String),
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
