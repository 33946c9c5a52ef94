//! Register-addressed SPI bus access
//!
//! The ADXL357 is a register-addressed SPI device: every transfer starts
//! with an address byte whose low bit selects read (1) or write (0), with
//! the 7-bit register address shifted up one. The [`RegisterBus`] trait
//! captures that contract so the driver can run against real `/dev/spidev`
//! hardware or a test double.

use crate::error::{MonitorError, Result};

/// Addressed register access over a synchronous serial bus.
///
/// Implementors only provide the raw full-duplex [`transfer`]; the
/// address encoding and reply framing are shared default methods.
/// Transport failures are surfaced to the caller, never swallowed.
///
/// [`transfer`]: RegisterBus::transfer
pub trait RegisterBus {
    /// Perform one full-duplex transfer, returning the reply bytes.
    ///
    /// The reply has the same length as `tx`; the first byte is the
    /// echo clocked out while the address byte was shifted in.
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>>;

    /// Read `len` bytes starting at `reg`.
    ///
    /// The device auto-increments the register address, so multi-byte
    /// reads return consecutive registers with the echo byte dropped.
    fn read(&mut self, reg: u8, len: usize) -> Result<Vec<u8>> {
        let mut tx = vec![0u8; len + 1];
        tx[0] = (reg << 1) | 0x01;
        let rx = self.transfer(&tx)?;
        if rx.len() != len + 1 {
            return Err(MonitorError::Bus(format!(
                "short reply reading register 0x{:02X}: expected {} bytes, got {}",
                reg,
                len + 1,
                rx.len()
            )));
        }
        Ok(rx[1..].to_vec())
    }

    /// Read a single byte from `reg`.
    fn read_byte(&mut self, reg: u8) -> Result<u8> {
        Ok(self.read(reg, 1)?[0])
    }

    /// Write a single byte to `reg`.
    fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        let tx = [(reg << 1) & 0xFE, value];
        self.transfer(&tx)?;
        Ok(())
    }
}

/// Data-ready (DRDY) line sampling.
///
/// The ADXL357 raises its DRDY pin when a fresh sample is available.
/// Kept behind a trait so the driver can run without a wired line
/// (degraded mode) and so tests can script the pin.
pub trait DataReadyLine {
    /// Sample the line; `true` means a fresh sample is available.
    fn is_high(&mut self) -> Result<bool>;
}

#[cfg(feature = "hardware")]
mod hardware {
    use super::{DataReadyLine, RegisterBus};
    use crate::error::{MonitorError, Result};
    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use std::path::Path;

    /// SPI bus over a Linux `/dev/spidevX.Y` device node.
    pub struct SpiBus {
        spi: Spidev,
    }

    impl SpiBus {
        /// Open and configure a spidev node (mode 0, 8 bits per word).
        pub fn open<P: AsRef<Path>>(path: P, max_speed_hz: u32) -> Result<Self> {
            let mut spi = Spidev::open(&path)
                .map_err(|e| MonitorError::Bus(format!("failed to open SPI device: {}", e)))?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(max_speed_hz)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.configure(&options)
                .map_err(|e| MonitorError::Bus(format!("failed to configure SPI device: {}", e)))?;
            Ok(Self { spi })
        }
    }

    impl RegisterBus for SpiBus {
        fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
            let mut rx = vec![0u8; tx.len()];
            {
                let mut xfer = SpidevTransfer::read_write(tx, &mut rx);
                self.spi
                    .transfer(&mut xfer)
                    .map_err(|e| MonitorError::Bus(format!("SPI transfer failed: {}", e)))?;
            }
            Ok(rx)
        }
    }

    /// DRDY line via the Linux GPIO character device.
    pub struct CdevReadyLine {
        handle: gpio_cdev::LineHandle,
    }

    impl CdevReadyLine {
        /// Request `line_offset` on `chip_path` (e.g. `/dev/gpiochip0`) as input.
        pub fn open<P: AsRef<Path>>(chip_path: P, line_offset: u32) -> Result<Self> {
            let mut chip = gpio_cdev::Chip::new(chip_path)
                .map_err(|e| MonitorError::Gpio(format!("failed to open GPIO chip: {}", e)))?;
            let handle = chip
                .get_line(line_offset)
                .and_then(|line| {
                    line.request(gpio_cdev::LineRequestFlags::INPUT, 0, "adxl357-drdy")
                })
                .map_err(|e| MonitorError::Gpio(format!("failed to request DRDY line: {}", e)))?;
            Ok(Self { handle })
        }
    }

    impl DataReadyLine for CdevReadyLine {
        fn is_high(&mut self) -> Result<bool> {
            let value = self
                .handle
                .get_value()
                .map_err(|e| MonitorError::Gpio(format!("failed to read DRDY line: {}", e)))?;
            Ok(value != 0)
        }
    }
}

#[cfg(feature = "hardware")]
pub use hardware::{CdevReadyLine, SpiBus};


#[cfg(test)]
mod tests {
    use super::testing::MockBus;
    use super::*;

    #[test]
    fn read_address_sets_low_bit() {
        let mut bus = MockBus::new();
        bus.regs[0x2C] = 0x81;
        let value = bus.read_byte(0x2C).unwrap();
        assert_eq!(value, 0x81);
    }

    #[test]
    fn write_address_clears_low_bit() {
        let mut bus = MockBus::new();
        bus.write(0x2D, 0x01).unwrap();
        assert_eq!(bus.writes, vec![(0x2D, 0x01)]);
        assert_eq!(bus.regs[0x2D], 0x01);
    }

    #[test]
    fn multi_byte_read_drops_echo_and_auto_increments() {
        let mut bus = MockBus::new();
        bus.regs[0x08] = 0x12;
        bus.regs[0x09] = 0x34;
        bus.regs[0x0A] = 0x50;
        let data = bus.read(0x08, 3).unwrap();
        assert_eq!(data, vec![0x12, 0x34, 0x50]);
    }

    #[test]
    fn transport_failure_propagates() {
        let mut bus = MockBus::new();
        bus.fail = true;
        assert!(matches!(bus.read_byte(0x04), Err(MonitorError::Bus(_))));
    }
}
