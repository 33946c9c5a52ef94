//! ADXL357 live readout - continuous acquisition and console display
//!
//! Continuously reads offset-corrected acceleration from the ADXL357 over
//! SPI and displays it with bar graphs. Pass an alternate spidev node as
//! the first argument (default /dev/spidev0.0).

use adxl357_monitor::{Adxl357, MonitorError, ReadyTiming, SpiBus};
use std::io::{self, Write};

const SPI_MAX_CLOCK_HZ: u32 = 5_000_000;

/// Render a center-zero bar for a value on a ±max_value scale.
fn create_bar(value: f64, max_value: f64, width: usize) -> String {
    let center = width / 2;
    let normalized = (value / max_value).clamp(-1.0, 1.0);
    let filled = ((normalized.abs() * center as f64).round() as usize).min(center);

    let mut cells = vec![' '; width + 1];
    cells[center] = '|';
    if normalized < 0.0 {
        for cell in &mut cells[center - filled..center] {
            *cell = '█';
        }
    } else {
        for cell in &mut cells[center + 1..center + 1 + filled] {
            *cell = '█';
        }
    }
    cells.into_iter().collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/spidev0.0".to_string());

    println!("Opening {}...", device);

    let bus = SpiBus::open(&device, SPI_MAX_CLOCK_HZ)?;
    let mut sensor = match Adxl357::new(bus, None, ReadyTiming::default()) {
        Ok(s) => s,
        Err(MonitorError::InvalidDeviceId(id)) => {
            eprintln!("Error: unexpected DEVID_AD response: 0x{:02X}", id);
            eprintln!("Check that:");
            eprintln!("  1. the ADXL357 is wired to the SPI bus (MOSI/MISO/SCLK/CS)");
            eprintln!("  2. the sensor is powered (3.3 V)");
            eprintln!("  3. the correct spidev node was given");
            return Err(Box::new(MonitorError::InvalidDeviceId(id)));
        }
        Err(e) => {
            eprintln!("Error initializing sensor: {}", e);
            return Err(Box::new(e));
        }
    };

    let full_scale = sensor.config().range.full_scale_g();
    let start_time = std::time::Instant::now();
    let mut sample_count = 0u64;

    // Clear screen once at start
    print!("\x1B[2J\x1B[H");
    io::stdout().flush()?;

    loop {
        match sensor.read_axis() {
            Ok(sample) => {
                sample_count += 1;
                let elapsed = start_time.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 {
                    sample_count as f64 / elapsed
                } else {
                    0.0
                };
                let magnitude =
                    (sample.x * sample.x + sample.y * sample.y + sample.z * sample.z).sqrt();

                // Move cursor to top without clearing (reduces flicker)
                print!("\x1B[H");

                println!("ADXL357 Live Readout  (±{:.0} g full scale)              ", full_scale);
                println!(
                    "t = {:>8.2} s   samples: {:>8}   rate: {:>7.1} Hz        ",
                    sample.timestamp, sample_count, rate
                );
                println!();
                println!("  X {:+9.4} g  [{}]", sample.x, create_bar(sample.x, full_scale, 40));
                println!("  Y {:+9.4} g  [{}]", sample.y, create_bar(sample.y, full_scale, 40));
                println!("  Z {:+9.4} g  [{}]", sample.z, create_bar(sample.z, full_scale, 40));
                println!();
                println!("  |a| {:7.4} g                                          ", magnitude);
                println!();
                println!("Press Ctrl+C to exit");

                io::stdout().flush()?;
            }
            Err(e) => {
                eprintln!("\nread failed: {}", e);
                eprintln!("retrying in 500 ms...");
                std::thread::sleep(std::time::Duration::from_millis(500));
            }
        }
    }
}
