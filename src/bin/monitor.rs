//! ADXL357 Vibration Monitor
//!
//! Runs the full sampling → RMS → threshold → CSV pipeline until Ctrl+C.
//!
//! Usage:
//!   vibration-monitor --output data/run.csv --rate 2000 --window 1000 --threshold 5.0

use adxl357_monitor::{
    Adxl357, CdevReadyLine, DataReadyLine, HpfCorner, MonitorConfig, NullController,
    OutputDataRate, OverflowPolicy, Range, ReadyTiming, SpiBus, VibrationMonitor,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "vibration-monitor")]
#[command(about = "Monitor ADXL357 vibration and log to CSV", long_about = None)]
struct Args {
    /// Output CSV file path (default: <date>/run.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// SPI device node
    #[arg(long, default_value = "/dev/spidev0.0")]
    spi: String,

    /// SPI clock in Hz
    #[arg(long, default_value = "5000000")]
    spi_hz: u32,

    /// GPIO chip for the DRDY line
    #[arg(long, default_value = "/dev/gpiochip0")]
    gpio_chip: String,

    /// DRDY line offset on the GPIO chip; omit to run without a DRDY line
    #[arg(long)]
    drdy_line: Option<u32>,

    /// Measurement range in g (10, 20 or 40)
    #[arg(long, default_value = "10")]
    range: u32,

    /// Output data rate in Hz
    #[arg(short, long, default_value = "2000")]
    rate: u32,

    /// High-pass filter corner index (0 = off, 1-6 = corners)
    #[arg(long, default_value = "0")]
    hpf: u8,

    /// Samples per RMS window
    #[arg(short, long, default_value = "1000")]
    window: usize,

    /// Samples per CSV chunk
    #[arg(long, default_value = "10000")]
    save_interval: usize,

    /// Alert threshold in g
    #[arg(short, long, default_value = "5.0")]
    threshold: f64,

    /// Seconds between controller updates
    #[arg(long, default_value = "0.5")]
    update_interval: f64,

    /// Block the sampler when the queue is full instead of dropping samples
    #[arg(long)]
    block_on_full: bool,

    /// Skip offset calibration
    #[arg(long)]
    skip_calibration: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let output = args.output.unwrap_or_else(|| {
        // One folder per day, matching the plant's filing convention.
        let day = chrono::Local::now().format("%d%m%y");
        PathBuf::from(format!("data_{}", day)).join("run.csv")
    });

    let config = MonitorConfig {
        filter: adxl357_monitor::FilterConfig {
            range: Range::from_g(args.range)?,
            odr: OutputDataRate::from_hz(args.rate)?,
            hpf: HpfCorner::from_index(args.hpf)?,
        },
        window_size: args.window,
        save_interval: args.save_interval,
        queue_capacity: args.save_interval * 2,
        overflow_policy: if args.block_on_full {
            OverflowPolicy::Block(Duration::from_millis(100))
        } else {
            OverflowPolicy::DropNewest
        },
        threshold: args.threshold,
        update_interval: Duration::from_secs_f64(args.update_interval),
        calibration_samples: if args.skip_calibration { 0 } else { 100 },
        output_path: output.clone(),
        ..MonitorConfig::default()
    };

    println!("ADXL357 Vibration Monitor");
    println!("=========================");
    println!("Range: ±{} g | ODR: {} Hz | Window: {} samples", args.range, args.rate, args.window);
    println!("Threshold: {} g", args.threshold);
    println!("Output file: {}", output.display());
    println!();

    println!("Initializing sensor...");
    let bus = SpiBus::open(&args.spi, args.spi_hz)?;
    let drdy: Option<Box<dyn DataReadyLine + Send>> = match args.drdy_line {
        Some(line) => Some(Box::new(CdevReadyLine::open(&args.gpio_chip, line)?)),
        None => None,
    };
    let sensor = Adxl357::new(bus, drdy, ReadyTiming::default())?;
    println!("Sensor initialized!\n");

    // No controller client is linked in this build; the stand-in reports
    // the process as always running and discards RMS writes.
    let controller = Arc::new(Mutex::new(NullController));

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let s = shutdown.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        s.store(true, Ordering::SeqCst);
    })?;

    println!("Starting pipeline...");
    println!("Press Ctrl+C to stop\n");

    let monitor = VibrationMonitor::new(config)?;
    let summary = monitor.run(sensor, controller, shutdown)?;

    let elapsed = summary.elapsed.as_secs_f64();
    println!("\nRun complete!");
    println!("Total samples: {}", summary.samples);
    println!("RMS windows: {} ({} alerts)", summary.windows, summary.alerts);
    println!("Rows written: {}", summary.rows_written);
    if summary.dropped_aggregation > 0 || summary.dropped_persistence > 0 {
        println!(
            "Dropped samples: {} (aggregation), {} (persistence)",
            summary.dropped_aggregation, summary.dropped_persistence
        );
    }
    if summary.controller_write_failures > 0 {
        println!("Controller write failures: {}", summary.controller_write_failures);
    }
    println!("Elapsed time: {:.2} seconds", elapsed);
    if elapsed > 0.0 {
        println!("Actual sample rate: {:.1} Hz", summary.samples as f64 / elapsed);
    }
    println!("File: {}", output.display());

    Ok(())
}
