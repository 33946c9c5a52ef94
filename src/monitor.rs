//! Pipeline orchestration
//!
//! Owns the run lifecycle: configure and calibrate the sensor, start it,
//! spawn the sampling / aggregation / persistence workers and the
//! run-state supervisor, then coordinate shutdown. The orchestrator holds
//! no physics or statistics itself; each worker polls the shared stop flag
//! at every iteration boundary, and the device is stopped only after every
//! worker has been joined.

use crate::adxl357::{Adxl357, FilterConfig, PhysicalSample};
use crate::bus::RegisterBus;
use crate::csv_format::CsvSink;
use crate::error::{MonitorError, Result};
use crate::plc::{read_tag_retry, Controller, RUN_ACTIVE};
use crate::queue::{bounded, OverflowPolicy, PopOutcome, PushOutcome, SampleReceiver, SampleSender};
use crate::rms::RmsAggregator;
use crate::threshold::ThresholdMonitor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Bounded wait used by consumers so the stop flag is re-checked promptly
const POP_WAIT: Duration = Duration::from_millis(100);

/// Slice used by cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Run configuration. Every interval, capacity and tag is a field here;
/// nothing is hardcoded in the workers.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Device range/ODR/HPF applied at startup
    pub filter: FilterConfig,
    /// Samples per RMS window
    pub window_size: usize,
    /// Samples per persistence chunk
    pub save_interval: usize,
    /// Capacity of each bounded sample queue
    pub queue_capacity: usize,
    /// Backpressure policy applied uniformly to every push
    pub overflow_policy: OverflowPolicy,
    /// Alert threshold in g, compared against the max per-axis RMS
    pub threshold: f64,
    /// Minimum spacing between controller forwards
    pub update_interval: Duration,
    /// Tag the RMS windows are written to
    pub rms_tag: String,
    /// Run-state tag; `None` means log unconditionally
    pub run_state_tag: Option<String>,
    /// How often the run-state tag is polled
    pub run_poll_interval: Duration,
    /// Bounded retry count for controller reads/writes
    pub tag_retries: u32,
    /// Samples averaged during offset calibration; 0 skips calibration
    pub calibration_samples: usize,
    /// Delay between calibration samples
    pub calibration_delay: Duration,
    /// Abort startup if calibration fails (otherwise proceed uncalibrated)
    pub require_calibration: bool,
    /// Sleep while the run-state gate is off
    pub idle_poll: Duration,
    /// Run output file
    pub output_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            window_size: 1000,
            save_interval: 10_000,
            queue_capacity: 20_000,
            overflow_policy: OverflowPolicy::DropNewest,
            threshold: 5.0,
            update_interval: Duration::from_millis(500),
            rms_tag: "TAG_RMS".into(),
            run_state_tag: None,
            run_poll_interval: Duration::from_millis(500),
            tag_retries: 3,
            calibration_samples: 100,
            calibration_delay: Duration::from_millis(10),
            require_calibration: true,
            idle_poll: Duration::from_millis(500),
            output_path: PathBuf::from("run.csv"),
        }
    }
}

/// Counters reported when a run ends.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub samples: u64,
    pub windows: u64,
    pub alerts: u64,
    pub rows_written: usize,
    pub dropped_aggregation: u64,
    pub dropped_persistence: u64,
    pub controller_write_failures: u64,
    pub elapsed: Duration,
}

/// Lifecycle owner for one monitoring run.
pub struct VibrationMonitor {
    config: MonitorConfig,
}

impl VibrationMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        if config.window_size == 0 {
            return Err(MonitorError::InvalidConfig("window size must be non-zero".into()));
        }
        if config.save_interval == 0 {
            return Err(MonitorError::InvalidConfig("save interval must be non-zero".into()));
        }
        if config.queue_capacity == 0 {
            return Err(MonitorError::InvalidConfig("queue capacity must be non-zero".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run the pipeline until `shutdown` is set or a fatal error occurs.
    ///
    /// Startup order: configure → wait-ready → calibrate → start → spawn
    /// workers. The device is stopped after every worker has been joined,
    /// so no register traffic can race the shutdown.
    pub fn run<B, C>(
        &self,
        mut sensor: Adxl357<B>,
        controller: Arc<Mutex<C>>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<RunSummary>
    where
        B: RegisterBus + Send + 'static,
        C: Controller + Send + 'static,
    {
        let cfg = &self.config;

        sensor.configure(cfg.filter)?;
        let ready = sensor.wait_ready()?;
        log::info!("initial data-ready status: {:?}", ready);

        if cfg.calibration_samples > 0 {
            match sensor.calibrate(cfg.calibration_samples, cfg.calibration_delay) {
                Ok(_) => {}
                Err(e @ MonitorError::Calibration(_)) if !cfg.require_calibration => {
                    log::warn!("{}; continuing uncalibrated", e);
                }
                Err(e) => return Err(e),
            }
        }

        sensor.start()?;
        let started = Instant::now();

        // Producer-side fan-out: one bounded queue per consumer, so each
        // stage sees the full ordered stream.
        let (agg_tx, agg_rx) = bounded(cfg.queue_capacity, cfg.overflow_policy);
        let (save_tx, save_rx) = bounded(cfg.queue_capacity, cfg.overflow_policy);

        let sink = CsvSink::create(&cfg.output_path, cfg.save_interval)?;

        // Run-state gate: on transitions the supervisor logs and the
        // sampling worker idles instead of reading the device.
        let gate = Arc::new(AtomicBool::new(cfg.run_state_tag.is_none()));

        let supervisor = cfg.run_state_tag.clone().map(|tag| {
            let controller = controller.clone();
            let gate = gate.clone();
            let shutdown = shutdown.clone();
            let poll = cfg.run_poll_interval;
            let retries = cfg.tag_retries;
            thread::spawn(move || {
                run_state_loop(&tag, controller, gate, shutdown, poll, retries)
            })
        });

        let sampler = {
            let agg_tx = agg_tx;
            let save_tx = save_tx;
            let gate = gate.clone();
            let shutdown = shutdown.clone();
            let idle = cfg.idle_poll;
            thread::spawn(move || {
                sampling_loop(sensor, agg_tx, save_tx, gate, shutdown, idle)
            })
        };

        let aggregator = {
            let threshold = ThresholdMonitor::new(
                cfg.threshold,
                cfg.rms_tag.clone(),
                cfg.tag_retries,
                cfg.update_interval,
                controller,
            );
            let agg = RmsAggregator::new(cfg.window_size);
            let shutdown = shutdown.clone();
            thread::spawn(move || aggregation_loop(agg_rx, agg, threshold, shutdown))
        };

        let persister = {
            let shutdown = shutdown.clone();
            thread::spawn(move || persistence_loop(save_rx, sink, shutdown))
        };

        // Joins return only once every worker has observed the stop signal.
        let (windows, alerts, write_failures, dropped_agg) = aggregator
            .join()
            .expect("aggregation worker panicked");
        let persisted = persister.join().expect("persistence worker panicked");
        if let Some(handle) = supervisor {
            handle.join().expect("run-state supervisor panicked");
        }
        let (mut sensor, samples, sampling_err, dropped_save) =
            sampler.join().expect("sampling worker panicked");

        if let Err(e) = sensor.stop() {
            log::error!("failed to stop device: {}", e);
        }

        if let Some(e) = sampling_err {
            return Err(e);
        }
        let rows_written = persisted?;

        Ok(RunSummary {
            samples,
            windows,
            alerts,
            rows_written,
            dropped_aggregation: dropped_agg,
            dropped_persistence: dropped_save,
            controller_write_failures: write_failures,
            elapsed: started.elapsed(),
        })
    }
}

/// Sleep `total` in short slices so a stop signal is observed promptly.
fn sleep_cancellable(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Push with the queue's policy, retrying bounded-wait timeouts until the
/// stop signal is raised. Drops are already counted by the queue.
fn push_until_stopped(tx: &SampleSender, sample: PhysicalSample, shutdown: &AtomicBool) {
    loop {
        match tx.push(sample) {
            PushOutcome::Delivered | PushOutcome::Dropped => return,
            PushOutcome::TimedOut => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
            }
        }
    }
}

fn sampling_loop<B: RegisterBus>(
    mut sensor: Adxl357<B>,
    agg_tx: SampleSender,
    save_tx: SampleSender,
    gate: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    idle_poll: Duration,
) -> (Adxl357<B>, u64, Option<MonitorError>, u64) {
    let mut samples = 0u64;
    let mut error = None;

    while !shutdown.load(Ordering::SeqCst) {
        if !gate.load(Ordering::SeqCst) {
            sleep_cancellable(&shutdown, idle_poll);
            continue;
        }
        match sensor.read_axis() {
            Ok(sample) => {
                samples += 1;
                push_until_stopped(&agg_tx, sample, &shutdown);
                push_until_stopped(&save_tx, sample, &shutdown);
            }
            Err(e) => {
                // Transport failures are never downgraded to "no data".
                log::error!("sampling aborted: {}", e);
                error = Some(e);
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    let dropped = save_tx.dropped();
    (sensor, samples, error, dropped)
}

fn aggregation_loop<C: Controller>(
    rx: SampleReceiver,
    mut agg: RmsAggregator,
    mut threshold: ThresholdMonitor<C>,
    shutdown: Arc<AtomicBool>,
) -> (u64, u64, u64, u64) {
    let mut windows = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        let Some(sample) = rx.pop(POP_WAIT) else {
            continue;
        };
        agg.push(&sample);
        if agg.ready() {
            let window = agg.emit();
            windows += 1;
            // Forwarding cadence is enforced inside the threshold monitor,
            // so consumption never stalls behind the update interval.
            threshold.process(&window);
        }
    }

    (windows, threshold.alerts(), threshold.write_failures(), rx.dropped())
}

fn persistence_loop(
    rx: SampleReceiver,
    mut sink: CsvSink,
    shutdown: Arc<AtomicBool>,
) -> Result<usize> {
    // Exit on producer departure, not on the stop flag: the sampler drops
    // its sender only after its final push, so a sample delivered while the
    // stop was being raised is still drained here.
    loop {
        match rx.pop_outcome(POP_WAIT) {
            PopOutcome::Sample(sample) => {
                if let Err(e) = sink.push(sample) {
                    log::error!("persistence aborted: {}", e);
                    shutdown.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
            PopOutcome::TimedOut => continue,
            PopOutcome::Disconnected => break,
        }
    }

    // Flush the partial chunk.
    sink.finish()?;
    Ok(sink.rows_written())
}

fn run_state_loop<C: Controller>(
    tag: &str,
    controller: Arc<Mutex<C>>,
    gate: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    poll: Duration,
    retries: u32,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let value = {
            let mut controller = match controller.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            read_tag_retry(&mut *controller, tag, retries)
        };
        let running = match value {
            Ok(v) => v == RUN_ACTIVE,
            Err(e) => {
                log::warn!("run-state read failed, gating logging off: {}", e);
                false
            }
        };
        let was = gate.swap(running, Ordering::SeqCst);
        if running && !was {
            log::info!("process started running, logging enabled");
        } else if !running && was {
            log::info!("process stopped running, logging disabled");
        }
        sleep_cancellable(&shutdown, poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adxl357::{Adxl357, ReadyTiming};
    use crate::bus::testing::{MockBus, MockReadyLine};
    use crate::plc::testing::MockController;

    /// Reference RMS over a slice, recomputed from scratch.
    fn reference_rms(values: &[f64]) -> f64 {
        (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
    }

    #[test]
    fn synthetic_stream_yields_one_window_per_hundred_samples() {
        // 1000 samples through queue + aggregator with window 100 must
        // produce exactly 10 windows over non-overlapping spans.
        let (tx, rx) = bounded(2000, OverflowPolicy::DropNewest);
        let mut values = Vec::new();
        for i in 0..1000 {
            let x = (i as f64 * 0.05).sin() * 2.0;
            values.push(x);
            tx.push(PhysicalSample {
                timestamp: i as f64 * 0.001,
                x,
                y: x * 0.5,
                z: 1.0,
            });
        }

        let mut agg = RmsAggregator::new(100);
        let mut emitted = Vec::new();
        while let Some(sample) = rx.pop(Duration::ZERO) {
            agg.push(&sample);
            if agg.ready() {
                emitted.push(agg.emit());
            }
        }

        assert_eq!(emitted.len(), 10);
        for (i, window) in emitted.iter().enumerate() {
            let span = &values[i * 100..(i + 1) * 100];
            let expected = reference_rms(span);
            assert!(
                (window.x - expected).abs() < 1e-9,
                "window {}: {} vs {}",
                i,
                window.x,
                expected
            );
            assert!((window.y - expected * 0.5).abs() < 1e-9);
            assert!((window.z - 1.0).abs() < 1e-9);
        }
    }

    fn test_sensor(bus: MockBus, drdy_ready: bool) -> Adxl357<MockBus> {
        Adxl357::new(
            bus,
            Some(Box::new(MockReadyLine::always(drdy_ready))),
            ReadyTiming {
                timeout: Duration::from_millis(1),
                poll_interval: Duration::from_micros(20),
            },
        )
        .unwrap()
    }

    fn test_config(dir: &std::path::Path) -> MonitorConfig {
        MonitorConfig {
            window_size: 20,
            save_interval: 50,
            queue_capacity: 1000,
            threshold: 5.0,
            update_interval: Duration::ZERO,
            rms_tag: "TAG_RMS".into(),
            run_state_tag: Some("VDF_STATUS".into()),
            run_poll_interval: Duration::from_millis(20),
            calibration_samples: 5,
            calibration_delay: Duration::ZERO,
            idle_poll: Duration::from_millis(10),
            output_path: dir.join("run.csv"),
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn end_to_end_run_samples_aggregates_and_persists() {
        let mut bus = MockBus::new();
        bus.set_axes_raw(51200, 0, 51200); // 1 g on x and z at ±10 g
        // DRDY scripted low: every read paces at the 1 ms timeout.
        let sensor = test_sensor(bus, false);

        let mut plc = MockController::default();
        plc.tags.insert("VDF_STATUS".into(), RUN_ACTIVE);
        let controller = Arc::new(Mutex::new(plc));

        let dir = tempfile::tempdir().unwrap();
        let monitor = VibrationMonitor::new(test_config(dir.path())).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let stopper = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(400));
                shutdown.store(true, Ordering::SeqCst);
            })
        };

        let summary = monitor.run(sensor, controller.clone(), shutdown).unwrap();
        stopper.join().unwrap();

        assert!(summary.samples > 20, "expected a steady sample stream");
        assert!(summary.windows >= 1);
        assert_eq!(summary.alerts, 0, "1 g stream must not trip a 5 g threshold");
        // Every delivered sample reaches the file; only counted drops are lost.
        assert_eq!(
            summary.rows_written as u64,
            summary.samples - summary.dropped_persistence
        );

        let contents = std::fs::read_to_string(dir.path().join("run.csv")).unwrap();
        assert!(contents.starts_with("time/timestamp,accel_x,accel_y,accel_z"));
        assert_eq!(contents.lines().count(), summary.rows_written + 1);

        let plc = controller.lock().unwrap();
        assert_eq!(plc.writes.len() as u64, summary.windows);
        // Post-calibration the stream is ~0 on x/y and ~1 g on z.
        let (_, values) = &plc.writes[0];
        assert!(values[0].abs() < 1e-6);
        assert!((values[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn persistence_drains_samples_delivered_after_stop_request() {
        let (tx, rx) = bounded(16, OverflowPolicy::DropNewest);
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::create(dir.path().join("run.csv"), 8).unwrap();

        // Stop already requested before the worker starts.
        let shutdown = Arc::new(AtomicBool::new(true));
        let worker = thread::spawn(move || persistence_loop(rx, sink, shutdown));

        // A sampler mid-read delivers one final sample, then departs.
        thread::sleep(Duration::from_millis(50));
        let outcome = tx.push(PhysicalSample {
            timestamp: 0.1,
            x: 1.0,
            y: 0.0,
            z: 0.0,
        });
        assert_eq!(outcome, PushOutcome::Delivered);
        assert_eq!(tx.dropped(), 0);
        drop(tx);

        let rows = worker.join().unwrap().unwrap();
        assert_eq!(rows, 1, "the in-flight sample reaches the file");
    }

    #[test]
    fn run_state_gate_pauses_and_resumes_sampling() {
        let mut bus = MockBus::new();
        bus.set_axes_raw(51200, 0, 51200);
        let sensor = test_sensor(bus, false);

        // Gate starts closed: the tag reads inactive.
        let mut plc = MockController::default();
        plc.tags.insert("VDF_STATUS".into(), 0.0);
        let controller = Arc::new(Mutex::new(plc));

        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            calibration_samples: 0,
            idle_poll: Duration::from_millis(10),
            ..test_config(dir.path())
        };
        let monitor = VibrationMonitor::new(config).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let scripter = {
            let controller = controller.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                // inactive 0-200 ms, active 200-400 ms, inactive until stop
                thread::sleep(Duration::from_millis(200));
                controller
                    .lock()
                    .unwrap()
                    .tags
                    .insert("VDF_STATUS".into(), RUN_ACTIVE);
                thread::sleep(Duration::from_millis(200));
                controller.lock().unwrap().tags.insert("VDF_STATUS".into(), 0.0);
                thread::sleep(Duration::from_millis(400));
                shutdown.store(true, Ordering::SeqCst);
            })
        };

        let summary = monitor.run(sensor, controller, shutdown).unwrap();
        scripter.join().unwrap();

        assert!(summary.samples > 0, "sampling resumed while the gate was open");

        let contents = std::fs::read_to_string(dir.path().join("run.csv")).unwrap();
        let timestamps: Vec<f64> = contents
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap().parse().unwrap())
            .collect();
        let first = *timestamps.first().unwrap();
        let last = *timestamps.last().unwrap();
        assert!(
            first > 0.1,
            "no samples while the gate was closed at startup (first at {:.3}s)",
            first
        );
        assert!(
            last < 0.7,
            "sampling paused after the gate closed (last at {:.3}s)",
            last
        );
    }

    #[test]
    fn calibration_failure_aborts_startup_when_required() {
        let sensor = test_sensor(MockBus::new(), true); // all-zero data registers
        let controller = Arc::new(Mutex::new(MockController::default()));
        let dir = tempfile::tempdir().unwrap();

        let config = MonitorConfig {
            calibration_samples: 3,
            calibration_delay: Duration::ZERO,
            require_calibration: true,
            run_state_tag: None,
            output_path: dir.path().join("run.csv"),
            ..MonitorConfig::default()
        };
        let monitor = VibrationMonitor::new(config).unwrap();

        let err = monitor
            .run(sensor, controller, Arc::new(AtomicBool::new(false)))
            .unwrap_err();
        assert!(matches!(err, MonitorError::Calibration(_)));
    }

    #[test]
    fn calibration_failure_tolerated_when_not_required() {
        let sensor = test_sensor(MockBus::new(), false);
        let controller = Arc::new(Mutex::new(crate::plc::NullController));

        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            window_size: 10,
            save_interval: 20,
            calibration_samples: 3,
            calibration_delay: Duration::ZERO,
            require_calibration: false,
            run_state_tag: None,
            update_interval: Duration::ZERO,
            output_path: dir.path().join("run.csv"),
            ..MonitorConfig::default()
        };
        let monitor = VibrationMonitor::new(config).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                shutdown.store(true, Ordering::SeqCst);
            });
        }
        let summary = monitor.run(sensor, controller, shutdown).unwrap();
        assert!(summary.samples > 0, "run proceeds uncalibrated");
    }

    #[test]
    fn rejects_degenerate_configuration() {
        let config = MonitorConfig {
            window_size: 0,
            ..MonitorConfig::default()
        };
        assert!(VibrationMonitor::new(config).is_err());
    }
}
