//! Threshold alerting and controller forwarding
//!
//! Evaluates each RMS window against the configured limit and raises a
//! logged alert when any axis exceeds it. The window is then forwarded to
//! the external controller, spaced no closer than the configured update
//! interval; a failed write is logged and swallowed so a flaky controller
//! never stalls aggregation.

use crate::plc::{write_tag_retry, Controller};
use crate::rms::RmsWindow;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-window alert check plus rate-limited controller forwarding.
pub struct ThresholdMonitor<C: Controller> {
    threshold: f64,
    rms_tag: String,
    retries: u32,
    update_interval: Duration,
    last_forward: Option<Instant>,
    controller: Arc<Mutex<C>>,
    alerts: u64,
    write_failures: u64,
}

impl<C: Controller> ThresholdMonitor<C> {
    pub fn new(
        threshold: f64,
        rms_tag: impl Into<String>,
        retries: u32,
        update_interval: Duration,
        controller: Arc<Mutex<C>>,
    ) -> Self {
        Self {
            threshold,
            rms_tag: rms_tag.into(),
            retries,
            update_interval,
            last_forward: None,
            controller,
            alerts: 0,
            write_failures: 0,
        }
    }

    /// Evaluate one window and forward it. Returns whether an alert fired.
    ///
    /// Alerting is a notification, not a control-flow interrupt: every
    /// window is evaluated. Forwarding is rate-limited: windows arriving
    /// inside the update interval are evaluated but not written, so a short
    /// window never backs up the aggregation stage.
    pub fn process(&mut self, window: &RmsWindow) -> bool {
        let alert = window.max_axis() > self.threshold;
        if alert {
            self.alerts += 1;
            log::warn!(
                "threshold exceeded at t={:.3}s: rms=[{:.3}, {:.3}, {:.3}] g > {:.3} g",
                window.window_end,
                window.x,
                window.y,
                window.z,
                self.threshold
            );
        }

        let due = match self.last_forward {
            None => true,
            Some(at) => at.elapsed() >= self.update_interval,
        };
        if !due {
            return alert;
        }
        self.last_forward = Some(Instant::now());

        let result = {
            let mut controller = match self.controller.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            write_tag_retry(
                &mut *controller,
                &self.rms_tag,
                &[window.x, window.y, window.z],
                self.retries,
            )
        };
        if let Err(e) = result {
            self.write_failures += 1;
            log::error!("failed to forward RMS window to controller: {}", e);
        }

        alert
    }

    /// Alerts raised so far
    pub fn alerts(&self) -> u64 {
        self.alerts
    }

    /// Controller writes that failed even after retries
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::testing::MockController;

    fn window(x: f64, y: f64, z: f64) -> RmsWindow {
        RmsWindow {
            x,
            y,
            z,
            window_end: 1.0,
        }
    }

    #[test]
    fn alert_fires_on_max_axis_above_threshold() {
        let plc = Arc::new(Mutex::new(MockController::default()));
        let mut monitor = ThresholdMonitor::new(5.0, "RMS", 3, Duration::ZERO, plc.clone());

        assert!(!monitor.process(&window(1.0, 2.0, 4.9)));
        assert!(monitor.process(&window(1.0, 5.1, 0.0)));
        assert_eq!(monitor.alerts(), 1);

        let plc = plc.lock().unwrap();
        assert_eq!(plc.writes.len(), 2, "forwarding happens with or without alert");
        assert_eq!(plc.writes[1].1, vec![1.0, 5.1, 0.0]);
    }

    #[test]
    fn write_failure_is_swallowed_and_counted() {
        let plc = Arc::new(Mutex::new(MockController::default()));
        plc.lock().unwrap().fail_next = 99;
        let mut monitor = ThresholdMonitor::new(5.0, "RMS", 2, Duration::ZERO, plc);

        // Must not panic or propagate.
        monitor.process(&window(9.0, 0.0, 0.0));
        assert_eq!(monitor.alerts(), 1);
        assert_eq!(monitor.write_failures(), 1);
    }

    #[test]
    fn forwarding_is_spaced_but_every_window_is_evaluated() {
        let plc = Arc::new(Mutex::new(MockController::default()));
        let mut monitor =
            ThresholdMonitor::new(5.0, "RMS", 3, Duration::from_millis(50), plc.clone());

        // Two back-to-back windows: both evaluated, only the first written.
        assert!(monitor.process(&window(6.0, 0.0, 0.0)));
        assert!(monitor.process(&window(7.0, 0.0, 0.0)));
        assert_eq!(monitor.alerts(), 2);
        assert_eq!(plc.lock().unwrap().writes.len(), 1);

        std::thread::sleep(Duration::from_millis(60));
        monitor.process(&window(1.0, 0.0, 0.0));
        assert_eq!(plc.lock().unwrap().writes.len(), 2);
    }
}
