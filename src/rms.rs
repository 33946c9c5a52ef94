//! Windowed root-mean-square aggregation
//!
//! Keeps the most recent `window_size` values per axis in a rotating buffer
//! and maintains a running sum of squares, so each incoming sample costs
//! O(1) and a window emission is a division and a square root. Windows are
//! emitted once a full window's worth of new samples has arrived.

use crate::adxl357::PhysicalSample;

/// RMS magnitudes per axis over the last full window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsWindow {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Timestamp of the newest sample in the window
    pub window_end: f64,
}

impl RmsWindow {
    /// Largest per-axis magnitude, the value compared against the alert threshold
    pub fn max_axis(&self) -> f64 {
        self.x.max(self.y).max(self.z)
    }
}

/// Fixed-size rotating buffer with an incrementally maintained sum of squares.
#[derive(Debug, Clone)]
struct AxisWindow {
    buf: Vec<f64>,
    head: usize,
    filled: usize,
    sum_sq: f64,
}

impl AxisWindow {
    fn new(window_size: usize) -> Self {
        Self {
            buf: vec![0.0; window_size],
            head: 0,
            filled: 0,
            sum_sq: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.filled == self.buf.len() {
            let old = self.buf[self.head];
            self.sum_sq -= old * old;
        } else {
            self.filled += 1;
        }
        self.buf[self.head] = value;
        self.sum_sq += value * value;
        self.head = (self.head + 1) % self.buf.len();
    }

    fn rms(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        // Guard against tiny negative residue from cancellation.
        (self.sum_sq.max(0.0) / self.filled as f64).sqrt()
    }

    /// O(W) recomputation from the buffer contents, for cross-checking.
    #[cfg(test)]
    fn rms_direct(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let sum: f64 = self.buf[..self.filled].iter().map(|v| v * v).sum();
        (sum / self.filled as f64).sqrt()
    }
}

/// Tri-axial RMS aggregator.
///
/// Feed samples with [`push`](Self::push); once [`ready`](Self::ready)
/// reports true, [`emit`](Self::emit) produces an [`RmsWindow`] over the
/// entire current buffer contents and arms the next window.
pub struct RmsAggregator {
    x: AxisWindow,
    y: AxisWindow,
    z: AxisWindow,
    window_size: usize,
    new_samples: usize,
    last_timestamp: f64,
}

impl RmsAggregator {
    /// Create an aggregator with a fixed window of `window_size` samples.
    ///
    /// # Panics
    /// Panics if `window_size` is zero.
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window size must be non-zero");
        Self {
            x: AxisWindow::new(window_size),
            y: AxisWindow::new(window_size),
            z: AxisWindow::new(window_size),
            window_size,
            new_samples: 0,
            last_timestamp: 0.0,
        }
    }

    /// Configured window size
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Absorb one sample into the rotating buffers.
    pub fn push(&mut self, sample: &PhysicalSample) {
        self.x.push(sample.x);
        self.y.push(sample.y);
        self.z.push(sample.z);
        self.new_samples += 1;
        self.last_timestamp = sample.timestamp;
    }

    /// Whether a full window of new samples has arrived since the last emission
    pub fn ready(&self) -> bool {
        self.x.filled == self.window_size && self.new_samples >= self.window_size
    }

    /// Emit the RMS over the current buffer contents and start a new window.
    pub fn emit(&mut self) -> RmsWindow {
        self.new_samples = 0;
        RmsWindow {
            x: self.x.rms(),
            y: self.y.rms(),
            z: self.z.rms(),
            window_end: self.last_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(agg: &mut RmsAggregator, values: impl IntoIterator<Item = (f64, f64, f64)>) {
        for (i, (x, y, z)) in values.into_iter().enumerate() {
            agg.push(&PhysicalSample {
                timestamp: i as f64,
                x,
                y,
                z,
            });
        }
    }

    #[test]
    fn not_ready_until_first_full_window() {
        let mut agg = RmsAggregator::new(10);
        for i in 0..9 {
            agg.push(&PhysicalSample {
                timestamp: i as f64,
                x: 1.0,
                y: 1.0,
                z: 1.0,
            });
            assert!(!agg.ready());
        }
        agg.push(&PhysicalSample {
            timestamp: 9.0,
            x: 1.0,
            y: 1.0,
            z: 1.0,
        });
        assert!(agg.ready());
    }

    #[test]
    fn constant_input_has_rms_equal_to_magnitude() {
        let mut agg = RmsAggregator::new(16);
        feed(&mut agg, (0..16).map(|_| (0.5, -0.25, 2.0)));
        let w = agg.emit();
        assert!((w.x - 0.5).abs() < 1e-12);
        assert!((w.y - 0.25).abs() < 1e-12);
        assert!((w.z - 2.0).abs() < 1e-12);
        assert_eq!(w.max_axis(), w.z);
    }

    #[test]
    fn sinusoid_converges_to_amplitude_over_sqrt2() {
        let amplitude = 3.0;
        // Integer number of periods: 8 periods across 512 samples.
        let window = 512;
        let mut agg = RmsAggregator::new(window);
        feed(
            &mut agg,
            (0..window).map(|i| {
                let phase = 2.0 * std::f64::consts::PI * 8.0 * i as f64 / window as f64;
                (amplitude * phase.sin(), 0.0, 0.0)
            }),
        );
        let w = agg.emit();
        let expected = amplitude / std::f64::consts::SQRT_2;
        assert!(
            (w.x - expected).abs() < 1e-3,
            "rms {} vs expected {}",
            w.x,
            expected
        );
    }

    #[test]
    fn incremental_matches_direct_recomputation() {
        let mut axis = AxisWindow::new(64);
        // Push well past one window so the rotating overwrite path runs.
        let mut v = 0.37_f64;
        for _ in 0..10_000 {
            v = (v * 1.7 + 0.13) % 5.0 - 2.5;
            axis.push(v);
            assert!((axis.rms() - axis.rms_direct()).abs() < 1e-9);
        }
    }

    #[test]
    fn emission_rearms_after_each_full_window() {
        let mut agg = RmsAggregator::new(100);
        let mut emissions = 0;
        for i in 0..1000 {
            agg.push(&PhysicalSample {
                timestamp: i as f64,
                x: 1.0,
                y: 0.0,
                z: 0.0,
            });
            if agg.ready() {
                let w = agg.emit();
                assert_eq!(w.window_end, i as f64);
                emissions += 1;
            }
        }
        assert_eq!(emissions, 10);
    }
}
