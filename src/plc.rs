//! External industrial-controller interface
//!
//! The pipeline only needs a narrow tag read/write capability from the
//! controller, so that is all this module defines. Concrete clients (the
//! plant PLC protocol) live outside this crate; tests and controller-less
//! runs substitute [`NullController`]. Remote failures are always local and
//! recoverable: callers retry a bounded number of times and then log.

use crate::error::{MonitorError, Result};

/// Run-state tag value meaning the monitored process is actively running.
pub const RUN_ACTIVE: f64 = 2.0;

/// Tag read/write capability of the external controller.
///
/// Both calls are treated as unreliable remote operations: they may fail or
/// time out, and the caller decides how many times to retry.
pub trait Controller {
    /// Read a scalar tag value
    fn read_tag(&mut self, tag: &str) -> Result<f64>;

    /// Write a sequence of values to a tag
    fn write_tag(&mut self, tag: &str, values: &[f64]) -> Result<()>;
}

/// Read a tag, retrying up to `retries` times before giving up.
pub fn read_tag_retry<C: Controller + ?Sized>(
    controller: &mut C,
    tag: &str,
    retries: u32,
) -> Result<f64> {
    let mut last = None;
    for attempt in 1..=retries.max(1) {
        match controller.read_tag(tag) {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::debug!("read of tag '{}' failed (attempt {}): {}", tag, attempt, e);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| {
        MonitorError::Controller(format!("read of tag '{}' failed", tag))
    }))
}

/// Write a tag, retrying up to `retries` times before giving up.
pub fn write_tag_retry<C: Controller + ?Sized>(
    controller: &mut C,
    tag: &str,
    values: &[f64],
    retries: u32,
) -> Result<()> {
    let mut last = None;
    for attempt in 1..=retries.max(1) {
        match controller.write_tag(tag, values) {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::debug!("write of tag '{}' failed (attempt {}): {}", tag, attempt, e);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| {
        MonitorError::Controller(format!("write of tag '{}' failed", tag))
    }))
}

/// Stand-in controller for runs without a reachable PLC.
///
/// Reports every tag as [`RUN_ACTIVE`] and discards writes, so the pipeline
/// logs unconditionally — the original system's testing mode.
#[derive(Debug, Default)]
pub struct NullController;

impl Controller for NullController {
    fn read_tag(&mut self, tag: &str) -> Result<f64> {
        log::trace!("null controller read of '{}'", tag);
        Ok(RUN_ACTIVE)
    }

    fn write_tag(&mut self, tag: &str, values: &[f64]) -> Result<()> {
        log::debug!("null controller write to '{}': {:?}", tag, values);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Scripted controller: programmable tag values, per-call failure
    /// injection, and a record of every write.
    #[derive(Default)]
    pub(crate) struct MockController {
        pub tags: HashMap<String, f64>,
        /// Fail this many calls before succeeding
        pub fail_next: u32,
        pub writes: Vec<(String, Vec<f64>)>,
        pub calls: u32,
    }

    impl Controller for MockController {
        fn read_tag(&mut self, tag: &str) -> Result<f64> {
            self.calls += 1;
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(MonitorError::Controller("injected read failure".into()));
            }
            self.tags
                .get(tag)
                .copied()
                .ok_or_else(|| MonitorError::Controller(format!("unknown tag '{}'", tag)))
        }

        fn write_tag(&mut self, tag: &str, values: &[f64]) -> Result<()> {
            self.calls += 1;
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(MonitorError::Controller("injected write failure".into()));
            }
            self.writes.push((tag.to_string(), values.to_vec()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockController;
    use super::*;

    #[test]
    fn read_retries_until_success() {
        let mut plc = MockController::default();
        plc.tags.insert("VDF_STATUS".into(), RUN_ACTIVE);
        plc.fail_next = 2;
        let value = read_tag_retry(&mut plc, "VDF_STATUS", 3).unwrap();
        assert_eq!(value, RUN_ACTIVE);
        assert_eq!(plc.calls, 3);
    }

    #[test]
    fn read_gives_up_after_bounded_retries() {
        let mut plc = MockController::default();
        plc.fail_next = 10;
        assert!(read_tag_retry(&mut plc, "VDF_STATUS", 3).is_err());
        assert_eq!(plc.calls, 3);
    }

    #[test]
    fn write_retries_then_records() {
        let mut plc = MockController::default();
        plc.fail_next = 1;
        write_tag_retry(&mut plc, "RMS", &[1.0, 2.0, 3.0], 3).unwrap();
        assert_eq!(plc.writes, vec![("RMS".to_string(), vec![1.0, 2.0, 3.0])]);
    }

    #[test]
    fn null_controller_always_reports_active() {
        let mut plc = NullController;
        assert_eq!(plc.read_tag("anything").unwrap(), RUN_ACTIVE);
        assert!(plc.write_tag("anything", &[0.0]).is_ok());
    }
}
