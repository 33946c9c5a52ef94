//! Bounded sample queue with an explicit backpressure policy
//!
//! A fixed-capacity FIFO of [`PhysicalSample`]s between the sampling worker
//! and one consumer stage. The overflow policy is fixed at construction and
//! applies to every push: either the incoming sample is dropped and counted,
//! or the producer blocks for a bounded wait. Pops always use a bounded wait
//! so consumers can re-check the run state between attempts.

use crate::adxl357::PhysicalSample;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a push does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the incoming sample and increment the drop counter.
    /// Sampling stays real-time; overload is observable in the counter.
    DropNewest,
    /// Block the producer for up to the given wait, delaying the next
    /// physical read. A timed-out push reports [`PushOutcome::TimedOut`]
    /// so the producer can re-check the stop signal and retry.
    Block(Duration),
}

/// Result of a push; never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Sample discarded and counted: queue full under
    /// [`OverflowPolicy::DropNewest`], or the consumer is gone
    Dropped,
    /// Full under [`OverflowPolicy::Block`] for the whole bounded wait
    TimedOut,
}

/// Outcome of a bounded-wait pop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PopOutcome {
    Sample(PhysicalSample),
    /// Queue empty for the whole wait; producers still connected
    TimedOut,
    /// Every producer handle dropped and the queue fully drained
    Disconnected,
}

/// Producer handle.
pub struct SampleSender {
    tx: Sender<PhysicalSample>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

/// Consumer handle.
pub struct SampleReceiver {
    rx: Receiver<PhysicalSample>,
    dropped: Arc<AtomicU64>,
}

/// Create a bounded queue of `capacity` samples with the given policy.
pub fn bounded(capacity: usize, policy: OverflowPolicy) -> (SampleSender, SampleReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        SampleSender {
            tx,
            policy,
            dropped: dropped.clone(),
        },
        SampleReceiver { rx, dropped },
    )
}

impl SampleSender {
    /// Push one sample, applying the queue's overflow policy.
    pub fn push(&self, sample: PhysicalSample) -> PushOutcome {
        match self.policy {
            OverflowPolicy::DropNewest => match self.tx.try_send(sample) {
                Ok(()) => PushOutcome::Delivered,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    // Losing a sample to a departed consumer is still a loss;
                    // it must show up in the counter.
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::Dropped
                }
            },
            OverflowPolicy::Block(wait) => match self.tx.send_timeout(sample, wait) {
                Ok(()) => PushOutcome::Delivered,
                Err(SendTimeoutError::Timeout(_)) => PushOutcome::TimedOut,
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::Dropped
                }
            },
        }
    }

    /// Samples discarded so far under the drop policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Samples currently queued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl SampleReceiver {
    /// Pop the oldest sample, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or when the producer side is gone and the
    /// queue is drained; never blocks indefinitely.
    pub fn pop(&self, timeout: Duration) -> Option<PhysicalSample> {
        match self.rx.recv_timeout(timeout) {
            Ok(sample) => Some(sample),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Pop with the disconnect case made explicit, for consumers whose exit
    /// condition is producer departure rather than a stop flag.
    pub fn pop_outcome(&self, timeout: Duration) -> PopOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(sample) => PopOutcome::Sample(sample),
            Err(RecvTimeoutError::Timeout) => PopOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => PopOutcome::Disconnected,
        }
    }

    /// Samples discarded so far under the drop policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Samples currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
