//! A bounded outcome queue that producers can't send on after it closes.
//!
//! Every producer shares one [`ResultChannel`] through an `Arc`; the metrics
//! aggregator owns the matching [`flume::Receiver`]. A single lock serializes
//! [`ResultChannel::send`] and [`ResultChannel::close`], so a producer racing the
//! shutdown either delivers its outcome before the close or has it dropped, and
//! a send can never land on a closed channel.
//!
//! Sends never block. When the buffer is full the outcome is dropped and
//! counted as backpressure. Once the test scope is canceled, outcomes are
//! dropped instead of enqueued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::client::Outcome;

/// What happened to an outcome handed to [`ResultChannel::send`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendStatus {
    /// Queued for the aggregator.
    Delivered,
    /// Dropped: the buffer was full.
    Backpressure,
    /// Dropped: the test scope was already canceled.
    Canceled,
    /// Dropped: the channel was already closed.
    Closed,
}

#[derive(Debug)]
struct ChannelState {
    closed: bool,
    // Dropping the only sender is what disconnects the receiver.
    sender: Option<flume::Sender<Outcome>>,
}

/// Guards a bounded [`flume`] channel with a close-once lifecycle.
#[derive(Debug)]
pub struct ResultChannel {
    state: Mutex<ChannelState>,
    canceled: CancellationToken,
    backpressure_drops: AtomicUsize,
    canceled_drops: AtomicUsize,
}
impl ResultChannel {
    /// Create a guarded channel holding at most `capacity` undelivered outcomes.
    ///
    /// Sends are dropped once `canceled` fires. A capacity of 0 is raised to 1.
    pub fn bounded(
        capacity: usize,
        canceled: CancellationToken,
    ) -> (Arc<ResultChannel>, flume::Receiver<Outcome>) {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        let channel = ResultChannel {
            state: Mutex::new(ChannelState {
                closed: false,
                sender: Some(sender),
            }),
            canceled,
            backpressure_drops: AtomicUsize::new(0),
            canceled_drops: AtomicUsize::new(0),
        };
        (Arc::new(channel), receiver)
    }

    // The state is never left half-updated, poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attempt a non-blocking enqueue of an outcome.
    pub fn send(&self, outcome: Outcome) -> SendStatus {
        let state = self.lock();

        if state.closed {
            return SendStatus::Closed;
        }
        if self.canceled.is_cancelled() {
            self.canceled_drops.fetch_add(1, Ordering::Relaxed);
            return SendStatus::Canceled;
        }

        let sender = match state.sender.as_ref() {
            Some(s) => s,
            None => return SendStatus::Closed,
        };
        match sender.try_send(outcome) {
            Ok(()) => SendStatus::Delivered,
            Err(flume::TrySendError::Full(_)) => {
                self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
                warn!("result channel buffer full, dropping outcome");
                SendStatus::Backpressure
            }
            // The aggregator went away; nothing can consume this outcome.
            Err(flume::TrySendError::Disconnected(_)) => SendStatus::Closed,
        }
    }

    /// Close the channel. Returns `true` only for the call that actually closed it.
    ///
    /// Outcomes already queued stay available to the receiver, which sees the
    /// disconnect once it has drained them.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.sender.take();
        debug!("result channel closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Outcomes dropped because the buffer was full.
    pub fn backpressure_drops(&self) -> usize {
        self.backpressure_drops.load(Ordering::Relaxed)
    }

    /// Outcomes dropped because the test scope was already canceled.
    pub fn canceled_drops(&self) -> usize {
        self.canceled_drops.load(Ordering::Relaxed)
    }
}
