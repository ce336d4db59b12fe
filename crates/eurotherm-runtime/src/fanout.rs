//! Multi-subscriber broadcast of [`ProcessValues`] between the acquisition
//! layer and RPC stream subscribers (spec.md §4.5).
//!
//! Generalises the teacher's `plc-web-ui::websocket` pattern — a
//! `tokio::sync::broadcast` channel feeding a per-connection `Receiver`,
//! with `RecvError::Lagged` handled and logged — into a reusable
//! `FanOut<T>`. Unlike the teacher's single global `StateUpdate` stream,
//! this is generic and exposes an explicit drop counter: spec.md §4.5
//! requires a publisher that "never blocks" and "a drop counter is
//! incremented" when a subscriber's mailbox overruns, which is the same
//! information `RecvError::Lagged(n)` already carries, just accumulated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Default per-subscriber mailbox capacity (spec.md §4.5 suggests 256).
pub const DEFAULT_CAPACITY: usize = 256;

struct Inner<T> {
    // `None` once completed. Dropping every `Sender` is what makes an
    // already-subscribed `Receiver::recv` observe `RecvError::Closed` —
    // setting `completed` alone would not wake a subscriber blocked on a
    // `recv().await` with no further publishes coming.
    sender: Mutex<Option<broadcast::Sender<T>>>,
    completed: AtomicBool,
}

/// A lazy, single-producer, multiple-consumer broadcast of `T`.
///
/// `publish` is O(#subscribers) and never blocks: `tokio::sync::broadcast`
/// never awaits a slow receiver, it just lags it. `subscribe` returns a
/// [`Subscription`] that sees only records emitted after it was created —
/// no replay, matching spec.md §4.5.
#[derive(Clone)]
pub struct FanOut<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone> FanOut<T> {
    /// Construct a fan-out with the given per-subscriber mailbox capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Publish a record to every current subscriber. O(#subscribers);
    /// never blocks. A no-op (besides being a no-op) once [`complete`] has
    /// been called.
    ///
    /// [`complete`]: FanOut::complete
    pub fn publish(&self, record: T) {
        let sender = self.inner.sender.lock().expect("fanout sender mutex poisoned");
        if let Some(sender) = sender.as_ref() {
            // `send` returns `Err` only when there are zero receivers; that
            // is the expected steady state when nobody has subscribed yet.
            let _ = sender.send(record);
        }
    }

    /// Subscribe to records emitted from this point forward. Returns `None`
    /// if this fan-out has already been completed (spec.md §4.5: "a
    /// completed FanOut rejects new subscribers").
    pub fn subscribe(&self) -> Option<Subscription<T>> {
        let sender = self.inner.sender.lock().expect("fanout sender mutex poisoned");
        let receiver = sender.as_ref()?.subscribe();
        Some(Subscription { receiver, dropped: 0 })
    }

    /// Close every current and future mailbox. Subsequent `subscribe`
    /// calls return `None`; subsequent `publish` calls are no-ops. Any
    /// subscriber currently blocked in `recv().await` observes
    /// `RecvError::Closed` as soon as this drops the last `Sender`.
    pub fn complete(&self) {
        self.inner.completed.store(true, Ordering::Release);
        self.inner.sender.lock().expect("fanout sender mutex poisoned").take();
    }

    /// True once [`complete`](FanOut::complete) has been called.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Current number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sender
            .lock()
            .expect("fanout sender mutex poisoned")
            .as_ref()
            .map_or(0, |s| s.receiver_count())
    }
}

/// A single subscriber's view of a [`FanOut`] stream.
///
/// Tracks how many records this subscriber has missed due to mailbox
/// overrun (it never blocks the producer, so a slow reader falls behind
/// and some records are dropped for it rather than for every subscriber).
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
    dropped: u64,
}

/// Outcome of awaiting the next record on a [`Subscription`].
pub enum Next<T> {
    /// The next record in publish order (modulo drops).
    Value(T),
    /// The fan-out was completed or every sender handle was dropped; no
    /// further records will arrive.
    Closed,
}

impl<T: Clone> Subscription<T> {
    /// Await the next record, transparently skipping past any overrun this
    /// subscriber suffered and counting it in [`dropped`](Self::dropped).
    pub async fn next(&mut self) -> Next<T> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Next::Value(value),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Next::Closed,
            }
        }
    }

    /// Total records dropped for this subscriber due to mailbox overrun.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_only_records_after_subscribing() {
        let fanout: FanOut<i32> = FanOut::with_capacity(8);
        fanout.publish(1);
        let mut sub = fanout.subscribe().unwrap();
        fanout.publish(2);
        fanout.publish(3);
        assert!(matches!(sub.next().await, Next::Value(2)));
        assert!(matches!(sub.next().await, Next::Value(3)));
    }

    #[tokio::test]
    async fn publish_never_blocks_with_zero_subscribers() {
        let fanout: FanOut<i32> = FanOut::with_capacity(8);
        for i in 0..1000 {
            fanout.publish(i);
        }
    }

    #[tokio::test]
    async fn complete_rejects_new_subscribers_and_closes_existing() {
        let fanout: FanOut<i32> = FanOut::with_capacity(8);
        let mut sub = fanout.subscribe().unwrap();
        fanout.complete();
        assert!(fanout.subscribe().is_none());
        assert!(matches!(sub.next().await, Next::Closed));
    }

    #[tokio::test]
    async fn slow_subscriber_reports_drops_in_order() {
        let fanout: FanOut<i32> = FanOut::with_capacity(2);
        let mut sub = fanout.subscribe().unwrap();
        for i in 0..10 {
            fanout.publish(i);
        }
        let mut seen = Vec::new();
        for _ in 0..2 {
            if let Next::Value(v) = sub.next().await {
                seen.push(v);
            }
        }
        assert!(sub.dropped() > 0);
        // remaining values are strictly increasing: no reordering.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
