//! Preemptable linear-ramp scheduler driving a worker's remote setpoint
//! (spec.md §4.4).
//!
//! One `tokio` task per active ramp, ticking once a second regardless of
//! the owning worker's sampling rate. All arithmetic happens in absolute
//! Kelvin (spec.md §9: "ramp arithmetic must be done in absolute units to
//! avoid ill-defined offset arithmetic"). The scheduler never talks to the
//! driver itself — it only updates the worker's shared `remote_setpoint`;
//! the worker's poll loop is the only thing that ever calls
//! `write_remote_setpoint`, and only while `LocalRemoteSPSelect` is set.

use eurotherm_common::{Quantity, RampState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};
use tokio::time::{Duration, Instant};
use tracing::debug;

const TICK: Duration = Duration::from_secs(1);
const VALUES_CAPACITY: usize = 32;

/// A live or finished ramp's observable handle.
///
/// Returned by [`RampScheduler::spawn`] and held by the owning
/// [`crate::AcquisitionWorker`] until superseded or the worker shuts down.
pub struct RampHandle {
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    state: Arc<Mutex<RampState>>,
    values: broadcast::Sender<Quantity>,
    task: tokio::task::JoinHandle<()>,
}

impl RampHandle {
    /// Current reported state of this ramp: `Ramping` while active, else
    /// `Stopped` or `Finished` once it has settled.
    pub fn state(&self) -> RampState {
        *self.state.lock().expect("ramp state mutex poisoned")
    }

    /// Subscribe to this ramp's emitted trajectory values. Each call gets
    /// an independent receiver seeing only future emissions, matching the
    /// per-ramp broadcast channel spec.md §4.4 describes.
    pub fn subscribe(&self) -> broadcast::Receiver<Quantity> {
        self.values.subscribe()
    }

    /// Request cancellation and wait for the scheduler task to observe it
    /// and exit. Idempotent: calling this on an already-finished ramp just
    /// joins the (already exited) task.
    pub async fn cancel_and_join(self) {
        self.cancel.store(true, Ordering::Release);
        self.notify.notify_waiters();
        let _ = self.task.await;
    }
}

/// The ramp scheduler itself. Stateless — all state lives in the
/// [`RampHandle`] and the spawned task's locals.
pub struct RampScheduler;

impl RampScheduler {
    /// Start a new ramp from `start` to `target` at `|rate|` (rate's sign
    /// is ignored; direction is derived from `target - start`), writing
    /// through `remote_setpoint` on every tick.
    ///
    /// `remote_setpoint` is the same `Arc<Mutex<Quantity>>` the owning
    /// worker reads on every poll to reassert the remote setpoint — the
    /// scheduler never calls the driver directly (spec.md §4.4).
    ///
    /// Returns the handle together with a receiver subscribed *before* the
    /// scheduler task is spawned, so the caller is guaranteed to see the
    /// ramp's first emission. Subscribing only after `spawn` returns would
    /// race the task's first `values.send`, which happens with no `.await`
    /// ahead of it and so can run to completion before the caller's own
    /// `subscribe()` call on a multi-threaded runtime.
    pub fn spawn(
        start: Quantity,
        target: Quantity,
        rate: Quantity,
        remote_setpoint: Arc<Mutex<Quantity>>,
    ) -> (RampHandle, broadcast::Receiver<Quantity>) {
        let cancel = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let state = Arc::new(Mutex::new(RampState::Ramping));
        let (values, initial_rx) = broadcast::channel(VALUES_CAPACITY);

        let task_cancel = Arc::clone(&cancel);
        let task_notify = Arc::clone(&notify);
        let task_state = Arc::clone(&state);
        let task_values = values.clone();

        let task = tokio::spawn(async move {
            run(
                start,
                target,
                rate,
                remote_setpoint,
                task_cancel,
                task_notify,
                task_state,
                task_values,
            )
            .await;
        });

        (
            RampHandle {
                cancel,
                notify,
                state,
                values,
                task,
            },
            initial_rx,
        )
    }
}

async fn run(
    start: Quantity,
    target: Quantity,
    rate: Quantity,
    remote_setpoint: Arc<Mutex<Quantity>>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    state: Arc<Mutex<RampState>>,
    values: broadcast::Sender<Quantity>,
) {
    let start_k = start.as_kelvin();
    let target_k = target.as_kelvin();
    let rate_per_sec = rate.as_kelvin_per_second().abs();
    let sign = (target_k - start_k).signum();
    let t0 = Instant::now();

    loop {
        if cancel.load(Ordering::Acquire) {
            *state.lock().expect("ramp state mutex poisoned") = RampState::Stopped;
            debug!("ramp cancelled");
            return;
        }

        let elapsed = t0.elapsed().as_secs_f64();
        let current_k = start_k + sign * rate_per_sec * elapsed;

        if sign == 0.0 || sign * (current_k - target_k) >= 0.0 {
            *remote_setpoint.lock().expect("remote setpoint mutex poisoned") = target;
            let _ = values.send(target);
            *state.lock().expect("ramp state mutex poisoned") = RampState::Finished;
            debug!("ramp finished");
            return;
        }

        let current = Quantity::kelvin(current_k);
        *remote_setpoint.lock().expect("remote setpoint mutex poisoned") = current;
        let _ = values.send(current);

        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = notify.notified() => {
                if cancel.load(Ordering::Acquire) {
                    *state.lock().expect("ramp state mutex poisoned") = RampState::Stopped;
                    debug!("ramp cancelled mid-tick");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ramp_reaches_target_and_reports_finished() {
        let remote_setpoint = Arc::new(Mutex::new(Quantity::kelvin(293.15)));
        let (handle, mut values) = RampScheduler::spawn(
            Quantity::kelvin(293.15),
            Quantity::kelvin(295.15),
            Quantity::kelvin_per_minute(60.0),
            Arc::clone(&remote_setpoint),
        );

        // 2 K at 1 K/min takes 2 minutes; advance virtual time in 1s ticks.
        for _ in 0..125 {
            tokio::time::advance(Duration::from_secs(1)).await;
            if handle.state() == RampState::Finished {
                break;
            }
        }
        assert_eq!(handle.state(), RampState::Finished);
        let final_setpoint = remote_setpoint.lock().unwrap().as_kelvin();
        assert!((final_setpoint - 295.15).abs() < 1e-6);

        // Drain the broadcast channel; the last value emitted must be the
        // exact target, not an overshoot from a fixed-step tick.
        let mut last = None;
        while let Ok(v) = values.try_recv() {
            last = Some(v);
        }
        assert!((last.unwrap().as_kelvin() - 295.15).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_ramp_without_reaching_target() {
        let remote_setpoint = Arc::new(Mutex::new(Quantity::kelvin(293.15)));
        let (handle, _values) = RampScheduler::spawn(
            Quantity::kelvin(293.15),
            Quantity::kelvin(400.0),
            Quantity::kelvin_per_minute(10.0),
            Arc::clone(&remote_setpoint),
        );
        tokio::time::advance(Duration::from_secs(3)).await;
        handle.cancel_and_join().await;
        let setpoint = remote_setpoint.lock().unwrap().as_kelvin();
        assert!(setpoint < 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_length_ramp_finishes_immediately() {
        let remote_setpoint = Arc::new(Mutex::new(Quantity::kelvin(293.15)));
        let (handle, _values) = RampScheduler::spawn(
            Quantity::kelvin(293.15),
            Quantity::kelvin(293.15),
            Quantity::kelvin_per_minute(10.0),
            Arc::clone(&remote_setpoint),
        );
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), RampState::Finished);
    }
}
