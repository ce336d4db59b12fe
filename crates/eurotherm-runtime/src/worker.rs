//! Per-device acquisition engine (spec.md §4.3): one task per configured
//! device, periodically polling its driver, overlaying remote-setpoint and
//! ramp state, and publishing to the shared [`FanOut`].

use crate::fanout::FanOut;
use crate::ramp::{RampHandle, RampScheduler};
use eurotherm_common::{
    EurothermError, EurothermResult, InstrumentStatus, ProcessValues, Quantity, RampState,
    RemoteSetpointState,
};
use eurotherm_common::{WorkerState, WorkerStateMachine};
use eurotherm_fieldbus::ControllerDriver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio::time::Duration;
use tracing::warn;

/// Builds and runs the polling task for one device. Construction always
/// goes through [`AcquisitionWorker::spawn`], which returns the
/// [`WorkerHandle`] callers actually hold.
pub struct AcquisitionWorker;

/// A cheap, cloneable handle onto one device's acquisition task.
///
/// Owns the state spec.md §4.3 assigns to the worker: the current
/// `remote_setpoint` and the optional active [`RampHandle`]. Command
/// methods forward to the driver directly (the shared [`eurotherm_fieldbus::bus::SerialBus`]
/// behind it already serialises concurrent transactions) or mutate this
/// shared state for the next poll to pick up.
#[derive(Clone)]
pub struct WorkerHandle {
    device: String,
    driver: Arc<dyn ControllerDriver>,
    remote_setpoint: Arc<StdMutex<Quantity>>,
    ramp: Arc<AsyncMutex<Option<RampHandle>>>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    state: Arc<StdMutex<WorkerStateMachine>>,
    task: Arc<AsyncMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl AcquisitionWorker {
    /// Spawn the polling task for `device`, starting from `initial_setpoint`
    /// (typically the driver's first read, or a configured local setpoint).
    pub fn spawn(
        device: impl Into<String>,
        driver: Arc<dyn ControllerDriver>,
        poll_interval: Duration,
        initial_setpoint: Quantity,
        fanout: FanOut<ProcessValues>,
    ) -> WorkerHandle {
        let device = device.into();
        let remote_setpoint = Arc::new(StdMutex::new(initial_setpoint));
        let ramp: Arc<AsyncMutex<Option<RampHandle>>> = Arc::new(AsyncMutex::new(None));
        let cancel = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let state = Arc::new(StdMutex::new(WorkerStateMachine::new()));

        state
            .lock()
            .expect("worker state mutex poisoned")
            .transition(WorkerState::Polling)
            .expect("Idle -> Polling is always legal");

        let task_device = device.clone();
        let task_driver = Arc::clone(&driver);
        let task_remote_setpoint = Arc::clone(&remote_setpoint);
        let task_ramp = Arc::clone(&ramp);
        let task_cancel = Arc::clone(&cancel);
        let task_notify = Arc::clone(&notify);
        let task_state = Arc::clone(&state);

        let task = tokio::spawn(poll_loop(
            task_device,
            task_driver,
            poll_interval,
            task_remote_setpoint,
            task_ramp,
            task_cancel,
            task_notify,
            task_state,
            fanout,
        ));

        WorkerHandle {
            device,
            driver,
            remote_setpoint,
            ramp,
            cancel,
            notify,
            state,
            task: Arc::new(AsyncMutex::new(Some(task))),
        }
    }
}

impl WorkerHandle {
    /// Device name this worker was spawned for.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current worker lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state.lock().expect("worker state mutex poisoned").state()
    }

    /// Forward an enable/disable of the instrument's remote setpoint
    /// selector to the driver, unless the worker has already been
    /// cancelled.
    pub async fn toggle_remote_setpoint(&self, state: RemoteSetpointState) -> EurothermResult<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(EurothermError::NotRunning);
        }
        self.driver.select_remote_setpoint(state).await
    }

    /// Atomically swap the worker's stored remote setpoint. The next poll
    /// writes it through to the instrument, iff the instrument currently
    /// has `LocalRemoteSPSelect` set.
    pub fn set_remote_setpoint(&self, value: Quantity) {
        *self.remote_setpoint.lock().expect("remote setpoint mutex poisoned") = value;
    }

    /// Read the worker's currently stored remote setpoint.
    pub fn remote_setpoint(&self) -> Quantity {
        *self.remote_setpoint.lock().expect("remote setpoint mutex poisoned")
    }

    /// Forward an acknowledge-all-alarms command to the driver.
    pub async fn acknowledge_all_alarms(&self) -> EurothermResult<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(EurothermError::NotRunning);
        }
        self.driver.acknowledge_all_alarms().await
    }

    /// Start a new ramp to `target` at `|rate|`, reading the current
    /// process value as the start point. If a ramp is already active it is
    /// cancelled and joined first — its observable completes before the
    /// new ramp's first emission (spec.md §8 testable property).
    pub async fn start_ramp(&self, target: Quantity, rate: Quantity) -> EurothermResult<broadcast::Receiver<Quantity>> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(EurothermError::NotRunning);
        }

        // Release the ramp lock before awaiting the previous ramp's join —
        // this is what gives us reentrancy without an actual reentrant
        // mutex (spec.md §5/§9).
        let previous = self.ramp.lock().await.take();
        if let Some(previous) = previous {
            previous.cancel_and_join().await;
        }

        let reading = self.driver.get_process_values().await?;
        let (handle, values) = RampScheduler::spawn(
            reading.process_value,
            target,
            rate,
            Arc::clone(&self.remote_setpoint),
        );
        *self.ramp.lock().await = Some(handle);
        Ok(values)
    }

    /// Cancel the active ramp, if any. A no-op if no ramp is running.
    pub async fn stop_ramp(&self) {
        if let Some(previous) = self.ramp.lock().await.take() {
            previous.cancel_and_join().await;
        }
    }

    /// State of the currently active ramp, or `NoRamp` if none.
    pub async fn ramp_state(&self) -> RampState {
        match self.ramp.lock().await.as_ref() {
            Some(handle) => handle.state(),
            None => RampState::NoRamp,
        }
    }

    /// Request cancellation and wait for the polling task (and any active
    /// ramp) to finish. Transitions Polling -> Draining -> Stopped.
    pub async fn cancel_and_join(&self) {
        {
            let mut state = self.state.lock().expect("worker state mutex poisoned");
            if state.state() == WorkerState::Polling {
                state
                    .transition(WorkerState::Draining)
                    .expect("Polling -> Draining is always legal");
            }
        }
        self.cancel.store(true, Ordering::Release);
        self.notify.notify_waiters();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    device: String,
    driver: Arc<dyn ControllerDriver>,
    poll_interval: Duration,
    remote_setpoint: Arc<StdMutex<Quantity>>,
    ramp: Arc<AsyncMutex<Option<RampHandle>>>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    state: Arc<StdMutex<WorkerStateMachine>>,
    fanout: FanOut<ProcessValues>,
) {
    while !cancel.load(Ordering::Acquire) {
        match driver.get_process_values().await {
            Ok(reading) => {
                let rs = *remote_setpoint.lock().expect("remote setpoint mutex poisoned");
                let ramp_state = match ramp.lock().await.as_ref() {
                    Some(handle) => handle.state(),
                    None => RampState::NoRamp,
                };

                let record = ProcessValues {
                    device: device.clone(),
                    timestamp: chrono::Utc::now(),
                    process_value: reading.process_value,
                    setpoint: reading.setpoint,
                    working_setpoint: reading.working_setpoint,
                    remote_setpoint: rs,
                    working_output: reading.working_output,
                    status: reading.status,
                    ramp_state,
                };
                fanout.publish(record);

                if reading.status.contains(InstrumentStatus::LOCAL_REMOTE_SP_SELECT) {
                    if let Err(err) = driver.write_remote_setpoint(rs).await {
                        warn!(%device, %err, "failed to reassert remote setpoint");
                    }
                }
            }
            Err(err) => {
                warn!(%device, %err, "poll failed, skipping this cycle");
            }
        }

        if cancel.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = notify.notified() => {}
        }
    }

    if let Some(active) = ramp.lock().await.take() {
        active.cancel_and_join().await;
    }

    state
        .lock()
        .expect("worker state mutex poisoned")
        .transition(WorkerState::Stopped)
        .expect("Draining -> Stopped is always legal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use eurotherm_common::EurothermResult;
    use std::sync::atomic::AtomicU32;

    struct StubDriver {
        reads: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ControllerDriver for StubDriver {
        async fn get_process_values(&self) -> EurothermResult<eurotherm_fieldbus::Reading> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            Ok(eurotherm_fieldbus::Reading {
                process_value: Quantity::celsius(20.0),
                setpoint: Quantity::celsius(20.0),
                working_setpoint: Quantity::celsius(20.0),
                working_output: Quantity::percent(0.0),
                status: InstrumentStatus::NONE.with_remote_select(true),
            })
        }
        async fn select_remote_setpoint(&self, _state: RemoteSetpointState) -> EurothermResult<()> {
            Ok(())
        }
        async fn write_remote_setpoint(&self, _value: Quantity) -> EurothermResult<()> {
            Ok(())
        }
        async fn acknowledge_all_alarms(&self) -> EurothermResult<()> {
            Ok(())
        }
        async fn read_status(&self) -> EurothermResult<InstrumentStatus> {
            Ok(InstrumentStatus::NONE)
        }
    }

    #[tokio::test]
    async fn worker_publishes_records_and_stops_cleanly() {
        let fanout: FanOut<ProcessValues> = FanOut::with_capacity(16);
        let mut sub = fanout.subscribe().unwrap();
        let driver = Arc::new(StubDriver { reads: AtomicU32::new(0) });
        let worker = AcquisitionWorker::spawn(
            "d1",
            driver,
            Duration::from_millis(5),
            Quantity::celsius(20.0),
            fanout,
        );

        let next = sub.next().await;
        assert!(matches!(next, crate::fanout::Next::Value(ref pv) if pv.device == "d1"));

        worker.cancel_and_join().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn set_remote_setpoint_is_read_on_next_poll() {
        let fanout: FanOut<ProcessValues> = FanOut::with_capacity(16);
        let mut sub = fanout.subscribe().unwrap();
        let driver = Arc::new(StubDriver { reads: AtomicU32::new(0) });
        let worker = AcquisitionWorker::spawn(
            "d1",
            driver,
            Duration::from_millis(5),
            Quantity::celsius(20.0),
            fanout,
        );

        // drain the first poll, then change the setpoint.
        let _ = sub.next().await;
        worker.set_remote_setpoint(Quantity::celsius(77.0));

        loop {
            if let crate::fanout::Next::Value(pv) = sub.next().await {
                if (pv.remote_setpoint.as_celsius() - 77.0).abs() < 1e-9 {
                    break;
                }
            }
        }

        worker.cancel_and_join().await;
    }
}
