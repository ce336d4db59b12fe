//! Process-wide owner of every configured device's [`WorkerHandle`]
//! (spec.md §4.6): lifecycle (`start`/`stop`) and command routing by device
//! name.
//!
//! An explicit value (`Arc<IoManager>` held by the RPC server), not a
//! language-level singleton — spec.md §9's design note prefers an injected
//! registry over global mutable state.

use crate::fanout::{FanOut, Subscription, DEFAULT_CAPACITY};
use crate::worker::{AcquisitionWorker, WorkerHandle};
use eurotherm_common::{
    DeviceConfig, DriverKind, EurothermError, EurothermResult, ProcessValues, Quantity,
    RemoteSetpointState,
};
use eurotherm_fieldbus::{ControllerDriver, GenericDriver, SerialBus, SimDriver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// Wildcard device name accepted by [`IoManager::acknowledge_all_alarms`]
/// meaning "every configured device" (spec.md §4.6).
pub const ALL_DEVICES: &str = "*";

struct Running {
    workers: HashMap<String, WorkerHandle>,
    fanout: FanOut<ProcessValues>,
}

/// Lifecycle and command-routing owner of every device's acquisition
/// worker. Initially stopped; `start` is idempotent; `stop` tears
/// everything down and leaves the manager ready to `start` again.
pub struct IoManager {
    state: Mutex<Option<Running>>,
}

impl Default for IoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IoManager {
    /// Construct a stopped manager. No workers exist, no `FanOut` exists,
    /// until [`start`](Self::start) is called.
    pub fn new() -> Self {
        Self { state: Mutex::new(None) }
    }

    /// True while workers are running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Launch one [`AcquisitionWorker`] per device in `configs` and
    /// construct a fresh [`FanOut`] every worker feeds. A no-op if already
    /// running (spec.md §4.6: "`start` is idempotent"). Duplicate device
    /// names fail with [`EurothermError::Config`]; driver construction
    /// failures (e.g. a serial port that cannot be opened) abort start and
    /// surface as [`EurothermError::Config`] too, per spec.md §7.
    pub async fn start(&self, configs: &[DeviceConfig]) -> EurothermResult<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut seen = std::collections::HashSet::new();
        for config in configs {
            if !seen.insert(config.name.as_str()) {
                return Err(EurothermError::Config(format!(
                    "duplicate device name: {}",
                    config.name
                )));
            }
        }

        let fanout: FanOut<ProcessValues> = FanOut::with_capacity(DEFAULT_CAPACITY);
        let mut workers = HashMap::with_capacity(configs.len());

        for config in configs {
            let driver = build_driver(config)?;
            info!(device = %config.name, driver = ?config.driver, "starting acquisition worker");
            let handle = AcquisitionWorker::spawn(
                config.name.clone(),
                driver,
                config.poll_interval(),
                Quantity::celsius(0.0),
                fanout.clone(),
            );
            workers.insert(config.name.clone(), handle);
        }

        *guard = Some(Running { workers, fanout });
        Ok(())
    }

    /// Complete the `FanOut` (rejecting new subscribers), cancel and join
    /// every worker, and clear all state. A no-op if not running.
    pub async fn stop(&self) {
        let running = self.state.lock().await.take();
        let Some(running) = running else { return };

        running.fanout.complete();
        for (name, worker) in running.workers {
            info!(device = %name, "stopping acquisition worker");
            worker.cancel_and_join().await;
        }
    }

    /// Subscribe to the live `FanOut` stream. Fails with
    /// [`EurothermError::NotRunning`] if the manager is not running.
    pub async fn subscribe(&self) -> EurothermResult<Subscription<ProcessValues>> {
        let guard = self.state.lock().await;
        let running = guard.as_ref().ok_or(EurothermError::NotRunning)?;
        running.fanout.subscribe().ok_or(EurothermError::NotRunning)
    }

    async fn worker(&self, device: &str) -> EurothermResult<WorkerHandle> {
        let guard = self.state.lock().await;
        let running = guard.as_ref().ok_or(EurothermError::NotRunning)?;
        running
            .workers
            .get(device)
            .cloned()
            .ok_or_else(|| EurothermError::UnknownDevice(device.to_string()))
    }

    /// Enable/disable the remote setpoint selector on `device`.
    pub async fn toggle_remote_setpoint(&self, device: &str, state: RemoteSetpointState) -> EurothermResult<()> {
        self.worker(device).await?.toggle_remote_setpoint(state).await
    }

    /// Set the remote setpoint on `device`; the next poll writes it
    /// through, conditional on `LocalRemoteSPSelect`.
    pub async fn set_remote_setpoint(&self, device: &str, value: Quantity) -> EurothermResult<()> {
        self.worker(device).await?.set_remote_setpoint(value);
        Ok(())
    }

    /// Start a new temperature ramp on `device`.
    pub async fn start_ramp(&self, device: &str, target: Quantity, rate: Quantity) -> EurothermResult<broadcast::Receiver<Quantity>> {
        self.worker(device).await?.start_ramp(target, rate).await
    }

    /// Cancel the active ramp on `device`, if any.
    pub async fn stop_ramp(&self, device: &str) -> EurothermResult<()> {
        self.worker(device).await?.stop_ramp().await;
        Ok(())
    }

    /// Current state of `device`'s active ramp, or `NoRamp` if none.
    pub async fn ramp_state(&self, device: &str) -> EurothermResult<eurotherm_common::RampState> {
        Ok(self.worker(device).await?.ramp_state().await)
    }

    /// True if `device` is a currently running worker.
    pub async fn contains(&self, device: &str) -> bool {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|running| running.workers.contains_key(device))
            .unwrap_or(false)
    }

    /// Acknowledge all alarms on `device`, or on every device if `device`
    /// is the [`ALL_DEVICES`] wildcard `"*"`.
    pub async fn acknowledge_all_alarms(&self, device: &str) -> EurothermResult<()> {
        if device == ALL_DEVICES {
            let guard = self.state.lock().await;
            let running = guard.as_ref().ok_or(EurothermError::NotRunning)?;
            for (name, worker) in &running.workers {
                if let Err(err) = worker.acknowledge_all_alarms().await {
                    warn!(device = %name, %err, "acknowledge-all-alarms failed for device");
                }
            }
            Ok(())
        } else {
            self.worker(device).await?.acknowledge_all_alarms().await
        }
    }
}

fn build_driver(config: &DeviceConfig) -> EurothermResult<Arc<dyn ControllerDriver>> {
    match config.driver {
        DriverKind::Simulate => Ok(Arc::new(SimDriver::new())),
        DriverKind::Generic | DriverKind::Model3208 => {
            let bus = SerialBus::open(&config.connection.port, config.connection.baud_rate).map_err(|err| {
                EurothermError::Config(format!(
                    "device {:?}: could not open serial bus {:?}: {err}",
                    config.name, config.connection.port
                ))
            })?;
            Ok(Arc::new(GenericDriver::new(config.unit_address, bus)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eurotherm_common::{DeviceConfig as Dc, SerialPortConfig};

    fn device(name: &str, driver: DriverKind) -> Dc {
        Dc {
            name: name.to_string(),
            unit_address: 1,
            connection: SerialPortConfig {
                port: "/dev/ttyUSB0".into(),
                baud_rate: 9600,
            },
            sampling_rate: Quantity::hertz(10.0),
            driver,
        }
    }

    #[tokio::test]
    async fn start_then_stop_leaves_zero_workers() {
        let manager = IoManager::new();
        let configs = vec![device("d1", DriverKind::Simulate), device("d2", DriverKind::Simulate)];
        manager.start(&configs).await.unwrap();
        assert!(manager.is_running().await);
        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let manager = IoManager::new();
        let configs = vec![device("d1", DriverKind::Simulate)];
        manager.start(&configs).await.unwrap();
        manager.start(&configs).await.unwrap();
        manager.stop().await;
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let manager = IoManager::new();
        let configs = vec![device("d1", DriverKind::Simulate)];
        manager.start(&configs).await.unwrap();
        let result = manager
            .toggle_remote_setpoint("missing", RemoteSetpointState::Enabled)
            .await;
        assert!(matches!(result, Err(EurothermError::UnknownDevice(_))));
        manager.stop().await;
    }

    #[tokio::test]
    async fn subscribe_before_start_fails_not_running() {
        let manager = IoManager::new();
        assert!(matches!(manager.subscribe().await, Err(EurothermError::NotRunning)));
    }
}
