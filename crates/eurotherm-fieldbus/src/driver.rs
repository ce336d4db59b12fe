//! The per-device command set every controller driver implements.

use async_trait::async_trait;
use eurotherm_common::{EurothermResult, InstrumentStatus, Quantity, RemoteSetpointState};

/// One controller's read-side process data, minus the fields the
/// acquisition worker overlays (`device`, `ramp_state`) and the remote
/// setpoint, which the worker — not the driver — is authoritative for.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Measured process value (current temperature).
    pub process_value: Quantity,
    /// Local target setpoint configured on the instrument.
    pub setpoint: Quantity,
    /// Working setpoint the instrument is currently driving toward.
    pub working_setpoint: Quantity,
    /// Working output power level.
    pub working_output: Quantity,
    /// Decoded instrument status, including `LocalRemoteSPSelect`.
    pub status: InstrumentStatus,
}

/// Per-device command interface (spec.md §4.2).
///
/// Resolved once, concretely, at `IOManager::start` — the acquisition
/// worker holds a `Box<dyn ControllerDriver>` and never matches on driver
/// kind again after construction.
#[async_trait]
pub trait ControllerDriver: Send + Sync {
    /// Sample the instrument's process values in one batched transaction.
    async fn get_process_values(&self) -> EurothermResult<Reading>;

    /// Enable or disable the instrument's remote (communications) setpoint
    /// selector.
    async fn select_remote_setpoint(&self, state: RemoteSetpointState) -> EurothermResult<()>;

    /// Write a new remote setpoint value.
    async fn write_remote_setpoint(&self, value: Quantity) -> EurothermResult<()>;

    /// Acknowledge all active alarms on the instrument.
    async fn acknowledge_all_alarms(&self) -> EurothermResult<()>;

    /// Read the instrument status bitmap in isolation (used by tests and
    /// diagnostics; `get_process_values` already folds this in).
    async fn read_status(&self) -> EurothermResult<InstrumentStatus>;
}
