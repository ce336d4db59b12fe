//! Acquisition, ramp scheduling, fan-out and device lifecycle management
//! for the Eurotherm supervisory service.
//!
//! This crate provides:
//! - [`fanout`] — [`FanOut`], the multi-subscriber, producer-never-blocks
//!   broadcast of [`eurotherm_common::ProcessValues`] records.
//! - [`ramp`] — [`RampScheduler`], the preemptable linear-ramp state
//!   machine driving a worker's remote setpoint.
//! - [`worker`] — [`AcquisitionWorker`], one per-device polling task.
//! - [`io_manager`] — [`IoManager`], the process-wide lifecycle and
//!   command-routing owner of every worker.

pub mod fanout;
pub mod io_manager;
pub mod ramp;
pub mod worker;

pub use fanout::FanOut;
pub use io_manager::IoManager;
pub use ramp::RampHandle;
pub use worker::{AcquisitionWorker, WorkerHandle};
