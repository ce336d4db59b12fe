//! Shared-bus Modbus RTU transport and per-device controller drivers.
//!
//! This crate provides:
//! - [`bus`] — [`SerialBus`], the mutually-exclusive, serialised handle onto
//!   one physical serial port, and the process-wide registry that hands out
//!   one bus per port name.
//! - [`driver`] — the [`ControllerDriver`] trait every device driver
//!   implements, resolved once at `IOManager::start` and stored concretely
//!   in the worker that owns it.
//! - [`generic`] — [`GenericDriver`], the Eurotherm "generic" Modbus
//!   register map (also serviced by `Model3208` devices).
//! - [`simulator`] — [`SimDriver`], an in-process stand-in requiring no
//!   serial hardware.

pub mod bus;
pub mod driver;
pub mod generic;
pub mod simulator;

pub use bus::SerialBus;
pub use driver::{ControllerDriver, Reading};
pub use generic::GenericDriver;
pub use simulator::SimDriver;
