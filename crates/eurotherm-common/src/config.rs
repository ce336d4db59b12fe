//! Static configuration schema: serial connection, per-device settings, and
//! the top-level server configuration loaded from YAML.

use crate::quantity::Quantity;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Which driver implementation an [`DeviceConfig`] should be acquired with.
///
/// `Model3208` is accepted for configuration-file compatibility with the
/// original deployment but is serviced by the same register map as
/// `Generic` — the original's `EurothermModel3208` never diverged from the
/// generic Modbus map it inherited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// In-process simulator, no serial hardware required.
    Simulate,
    /// Generic Eurotherm Modbus register map over RTU.
    Generic,
    /// Eurotherm 3208/3216 family; serviced identically to `Generic`.
    Model3208,
}

/// Serial port parameters shared by every device on the same bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPortConfig {
    /// OS device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Baud rate. The wire format is fixed at 8 data bits, no parity, one
    /// stop bit (8-N-1) per spec.md §6.
    pub baud_rate: u32,
}

/// Configuration for a single Eurotherm instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique, non-empty device name used to address this device over RPC
    /// and as the FanOut topic key.
    pub name: String,
    /// Modbus RTU unit (slave) address, 1..=247.
    pub unit_address: u8,
    /// Serial connection this device is reachable on.
    pub connection: SerialPortConfig,
    /// How often the acquisition worker polls this device. Must be a
    /// positive frequency.
    #[serde(deserialize_with = "deserialize_quantity")]
    pub sampling_rate: Quantity,
    /// Which [`ControllerDriver`](crate) implementation to construct.
    pub driver: DriverKind,
}

impl DeviceConfig {
    /// Poll interval implied by `sampling_rate`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sampling_rate.as_hertz())
    }
}

/// Server-side RPC listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the RPC listener binds to.
    pub ip: IpAddr,
    /// Port the RPC listener binds to.
    pub port: u16,
    /// Default unary-call timeout, applied via `tower::timeout::TimeoutLayer`.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Top-level configuration file schema.
///
/// Unknown top-level keys are rejected, matching spec.md §6's "unknown keys
/// at the top level are rejected".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// RPC listener settings.
    pub server: ServerConfig,
    /// Devices this instance acquires from.
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Validate cross-field invariants not expressible in the serde schema
    /// alone: non-empty, unique device names and positive sampling rates.
    pub fn validate(&self) -> Result<(), crate::EurothermError> {
        if self.devices.is_empty() {
            return Err(crate::EurothermError::Config(
                "at least one device must be configured".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(crate::EurothermError::Config(
                    "device name must not be empty".into(),
                ));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(crate::EurothermError::Config(format!(
                    "duplicate device name: {}",
                    device.name
                )));
            }
            if !(1..=247).contains(&device.unit_address) {
                return Err(crate::EurothermError::Config(format!(
                    "device {:?}: unit address must be in 1..=247",
                    device.name
                )));
            }
            if device.sampling_rate.as_hertz() <= 0.0 {
                return Err(crate::EurothermError::Config(format!(
                    "device {:?}: sampling_rate must be a positive frequency",
                    device.name
                )));
            }
        }
        Ok(())
    }
}

/// Serde support for parsing a [`Quantity`] from its `"<number><unit>"`
/// string form, for use with `#[serde(deserialize_with = "...")]` on fields
/// whose dimension isn't Temperature (the default `Quantity::deserialize`
/// assumes Temperature; frequencies need this explicit path instead).
pub fn deserialize_quantity<'de, D>(deserializer: D) -> Result<Quantity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Quantity::parse(&raw).map_err(serde::de::Error::custom)
}
