//! A single sample of the instrument's read-side process data.

use crate::quantity::Quantity;
use crate::status::{InstrumentStatus, RampState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped acquisition of a device's process values, as published
/// on the [`crate::FanOut`] feed and reported by the RPC layer.
///
/// Mirrors the original `ProcessValues` dataclass, with an added
/// `ramp_state` column since the original's `rampStatus` lived on the wire
/// message rather than on the controller-level dataclass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessValues {
    /// Name of the device this sample belongs to.
    pub device: String,
    /// Wall-clock time the sample was acquired.
    pub timestamp: DateTime<Utc>,
    /// Measured process value (current temperature).
    pub process_value: Quantity,
    /// Target setpoint currently configured on the instrument.
    pub setpoint: Quantity,
    /// Working setpoint: the instrument's live setpoint while ramping or
    /// under remote control, equal to `setpoint` otherwise.
    pub working_setpoint: Quantity,
    /// Last remote setpoint value *this* core sent (or is about to send) to
    /// the instrument; overlaid onto the driver's [`Reading`](crate) by the
    /// acquisition worker, since the driver itself has no notion of it.
    pub remote_setpoint: Quantity,
    /// Working output power level.
    #[serde(deserialize_with = "crate::quantity::deserialize_as_percent")]
    pub working_output: Quantity,
    /// Decoded instrument status bits.
    pub status: InstrumentStatus,
    /// State of any supervisor-driven ramp for this device.
    pub ramp_state: RampState,
}

impl ProcessValues {
    /// True if the instrument reports no fault condition. Equivalent to
    /// `self.status.is_ok()`, exposed here since it is the field most often
    /// inspected by RPC clients.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_ok_delegates_to_status() {
        let values = ProcessValues {
            device: "tc1".into(),
            timestamp: DateTime::<Utc>::MIN_UTC,
            process_value: Quantity::celsius(20.0),
            setpoint: Quantity::celsius(20.0),
            working_setpoint: Quantity::celsius(20.0),
            remote_setpoint: Quantity::celsius(20.0),
            working_output: Quantity::percent(0.0),
            status: InstrumentStatus::from_stat_register(0x0001),
            ramp_state: RampState::NoRamp,
        };
        assert!(!values.is_ok());
    }

    #[test]
    fn working_output_round_trips_through_json_as_a_percentage() {
        let values = ProcessValues {
            device: "tc1".into(),
            timestamp: DateTime::<Utc>::MIN_UTC,
            process_value: Quantity::celsius(20.0),
            setpoint: Quantity::celsius(20.0),
            working_setpoint: Quantity::celsius(20.0),
            remote_setpoint: Quantity::celsius(20.0),
            working_output: Quantity::percent(37.5),
            status: InstrumentStatus::from_stat_register(0),
            ramp_state: RampState::NoRamp,
        };

        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(json["working_output"].as_f64().unwrap(), 37.5);

        let round_tripped: ProcessValues = serde_json::from_value(json).unwrap();
        assert!((round_tripped.working_output.as_percent() - 37.5).abs() < 1e-9);
    }
}
