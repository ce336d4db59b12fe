//! Instrument status bitmap, ramp state and remote-setpoint selector.
//!
//! Bit assignments are taken from the STAT register mapping used by the
//! original Python `GenericEurothermController.status` property; the ramp
//! states mirror the `TemperatureRampState` enum of the original gRPC
//! service definition.

use serde::{Deserialize, Deserializer, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Instrument status bits, decoded from the controller's STAT register
/// plus the LR (local/remote setpoint select) register.
///
/// A small hand-rolled bitset rather than a `bitflags!` dependency: twelve
/// flags and a handful of combinators is not enough surface to justify the
/// crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrumentStatus(u16);

impl InstrumentStatus {
    /// Alarm 1 active.
    pub const ALARM_1: Self = Self(0x0001);
    /// Alarm 2 active.
    pub const ALARM_2: Self = Self(0x0002);
    /// Alarm 3 active.
    pub const ALARM_3: Self = Self(0x0004);
    /// Alarm 4 active.
    pub const ALARM_4: Self = Self(0x0008);
    /// Sensor break (open thermocouple) detected.
    pub const SENSOR_BREAK: Self = Self(0x0020);
    /// Control loop break detected.
    pub const LOOP_BREAK: Self = Self(0x0040);
    /// Heater failure detected.
    pub const HEATER_FAIL: Self = Self(0x0080);
    /// Load failure detected.
    pub const LOAD_FAIL: Self = Self(0x0100);
    /// A program run has reached its end.
    pub const PROGRAM_END: Self = Self(0x0200);
    /// The process value is outside the instrument's configured range.
    pub const PV_OUT_OF_RANGE: Self = Self(0x0400);
    /// A new alarm has occurred since the last acknowledgement.
    pub const NEW_ALARM: Self = Self(0x1000);
    /// A timed ramp/program is currently running on the instrument.
    pub const TIMER_RAMP_RUNNING: Self = Self(0x2000);
    /// The remote (communications) setpoint has failed.
    pub const REMOTE_SP_FAIL: Self = Self(0x4000);
    /// Remote (communications) setpoint selection is currently active.
    ///
    /// This bit does not come from STAT; it is synthesized from the LR
    /// register by [`InstrumentStatus::with_remote_select`].
    pub const LOCAL_REMOTE_SP_SELECT: Self = Self(0x8000);

    /// No flags set.
    pub const NONE: Self = Self(0);

    const STAT_MASK: u16 = 0x0001
        | 0x0002
        | 0x0004
        | 0x0008
        | 0x0020
        | 0x0040
        | 0x0080
        | 0x0100
        | 0x0200
        | 0x0400
        | 0x1000
        | 0x2000
        | 0x4000;

    const FAULT_MASK: u16 = 0x0001
        | 0x0002
        | 0x0004
        | 0x0008
        | 0x0020
        | 0x0040
        | 0x0080
        | 0x0100
        | 0x0400
        | 0x4000;

    /// Decode the raw 16-bit STAT register value into status flags,
    /// excluding [`InstrumentStatus::LOCAL_REMOTE_SP_SELECT`] which has no
    /// corresponding STAT bit.
    pub fn from_stat_register(bits: u16) -> Self {
        Self(bits & Self::STAT_MASK)
    }

    /// Fold in the LR (local/remote setpoint select) register reading.
    pub fn with_remote_select(mut self, lr_register_nonzero: bool) -> Self {
        if lr_register_nonzero {
            self.0 |= Self::LOCAL_REMOTE_SP_SELECT.0;
        } else {
            self.0 &= !Self::LOCAL_REMOTE_SP_SELECT.0;
        }
        self
    }

    /// True if `other`'s bits are a subset of this value's bits.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any of `other`'s bits are set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if no alarm, failure or out-of-range condition is set. This is
    /// derived on every read rather than stored, since it is simply the
    /// absence of the fault-indicating bits.
    pub fn is_ok(self) -> bool {
        self.0 & Self::FAULT_MASK == 0
    }

    /// Raw bit representation, for wire encoding.
    pub fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for InstrumentStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for InstrumentStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Serialize for InstrumentStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for InstrumentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(u16::deserialize(deserializer)?))
    }
}

/// Lifecycle of a device-initiated temperature ramp, mirroring the original
/// service's `TemperatureRampState` protobuf enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampState {
    /// No ramp is in progress.
    NoRamp,
    /// A ramp is actively moving the working setpoint toward its target.
    Ramping,
    /// Reserved for a future dwell/soak phase; never emitted by
    /// [`crate::RampScheduler`] in this workspace.
    Holding,
    /// The ramp was cancelled before reaching its target.
    Stopped,
    /// The ramp reached its target and completed normally.
    Finished,
}

/// Selects whether a controller obeys its local setpoint or the
/// communications (remote) setpoint register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSetpointState {
    /// Remote (communications) setpoint is not in effect.
    Disabled,
    /// Remote (communications) setpoint is in effect.
    Enabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_stat_bits() {
        let status = InstrumentStatus::from_stat_register(0x0001 | 0x0020 | 0x2000);
        assert!(status.contains(InstrumentStatus::ALARM_1));
        assert!(status.contains(InstrumentStatus::SENSOR_BREAK));
        assert!(status.contains(InstrumentStatus::TIMER_RAMP_RUNNING));
        assert!(!status.contains(InstrumentStatus::ALARM_2));
    }

    #[test]
    fn is_ok_ignores_informational_bits() {
        let status = InstrumentStatus::from_stat_register(0x2000).with_remote_select(true);
        assert!(status.is_ok());
    }

    #[test]
    fn is_ok_false_when_alarm_set() {
        let status = InstrumentStatus::from_stat_register(0x0004);
        assert!(!status.is_ok());
    }

    #[test]
    fn remote_select_does_not_come_from_stat_mask() {
        let status = InstrumentStatus::from_stat_register(0xffff);
        assert!(!status.contains(InstrumentStatus::LOCAL_REMOTE_SP_SELECT));
    }
}
