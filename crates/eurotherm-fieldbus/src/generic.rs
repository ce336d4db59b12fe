//! The Eurotherm "generic" Modbus register map, also used for `Model3208`
//! devices, which never diverge from the generic instrument's register
//! layout.

use crate::bus::SerialBus;
use crate::driver::{ControllerDriver, Reading};
use async_trait::async_trait;
use eurotherm_common::{EurothermError, EurothermResult, InstrumentStatus, Quantity, RemoteSetpointState};
use std::time::Duration;
use tracing::warn;

/// 1-based "Modicon" holding register addresses.
mod address {
    pub const PVIN: u16 = 1;
    pub const TGSP: u16 = 2;
    pub const WRKOP: u16 = 4;
    pub const WKGSP: u16 = 5;
    pub const RMSP: u16 = 26;
    pub const STAT: u16 = 75;
    pub const LR: u16 = 276;
    pub const AC_ALL: u16 = 274;
}

/// Number of attempts a single logical operation (which may span several
/// bus transactions) is retried before propagating `BusError`.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Generic Eurotherm controller driver talking to one unit address over a
/// shared [`SerialBus`].
pub struct GenericDriver {
    unit_address: u8,
    bus: SerialBus,
}

impl GenericDriver {
    /// Construct a driver for `unit_address` on `bus`.
    pub fn new(unit_address: u8, bus: SerialBus) -> Self {
        Self { unit_address, bus }
    }

    /// The vendor's float-register indirection: two consecutive holding
    /// registers hold one IEEE-754 single, addressed via
    /// `0x8000 + 2*addr`.
    fn float_address(register: u16) -> u16 {
        0x8000 + 2 * register
    }

    async fn read_holding_retried(&self, register: u16, count: u16) -> EurothermResult<Vec<u16>> {
        retry(|| self.bus.read_holding(self.unit_address, register, count)).await
    }

    async fn write_holding_retried(&self, register: u16, value: u16) -> EurothermResult<()> {
        retry(|| self.bus.write_holding(self.unit_address, register, value)).await
    }

    /// Read `count` consecutive IEEE-754 floats starting at `register`
    /// (1-based), unpacking each pair of registers low-word-first:
    /// `bytes = pack(reg[k+1]) ++ pack(reg[k])`.
    async fn read_floats(&self, register: u16, count: u16) -> EurothermResult<Vec<f32>> {
        let registers = self
            .read_holding_retried(Self::float_address(register), 2 * count)
            .await?;
        Ok(registers
            .chunks_exact(2)
            .map(|pair| {
                let mut bytes = [0u8; 4];
                bytes[0..2].copy_from_slice(&pair[1].to_be_bytes());
                bytes[2..4].copy_from_slice(&pair[0].to_be_bytes());
                f32::from_be_bytes(bytes)
            })
            .collect())
    }

    async fn read_stat_and_lr(&self) -> EurothermResult<InstrumentStatus> {
        let stat = self.read_holding_retried(address::STAT, 1).await?[0];
        let lr = self.read_holding_retried(address::LR, 1).await?[0];
        Ok(InstrumentStatus::from_stat_register(stat).with_remote_select(lr != 0))
    }
}

#[async_trait]
impl ControllerDriver for GenericDriver {
    async fn get_process_values(&self) -> EurothermResult<Reading> {
        // Batched read of PVIN..WKGSP (5 consecutive floats) in one
        // transaction, then STAT and LR. Timestamp is taken by the caller
        // at completion of this call.
        let floats = self.read_floats(address::PVIN, 5).await?;
        let status = self.read_stat_and_lr().await?;

        // floats[0..5] correspond to registers PVIN, TGSP, (unused), WRKOP, WKGSP.
        Ok(Reading {
            process_value: Quantity::celsius(floats[0] as f64),
            setpoint: Quantity::celsius(floats[1] as f64),
            working_output: Quantity::percent(floats[3] as f64),
            working_setpoint: Quantity::celsius(floats[4] as f64),
            status,
        })
    }

    async fn select_remote_setpoint(&self, state: RemoteSetpointState) -> EurothermResult<()> {
        let value = match state {
            RemoteSetpointState::Enabled => 1,
            RemoteSetpointState::Disabled => 0,
        };
        self.write_holding_retried(address::LR, value).await
    }

    async fn write_remote_setpoint(&self, value: Quantity) -> EurothermResult<()> {
        // RmSP is a 16-bit integer-degC register even though ramps advance
        // in fractional Kelvin. A future driver variant for instruments
        // with a float remote setpoint register should bypass this rounding.
        let degc = value.as_celsius();
        let rounded = round_half_away_from_zero(degc);
        if rounded < 0.0 || rounded > u16::MAX as f64 {
            return Err(EurothermError::OutOfRange(format!(
                "remote setpoint {degc:.2} degC out of u16 range"
            )));
        }
        self.write_holding_retried(address::RMSP, rounded as u16).await
    }

    async fn acknowledge_all_alarms(&self) -> EurothermResult<()> {
        self.write_holding_retried(address::AC_ALL, 1).await
    }

    async fn read_status(&self) -> EurothermResult<InstrumentStatus> {
        self.read_stat_and_lr().await
    }
}

/// Round half away from zero, i.e. ties round outward rather than to even.
fn round_half_away_from_zero(value: f64) -> f64 {
    if value >= 0.0 {
        (value + 0.5).floor()
    } else {
        (value - 0.5).ceil()
    }
}

/// Retry `op` up to [`MAX_ATTEMPTS`] times with a short delay between
/// attempts, logging each failed attempt at warn; the final failure
/// propagates.
async fn retry<F, Fut, T>(mut op: F) -> EurothermResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = EurothermResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS => {
                warn!(attempt, %err, "modbus transaction failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}
