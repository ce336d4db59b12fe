//! In-process simulator implementing the [`ControllerDriver`] contract
//! without any serial hardware.

use crate::driver::{ControllerDriver, Reading};
use async_trait::async_trait;
use eurotherm_common::{EurothermResult, InstrumentStatus, Quantity, RemoteSetpointState};
use std::sync::Mutex;
use tokio::time::Instant;

/// Type-K thermocouple interpolation table, `(degC, mV)`, lifted from the
/// original simulator's `type_k_data` — non-uniform above 1200 °C.
const TYPE_K_TABLE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (100.0, 4.096),
    (200.0, 8.138),
    (300.0, 12.209),
    (400.0, 16.397),
    (500.0, 20.644),
    (600.0, 24.905),
    (700.0, 29.129),
    (800.0, 33.275),
    (900.0, 37.326),
    (1000.0, 41.276),
    (1100.0, 45.119),
    (1200.0, 48.838),
    (1250.0, 50.644),
    (1300.0, 52.410),
];

/// Time constant of the first-order relaxation toward the working
/// setpoint. Smaller is faster; chosen so a step change visibly moves
/// within a handful of 1 Hz-ish polls without completing in a single one.
const TIME_CONSTANT_SECONDS: f64 = 5.0;

struct State {
    process_value: Quantity,
    local_setpoint: Quantity,
    remote_setpoint: Quantity,
    remote_select: bool,
    last_update: Instant,
}

/// Deterministic-looking simulator: the internal temperature relaxes
/// toward whichever setpoint the instrument is honouring (local or
/// remote), status is always `Ok`, working output is always 0%.
pub struct SimDriver {
    state: Mutex<State>,
}

impl SimDriver {
    /// Construct a simulator starting at 20 °C with the local and remote
    /// setpoints both equal to the starting process value.
    pub fn new() -> Self {
        let start = Quantity::celsius(20.0);
        Self {
            state: Mutex::new(State {
                process_value: start,
                local_setpoint: start,
                remote_setpoint: start,
                remote_select: false,
                last_update: Instant::now(),
            }),
        }
    }

    /// Thermocouple voltage in millivolts for the current process value,
    /// via linear interpolation over [`TYPE_K_TABLE`]. Not part of the
    /// [`ControllerDriver`] contract (no `ProcessValues` field carries a
    /// measured mV reading) — exposed for diagnostics and tests.
    pub fn thermocouple_voltage_mv(&self) -> f64 {
        let degc = self.state.lock().expect("simulator state mutex poisoned").process_value.as_celsius();
        interpolate_type_k(degc)
    }

    fn advance(state: &mut State) {
        let now = Instant::now();
        let dt = now.duration_since(state.last_update).as_secs_f64();
        state.last_update = now;
        if dt <= 0.0 {
            return;
        }
        let target = if state.remote_select {
            state.remote_setpoint
        } else {
            state.local_setpoint
        };
        let current = state.process_value.as_kelvin();
        let target_k = target.as_kelvin();
        let alpha = 1.0 - (-dt / TIME_CONSTANT_SECONDS).exp();
        state.process_value = Quantity::kelvin(current + (target_k - current) * alpha);
    }

    fn working_setpoint(state: &State) -> Quantity {
        if state.remote_select {
            state.remote_setpoint
        } else {
            state.local_setpoint
        }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn interpolate_type_k(degc: f64) -> f64 {
    if degc <= TYPE_K_TABLE[0].0 {
        return TYPE_K_TABLE[0].1;
    }
    let last = TYPE_K_TABLE[TYPE_K_TABLE.len() - 1];
    if degc >= last.0 {
        return last.1;
    }
    for window in TYPE_K_TABLE.windows(2) {
        let (t0, v0) = window[0];
        let (t1, v1) = window[1];
        if degc >= t0 && degc <= t1 {
            let frac = (degc - t0) / (t1 - t0);
            return v0 + (v1 - v0) * frac;
        }
    }
    unreachable!("table covers the full 0..=1300 range")
}

#[async_trait]
impl ControllerDriver for SimDriver {
    async fn get_process_values(&self) -> EurothermResult<Reading> {
        let mut state = self.state.lock().expect("simulator state mutex poisoned");
        Self::advance(&mut state);
        Ok(Reading {
            process_value: state.process_value,
            setpoint: state.local_setpoint,
            working_setpoint: Self::working_setpoint(&state),
            working_output: Quantity::percent(0.0),
            status: InstrumentStatus::NONE.with_remote_select(state.remote_select),
        })
    }

    async fn select_remote_setpoint(&self, state: RemoteSetpointState) -> EurothermResult<()> {
        self.state.lock().expect("simulator state mutex poisoned").remote_select = matches!(state, RemoteSetpointState::Enabled);
        Ok(())
    }

    async fn write_remote_setpoint(&self, value: Quantity) -> EurothermResult<()> {
        self.state.lock().expect("simulator state mutex poisoned").remote_setpoint = value;
        Ok(())
    }

    async fn acknowledge_all_alarms(&self) -> EurothermResult<()> {
        // No alarm state is ever modelled; a no-op that updates nothing,
        // per spec.md §4.8.
        Ok(())
    }

    async fn read_status(&self) -> EurothermResult<InstrumentStatus> {
        let state = self.state.lock().expect("simulator state mutex poisoned");
        Ok(InstrumentStatus::NONE.with_remote_select(state.remote_select))
    }
}
