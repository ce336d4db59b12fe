//! Request/response bodies for [`crate::service`] and [`crate::client`].
//!
//! `ProcessValues` and the status/ramp-state enums already serialise in the
//! wire shape the control plane needs (Kelvin, K/min, snake_case enums) —
//! see [`eurotherm_common::quantity::Quantity`]'s `Serialize` impl — so this
//! module only adds the small request bodies and the ramp-stream frame that
//! have no existing domain type.

use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`; the handler only returns once the process is able to
    /// answer requests at all.
    pub status: &'static str,
}

/// Body of `POST /devices/:name/remote-setpoint/toggle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToggleRemoteSetpointRequest {
    /// Desired selector state.
    pub state: eurotherm_common::RemoteSetpointState,
}

/// Body of `POST /devices/:name/remote-setpoint`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SetRemoteSetpointRequest {
    /// New remote setpoint, in Kelvin.
    pub value_k: f64,
}

/// Query parameters of `GET /devices/:name/ramp/stream`.
///
/// `StartTemperatureRamp` is a single server-streaming RPC in spec.md §4.7
/// (start the ramp, then stream its trajectory); since the WS upgrade is a
/// GET with no body, the start parameters travel as a query string rather
/// than a JSON POST body, and the handler starts the ramp and subscribes to
/// it in the same call — no separate unary "start" step, so there is no
/// window between starting and subscribing in which early ticks could be
/// missed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartRampRequest {
    /// Ramp target, in Kelvin.
    pub target_k: f64,
    /// Ramp rate, in Kelvin per minute. Sign is ignored; direction is
    /// derived from `target_k` relative to the device's current value.
    pub rate_k_per_min: f64,
}

/// One frame of `GET /devices/:name/ramp/stream`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RampValueFrame {
    /// Current ramp value, in Kelvin.
    pub current_k: f64,
}

/// JSON error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error description (the `Display` of the
    /// underlying [`eurotherm_common::EurothermError`]).
    pub error: String,
}
