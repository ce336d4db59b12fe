//! The HTTP/WebSocket control-plane surface exposing the nine supervisory
//! operations: health, start/stop, current and streamed process values,
//! remote setpoint control, ramp start/stop/stream, and alarm
//! acknowledgement.

use crate::wire::{ErrorBody, HealthResponse, RampValueFrame, SetRemoteSetpointRequest, StartRampRequest, ToggleRemoteSetpointRequest};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use eurotherm_common::{EurothermError, Quantity, RampState};
use eurotherm_runtime::IoManager;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared state handed to every handler: the device lifecycle manager and a
/// notifier that `POST /stop` signals to unwind the server's accept loop.
#[derive(Clone)]
pub struct AppState {
    io: Arc<IoManager>,
    shutdown: Arc<Notify>,
}

impl AppState {
    /// Build app state around an already-started [`IoManager`].
    pub fn new(io: Arc<IoManager>) -> Self {
        Self {
            io,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Resolves once `POST /stop` has been handled. `main` awaits this
    /// alongside `axum::serve`'s `with_graceful_shutdown`.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}

/// Thin wrapper translating [`EurothermError`] into HTTP status codes:
/// `UnknownDevice` -> 400, `Bus` -> 503, `AlreadyRunning`/`NotRunning` ->
/// 409, everything else -> 400/502.
struct ApiError(EurothermError);

impl From<EurothermError> for ApiError {
    fn from(err: EurothermError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EurothermError::UnknownDevice(_) => StatusCode::BAD_REQUEST,
            EurothermError::BadUnit(_) | EurothermError::Config(_) | EurothermError::OutOfRange(_) => {
                StatusCode::BAD_REQUEST
            }
            EurothermError::Bus(_) => StatusCode::SERVICE_UNAVAILABLE,
            EurothermError::RpcFailed(_) => StatusCode::BAD_GATEWAY,
            EurothermError::AlreadyRunning | EurothermError::NotRunning => StatusCode::CONFLICT,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

/// Build the full router: unary routes behind a [`tower::timeout::TimeoutLayer`]
/// from `unary_timeout`, streaming routes with none.
pub fn build_router(state: AppState, unary_timeout: Duration) -> Router {
    let unary = Router::new()
        .route("/health", get(health))
        .route("/stop", post(stop))
        .route("/devices/:name/values", get(get_process_values))
        .route("/devices/:name/remote-setpoint/toggle", post(toggle_remote_setpoint))
        .route("/devices/:name/remote-setpoint", post(set_remote_setpoint))
        .route("/devices/:name/ramp", axum::routing::delete(stop_ramp))
        .route("/devices/:name/ack", post(acknowledge_all_alarms))
        .layer(ServiceBuilder::new().layer(tower::timeout::TimeoutLayer::new(unary_timeout)));

    let streaming = Router::new()
        .route("/stream/values", get(stream_process_values))
        .route("/devices/:name/ramp/stream", get(start_and_stream_ramp_values));

    Router::new()
        .merge(unary)
        .merge(streaming)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stop(State(state): State<AppState>) -> StatusCode {
    info!("stop requested over RPC");
    state.io.stop().await;
    state.shutdown.notify_one();
    StatusCode::OK
}

async fn get_process_values(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<eurotherm_common::ProcessValues>, ApiError> {
    if !state.io.contains(&name).await {
        return Err(EurothermError::UnknownDevice(name).into());
    }
    let mut sub = state.io.subscribe().await?;
    loop {
        match sub.next().await {
            eurotherm_runtime::fanout::Next::Value(record) if record.device == name => {
                return Ok(Json(record));
            }
            eurotherm_runtime::fanout::Next::Value(_) => continue,
            eurotherm_runtime::fanout::Next::Closed => {
                return Err(EurothermError::NotRunning.into());
            }
        }
    }
}

async fn stream_process_values(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_process_values_stream(socket, state))
}

async fn handle_process_values_stream(socket: WebSocket, state: AppState) {
    let mut sub = match state.io.subscribe().await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(%err, "rejecting process-values stream: IOManager not running");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    info!("process-values stream connected");

    loop {
        tokio::select! {
            next = sub.next() => match next {
                eurotherm_runtime::fanout::Next::Value(record) => {
                    let Ok(json) = serde_json::to_string(&record) else { continue };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                eurotherm_runtime::fanout::Next::Closed => break,
            },
            // Drain client frames only to notice a close; this stream
            // never accepts client commands.
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                _ => continue,
            },
        }
    }
    debug!("process-values stream disconnected");
}

async fn toggle_remote_setpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ToggleRemoteSetpointRequest>,
) -> Result<StatusCode, ApiError> {
    state.io.toggle_remote_setpoint(&name, body.state).await?;
    Ok(StatusCode::OK)
}

async fn set_remote_setpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetRemoteSetpointRequest>,
) -> Result<StatusCode, ApiError> {
    state.io.set_remote_setpoint(&name, Quantity::kelvin(body.value_k)).await?;
    Ok(StatusCode::OK)
}

async fn stop_ramp(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    state.io.stop_ramp(&name).await?;
    Ok(StatusCode::OK)
}

async fn acknowledge_all_alarms(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    state.io.acknowledge_all_alarms(&name).await?;
    Ok(StatusCode::OK)
}

/// `GET /devices/:name/ramp/stream?target_k=..&rate_k_per_min=..`.
///
/// `StartTemperatureRamp` is one streaming RPC (spec.md §4.7): this starts
/// the ramp and takes the subscription to its trajectory in the same
/// `IoManager::start_ramp` call, so there is no gap between "ramp started"
/// and "subscribed" in which the scheduler's first ticks could be missed.
async fn start_and_stream_ramp_values(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<StartRampRequest>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ramp_stream(socket, state, name, params))
}

async fn handle_ramp_stream(socket: WebSocket, state: AppState, name: String, params: StartRampRequest) {
    let mut rx = match state
        .io
        .start_ramp(
            &name,
            Quantity::kelvin(params.target_k),
            Quantity::kelvin_per_minute(params.rate_k_per_min),
        )
        .await
    {
        Ok(rx) => rx,
        Err(err) => {
            warn!(device = %name, %err, "rejecting ramp stream: could not start ramp");
            return;
        }
    };

    let (mut sender, _receiver) = socket.split();
    info!(device = %name, "ramp stream connected");

    loop {
        match rx.recv().await {
            Ok(value) => {
                let frame = RampValueFrame { current_k: value.as_kelvin() };
                let Ok(json) = serde_json::to_string(&frame) else { continue };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
                match state.io.ramp_state(&name).await {
                    Ok(RampState::Ramping) => continue,
                    _ => break,
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(device = %name, dropped = n, "ramp stream lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(device = %name, "ramp stream disconnected");
}
