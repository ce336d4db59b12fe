//! `EurothermClient`: a thin `reqwest` + `tokio-tungstenite` client for the
//! [`crate::service`] surface.

use crate::wire::{ErrorBody, RampValueFrame, SetRemoteSetpointRequest, ToggleRemoteSetpointRequest};
use eurotherm_common::{EurothermError, EurothermResult, ProcessValues, Quantity, RemoteSetpointState};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// A client for the Eurotherm RPC surface at a given `http://host:port`
/// base URL.
#[derive(Clone)]
pub struct EurothermClient {
    http: reqwest::Client,
    base_url: String,
}

impl EurothermClient {
    /// Construct a client against `base_url` (e.g. `http://127.0.0.1:8080`,
    /// no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn ws_url(&self, path: &str) -> String {
        let ws_base = self
            .base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        format!("{ws_base}{path}")
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> EurothermResult<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        Self::into_body(response).await
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> EurothermResult<()> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        Self::into_body::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn post_empty(&self, path: &str) -> EurothermResult<()> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        Self::into_body::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> EurothermResult<()> {
        let response = self
            .http
            .delete(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        Self::into_body::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn into_body<T: DeserializeOwned>(response: reqwest::Response) -> EurothermResult<T> {
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(EurothermError::RpcFailed(format!("{status}: {message}")));
        }
        if bytes.is_empty() {
            return serde_json::from_str("null").map_err(|e| EurothermError::RpcFailed(e.to_string()));
        }
        serde_json::from_slice(&bytes).map_err(|e| EurothermError::RpcFailed(e.to_string()))
    }

    /// `GET /health`.
    pub async fn health_check(&self) -> EurothermResult<()> {
        self.get::<serde_json::Value>("/health").await.map(|_| ())
    }

    /// `POST /stop`.
    pub async fn stop_server(&self) -> EurothermResult<()> {
        self.post_empty("/stop").await
    }

    /// `GET /devices/:name/values`.
    pub async fn get_process_values(&self, device: &str) -> EurothermResult<ProcessValues> {
        self.get(&format!("/devices/{device}/values")).await
    }

    /// `POST /devices/:name/remote-setpoint/toggle`.
    pub async fn toggle_remote_setpoint(&self, device: &str, state: RemoteSetpointState) -> EurothermResult<()> {
        self.post(
            &format!("/devices/{device}/remote-setpoint/toggle"),
            &ToggleRemoteSetpointRequest { state },
        )
        .await
    }

    /// `POST /devices/:name/remote-setpoint`.
    pub async fn set_remote_setpoint(&self, device: &str, value: Quantity) -> EurothermResult<()> {
        self.post(
            &format!("/devices/{device}/remote-setpoint"),
            &SetRemoteSetpointRequest { value_k: value.as_kelvin() },
        )
        .await
    }

    /// `DELETE /devices/:name/ramp`.
    pub async fn stop_temperature_ramp(&self, device: &str) -> EurothermResult<()> {
        self.delete(&format!("/devices/{device}/ramp")).await
    }

    /// `POST /devices/:name/ack`. Pass `"*"` for every device.
    pub async fn acknowledge_all_alarms(&self, device: &str) -> EurothermResult<()> {
        self.post_empty(&format!("/devices/{device}/ack")).await
    }

    /// `GET /stream/values` (WS). Returns a stream the caller polls with
    /// [`ProcessValuesStream::next`].
    pub async fn stream_process_values(&self) -> EurothermResult<ProcessValuesStream> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.ws_url("/stream/values"))
            .await
            .map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        Ok(ProcessValuesStream { socket })
    }

    /// `GET /devices/:name/ramp/stream?target_k=..&rate_k_per_min=..` (WS).
    ///
    /// `StartTemperatureRamp` is one streaming RPC (spec.md §4.7): this
    /// single call both starts the ramp and opens its trajectory stream, so
    /// there is no gap between starting and subscribing in which the
    /// scheduler's first ticks could be lost.
    pub async fn start_temperature_ramp(&self, device: &str, target: Quantity, rate: Quantity) -> EurothermResult<RampValueStream> {
        let url = format!(
            "{}?target_k={}&rate_k_per_min={}",
            self.ws_url(&format!("/devices/{device}/ramp/stream")),
            target.as_kelvin(),
            rate.as_kelvin_per_minute(),
        );
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| EurothermError::RpcFailed(e.to_string()))?;
        Ok(RampValueStream { socket })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A connected `StreamProcessValues` subscription.
pub struct ProcessValuesStream {
    socket: WsStream,
}

impl ProcessValuesStream {
    /// Await the next record, or `None` once the server closes the stream.
    pub async fn next(&mut self) -> Option<EurothermResult<ProcessValues>> {
        loop {
            match self.socket.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(|e| EurothermError::RpcFailed(e.to_string())))
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(EurothermError::RpcFailed(e.to_string()))),
            }
        }
    }
}

/// A connected `StartTemperatureRamp` value subscription.
pub struct RampValueStream {
    socket: WsStream,
}

impl RampValueStream {
    /// Await the next ramp value, or `None` once the ramp stream completes.
    pub async fn next(&mut self) -> Option<EurothermResult<Quantity>> {
        loop {
            match self.socket.next().await? {
                Ok(WsMessage::Text(text)) => {
                    return Some(
                        serde_json::from_str::<RampValueFrame>(&text)
                            .map(|frame| Quantity::kelvin(frame.current_k))
                            .map_err(|e| EurothermError::RpcFailed(e.to_string())),
                    )
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(EurothermError::RpcFailed(e.to_string()))),
            }
        }
    }
}
