//! Wire protocol, HTTP/WebSocket control-plane service, and client for the
//! Eurotherm supervisory service.
//!
//! This crate provides:
//! - [`wire`] — request/response DTOs for the nine RPC operations.
//! - [`service`] — [`service::build_router`], the `axum` router implementing
//!   them against a running [`eurotherm_runtime::IoManager`].
//! - [`client`] — [`client::EurothermClient`], a `reqwest` + `tokio-tungstenite`
//!   client consuming the same surface.

pub mod client;
pub mod service;
pub mod wire;

pub use client::EurothermClient;
pub use service::{build_router, AppState};
