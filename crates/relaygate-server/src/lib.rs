//! HTTP API and real-time WebSocket channel of the gateway.
//!
//! - `/api/*` routes drive the session registry and outbound dispatcher.
//! - `/ws` lets observers join session rooms and receive their events.
//! - `/health` and `/metrics` for operators.

pub mod client;
pub mod handlers;
pub mod server;
pub mod wire;

pub use client::ClientRegistry;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
