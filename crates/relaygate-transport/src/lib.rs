//! Transport adapters for the messaging platform client.
//!
//! The gateway core only knows the `TransportAdapter` contract. This crate
//! provides the production implementation, which drives a headless client
//! running in a separate automation sidecar.

pub mod protocol;
pub mod sidecar;

pub use sidecar::{SidecarTransport, SidecarTransportFactory};
