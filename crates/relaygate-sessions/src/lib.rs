//! Session lifecycle, event relay and outbound dispatch.
//!
//! - [`SessionRegistry`] owns every live session, creating them single-flight.
//! - Each [`Session`] is driven by one actor task through the
//!   INIT → AWAITING_SCAN → READY → DISCONNECTED → CLOSED machine.
//! - [`EventRelay`] filters inbound messages, fans events out through the
//!   [`ObserverHub`] and notifies the backend webhook.
//! - [`OutboundDispatcher`] sends through READY sessions only.

pub mod dispatcher;
pub mod filter;
pub mod hub;
pub mod machine;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod registry;
pub mod relay;
pub mod session;
pub mod webhook;

pub use dispatcher::{normalize_recipient, OutboundDispatcher};
pub use hub::{ObserverHub, Snapshot, Subscription};
pub use registry::{SessionRegistry, SessionSummary};
pub use relay::EventRelay;
pub use session::{Session, SessionPolicy};
pub use webhook::{WebhookClient, WebhookConfig, WebhookError};
