//! Shared vocabulary for the relaygate workspace: identifiers, session
//! lifecycle states, the events fanned out to observers, the error taxonomy
//! and the contract every transport adapter implements.

pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod state;
pub mod transport;

pub use errors::{GatewayError, TransportError};
pub use events::GatewayEvent;
pub use ids::{ClientId, SessionId};
pub use message::{InboundMessage, RawMessage};
pub use state::SessionState;
pub use transport::{DeliveryAck, TransportAdapter, TransportEvent, TransportFactory};
