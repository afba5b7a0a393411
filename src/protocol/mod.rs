//! Wire protocol with the hosting service.
//!
//! ```text
//! message.rs   outbound envelope, inbound decoding
//! connector.rs handshake, session check, dispatch loop, writer task
//! ```

pub mod connector;
pub mod message;

pub use connector::{AuthState, CommandHandler, Connector, Context, Flow, Outbox, PROTOCOL_CLI};
pub use message::{Inbound, Incoming, Outbound, Status};
