//! Message bus for decoupled communication
//!
//! Every producer (channel adapters, the scheduler, the heartbeat) publishes
//! inbound messages here; replies leave through the routing table of
//! registered adapters.

pub mod events;
pub mod queue;
pub mod router;

pub use events::{meta, InboundMessage, OutboundMessage, TempFiles, SYSTEM_CHANNEL};
pub use queue::MessageBus;
pub use router::ChannelRouter;
