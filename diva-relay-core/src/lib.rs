//! Core runtime for diva-relay
//!
//! Provides the message bus, per-chat turn serialization, the scheduler,
//! the heartbeat and durable routing state shared by the channel adapters.

pub mod bus;
pub mod channel;
pub mod config;
pub mod cron;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod state;
pub mod turn;
pub mod utils;

#[cfg(test)]
mod testing;

pub use channel::{Channel, ChannelError, ChannelPtr, Result as ChannelResult};
pub use error::{Error, Result};
