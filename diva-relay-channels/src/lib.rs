//! Chat platform adapters for diva-relay
//!
//! Each adapter implements [`diva_relay_core::Channel`]; the
//! [`ChannelManager`] builds them from config and registers them on the bus.

pub mod base;
pub mod common;
pub mod line;
pub mod manager;

#[cfg(test)]
mod test_support;

pub use base::BaseChannel;
pub use line::{verify_signature, LineHandler};
pub use manager::ChannelManager;
