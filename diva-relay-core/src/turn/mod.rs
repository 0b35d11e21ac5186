//! Turn execution: result shape and per-chat serialization

pub mod result;
pub mod serializer;

pub use result::{is_silent_reply, TurnResult, SILENT_SENTINEL};
pub use serializer::{TurnHandler, TurnSerializer, TurnSettings};
