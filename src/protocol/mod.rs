//! MCP protocol implementation over JSON-RPC 2.0.

pub mod codec;
pub mod types;

pub use codec::{Decoded, DecodeError, classify, decode_frame, encode};
pub use types::*;
