//! MCP Protocol Types
//!
//! The subset of the MCP 2025-06-18 schema a tools-only server speaks:
//!
//! - `jsonrpc` - JSON-RPC 2.0 framing
//! - `error` - error object and standard codes
//! - `protocol` - initialize handshake and capabilities
//! - `tool` - tool definitions and call results
//! - `content` - content blocks carried in tool results
//! - `progress` - progress notifications for long-running calls

pub mod content;
pub mod error;
pub mod jsonrpc;
pub mod progress;
pub mod protocol;
pub mod tool;
