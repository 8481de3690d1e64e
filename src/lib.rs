//! An MCP server that multiplexes many client sessions over plain HTTP.
//!
//! The crate is split into the wire types ([`types`], [`protocol`]), the
//! session-lifecycle core ([`server`]) and a set of example domain handlers
//! ([`handlers`]) that the binary registers at startup.

pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod types;

pub use error::{Error, Result};
