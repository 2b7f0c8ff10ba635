//! editor-bridge - routes tool calls from an agent to running editor instances
//!
//! This crate provides:
//! - Coercion of loosely-typed agent arguments into canonical command envelopes
//! - Per-session routing across several connected editor instances
//! - A retrying transport that never repeats a side-effecting command blindly
//! - Tool wrappers and a CLI hosting them

pub mod cli;
pub mod coerce;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod instance;
pub mod paths;
pub mod payload;
pub mod response;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{BridgeError, BridgeResult};
