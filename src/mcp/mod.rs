//! MCP server integration module.
//!
//! Wires the daemon's request handler into the MCP protocol using the rmcp
//! framework.

pub mod service;

pub use service::DaemonService;
