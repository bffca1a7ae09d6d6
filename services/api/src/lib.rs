//! Cadence API Library Crate
//!
//! Exposes conversations over WebSockets: configuration, shared state, the
//! socket transport and routing. The `api` binary is a thin wrapper around
//! this library.

pub mod config;
pub mod router;
pub mod state;
pub mod ws;
