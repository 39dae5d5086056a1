//! catsd — the CATS protocol server engine, as a library.
//!
//! Split out from the binary so integration tests can drive a real
//! [`server::Server`] in-process instead of shelling out to a subprocess:
//! the protocol is a single long-lived TCP connection, not a multi-host
//! REST deployment, so both ends fit comfortably in one Tokio runtime.

pub mod action;
pub mod channel;
pub mod connection;
pub mod dispatch;
pub mod handlers;
pub mod identity;
pub mod init;
pub mod middleware;
pub mod runtime;
pub mod server;
