//! cats-client — connects to a `catsd` peer and drives the CATS protocol
//! from the initiating side: bootstrap, request/response, broadcast
//! subscriptions, and server-initiated input questions.

pub mod action;
pub mod client;
pub mod connect;

pub use client::{connect as dial, CatsClient, Config, IncomingInput, Sha256TimeHandshake, Subscriber};
