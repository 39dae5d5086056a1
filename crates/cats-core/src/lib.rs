//! cats-core — shared wire types, headers, statements, handshake, rate
//! limiting, and configuration. Every other CATS crate depends on this one.

pub mod cache;
pub mod config;
pub mod error;
pub mod handshake;
pub mod headers;
pub mod scheme;
pub mod statement;
pub mod utils;
pub mod wire;

pub use error::ConnectionError;
pub use headers::Headers;
pub use scheme::Scheme;
pub use statement::{ClientStatement, ServerStatement};
pub use utils::Delay;
