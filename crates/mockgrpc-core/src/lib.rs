//! Shared plumbing for the mockgrpc test helpers: the error taxonomy, the
//! mock listener configuration and tracing setup.

pub mod config;
pub mod error;
pub mod tracing;

pub use config::{DEFAULT_SCOPE_TIMEOUT, ListenAddr, MockServerConfig};
pub use error::FixtureError;
