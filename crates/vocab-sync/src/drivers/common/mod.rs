//! Utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections

pub mod tls;

pub use tls::{is_managed_host, SslMode, TlsBuilder};
