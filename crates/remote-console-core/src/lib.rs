//! Auto-reconnecting command/response connection to a remote debug console.
//!
//! This crate provides:
//! - `ConnectionManager` - Socket lifecycle, command queue, FIFO correlation
//! - `ConnectionConfig` - Endpoint and retry settings
//! - `Backoff` - Reconnect delay schedule
//! - `ConnectionHandler` / `EventStore` - Callback and event-stream surfaces

pub mod backoff;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod handler;
pub mod manager;
pub mod state;

pub use backoff::Backoff;
pub use config::{ConfigError, ConnectionConfig};
pub use error::{CommandError, ConnectionError};
pub use events::{ConnectionEvent, EventStore};
pub use handler::{ConnectionHandler, ErrorDedup, NoopHandler};
pub use manager::ConnectionManager;
pub use state::ConnectionState;
