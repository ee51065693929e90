//! Server-side components.
//!
//! This module contains:
//! - The per-connection session that reconstructs and stores records
//! - The database collaborator trait and an in-memory implementation
//! - Connection drivers

mod connection;
mod database;
mod session;

pub use connection::{run_server, serve_connection};
pub use database::{MemoryDatabase, StationRegistration, WeatherDatabase};
pub use session::{classify_sequence, SequenceCheck, ServerSession};
