//! # Weatherpush
//!
//! Push protocol for keeping a remote weather data collector in sync with a
//! station's upload process over a low-bandwidth link.
//!
//! Records are packed into a compact binary format where each field is
//! optional and identified by a bit in a field mask. Live records can be sent
//! as diffs against the previous live record or against a sample the server
//! has confirmed, and skipped entirely when nothing changed.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          ClientSession                 ServerSession            │
//! │  sequencing, sample batching,   decoding, live/sample caches,   │
//! │  ordered transmission           stash, loss estimate            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                Diff engine (full / live / sample / skip)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Field codec (tables per hardware type)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │            Packet framing (tokio-util codec over a stream)      │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_possible_truncation)]  // Wire fields are range checked before narrowing
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::cast_possible_wrap)]        // Intentional for sequence arithmetic
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::future_not_send)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]

pub mod cache;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod fields;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{ClientEvent, ClientSession, ConfirmedSampleSource};
    pub use crate::config::Config;
    pub use crate::diff::{CompressionAlgorithm, DiffStrategy};
    pub use crate::error::{Error, Result};
    pub use crate::fields::{FieldValue, FieldValues};
    pub use crate::protocol::{Packet, PacketCodec};
    pub use crate::server::{ServerSession, WeatherDatabase};
    pub use crate::types::*;
}
