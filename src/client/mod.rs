//! Client-side components.
//!
//! The [`ClientSession`] compresses live and sample records against what the
//! server already has and releases packets for each station in the order
//! their live records were submitted, even when preparing them finishes out
//! of order.

mod connection;
mod session;
mod transmit;

pub use connection::run_client;
pub use session::{ClientEvent, ClientSession, ConfirmedSampleSource, MemorySampleSource};
pub use transmit::{Ticket, TransmitQueue};
