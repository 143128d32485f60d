//! Real-time delivery
//!
//! - `events`: the outbound event catalogue
//! - `transport`: the transport seam and the in-process `EventHub`
//! - `fanout`: audience selection and best-effort dispatch

mod events;
mod fanout;
mod transport;

pub use events::{DeliveryEvent, ReactionAction};
pub use fanout::Fanout;
pub use transport::{EventHub, Transport};

use thiserror::Error;

/// Transport-level failure; never surfaced to API callers
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient disconnected")]
    Disconnected,

    #[error("{failed} of {total} recipients failed")]
    Partial { failed: usize, total: usize },

    #[error("transport error: {0}")]
    Transport(String),
}
