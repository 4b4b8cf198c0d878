//! Unified error type for toolhead-display.
//!
//! We avoid `alloc` in variants - all error variants carry only fixed-size
//! data so the type stays `Copy` and cheap to log from any task.
//! Implements `defmt::Format` for efficient on-target logging.

use core::fmt;

use crate::ui::LayerId;

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Moonraker
    /// The HTTP request never produced a response (socket, DNS, timeout).
    Transport,

    /// A response arrived but its body could not be parsed.
    MalformedResponse,

    /// Moonraker answered with a non-success HTTP status.
    Http(u16),

    /// Response body did not fit the receive buffer.
    BufferOverflow,

    // Command queue
    /// Outbound command queue is full; the command was dropped.
    QueueFull,

    // Assets
    /// The requested animation does not exist in the asset store.
    AssetMissing,

    /// No memory left to hold the requested animation.
    AssetAlloc,

    // Scene
    /// A display object the caller expected is not present.
    MissingObject(LayerId),
}

impl Error {
    /// Transport failures and malformed responses are handled the same way
    /// by the poller: the snapshot goes stale and keeps its last values.
    pub fn is_transport_class(self) -> bool {
        matches!(
            self,
            Error::Transport | Error::MalformedResponse | Error::Http(_) | Error::BufferOverflow
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport => f.write_str("moonraker unreachable"),
            Error::MalformedResponse => f.write_str("malformed moonraker response"),
            Error::Http(code) => write!(f, "moonraker returned HTTP {}", code),
            Error::BufferOverflow => f.write_str("response larger than receive buffer"),
            Error::QueueFull => f.write_str("command queue full"),
            Error::AssetMissing => f.write_str("animation asset not found"),
            Error::AssetAlloc => f.write_str("out of memory loading animation"),
            Error::MissingObject(id) => write!(f, "display object {:?} missing", id),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
