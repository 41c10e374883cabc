//! Error types for tether.
//!
//! Signals themselves never fail: disconnecting twice, emitting into an empty
//! signal, or dropping a request for a receiver that has gone away are all
//! silent no-ops. Errors only surface from event loops, which own threads and
//! queues that can be shut down.

use std::fmt;
use std::io;

/// Result type for event loop operations.
pub type Result<T> = std::result::Result<T, EventLoopError>;

/// Errors reported by the bundled event loops.
#[derive(Debug)]
pub enum EventLoopError {
    /// The event loop has been stopped and no longer accepts requests.
    Stopped,
    /// The operating system refused to spawn the event loop thread.
    Spawn(io::Error),
}

impl fmt::Display for EventLoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Event loop has been stopped"),
            Self::Spawn(err) => write!(f, "Failed to spawn event loop thread: {err}"),
        }
    }
}

impl std::error::Error for EventLoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::Stopped => None,
        }
    }
}

impl From<io::Error> for EventLoopError {
    fn from(err: io::Error) -> Self {
        Self::Spawn(err)
    }
}
