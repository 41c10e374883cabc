//! Invalidation records for receivers of deferred slot calls.
//!
//! A slot connected through an [`EventLoop`](crate::EventLoop) runs some time
//! after the signal was emitted, on another thread. By then the object the
//! slot talks to may be gone. An [`InvalidationRecord`] is the shared flag the
//! receiver flips when it dies; event loops check it right before running a
//! deferred call and silently drop the call if the receiver is dead.
//!
//! Receivers normally own their record through an [`Invalidator`], which
//! invalidates the record when dropped.
//!
//! # Example
//!
//! ```
//! use tether::Invalidator;
//!
//! let guard = Invalidator::new();
//! let record = guard.record();
//! assert!(record.is_alive());
//!
//! drop(guard);
//! assert!(!record.is_alive());
//! ```

use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::logging::targets;

/// Shared lifetime tracker for the receiver of deferred slot calls.
///
/// Besides the alive flag, a record counts its users: every connection bound
/// to it and every deferred request still carrying it holds one reference.
/// The count lets a receiver tell whether anything can still reach it.
pub struct InvalidationRecord {
    alive: AtomicBool,
    users: AtomicUsize,
    origin: &'static Location<'static>,
}

impl InvalidationRecord {
    /// Create a live record with no users.
    ///
    /// The caller's source location is remembered for diagnostics.
    #[track_caller]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            users: AtomicUsize::new(0),
            origin: Location::caller(),
        })
    }

    /// Whether the receiver is still alive.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the receiver as gone. Pending deferred calls will be dropped.
    pub fn invalidate(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::trace!(
                target: targets::INVALIDATION,
                origin = %self.origin,
                users = self.use_count(),
                "invalidation record invalidated"
            );
        }
    }

    /// Register one more user of this record.
    pub fn acquire(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one user of this record. Never goes below zero.
    pub fn release(&self) {
        let released = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(released.is_ok(), "invalidation record released more than acquired");
    }

    /// Number of connections and pending requests using this record.
    pub fn use_count(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Whether anything still uses this record.
    pub fn in_use(&self) -> bool {
        self.use_count() > 0
    }

    /// Where this record was created.
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }
}

impl fmt::Debug for InvalidationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRecord")
            .field("alive", &self.is_alive())
            .field("users", &self.use_count())
            .field("origin", &format_args!("{}", self.origin))
            .finish()
    }
}

/// Owns an [`InvalidationRecord`] on behalf of a receiver.
///
/// Embed one in any object that receives deferred slot calls and pass
/// [`record`](Self::record) when connecting. Dropping the guard invalidates
/// the record, so calls still queued for the object are discarded.
#[derive(Debug)]
pub struct Invalidator {
    record: Arc<InvalidationRecord>,
}

impl Invalidator {
    /// Create a guard around a fresh record.
    #[track_caller]
    pub fn new() -> Self {
        Self {
            record: InvalidationRecord::new(),
        }
    }

    /// The record to hand to `connect_cross_thread` or `connect_queued`.
    pub fn record(&self) -> Arc<InvalidationRecord> {
        Arc::clone(&self.record)
    }
}

impl Default for Invalidator {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Invalidator {
    fn drop(&mut self) {
        self.record.invalidate();
    }
}
