//! Deferred slot calls waiting on an event loop.
//!
//! When a signal with a cross-thread connection is emitted, the slot call is
//! wrapped in a [`SlotRequest`] and handed to the connection's
//! [`EventLoop`](crate::EventLoop). The request carries the receiver's
//! [`InvalidationRecord`], and [`SlotRequest::dispatch`] checks it right
//! before running the call.
//!
//! Custom event loops should store `SlotRequest`s and call `dispatch` on
//! their own thread; doing so satisfies the whole delivery contract:
//!
//! 1. A request keeps a use of its record from creation until it is dropped.
//! 2. `dispatch` runs the call only if the record is still alive.
//! 3. The use is released after the call returns, or when the request is
//!    dropped without ever being dispatched.

use std::fmt;
use std::sync::Arc;

use crate::invalidation::InvalidationRecord;
use crate::logging::targets;

/// A type-erased deferred slot call.
pub struct SlotRequest {
    call: Option<Box<dyn FnOnce() + Send>>,
    record: Option<Arc<InvalidationRecord>>,
}

impl SlotRequest {
    /// Wrap `call`, guarded by `record`.
    ///
    /// With no record the call always runs when dispatched.
    pub fn new(record: Option<Arc<InvalidationRecord>>, call: Box<dyn FnOnce() + Send>) -> Self {
        if let Some(record) = &record {
            record.acquire();
        }
        Self {
            call: Some(call),
            record,
        }
    }

    /// Whether the receiver is still alive.
    pub fn is_alive(&self) -> bool {
        self.record.as_ref().is_none_or(|record| record.is_alive())
    }

    /// Run the call if the receiver is still alive.
    ///
    /// Returns `true` if the call ran.
    pub fn dispatch(mut self) -> bool {
        let Some(call) = self.call.take() else {
            return false;
        };
        if !self.is_alive() {
            tracing::trace!(
                target: targets::EVENT_LOOP,
                origin = ?self.record.as_ref().map(|record| record.origin()),
                "receiver gone, dropping slot request"
            );
            return false;
        }
        call();
        true
    }
}

impl Drop for SlotRequest {
    fn drop(&mut self) {
        if let Some(record) = &self.record {
            record.release();
        }
    }
}

impl fmt::Debug for SlotRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRequest")
            .field("pending", &self.call.is_some())
            .field("record", &self.record)
            .finish()
    }
}
