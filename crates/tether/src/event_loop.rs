//! Event loops for cross-thread slot delivery.
//!
//! An [`EventLoop`] is anything that can accept a deferred call and later run
//! it on a thread it controls. Signals use it for slots connected with
//! [`Signal::connect_queued`](crate::Signal::connect_queued) or
//! [`Signal::connect_cross_thread`](crate::Signal::connect_cross_thread).
//!
//! # Provided Loops
//!
//! - [`ThreadEventLoop`](crate::ThreadEventLoop) - Owns a dedicated thread
//! - [`ManualEventLoop`] - Runs calls on whichever thread pumps it, the way a
//!   GUI main loop does
//!
//! # Contract
//!
//! An implementation must, for every posted call, check the call's
//! [`InvalidationRecord`] right before running it and drop the call silently
//! if the record is dead. Wrapping calls in a [`SlotRequest`] and running
//! them with [`SlotRequest::dispatch`] fulfils this.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::RwLock;

use crate::error::EventLoopError;
use crate::invalidation::InvalidationRecord;
use crate::logging::targets;
use crate::request::SlotRequest;

/// A thread's queue of deferred calls.
pub trait EventLoop: Send + Sync {
    /// Queue `call` to run on this loop's thread.
    ///
    /// If `record` is given, the call must be dropped without running when
    /// the record has been invalidated by the time the loop gets to it.
    fn post(
        &self,
        record: Option<Arc<InvalidationRecord>>,
        call: Box<dyn FnOnce() + Send>,
    ) -> Result<(), EventLoopError>;

    /// A human-readable name for diagnostics.
    fn name(&self) -> &str;
}

/// Messages understood by a [`RequestQueue`].
pub(crate) enum LoopMessage {
    /// Run a deferred slot call.
    Call(SlotRequest),
    /// Wake the owning thread so it notices the queue was closed.
    Quit,
}

/// The channel and bookkeeping shared by the bundled loops.
pub(crate) struct RequestQueue {
    name: String,
    sender: Sender<LoopMessage>,
    receiver: Receiver<LoopMessage>,
    /// Held for reading across every accepted send, so once `close` returns
    /// no call can land behind the quit marker.
    running: RwLock<bool>,
    pending: AtomicUsize,
}

impl RequestQueue {
    pub(crate) fn new(name: String) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name,
            sender,
            receiver,
            running: RwLock::new(true),
            pending: AtomicUsize::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.running.read()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn post(
        &self,
        record: Option<Arc<InvalidationRecord>>,
        call: Box<dyn FnOnce() + Send>,
    ) -> Result<(), EventLoopError> {
        let running = self.running.read();
        if !*running {
            return Err(EventLoopError::Stopped);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.sender
            .send(LoopMessage::Call(SlotRequest::new(record, call)))
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                EventLoopError::Stopped
            })
    }

    /// Stop accepting new calls. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        let was_running = std::mem::replace(&mut *self.running.write(), false);
        if was_running {
            tracing::debug!(target: targets::EVENT_LOOP, name = %self.name, "event loop closing");
        }
        was_running
    }

    pub(crate) fn send_quit(&self) {
        let _ = self.sender.send(LoopMessage::Quit);
    }

    pub(crate) fn receiver(&self) -> &Receiver<LoopMessage> {
        &self.receiver
    }

    /// Run one request. Returns `true` if its receiver was alive.
    pub(crate) fn dispatch(&self, request: SlotRequest) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        request.dispatch()
    }

    /// Drop every queued call without running it, releasing its record.
    pub(crate) fn discard(&self) -> usize {
        let mut discarded = 0;
        while let Ok(message) = self.receiver.try_recv() {
            if let LoopMessage::Call(request) = message {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                drop(request);
                discarded += 1;
            }
        }
        discarded
    }

    /// Run every call already queued, without waiting. Quit markers are skipped.
    pub(crate) fn drain(&self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.receiver.try_recv() {
            if let LoopMessage::Call(request) = message {
                self.dispatch(request);
                handled += 1;
            }
        }
        handled
    }
}

/// An event loop run by whichever thread pumps it.
///
/// Nothing happens until that thread calls [`process_pending`](Self::process_pending)
/// or [`process_until`](Self::process_until); posted calls then run on that
/// thread, in posting order.
///
/// # Example
///
/// ```
/// use tether::{EventLoop, ManualEventLoop};
///
/// let main_loop = ManualEventLoop::new("main");
/// main_loop.post(None, Box::new(|| println!("later, on the main thread")))?;
///
/// assert_eq!(main_loop.pending_requests(), 1);
/// assert_eq!(main_loop.process_pending(), 1);
/// # Ok::<(), tether::EventLoopError>(())
/// ```
pub struct ManualEventLoop {
    queue: RequestQueue,
}

impl ManualEventLoop {
    /// Create a loop with the given diagnostic name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            queue: RequestQueue::new(name.into()),
        }
    }

    /// Run every call queued so far on the current thread.
    ///
    /// Returns the number of requests handled, including ones dropped because
    /// their receiver was gone.
    pub fn process_pending(&self) -> usize {
        self.queue.drain()
    }

    /// Wait up to `timeout` for work, then run everything queued.
    ///
    /// Returns the number of requests handled; `0` if the timeout elapsed.
    pub fn process_until(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.queue.receiver().recv_timeout(remaining) {
                Ok(LoopMessage::Call(request)) => {
                    self.queue.dispatch(request);
                    return 1 + self.queue.drain();
                }
                Ok(LoopMessage::Quit) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
            }
        }
    }

    /// Stop accepting calls. Calls already queued can still be processed.
    pub fn stop(&self) {
        self.queue.close();
    }

    /// Whether the loop still accepts calls.
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    /// Number of calls waiting to be processed.
    pub fn pending_requests(&self) -> usize {
        self.queue.pending()
    }
}

impl EventLoop for ManualEventLoop {
    fn post(
        &self,
        record: Option<Arc<InvalidationRecord>>,
        call: Box<dyn FnOnce() + Send>,
    ) -> Result<(), EventLoopError> {
        self.queue.post(record, call)
    }

    fn name(&self) -> &str {
        self.queue.name()
    }
}
