//! An event loop that owns a dedicated thread.
//!
//! [`ThreadEventLoop`] spawns one thread and runs posted calls on it, one at
//! a time, in posting order. It is the usual receiving end for
//! [`Signal::connect_cross_thread`](crate::Signal::connect_cross_thread) when
//! the receiver lives on a background thread.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tether::{Invalidator, Signal, ThreadEventLoop};
//!
//! let worker = Arc::new(ThreadEventLoop::new()?);
//! let receiver = Invalidator::new();
//!
//! let progress = Signal::<u32>::new();
//! progress.connect_queued(Some(receiver.record()), worker.clone(), |percent| {
//!     println!("{percent}% done");
//! });
//!
//! progress.emit(50);
//! worker.stop_and_join();
//! # Ok::<(), tether::EventLoopError>(())
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::error::EventLoopError;
use crate::event_loop::{EventLoop, LoopMessage, RequestQueue};
use crate::invalidation::InvalidationRecord;
use crate::logging::targets;
use crate::request::SlotRequest;

/// Configuration for creating a [`ThreadEventLoop`].
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Name for the loop thread, also used in diagnostics.
    pub name: String,
    /// Stack size for the loop thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            name: "tether-event-loop".to_string(),
            stack_size: None,
        }
    }
}

impl EventLoopConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating event loops with custom configuration.
#[derive(Debug, Default)]
pub struct EventLoopBuilder {
    config: EventLoopConfig,
}

impl EventLoopBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Spawn the loop thread.
    pub fn build(self) -> Result<ThreadEventLoop, EventLoopError> {
        ThreadEventLoop::with_config(self.config)
    }
}

/// An event loop running on its own thread.
///
/// Dropping the loop asks it to stop without waiting for it; calls already
/// queued are still run before the thread exits. A panicking call is logged
/// and does not take the loop down with it.
pub struct ThreadEventLoop {
    queue: Arc<RequestQueue>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl ThreadEventLoop {
    /// Spawn a loop with default configuration.
    pub fn new() -> Result<Self, EventLoopError> {
        Self::with_config(EventLoopConfig::default())
    }

    /// Spawn a loop with custom configuration.
    pub fn with_config(config: EventLoopConfig) -> Result<Self, EventLoopError> {
        let queue = Arc::new(RequestQueue::new(config.name.clone()));
        let thread_queue = queue.clone();

        let mut builder = thread::Builder::new().name(config.name);
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(move || run_loop(&thread_queue))?;
        let thread_id = handle.thread().id();

        Ok(Self {
            queue,
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Whether the loop still accepts calls.
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    /// Number of calls waiting to run.
    pub fn pending_requests(&self) -> usize {
        self.queue.pending()
    }

    /// The id of the loop thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Ask the loop to stop after running what is already queued.
    ///
    /// Non-blocking. New calls are rejected from this point on.
    pub fn stop(&self) {
        if self.queue.close() {
            self.queue.send_quit();
        }
    }

    /// Wait for the loop thread to finish.
    ///
    /// Returns `true` if the thread was joined, `false` if it was already
    /// joined, panicked, or this is called from the loop thread itself.
    pub fn join(&self) -> bool {
        if thread::current().id() == self.thread_id {
            tracing::warn!(
                target: targets::EVENT_LOOP,
                name = self.queue.name(),
                "event loop cannot join its own thread"
            );
            return false;
        }

        let Some(handle) = self.handle.lock().take() else {
            return false;
        };
        match handle.join() {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    target: targets::EVENT_LOOP,
                    name = self.queue.name(),
                    "event loop thread panicked"
                );
                false
            }
        }
    }

    /// Stop the loop and wait for it to finish.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }
}

impl EventLoop for ThreadEventLoop {
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

impl Drop for ThreadEventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadEventLoop")
            .field("name", &self.queue.name())
            .field("thread_id", &self.thread_id)
            .field("running", &self.is_running())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// Closes the queue when the loop thread exits, however it exits.
struct CloseOnExit<'a>(&'a RequestQueue);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close();
        let discarded = self.0.discard();
        if discarded > 0 {
            tracing::warn!(
                target: targets::EVENT_LOOP,
                name = self.0.name(),
                discarded,
                "event loop exited with calls still queued"
            );
        }
    }
}

/// Run one request, containing a panicking slot to that call.
fn dispatch_isolated(queue: &RequestQueue, request: SlotRequest) {
    if panic::catch_unwind(AssertUnwindSafe(|| queue.dispatch(request))).is_err() {
        tracing::warn!(target: targets::EVENT_LOOP, name = queue.name(), "slot panicked on event loop");
    }
}

/// The body of the loop thread.
fn run_loop(queue: &RequestQueue) {
    let _close = CloseOnExit(queue);
    tracing::debug!(target: targets::EVENT_LOOP, name = queue.name(), "event loop started");

    while let Ok(message) = queue.receiver().recv() {
        match message {
            LoopMessage::Call(request) => dispatch_isolated(queue, request),
            LoopMessage::Quit => break,
        }
    }

    let mut drained = 0;
    while let Ok(message) = queue.receiver().try_recv() {
        if let LoopMessage::Call(request) = message {
            dispatch_isolated(queue, request);
            drained += 1;
        }
    }
    tracing::debug!(
        target: targets::EVENT_LOOP,
        name = queue.name(),
        drained,
        "event loop stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_loop_creation() {
        let event_loop = ThreadEventLoop::new().unwrap();
        assert!(event_loop.is_running());
        assert_eq!(event_loop.pending_requests(), 0);
        assert_eq!(event_loop.name(), "tether-event-loop");
        assert!(event_loop.stop_and_join());
        assert!(!event_loop.is_running());
    }

    #[test]
    fn test_builder() {
        let event_loop = EventLoopBuilder::new()
            .name("test-loop")
            .stack_size(256 * 1024)
            .build()
            .unwrap();

        let (tx, rx) = bounded(1);
        event_loop
            .post(
                None,
                Box::new(move || {
                    let _ = tx.send(thread::current().name().map(str::to_owned));
                }),
            )
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-loop"));
        event_loop.stop_and_join();
    }

    #[test]
    fn test_calls_run_on_loop_thread() {
        let event_loop = ThreadEventLoop::new().unwrap();
        let (tx, rx) = bounded(1);

        event_loop
            .post(None, Box::new(move || tx.send(thread::current().id()).unwrap()))
            .unwrap();

        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ran_on, event_loop.thread_id());
        assert_ne!(ran_on, thread::current().id());
        event_loop.stop_and_join();
    }

    #[test]
    fn test_stop_drains_queue() {
        let event_loop = ThreadEventLoop::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = counter.clone();
            event_loop
                .post(
                    None,
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        assert!(event_loop.stop_and_join());
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(event_loop.pending_requests(), 0);
    }

    #[test]
    fn test_post_after_stop_rejected() {
        let event_loop = ThreadEventLoop::new().unwrap();
        event_loop.stop();

        let result = event_loop.post(None, Box::new(|| {}));
        assert!(matches!(result, Err(EventLoopError::Stopped)));
        event_loop.join();
    }

    #[test]
    fn test_join_twice() {
        let event_loop = ThreadEventLoop::new().unwrap();
        assert!(event_loop.stop_and_join());
        assert!(!event_loop.join());
    }

    #[test]
    fn test_dead_record_not_called() {
        let event_loop = ThreadEventLoop::new().unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let ran = Arc::new(AtomicBool::new(false));
        let record = InvalidationRecord::new();

        // Hold the loop thread so the second call stays queued.
        event_loop
            .post(
                None,
                Box::new(move || {
                    let _ = gate_rx.recv();
                }),
            )
            .unwrap();

        let ran_clone = ran.clone();
        event_loop
            .post(
                Some(record.clone()),
                Box::new(move || ran_clone.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        record.invalidate();
        gate_tx.send(()).unwrap();

        event_loop.stop_and_join();
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!record.in_use());
    }

    #[test]
    fn test_drop_stops_loop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let event_loop = ThreadEventLoop::new().unwrap();
            let counter = counter.clone();
            event_loop
                .post(
                    None,
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        // The thread is detached; give it time to drain.
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_posts_racing_stop_are_run_or_rejected() {
        for _ in 0..200 {
            let event_loop = Arc::new(ThreadEventLoop::new().unwrap());
            let record = InvalidationRecord::new();
            let accepted = Arc::new(AtomicUsize::new(0));
            let ran = Arc::new(AtomicUsize::new(0));

            let posters: Vec<_> = (0..2)
                .map(|_| {
                    let event_loop = event_loop.clone();
                    let record = record.clone();
                    let accepted = accepted.clone();
                    let ran = ran.clone();
                    thread::spawn(move || loop {
                        let ran = ran.clone();
                        let posted = event_loop.post(
                            Some(record.clone()),
                            Box::new(move || {
                                ran.fetch_add(1, Ordering::SeqCst);
                            }),
                        );
                        if posted.is_err() {
                            break;
                        }
                        accepted.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();

            thread::yield_now();
            assert!(event_loop.stop_and_join());
            for poster in posters {
                poster.join().unwrap();
            }

            assert_eq!(accepted.load(Ordering::SeqCst), ran.load(Ordering::SeqCst));
            assert_eq!(event_loop.pending_requests(), 0);
            assert!(!record.in_use());
        }
    }

    fn failing_call() {
        panic!("slot failure");
    }

    #[test]
    fn test_panicking_call_keeps_loop_alive() {
        let event_loop = ThreadEventLoop::new().unwrap();
        let record = InvalidationRecord::new();
        let ran = Arc::new(AtomicBool::new(false));

        event_loop
            .post(Some(record.clone()), Box::new(failing_call))
            .unwrap();
        let ran_clone = ran.clone();
        event_loop
            .post(
                Some(record.clone()),
                Box::new(move || ran_clone.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        assert!(event_loop.stop_and_join());
        assert!(ran.load(Ordering::SeqCst));
        assert!(!record.in_use());
    }

    #[test]
    fn test_loop_exit_closes_queue() {
        let queue = RequestQueue::new("exiting".to_string());
        let record = InvalidationRecord::new();
        queue.post(Some(record.clone()), Box::new(|| {})).unwrap();
        assert_eq!(record.use_count(), 1);

        drop(CloseOnExit(&queue));

        assert!(!queue.is_running());
        assert_eq!(queue.pending(), 0);
        assert!(!record.in_use());
        let result = queue.post(Some(record.clone()), Box::new(|| {}));
        assert!(matches!(result, Err(EventLoopError::Stopped)));
        assert!(!record.in_use());
    }
}
