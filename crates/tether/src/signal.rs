//! Signal/slot system for tether.
//!
//! Signals notify any number of connected slots (closures) when emitted.
//! Every operation is safe to call from any thread at any time, including
//! from inside a slot that is currently being invoked by the same signal.
//!
//! # Key Types
//!
//! - [`Signal<Args>`] - Emits notifications; slots return nothing
//! - [`ValueSignal<Args, R, C>`] - Slots return values, folded by a [`Combiner`]
//! - [`Connection`] - Returned by `connect`, used to disconnect
//!
//! # Emission
//!
//! Emitting takes a snapshot of the connected slots and then invokes them in
//! connection order with no lock held. A slot disconnected before its turn
//! is skipped; a slot connected during the emission is first called by the
//! next one.
//!
//! # Cross-Thread Delivery
//!
//! [`Signal::connect_queued`] and [`Signal::connect_cross_thread`] bind a slot
//! to an [`EventLoop`]. Emitting then posts the call to that loop instead of
//! running it inline; the loop runs it on its own thread unless the bound
//! [`InvalidationRecord`] has been invalidated in the meantime.
//!
//! # Teardown
//!
//! Dropping a signal ends every connection it still has before the drop
//! returns. Connections racing the drop with their own `disconnect` never
//! block on it and never touch freed memory.
//!
//! # Example
//!
//! ```
//! use tether::Signal;
//!
//! // Create a signal that passes a string argument
//! let name_changed = Signal::<String>::new();
//!
//! // Connect a slot (closure)
//! let connection = name_changed.connect(|name| {
//!     println!("Name changed to: {}", name);
//! });
//!
//! // Emit the signal
//! name_changed.emit("Master Bus".to_string());
//!
//! // Disconnect when done
//! connection.disconnect();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;

use crate::combiner::{Combiner, OptionalLastValue};
use crate::connection::{Connection, ConnectionId, ConnectionInner, ConnectionOwner, SignalLink};
use crate::event_loop::EventLoop;
use crate::invalidation::InvalidationRecord;
use crate::logging::targets;

type SlotFn<Args, R> = Arc<dyn Fn(&Args) -> R + Send + Sync>;

struct SlotEntry<Args, R> {
    connection: Arc<ConnectionInner>,
    slot: SlotFn<Args, R>,
}

struct SlotTable<Args, R> {
    next_id: u64,
    /// Ordered by id, which is connection order.
    entries: BTreeMap<ConnectionId, SlotEntry<Args, R>>,
}

/// State shared between a signal and the back-links of its connections.
struct SignalCore<Args, R> {
    slots: Mutex<SlotTable<Args, R>>,
    in_teardown: AtomicBool,
    blocked: AtomicBool,
}

impl<Args, R> SignalCore<Args, R> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(SlotTable {
                next_id: 0,
                entries: BTreeMap::new(),
            }),
            in_teardown: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
        })
    }

    /// Disconnect `connection` if it belongs to this signal.
    fn disconnect_connection(&self, connection: &Connection) -> bool {
        let owned = self
            .slots
            .lock()
            .entries
            .get(&connection.id())
            .is_some_and(|entry| Arc::ptr_eq(&entry.connection, connection.inner()));
        if owned {
            connection.disconnect();
        }
        owned
    }

    /// End every connection. With `teardown` set, racing disconnects bail out
    /// instead of waiting for the lock.
    fn sever_all(&self, teardown: bool) {
        if teardown {
            self.in_teardown.store(true, Ordering::Release);
        }
        let severed = {
            let mut table = self.slots.lock();
            for entry in table.entries.values() {
                entry.connection.signal_going_away();
            }
            std::mem::take(&mut table.entries)
        };
        if !severed.is_empty() {
            tracing::trace!(target: targets::SIGNAL, count = severed.len(), teardown, "severed all slots");
        }
        // Slots are dropped here, after the lock is released.
        drop(severed);
    }

    fn connection_count(&self) -> usize {
        self.slots.lock().entries.len()
    }

    fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
    }

    /// Start an emission: snapshot the ids of the currently connected slots.
    fn emission<'a>(&'a self, args: &'a Args) -> Emission<'a, Args, R> {
        let pending = Snapshot::capture(self.slots.lock().entries.keys());
        tracing::trace!(target: targets::SIGNAL, connection_count = pending.len(), "emitting signal");
        Emission {
            core: self,
            args,
            pending,
        }
    }

    /// The slot for `id`, if it is still connected.
    fn live_slot(&self, id: ConnectionId) -> Option<SlotFn<Args, R>> {
        self.slots
            .lock()
            .entries
            .get(&id)
            .map(|entry| Arc::clone(&entry.slot))
    }
}

impl<Args: 'static, R: 'static> SignalCore<Args, R> {
    fn connect(
        self: &Arc<Self>,
        slot: SlotFn<Args, R>,
        record: Option<Arc<InvalidationRecord>>,
    ) -> Connection {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut table = self.slots.lock();
        let id = ConnectionId(table.next_id);
        table.next_id += 1;

        let inner = Arc::new(ConnectionInner::new(id, weak, record));
        table.entries.insert(
            id,
            SlotEntry {
                connection: Arc::clone(&inner),
                slot,
            },
        );
        let count = table.entries.len();
        drop(table);

        tracing::trace!(target: targets::SIGNAL, id = id.0, connection_count = count, "slot connected");
        Connection::from_inner(inner)
    }
}

impl<Args: 'static, R: 'static> SignalLink for SignalCore<Args, R> {
    fn disconnect(&self, id: ConnectionId) {
        // The dropping signal holds the lock while it ends all connections,
        // including this one, so never block on it.
        let removed = loop {
            if let Some(mut table) = self.slots.try_lock() {
                break table.entries.remove(&id);
            }
            if self.in_teardown.load(Ordering::Acquire) {
                return;
            }
            thread::yield_now();
        };
        tracing::trace!(target: targets::SIGNAL, id = id.0, found = removed.is_some(), "slot disconnected");
    }
}

/// Emissions over at most this many slots snapshot without allocating.
const INLINE_SNAPSHOT: usize = 16;

/// The connection ids captured when an emission starts.
enum Snapshot {
    Inline {
        ids: [ConnectionId; INLINE_SNAPSHOT],
        len: usize,
        next: usize,
    },
    Heap(std::vec::IntoIter<ConnectionId>),
}

impl Snapshot {
    fn capture<'a, I>(keys: I) -> Self
    where
        I: ExactSizeIterator<Item = &'a ConnectionId>,
    {
        if keys.len() > INLINE_SNAPSHOT {
            return Self::Heap(keys.copied().collect::<Vec<_>>().into_iter());
        }
        let mut ids = [ConnectionId(0); INLINE_SNAPSHOT];
        let mut len = 0;
        for (slot, id) in ids.iter_mut().zip(keys) {
            *slot = *id;
            len += 1;
        }
        Self::Inline { ids, len, next: 0 }
    }

    #[cfg(test)]
    fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

impl Iterator for Snapshot {
    type Item = ConnectionId;

    fn next(&mut self) -> Option<ConnectionId> {
        match self {
            Self::Inline { ids, len, next } => {
                if *next == *len {
                    return None;
                }
                let id = ids[*next];
                *next += 1;
                Some(id)
            }
            Self::Heap(ids) => ids.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self {
            Self::Inline { len, next, .. } => len - next,
            Self::Heap(ids) => ids.len(),
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Snapshot {}

/// Lazily invokes the snapshotted slots, yielding their results.
///
/// Each step re-checks, under a short lock, that the slot is still connected
/// and then calls it with no lock held.
struct Emission<'a, Args, R> {
    core: &'a SignalCore<Args, R>,
    args: &'a Args,
    pending: Snapshot,
}

impl<Args, R> Iterator for Emission<'_, Args, R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        for id in self.pending.by_ref() {
            if let Some(slot) = self.core.live_slot(id) {
                return Some(slot(self.args));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

/// A signal whose slots return nothing.
///
/// # Type Parameter
///
/// - `Args`: The argument type passed to connected slots. Use `()` for signals
///   with no arguments, or a tuple like `(String, i32)` for multiple arguments.
///
/// # Thread Safety
///
/// `Signal<Args>` is `Send + Sync`; slots must be `Send + Sync` too. Slots run
/// on the emitting thread unless they were connected through an event loop.
///
/// # Related Types
///
/// - [`ValueSignal`] - When slots need to return values
/// - [`ScopedConnection`](crate::ScopedConnection) - Disconnects on drop
/// - [`ScopedConnectionList`](crate::ScopedConnectionList) - Many connections, one owner
pub struct Signal<Args> {
    core: Arc<SignalCore<Args, ()>>,
}

impl<Args: 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            core: SignalCore::new(),
        }
    }

    /// Connect a slot that runs synchronously on the emitting thread.
    ///
    /// The returned [`Connection`] does not disconnect when dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use tether::Signal;
    ///
    /// let signal = Signal::<String>::new();
    /// let connection = signal.connect(|s| println!("Got: {}", s));
    /// signal.emit("Hello".to_string());
    /// assert!(connection.is_connected());
    /// ```
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.core.connect(Arc::new(slot), None)
    }

    /// Connect a synchronous slot and hand the connection to `owner`.
    pub fn connect_same_thread<O, F>(&self, owner: &O, slot: F)
    where
        O: ConnectionOwner + ?Sized,
        F: Fn(&Args) + Send + Sync + 'static,
    {
        owner.adopt(self.connect(slot));
    }

    /// Disconnect `connection` if it belongs to this signal.
    ///
    /// Returns `false` if the connection was made on another signal or has
    /// already ended.
    pub fn disconnect(&self, connection: &Connection) -> bool {
        self.core.disconnect_connection(connection)
    }

    /// Disconnect all slots. The signal stays usable.
    pub fn disconnect_all(&self) {
        self.core.sever_all(false);
    }

    /// Get the number of connected slots.
    pub fn connection_count(&self) -> usize {
        self.core.connection_count()
    }

    /// Whether no slot is connected.
    pub fn is_empty(&self) -> bool {
        self.connection_count() == 0
    }

    /// Block signal emission temporarily.
    ///
    /// While blocked, calls to `emit()` do nothing. This is useful during
    /// initialization or batch updates to prevent cascading notifications.
    pub fn set_blocked(&self, blocked: bool) {
        self.core.set_blocked(blocked);
    }

    /// Check if signal emission is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.core.is_blocked()
    }

    /// Emit the signal, invoking every slot connected at this moment.
    ///
    /// Slots bound to an event loop are posted to it rather than run here.
    #[tracing::instrument(skip_all, target = "tether::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return;
        }
        self.core.emission(&args).for_each(|()| {});
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// Connect a slot that runs on `event_loop` instead of the emitting thread.
    ///
    /// Every emission clones the arguments and posts the call to the loop.
    /// If `record` is given and has been invalidated by the time the loop gets
    /// to the call, the call is silently dropped. With `None` the call always
    /// runs.
    ///
    /// # Example
    ///
    /// ```
    /// use tether::{Invalidator, Signal, ThreadEventLoop};
    /// use std::sync::Arc;
    ///
    /// let gui = Arc::new(ThreadEventLoop::new()?);
    /// let receiver = Invalidator::new();
    ///
    /// let level_changed = Signal::<f32>::new();
    /// let _connection = level_changed.connect_queued(
    ///     Some(receiver.record()),
    ///     gui.clone(),
    ///     |level| println!("meter: {level}"),
    /// );
    /// level_changed.emit(-6.0);
    ///
    /// gui.stop_and_join();
    /// # Ok::<(), tether::EventLoopError>(())
    /// ```
    pub fn connect_queued<F>(
        &self,
        record: Option<Arc<InvalidationRecord>>,
        event_loop: Arc<dyn EventLoop>,
        slot: F,
    ) -> Connection
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let slot = Arc::new(slot);
        let post_record = record.clone();
        let trampoline = move |args: &Args| {
            let slot = Arc::clone(&slot);
            let args = args.clone();
            let posted = event_loop.post(post_record.clone(), Box::new(move || slot(&args)));
            if let Err(err) = posted {
                tracing::trace!(
                    target: targets::SIGNAL,
                    event_loop = event_loop.name(),
                    error = %err,
                    "dropping deferred slot call"
                );
            }
        };
        self.core.connect(Arc::new(trampoline), record)
    }

    /// Connect a slot to run on `event_loop` and hand the connection to `owner`.
    pub fn connect_cross_thread<O, F>(
        &self,
        owner: &O,
        record: Option<Arc<InvalidationRecord>>,
        event_loop: Arc<dyn EventLoop>,
        slot: F,
    ) where
        O: ConnectionOwner + ?Sized,
        F: Fn(&Args) + Send + Sync + 'static,
    {
        owner.adopt(self.connect_queued(record, event_loop, slot));
    }
}

impl<Args> Drop for Signal<Args> {
    fn drop(&mut self) {
        self.core.sever_all(true);
    }
}

impl<Args> fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.core.slots.lock().entries.len())
            .field("blocked", &self.core.blocked.load(Ordering::Relaxed))
            .finish()
    }
}

/// A signal whose slots return values.
///
/// Emitting invokes every connected slot and folds their return values with
/// the combiner `C`. The default, [`OptionalLastValue`], returns the value of
/// the last slot, or `None` when nothing is connected.
///
/// Value signals only support synchronous slots: a deferred call cannot
/// contribute a value to an emission that has already returned.
///
/// # Example
///
/// ```
/// use tether::ValueSignal;
///
/// let ask_save = ValueSignal::<String, bool>::new();
/// ask_save.connect(|_| false);
/// ask_save.connect(|name| name.ends_with(".session"));
///
/// assert_eq!(ask_save.emit("demo.session".to_string()), Some(true));
/// ```
pub struct ValueSignal<Args, R, C = OptionalLastValue> {
    core: Arc<SignalCore<Args, R>>,
    combiner: C,
}

impl<Args: 'static, R: 'static, C: Combiner<R> + Default> Default for ValueSignal<Args, R, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: 'static, R: 'static, C: Combiner<R>> ValueSignal<Args, R, C> {
    /// Create a new signal using the default combiner.
    pub fn new() -> Self
    where
        C: Default,
    {
        Self::with_combiner(C::default())
    }

    /// Create a new signal folding results with `combiner`.
    pub fn with_combiner(combiner: C) -> Self {
        Self {
            core: SignalCore::new(),
            combiner,
        }
    }

    /// Connect a slot that runs synchronously on the emitting thread.
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&Args) -> R + Send + Sync + 'static,
    {
        self.core.connect(Arc::new(slot), None)
    }

    /// Connect a synchronous slot and hand the connection to `owner`.
    pub fn connect_same_thread<O, F>(&self, owner: &O, slot: F)
    where
        O: ConnectionOwner + ?Sized,
        F: Fn(&Args) -> R + Send + Sync + 'static,
    {
        owner.adopt(self.connect(slot));
    }

    /// Disconnect `connection` if it belongs to this signal.
    pub fn disconnect(&self, connection: &Connection) -> bool {
        self.core.disconnect_connection(connection)
    }

    /// Disconnect all slots. The signal stays usable.
    pub fn disconnect_all(&self) {
        self.core.sever_all(false);
    }

    /// Get the number of connected slots.
    pub fn connection_count(&self) -> usize {
        self.core.connection_count()
    }

    /// Whether no slot is connected.
    pub fn is_empty(&self) -> bool {
        self.connection_count() == 0
    }

    /// Block signal emission temporarily.
    ///
    /// While blocked, `emit()` invokes nothing and returns the combiner's
    /// result for an empty emission.
    pub fn set_blocked(&self, blocked: bool) {
        self.core.set_blocked(blocked);
    }

    /// Check if signal emission is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.core.is_blocked()
    }

    /// The combiner folding this signal's results.
    pub fn combiner(&self) -> &C {
        &self.combiner
    }

    /// Emit the signal and combine the slots' return values.
    #[tracing::instrument(skip_all, target = "tether::signal", level = "trace")]
    pub fn emit(&self, args: Args) -> C::Output {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return self.combiner.combine(std::iter::empty::<R>());
        }
        self.combiner.combine(self.core.emission(&args))
    }
}

impl<Args, R, C> Drop for ValueSignal<Args, R, C> {
    fn drop(&mut self) {
        self.core.sever_all(true);
    }
}

impl<Args, R, C: fmt::Debug> fmt::Debug for ValueSignal<Args, R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSignal")
            .field("connections", &self.core.slots.lock().entries.len())
            .field("blocked", &self.core.blocked.load(Ordering::Relaxed))
            .field("combiner", &self.combiner)
            .finish()
    }
}
