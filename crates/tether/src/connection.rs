//! Connection handles and their RAII owners.
//!
//! Every `connect` call produces a [`Connection`]: a cheap, clonable handle
//! shared between the signal and whoever wants to cancel the subscription.
//! A connection ends exactly once, either because someone called
//! [`Connection::disconnect`] or because its signal was dropped.
//!
//! # Key Types
//!
//! - [`Connection`] - Shared handle; dropping it does **not** disconnect
//! - [`ScopedConnection`] - Owns one connection and disconnects it on drop
//! - [`ScopedConnectionList`] - Owns many connections, disconnects them all on drop
//! - [`ConnectionOwner`] - Implemented by both scoped owners, used by
//!   `connect_same_thread` and `connect_cross_thread`
//!
//! # Example
//!
//! ```
//! use tether::{ScopedConnectionList, Signal};
//!
//! let changed = Signal::<u32>::new();
//! let connections = ScopedConnectionList::new();
//!
//! changed.connect_same_thread(&connections, |gain| println!("gain: {gain}"));
//! changed.connect_same_thread(&connections, |_| println!("redraw"));
//! assert_eq!(changed.connection_count(), 2);
//!
//! connections.drop_connections();
//! assert!(changed.is_empty());
//! ```

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::invalidation::InvalidationRecord;
use crate::logging::targets;

/// Identifies a connection within the signal that created it.
///
/// Ids increase with every `connect` on a signal, so they also encode the
/// order in which slots are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) u64);

/// The signal side of a connection.
pub(crate) trait SignalLink: Send + Sync {
    /// Remove the slot registered under `id`.
    ///
    /// May race the signal's teardown and must return without blocking on it.
    fn disconnect(&self, id: ConnectionId);
}

/// State shared by all clones of a [`Connection`] and the signal's slot table.
pub(crate) struct ConnectionInner {
    id: ConnectionId,
    /// Boxed weak link back to the signal. Null once disconnected.
    ///
    /// Whoever swaps the pointer to null owns the box and performs the
    /// disconnect bookkeeping.
    signal: AtomicPtr<Weak<dyn SignalLink>>,
    record: Option<Arc<InvalidationRecord>>,
}

impl ConnectionInner {
    pub(crate) fn new(
        id: ConnectionId,
        signal: Weak<dyn SignalLink>,
        record: Option<Arc<InvalidationRecord>>,
    ) -> Self {
        if let Some(record) = &record {
            record.acquire();
        }
        Self {
            id,
            signal: AtomicPtr::new(Box::into_raw(Box::new(signal))),
            record,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.signal.load(Ordering::Acquire).is_null()
    }

    /// Claim the back-link. Only one caller ever gets `Some`.
    fn take_signal(&self) -> Option<Box<Weak<dyn SignalLink>>> {
        let raw = self.signal.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            None
        } else {
            // SAFETY: non-null values are only ever produced by `Box::into_raw`
            // in `new`, and the swap above hands the pointer to a single caller.
            Some(unsafe { Box::from_raw(raw) })
        }
    }

    /// Client-initiated disconnect.
    pub(crate) fn disconnect(&self) {
        let Some(link) = self.take_signal() else {
            return;
        };
        if let Some(signal) = link.upgrade() {
            signal.disconnect(self.id);
        }
        self.release_record();
        tracing::trace!(target: targets::CONNECTION, id = self.id.0, "disconnected");
    }

    /// Called by the signal, under its lock, when it is tearing down.
    pub(crate) fn signal_going_away(&self) {
        if self.take_signal().is_some() {
            self.release_record();
        }
    }

    fn release_record(&self) {
        if let Some(record) = &self.record {
            record.release();
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let raw = *self.signal.get_mut();
        if !raw.is_null() {
            // SAFETY: we have exclusive access and nobody claimed the box.
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

/// A handle to one signal/slot connection.
///
/// Clones refer to the same connection. Dropping a `Connection` leaves the
/// slot connected; use [`ScopedConnection`] or [`ScopedConnectionList`] to
/// tie the subscription to a scope.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    /// The id of this connection within its signal.
    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    /// Whether the slot is still connected.
    ///
    /// Becomes `false` after [`disconnect`](Self::disconnect) or once the
    /// signal has been dropped, and never becomes `true` again.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Disconnect the slot.
    ///
    /// Safe to call any number of times, from any thread, including from
    /// inside a slot and while the signal is being dropped.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Something that takes over the disconnection duty for new connections.
pub trait ConnectionOwner {
    /// Take ownership of `connection`.
    fn adopt(&self, connection: Connection);
}

/// Owns at most one connection and disconnects it when dropped.
///
/// Assigning a new connection disconnects the previous one first.
///
/// # Example
///
/// ```
/// use tether::{ScopedConnection, Signal};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI32, Ordering};
///
/// let signal = Signal::<i32>::new();
/// let total = Arc::new(AtomicI32::new(0));
/// {
///     let scoped = ScopedConnection::new();
///     let total = total.clone();
///     signal.connect_same_thread(&scoped, move |&n| {
///         total.fetch_add(n, Ordering::SeqCst);
///     });
///     signal.emit(42);
/// }
/// signal.emit(43); // nobody listening any more
/// assert_eq!(total.load(Ordering::SeqCst), 42);
/// ```
#[derive(Default)]
pub struct ScopedConnection {
    connection: Mutex<Option<Connection>>,
}

impl ScopedConnection {
    /// Create an empty scoped connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held connection, disconnecting the old one.
    pub fn set(&self, connection: Connection) {
        let previous = self.connection.lock().replace(connection);
        if let Some(previous) = previous {
            previous.disconnect();
        }
    }

    /// Disconnect and forget the held connection, if any.
    pub fn disconnect(&self) {
        let previous = self.connection.lock().take();
        if let Some(previous) = previous {
            previous.disconnect();
        }
    }

    /// Give up the disconnection duty without disconnecting.
    pub fn release(&self) -> Option<Connection> {
        self.connection.lock().take()
    }

    /// Whether a still-connected connection is held.
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(Connection::is_connected)
    }
}

impl From<Connection> for ScopedConnection {
    fn from(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }
}

impl ConnectionOwner for ScopedConnection {
    fn adopt(&self, connection: Connection) {
        self.set(connection);
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.disconnect();
        }
    }
}

impl fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("connection", &*self.connection.lock())
            .finish()
    }
}

/// Owns any number of connections and disconnects them all when dropped.
///
/// `add_connection` and `drop_connections` may be called concurrently from
/// different threads.
#[derive(Default)]
pub struct ScopedConnectionList {
    connections: Mutex<Vec<Connection>>,
}

impl ScopedConnectionList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over a connection.
    ///
    /// Connections that have already ended are pruned at the same time.
    pub fn add_connection(&self, connection: Connection) {
        let mut connections = self.connections.lock();
        connections.retain(Connection::is_connected);
        connections.push(connection);
    }

    /// Disconnect and forget every held connection.
    pub fn drop_connections(&self) {
        let dropped = std::mem::take(&mut *self.connections.lock());
        if !dropped.is_empty() {
            tracing::trace!(
                target: targets::CONNECTION,
                count = dropped.len(),
                "dropping connection list"
            );
        }
        // Disconnect outside the list lock: removing a slot may drop a closure
        // that owns another handle to this list.
        for connection in dropped {
            connection.disconnect();
        }
    }

    /// Number of held connections that are still connected.
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.is_connected())
            .count()
    }

    /// Whether no held connection is still connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConnectionOwner for ScopedConnectionList {
    fn adopt(&self, connection: Connection) {
        self.add_connection(connection);
    }
}

impl Drop for ScopedConnectionList {
    fn drop(&mut self) {
        for connection in self.connections.get_mut().drain(..) {
            connection.disconnect();
        }
    }
}

impl fmt::Debug for ScopedConnectionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnectionList")
            .field("connections", &*self.connections.lock())
            .finish()
    }
}
