//! Thread-safe signals and slots.
//!
//! This crate provides a small, self-contained notification primitive:
//!
//! - **Signals**: [`Signal`] notifies any number of slots (closures);
//!   [`ValueSignal`] additionally folds the slots' return values through a
//!   [`Combiner`]
//! - **Connections**: every `connect` returns a [`Connection`] that can be
//!   severed from any thread, at any time, any number of times
//! - **Scoped ownership**: [`ScopedConnection`] and [`ScopedConnectionList`]
//!   disconnect on drop
//! - **Cross-thread delivery**: slots bound to an [`EventLoop`] run on that
//!   loop's thread, and are skipped if their receiver's
//!   [`InvalidationRecord`] died in the meantime
//!
//! # Example
//!
//! ```
//! use tether::{ScopedConnectionList, Signal, ValueSignal, CollectAll};
//!
//! let connections = ScopedConnectionList::new();
//!
//! let volume_changed = Signal::<f32>::new();
//! volume_changed.connect_same_thread(&connections, |volume| {
//!     println!("volume is now {volume}");
//! });
//! volume_changed.emit(0.5);
//!
//! let vote = ValueSignal::<(), bool, CollectAll>::new();
//! vote.connect_same_thread(&connections, |_| true);
//! vote.connect_same_thread(&connections, |_| false);
//! assert_eq!(vote.emit(()), vec![true, false]);
//!
//! // Dropping the list disconnects everything it owns.
//! drop(connections);
//! assert!(volume_changed.is_empty());
//! ```
//!
//! # Cross-Thread Example
//!
//! ```
//! use std::sync::Arc;
//! use tether::{Invalidator, ScopedConnection, Signal, ThreadEventLoop};
//!
//! let audio = Arc::new(ThreadEventLoop::new()?);
//! let receiver = Invalidator::new();
//! let connection = ScopedConnection::new();
//!
//! let transport_started = Signal::<u64>::new();
//! transport_started.connect_cross_thread(
//!     &connection,
//!     Some(receiver.record()),
//!     audio.clone(),
//!     |sample| println!("rolling from sample {sample}"),
//! );
//!
//! transport_started.emit(48_000);
//! audio.stop_and_join();
//! # Ok::<(), tether::EventLoopError>(())
//! ```

pub mod combiner;
pub mod connection;
mod error;
pub mod event_loop;
pub mod invalidation;
pub mod logging;
mod request;
pub mod signal;
mod thread_loop;

pub use combiner::{CollectAll, Combiner, LastValueOr, OptionalLastValue};
pub use connection::{
    Connection, ConnectionId, ConnectionOwner, ScopedConnection, ScopedConnectionList,
};
pub use error::{EventLoopError, Result};
pub use event_loop::{EventLoop, ManualEventLoop};
pub use invalidation::{InvalidationRecord, Invalidator};
pub use request::SlotRequest;
pub use signal::{Signal, ValueSignal};
pub use thread_loop::{EventLoopBuilder, EventLoopConfig, ThreadEventLoop};

static_assertions::assert_impl_all!(Signal<i32>: Send, Sync);
static_assertions::assert_impl_all!(ValueSignal<i32, i32>: Send, Sync);
static_assertions::assert_impl_all!(Connection: Send, Sync);
static_assertions::assert_impl_all!(ScopedConnection: Send, Sync);
static_assertions::assert_impl_all!(ScopedConnectionList: Send, Sync);
static_assertions::assert_impl_all!(InvalidationRecord: Send, Sync);
static_assertions::assert_impl_all!(ThreadEventLoop: Send, Sync);
static_assertions::assert_impl_all!(ManualEventLoop: Send, Sync);
static_assertions::assert_impl_all!(SlotRequest: Send);
