//! Integration tests for delivery through event loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tether::{
    EventLoop, EventLoopBuilder, Invalidator, ManualEventLoop, ScopedConnection, Signal,
    ThreadEventLoop,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tether=trace")
        .with_test_writer()
        .try_init();
}

#[test]
fn test_slot_runs_on_loop_thread() {
    init_tracing();

    let event_loop = Arc::new(EventLoopBuilder::new().name("receiver").build().unwrap());
    let receiver = Invalidator::new();
    let connection = ScopedConnection::new();
    let (tx, rx) = bounded(1);

    let signal = Signal::<String>::new();
    signal.connect_cross_thread(
        &connection,
        Some(receiver.record()),
        event_loop.clone(),
        move |text| {
            let _ = tx.send((text.clone(), thread::current().id()));
        },
    );

    signal.emit("hello".to_string());

    let (text, ran_on) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(text, "hello");
    assert_eq!(ran_on, event_loop.thread_id());
    assert_ne!(ran_on, thread::current().id());

    event_loop.stop_and_join();
}

#[test]
fn test_invalidated_receiver_never_called() {
    init_tracing();

    let event_loop = Arc::new(ThreadEventLoop::new().unwrap());
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let called = Arc::new(AtomicBool::new(false));

    // Park the loop thread so the deferred call stays queued.
    event_loop
        .post(
            None,
            Box::new(move || {
                let _ = gate_rx.recv();
            }),
        )
        .unwrap();

    let receiver = Invalidator::new();
    let record = receiver.record();
    let signal = Signal::<u32>::new();
    let called_clone = called.clone();
    let _connection = signal.connect_queued(Some(record.clone()), event_loop.clone(), move |_| {
        called_clone.store(true, Ordering::SeqCst);
    });

    signal.emit(1);
    drop(receiver);
    gate_tx.send(()).unwrap();

    event_loop.stop_and_join();
    assert!(!called.load(Ordering::SeqCst));
    assert!(!record.is_alive());
}

#[test]
fn test_missing_record_always_delivers() {
    let main_loop = Arc::new(ManualEventLoop::new("main"));
    let hits = Arc::new(AtomicUsize::new(0));

    let signal = Signal::<()>::new();
    let hits_clone = hits.clone();
    let _connection = signal.connect_queued(None, main_loop.clone(), move |_| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    signal.emit(());
    signal.emit(());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    assert_eq!(main_loop.process_pending(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn test_args_are_cloned_per_emission() {
    let main_loop = Arc::new(ManualEventLoop::new("main"));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let signal = Signal::<Vec<u8>>::new();
    let seen_clone = seen.clone();
    let _connection = signal.connect_queued(None, main_loop.clone(), move |bytes| {
        seen_clone.lock().push(bytes.clone());
    });

    signal.emit(vec![1]);
    signal.emit(vec![2, 3]);
    main_loop.process_pending();

    assert_eq!(*seen.lock(), vec![vec![1], vec![2, 3]]);
}

#[test]
fn test_emit_after_loop_stopped_is_dropped() {
    let main_loop = Arc::new(ManualEventLoop::new("main"));
    let hits = Arc::new(AtomicUsize::new(0));

    let signal = Signal::<()>::new();
    let hits_clone = hits.clone();
    let connection = signal.connect_queued(None, main_loop.clone(), move |_| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    main_loop.stop();
    signal.emit(());

    assert_eq!(main_loop.process_pending(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(connection.is_connected());
}

#[test]
fn test_disconnect_before_processing_still_delivers_posted_call() {
    // Disconnecting ends future emissions; calls already posted belong to
    // the receiver's record, not to the connection.
    let main_loop = Arc::new(ManualEventLoop::new("main"));
    let receiver = Invalidator::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let signal = Signal::<()>::new();
    let hits_clone = hits.clone();
    let connection = signal.connect_queued(Some(receiver.record()), main_loop.clone(), move |_| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    signal.emit(());
    connection.disconnect();
    signal.emit(());

    assert_eq!(main_loop.process_pending(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_many_emitters_one_loop() {
    let event_loop = Arc::new(ThreadEventLoop::new().unwrap());
    let receiver = Invalidator::new();
    let total = Arc::new(AtomicUsize::new(0));
    let loop_thread = event_loop.thread_id();

    let signal = Arc::new(Signal::<usize>::new());
    let total_clone = total.clone();
    let _connection = signal.connect_queued(Some(receiver.record()), event_loop.clone(), move |n| {
        assert_eq!(thread::current().id(), loop_thread);
        total_clone.fetch_add(*n, Ordering::SeqCst);
    });

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let signal = signal.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    signal.emit(1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(event_loop.stop_and_join());
    assert_eq!(total.load(Ordering::SeqCst), 400);
    assert_eq!(receiver.record().use_count(), 1);
}
