//! Logging facilities for tether.
//!
//! tether uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("tether::event_loop=debug,tether::signal=trace")
//!     .init();
//! ```
//!
//! Connect, disconnect and emission events are logged at `trace` level.
//! Event loop start and shutdown are logged at `debug` level.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target.
    pub const CORE: &str = "tether";
    /// Signal emission and slot bookkeeping.
    pub const SIGNAL: &str = "tether::signal";
    /// Connection handles and their scoped owners.
    pub const CONNECTION: &str = "tether::connection";
    /// Event loops and deferred slot requests.
    pub const EVENT_LOOP: &str = "tether::event_loop";
    /// Invalidation records.
    pub const INVALIDATION: &str = "tether::invalidation";
}

#[cfg(test)]
mod tests {
    use super::targets;

    #[test]
    fn test_targets_are_nested_under_core() {
        for target in [
            targets::SIGNAL,
            targets::CONNECTION,
            targets::EVENT_LOOP,
            targets::INVALIDATION,
        ] {
            assert!(target.starts_with(targets::CORE));
        }
    }
}
