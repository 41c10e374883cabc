//! Result combiners for value-returning signals.
//!
//! When a [`ValueSignal`](crate::ValueSignal) is emitted, every surviving slot
//! is invoked and its return value is handed to the signal's combiner, which
//! folds the values into the emission's result. Slots are invoked lazily as
//! the combiner pulls from the iterator, so a combiner must drain the iterator
//! completely: callers rely on the side effects of every connected slot.
//!
//! # Provided Combiners
//!
//! - [`OptionalLastValue`] - Keeps the last value, `None` with no slots (default)
//! - [`LastValueOr`] - Keeps the last value, `R::default()` with no slots
//! - [`CollectAll`] - Collects every value in connection order
//!
//! # Example
//!
//! ```
//! use tether::{CollectAll, ValueSignal};
//!
//! let query = ValueSignal::<i32, i32, CollectAll>::new();
//! query.connect(|n| n + 1);
//! query.connect(|n| n * 10);
//!
//! assert_eq!(query.emit(4), vec![5, 40]);
//! ```

/// Folds the return values of a signal's slots into one result.
pub trait Combiner<R> {
    /// The type produced by an emission.
    type Output;

    /// Combine the results of one emission.
    ///
    /// `results` yields one value per invoked slot, in connection order. The
    /// iterator must be consumed to the end.
    fn combine<I>(&self, results: I) -> Self::Output
    where
        I: Iterator<Item = R>;
}

/// Keeps only the value returned by the last slot.
///
/// Every slot is still invoked; earlier values are discarded. An emission
/// with no connected slots yields `None`. This is the default combiner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionalLastValue;

impl<R> Combiner<R> for OptionalLastValue {
    type Output = Option<R>;

    fn combine<I>(&self, results: I) -> Option<R>
    where
        I: Iterator<Item = R>,
    {
        results.last()
    }
}

/// Like [`OptionalLastValue`], but falls back to `R::default()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LastValueOr;

impl<R: Default> Combiner<R> for LastValueOr {
    type Output = R;

    fn combine<I>(&self, results: I) -> R
    where
        I: Iterator<Item = R>,
    {
        results.last().unwrap_or_default()
    }
}

/// Collects every slot's value, in connection order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectAll;

impl<R> Combiner<R> for CollectAll {
    type Output = Vec<R>;

    fn combine<I>(&self, results: I) -> Vec<R>
    where
        I: Iterator<Item = R>,
    {
        results.collect()
    }
}
