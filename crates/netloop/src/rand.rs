use rand::{Rng, rng};

/// Source of random words for correlation-id generation.
///
/// Swap in a deterministic source to make ids predictable in tests.
///
/// # Example
/// ```
/// use netloop::{RandSource, RequestIdGenerator};
///
/// struct Zero;
/// impl RandSource<u64> for Zero {
///     fn rand(&self) -> u64 {
///         0
///     }
/// }
///
/// let ids = RequestIdGenerator::with_rng(Zero);
/// assert_eq!(ids.next(4).as_str(), "0000");
/// ```
pub trait RandSource<T> {
    fn rand(&self) -> T;
}

/// Draws from the calling thread's `rand::rng()`.
///
/// Zero-sized and `Send + Sync`: the generator is looked up on every call, so
/// each worker thread uses its own without locking.
#[derive(Default, Clone, Copy, Debug)]
pub struct ThreadRandom;

impl RandSource<u64> for ThreadRandom {
    fn rand(&self) -> u64 {
        rng().random()
    }
}
