//! Short opaque identifiers used to correlate log lines.
//!
//! A [`CorrelationId`] is generated per request or connection and only ever
//! printed. It is not unique, not secret, and never parsed back.

use crate::{RandSource, ThreadRandom};
use core::fmt;

/// Symbols a correlation id is drawn from: `0-9` followed by `a-z`.
pub const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length used by the dispatcher and connection manager unless configured.
pub const DEFAULT_ID_LENGTH: usize = 5;

/// An opaque alphanumeric token attached to log output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates [`CorrelationId`]s from a non-cryptographic random source.
///
/// Each symbol is chosen independently and uniformly from [`ALPHABET`].
#[derive(Debug, Clone, Default)]
pub struct RequestIdGenerator<R = ThreadRandom>
where
    R: RandSource<u64>,
{
    rng: R,
}

impl RequestIdGenerator<ThreadRandom> {
    /// Creates a generator backed by the thread-local RNG.
    pub fn new() -> Self {
        Self::with_rng(ThreadRandom)
    }
}

impl<R> RequestIdGenerator<R>
where
    R: RandSource<u64>,
{
    /// Creates a generator backed by a custom random source.
    pub const fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Returns a new id of exactly `length` symbols.
    pub fn next(&self, length: usize) -> CorrelationId {
        let id = (0..length)
            .map(|_| ALPHABET[symbol_index(self.rng.rand())] as char)
            .collect();
        CorrelationId(id)
    }
}

/// Maps a full-width random word onto `0..36` with a widening multiply, which
/// avoids the modulo bias of `rand % 36`.
#[inline]
fn symbol_index(word: u64) -> usize {
    ((u128::from(word) * ALPHABET.len() as u128) >> 64) as usize
}
