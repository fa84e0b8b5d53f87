//! Process-wide monotonic ULID generator (§9 design notes: "Global ULID
//! generator ... a process-wide monotonic ID source ... must be
//! thread-safe and never produce non-monotonic values within a node").

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ulid::Generator;

static GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// Generate the next ULID, guaranteed monotonic relative to the previous
/// call within this process.
pub fn next_ulid() -> ulid::Ulid {
    let mut gen = GENERATOR.lock();
    // `Generator::generate` only fails if called more than 2^80 times
    // within the same millisecond; fall back to a fresh timestamp-based
    // ULID rather than panic a scheduler thread over it.
    gen.generate().unwrap_or_else(|_| ulid::Ulid::new())
}
