use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::time::Instant;

use super::states::JobState;

/// A job identifier. Monotonically increasing and unique for the lifetime of
/// the process; never reused even after the job it names is freed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct JobId(NonZeroU64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Builds a `JobId` from a client-supplied wire value. `0` is never a
    /// valid id (ids are allocated starting at 1), so it maps to `None`
    /// rather than panicking.
    pub fn from_wire(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    #[cfg(test)]
    pub(crate) fn for_test(n: u64) -> Self {
        Self(NonZeroU64::new(n).expect("test id must be nonzero"))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out unique, monotonically increasing job ids. Shared by the core
/// across `put` calls; a plain `AtomicU64` is enough because ids are only
/// ever allocated under the core's mutex, but keeping it lock-free anyway
/// costs nothing and avoids a second invariant to maintain.
#[derive(Debug, Default)]
pub struct JobIdGen(AtomicU64);

impl JobIdGen {
    pub fn next(&self) -> JobId {
        let id = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        JobId(NonZeroU64::new(id).expect("id counter started at 1"))
    }
}

/// A single unit of work. Identity is `id`; everything else may change over
/// the job's lifetime as it moves between the ready, delay, reserved, and
/// buried containers (`spec.md` §3).
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub pri: u32,
    pub ttr: u32,
    /// Job body, excluding the trailing CR-LF the client sent after it.
    pub body: Bytes,
    pub state: JobState,
    pub created: Instant,

    pub reserves: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub buries: u64,
    pub kicks: u64,
}
