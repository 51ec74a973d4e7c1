use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a connection for the lifetime of the process. Plays the role of
/// the "file-descriptor plus creation epoch" identity from `spec.md` §3: since
/// this crate never touches a raw fd directly (tokio owns it), a monotonic
/// counter is the whole identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct ConnIdGen(AtomicU64);

impl ConnIdGen {
    pub fn next(&self) -> ConnId {
        ConnId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}
