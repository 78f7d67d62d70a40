//! Stable identifiers for long-lived engine objects.
//!
//! Per the design notes, `Connection`s and `Download`s are never linked by
//! raw pointer. Cross references are plain integer IDs resolved through
//! [`crate::registry::Registry`] under that map's own lock, which turns the
//! original cyclic pointer graph into ordinary graph edges.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! stable_id {
    ($name:ident, $counter:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

stable_id!(DownloadId, DOWNLOAD_ID_COUNTER);
stable_id!(ConnectionId, CONNECTION_ID_COUNTER);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = DownloadId::next();
        let b = DownloadId::next();
        assert!(b.as_u64() > a.as_u64());
    }
}
