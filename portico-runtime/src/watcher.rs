//! Notifications delivered by an external watch feed.
//!
//! The feed itself (list/watch against an apiserver, or anything else producing the same
//! notifications) lives outside this crate. Its payloads are decoded once into [`Event`] at
//! that boundary, so the rest of the runtime never sees untyped objects.

/// Watch notifications for objects of kind `K`
#[derive(Clone, Debug, PartialEq)]
pub enum Event<K> {
    /// An object was observed for the first time
    Added(K),
    /// An object changed
    ///
    /// Periodic resyncs arrive as updates where `old` and `new` share a resourceVersion.
    Updated {
        /// The previously cached revision
        old: K,
        /// The freshly observed revision
        new: K,
    },
    /// An object was deleted
    ///
    /// NOTE: This should not be used for managing persistent state elsewhere, since
    /// events may be lost if the watch feed is unavailable.
    Deleted(K),
    /// An object was deleted while the feed was disconnected, so its final state is unknown
    DeletedFinalStateUnknown(Tombstone<K>),
}

/// The last known state of an object whose deletion was observed only after the fact
#[derive(Clone, Debug, PartialEq)]
pub struct Tombstone<K> {
    /// The `name` or `namespace/name` key the object was cached under
    pub key: String,
    /// The last cached revision, if the feed still had one
    pub obj: Option<K>,
}

impl<K> Event<K> {
    /// Whether the event signals that the object is gone
    pub fn is_deletion(&self) -> bool {
        matches!(self, Event::Deleted(_) | Event::DeletedFinalStateUnknown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, Tombstone};

    #[test]
    fn only_deletes_and_tombstones_are_deletions() {
        assert!(!Event::Added(1).is_deletion());
        assert!(!Event::Updated { old: 1, new: 2 }.is_deletion());
        assert!(Event::Deleted(3).is_deletion());
        let gone: Event<u8> = Event::DeletedFinalStateUnknown(Tombstone {
            key: "public".into(),
            obj: None,
        });
        assert!(gone.is_deletion());
    }
}
