use super::ObjectRef;
use crate::watcher;
use ahash::AHashMap;
use educe::Educe;
use parking_lot::RwLock;
use portico_core::Resource;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Cache<K> = Arc<RwLock<AHashMap<ObjectRef, Arc<K>>>>;

/// A writable Store handle
///
/// This is exclusive since it's not safe to share a single `Store` between multiple feeds.
/// In particular, overlapping deletions from two feeds would clobber each other.
#[derive(Debug, Educe)]
#[educe(Default)]
pub struct Writer<K: 'static> {
    store: Cache<K>,
    // Cancelled once the initial listing has been applied; never reset
    synced: CancellationToken,
}

impl<K: 'static + Resource + Clone> Writer<K> {
    /// Return a read handle to the store
    ///
    /// Multiple read handles may be obtained, by either calling `as_reader` multiple times,
    /// or by calling `Store::clone()` afterwards.
    #[must_use]
    pub fn as_reader(&self) -> Store<K> {
        Store {
            store: self.store.clone(),
            synced: self.synced.clone(),
        }
    }

    /// Applies a single watcher event to the store
    pub fn apply_watcher_event(&mut self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Added(obj) | watcher::Event::Updated { new: obj, .. } => {
                if let Some(key) = ObjectRef::from_obj(obj) {
                    self.store.write().insert(key, Arc::new(obj.clone()));
                }
            }
            watcher::Event::Deleted(obj) => {
                if let Some(key) = ObjectRef::from_obj(obj) {
                    self.store.write().remove(&key);
                }
            }
            watcher::Event::DeletedFinalStateUnknown(tombstone) => {
                let key = tombstone
                    .obj
                    .as_ref()
                    .and_then(ObjectRef::from_obj)
                    .or_else(|| tombstone.key.parse().ok());
                if let Some(key) = key {
                    self.store.write().remove(&key);
                }
            }
        }
    }

    /// Replaces the whole cache with an initial listing and marks the store as synced
    pub fn apply_initial_list(&mut self, objs: impl IntoIterator<Item = K>) {
        let listed = objs
            .into_iter()
            .filter_map(|obj| Some((ObjectRef::from_obj(&obj)?, Arc::new(obj))))
            .collect::<AHashMap<_, _>>();
        *self.store.write() = listed;
        self.make_ready();
    }

    /// Marks the store as synced with the feed
    ///
    /// Readers waiting in [`Store::wait_until_ready`] are released.
    pub fn make_ready(&self) {
        self.synced.cancel();
    }
}

/// A readable cache of objects of kind `K`
///
/// Cloning will produce a new reference to the same backing store.
///
/// Cannot be constructed directly since one writer handle is required,
/// use `Writer::as_reader()` instead.
#[derive(Debug, Educe)]
#[educe(Clone)]
pub struct Store<K: 'static> {
    store: Cache<K>,
    synced: CancellationToken,
}

impl<K: 'static> Store<K> {
    /// Retrieve the entry referred to by `key`, if it is in the cache.
    ///
    /// `key.namespace` is ignored for cluster-scoped resources.
    ///
    /// Note that this is a cache and may be stale. Deleted objects may still exist in the cache
    /// despite having been deleted in the cluster, and new objects may not yet exist in the cache.
    #[must_use]
    pub fn get(&self, key: &ObjectRef) -> Option<Arc<K>> {
        let store = self.store.read();
        store
            .get(key)
            // Try to erase the namespace and try again, in case the object is cluster-scoped
            .or_else(|| {
                store.get(&{
                    let mut cluster_key = key.clone();
                    cluster_key.namespace = None;
                    cluster_key
                })
            })
            .cloned()
    }

    /// Return a full snapshot of the current values
    #[must_use]
    pub fn state(&self) -> Vec<Arc<K>> {
        self.store.read().values().cloned().collect()
    }

    /// Whether the writer has declared the store synced
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.synced.is_cancelled()
    }

    /// Wait for the writer to declare the store synced
    ///
    /// Any number of readers may wait; all are released together.
    pub async fn wait_until_ready(&self) {
        self.synced.cancelled().await;
    }

    /// Number of cached objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

/// Create a (Reader, Writer) for a `Store<K>` for a typed resource `K`
///
/// The `Writer` should be fed by a [`reflector`](super::reflector) or driven manually.
#[must_use]
pub fn store<K: 'static + Resource + Clone>() -> (Store<K>, Writer<K>) {
    let w = Writer::default();
    let r = w.as_reader();
    (r, w)
}
