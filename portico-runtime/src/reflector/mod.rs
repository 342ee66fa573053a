//! Caches objects in memory

mod object_ref;
pub mod store;

pub use self::object_ref::{Extra as ObjectRefExtra, ObjectRef, ParseObjectRefError};
pub use store::{store, Store};

use crate::watcher;
use futures::{Stream, StreamExt};
use portico_core::Resource;
use std::sync::Arc;

/// Read access to an eventually-consistent mirror of cluster state
///
/// This is the only view of the cluster a reconciler gets. [`Store`] implements it for
/// embedders that drive their own feed; anything else exposing keyed lookups can too.
pub trait ObjectCache<K>: Send + Sync {
    /// Look up the last observed revision of the object behind `key`
    fn get(&self, key: &ObjectRef) -> Option<Arc<K>>;

    /// Whether the cache has caught up with its feed at least once
    fn has_synced(&self) -> bool;
}

impl<K: Send + Sync + 'static> ObjectCache<K> for Store<K> {
    fn get(&self, key: &ObjectRef) -> Option<Arc<K>> {
        Store::get(self, key)
    }

    fn has_synced(&self) -> bool {
        self.is_ready()
    }
}

impl<K, C: ObjectCache<K> + ?Sized> ObjectCache<K> for Arc<C> {
    fn get(&self, key: &ObjectRef) -> Option<Arc<K>> {
        (**self).get(key)
    }

    fn has_synced(&self) -> bool {
        (**self).has_synced()
    }
}

/// Cache objects from a stream of [`watcher::Event`]s into a local [`Store`]
///
/// Observes the raw `Stream` of events, and modifies the cache.
/// It passes the raw stream through unmodified, so it can be handed on to an
/// [`EventRouter`](crate::router::EventRouter).
///
/// The cache contains the last-seen state of objects,
/// which may lag slightly behind the actual state.
pub fn reflector<K, W>(mut writer: store::Writer<K>, stream: W) -> impl Stream<Item = W::Item>
where
    K: Resource + Clone + 'static,
    W: Stream<Item = watcher::Event<K>>,
{
    stream.map(move |event| {
        writer.apply_watcher_event(&event);
        event
    })
}
