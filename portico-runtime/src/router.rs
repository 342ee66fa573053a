//! Translates watch notifications into queued keys.
use futures::{Stream, StreamExt};
use portico_core::{Gateway, GroupVersion, Resource, ResourceExt, GATEWAY_API_GROUP};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, Span};

use crate::{
    reflector::ObjectRef,
    watcher::{Event, Tombstone},
    workqueue::WorkQueue,
};

/// Reasons a notification could not be turned into a key
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The object carried no usable name
    #[error("malformed {kind} event: no key could be derived")]
    MalformedEvent {
        /// The `kind` declared by the offending object
        kind: String,
    },
    /// A tombstone whose object is gone and whose key does not parse
    #[error("unrecoverable tombstone with key {0:?}")]
    UnrecoverableTombstone(String),
}

/// Key derivation used when no mapper is configured
pub type DefaultMapper<K> = fn(&K) -> Option<ObjectRef>;

/// Filters notifications for kind `K` and pushes the resulting keys onto a [`WorkQueue`]
///
/// Only objects declaring the configured `apiVersion` are routed. By default an object
/// maps to its own key; [`with_mapper`](EventRouter::with_mapper) routes secondary kinds
/// to the key of the object they depend on instead.
pub struct EventRouter<K, F = DefaultMapper<K>> {
    queue: WorkQueue<ObjectRef>,
    api_version: String,
    mapper: F,
    // Only meaningful when keys are the object's own key
    tombstone_key_fallback: bool,
    span: Span,
    _kind: std::marker::PhantomData<fn(&K)>,
}

impl<K: Resource> EventRouter<K> {
    /// Routes notifications for objects at `api_version` to their own keys
    #[must_use]
    pub fn new(queue: WorkQueue<ObjectRef>, api_version: impl Into<String>) -> Self {
        Self {
            queue,
            api_version: api_version.into(),
            mapper: ObjectRef::from_obj::<K>,
            tombstone_key_fallback: true,
            span: tracing::debug_span!("router"),
            _kind: std::marker::PhantomData,
        }
    }
}

impl<K, F> EventRouter<K, F>
where
    K: Resource,
    F: Fn(&K) -> Option<ObjectRef>,
{
    /// Replaces the key derivation with `mapper`
    ///
    /// Tombstones without an object can no longer be recovered from their own key, since that
    /// key names the secondary object rather than the mapped one.
    #[must_use]
    pub fn with_mapper<G>(self, mapper: G) -> EventRouter<K, G>
    where
        G: Fn(&K) -> Option<ObjectRef>,
    {
        EventRouter {
            queue: self.queue,
            api_version: self.api_version,
            mapper,
            tombstone_key_fallback: false,
            span: self.span,
            _kind: std::marker::PhantomData,
        }
    }

    /// Emits all logs inside `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Decides which key, if any, `event` should enqueue
    ///
    /// `Ok(None)` means the event is deliberately ignored: a resync, or an object at another
    /// `apiVersion`.
    pub fn route(&self, event: &Event<K>) -> Result<Option<ObjectRef>, Error> {
        match event {
            Event::Added(obj) | Event::Deleted(obj) => self.route_object(obj),
            Event::Updated { old, new } => {
                if old.resource_version() == new.resource_version() {
                    trace!(name = %new.name_any(), "skipping resync");
                    return Ok(None);
                }
                self.route_object(new)
            }
            Event::DeletedFinalStateUnknown(tombstone) => self.route_tombstone(tombstone),
        }
    }

    fn route_object(&self, obj: &K) -> Result<Option<ObjectRef>, Error> {
        if !self.handles(obj) {
            return Ok(None);
        }
        (self.mapper)(obj).map(Some).ok_or_else(|| Error::MalformedEvent {
            kind: obj.kind().to_string(),
        })
    }

    fn route_tombstone(&self, tombstone: &Tombstone<K>) -> Result<Option<ObjectRef>, Error> {
        if let Some(obj) = &tombstone.obj {
            debug!(name = %obj.name_any(), "recovered deleted object from tombstone");
            if !self.handles(obj) {
                return Ok(None);
            }
            if let Some(key) = (self.mapper)(obj) {
                return Ok(Some(key));
            }
        }
        if self.tombstone_key_fallback {
            if let Ok(key) = tombstone.key.parse::<ObjectRef>() {
                return Ok(Some(key));
            }
        }
        Err(Error::UnrecoverableTombstone(tombstone.key.clone()))
    }

    fn handles(&self, obj: &K) -> bool {
        debug!(
            name = %obj.name_any(),
            api_version = obj.api_version(),
            kind = obj.kind(),
            "handling object"
        );
        if let Some(owner) = obj.controller_owner() {
            debug!(name = %obj.name_any(), owner = %owner.name, "object has owner");
        }
        if obj.api_version() == self.api_version {
            return true;
        }
        match obj.api_version().parse::<GroupVersion>() {
            Ok(gv) if gv.group == GATEWAY_API_GROUP => debug!(
                name = %obj.name_any(),
                group = %gv.group,
                version = %gv.version,
                kind = obj.kind(),
                "object not handled: unsupported Gateway API version"
            ),
            Ok(gv) => debug!(
                name = %obj.name_any(),
                group = %gv.group,
                version = %gv.version,
                kind = obj.kind(),
                "object not handled: outside the Gateway API group"
            ),
            Err(err) => debug!(
                name = %obj.name_any(),
                kind = obj.kind(),
                error = %err,
                "object not handled"
            ),
        }
        false
    }

    /// Routes `event` and enqueues its key
    ///
    /// Never fails: events that cannot be keyed are logged and dropped.
    pub fn handle(&self, event: Event<K>) {
        let _entered = self.span.enter();
        match self.route(&event) {
            Ok(Some(key)) => {
                debug!(%key, deletion = event.is_deletion(), "enqueueing object");
                self.queue.add(key);
            }
            Ok(None) => {}
            Err(err) => error!(error = %err, "dropping event"),
        }
    }

    /// Handles every event of `events` until it ends or `token` is cancelled
    pub async fn run<S>(&self, events: S, token: CancellationToken)
    where
        S: Stream<Item = Event<K>>,
    {
        let mut events = std::pin::pin!(events);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        let _entered = self.span.enter();
        debug!("event feed stopped");
    }
}

/// Maps a [`Gateway`] to the key of the class it references
///
/// Gateways without a class name map to nothing.
pub fn gateway_class_ref(gateway: &Gateway) -> Option<ObjectRef> {
    let class = gateway.spec.gateway_class_name.as_str();
    (!class.is_empty()).then(|| ObjectRef::new(class))
}
