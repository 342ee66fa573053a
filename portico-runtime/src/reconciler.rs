//! Drives the status of a single [`GatewayClass`] toward the condition policy.
use chrono::Utc;
use portico_core::{
    accepts_controller, compute_conditions, conditions_match, merge_conditions, GatewayClass,
    GatewayClassStatus, Resource, ResourceExt, Time, DEFAULT_CONTROLLER_NAME, SUPPORTED_VERSION,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::{
    client::{StatusError, StatusWriter},
    reflector::{ObjectCache, ObjectRef},
    workqueue::WorkQueue,
};

/// What a single reconcile pass did with its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object is no longer cached
    Deleted,
    /// The class is claimed by another controller
    Ignored,
    /// The observed status already matches the policy
    UpToDate,
    /// A new status was written
    Updated {
        /// resourceVersion returned by the write
        resource_version: String,
    },
    /// The write lost an optimistic concurrency race and was requeued immediately
    Conflict,
    /// The write failed and was requeued with backoff
    Retrying {
        /// Consecutive failures so far
        failures: u32,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// The write failed too many times and the key was given up on
    Dropped {
        /// Consecutive failures, including this one
        failures: u32,
    },
    /// Shutdown interrupted the write
    Cancelled,
}

/// Computes and writes [`GatewayClass`] status for keys handed out by a [`WorkQueue`]
pub struct Reconciler<C, W> {
    cache: C,
    writer: W,
    supported_version: String,
    controller_name: Option<String>,
    max_retries: u32,
}

impl<C, W> Reconciler<C, W>
where
    C: ObjectCache<GatewayClass>,
    W: StatusWriter<GatewayClass>,
{
    /// Reconciles classes served at [`SUPPORTED_VERSION`] and claimed by
    /// [`DEFAULT_CONTROLLER_NAME`], giving up after 5 failed writes
    pub fn new(cache: C, writer: W) -> Self {
        Self {
            cache,
            writer,
            supported_version: SUPPORTED_VERSION.to_string(),
            controller_name: Some(DEFAULT_CONTROLLER_NAME.to_string()),
            max_retries: 5,
        }
    }

    /// The only `apiVersion` that is accepted
    #[must_use]
    pub fn supported_version(mut self, version: impl Into<String>) -> Self {
        self.supported_version = version.into();
        self
    }

    /// The `spec.controllerName` this controller owns, or `None` to own every class
    #[must_use]
    pub fn controller_name(mut self, name: Option<String>) -> Self {
        self.controller_name = name;
        self
    }

    /// Number of failed writes after which a key is dropped
    ///
    /// Clamped to at least one attempt.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// The cache objects are read from
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Runs one reconcile pass for `key`, which must have been obtained from `queue`
    ///
    /// The key is always released back to `queue`, either with `done` or with a requeue.
    pub async fn process(
        &self,
        queue: &WorkQueue<ObjectRef>,
        key: ObjectRef,
        token: &CancellationToken,
    ) -> ReconcileOutcome {
        let span = tracing::info_span!("reconciling object", "object.ref" = %key);
        self.process_inner(queue, key, token).instrument(span).await
    }

    async fn process_inner(
        &self,
        queue: &WorkQueue<ObjectRef>,
        key: ObjectRef,
        token: &CancellationToken,
    ) -> ReconcileOutcome {
        let Some(obj) = self.cache.get(&key) else {
            debug!("object no longer exists");
            queue.forget(&key);
            queue.done(&key);
            return ReconcileOutcome::Deleted;
        };

        if !accepts_controller(&obj.spec.controller_name, self.controller_name.as_deref()) {
            debug!(
                controller_name = %obj.spec.controller_name,
                "class belongs to another controller"
            );
            queue.forget(&key);
            queue.done(&key);
            return ReconcileOutcome::Ignored;
        }

        let desired = compute_conditions(obj.api_version(), &self.supported_version);
        if conditions_match(obj.conditions(), &desired) {
            debug!("status up to date");
            queue.forget(&key);
            queue.done(&key);
            return ReconcileOutcome::UpToDate;
        }

        let status = GatewayClassStatus {
            conditions: merge_conditions(
                obj.conditions(),
                &desired,
                Time(Utc::now()),
                obj.generation(),
            ),
        };

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("shutdown interrupted status write");
                queue.done(&key);
                return ReconcileOutcome::Cancelled;
            }
            result = self.writer.update_status(obj.as_ref(), status) => result,
        };

        match result {
            Ok(resource_version) => {
                info!(%resource_version, "status updated");
                queue.forget(&key);
                queue.done(&key);
                ReconcileOutcome::Updated { resource_version }
            }
            Err(StatusError::Conflict(reason)) => {
                debug!(%reason, "status write conflicted, retrying");
                queue.requeue_after(key, Duration::ZERO);
                ReconcileOutcome::Conflict
            }
            Err(err @ StatusError::Transient(_)) => {
                let failures = queue.failures(&key).saturating_add(1);
                if failures >= self.max_retries {
                    error!(error = %err, failures, "dropping object after repeated failures");
                    queue.forget(&key);
                    queue.done(&key);
                    ReconcileOutcome::Dropped { failures }
                } else {
                    warn!(error = %err, failures, "status write failed");
                    let delay = queue.requeue_rate_limited(key);
                    ReconcileOutcome::Retrying { failures, delay }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReconcileOutcome, Reconciler};
    use crate::{
        client::{StatusError, StatusWriter},
        reflector::{store, ObjectRef, Store},
        utils::RetryBackoff,
        watcher::Event,
        workqueue::WorkQueue,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use portico_core::{
        compute_conditions, merge_conditions, GatewayClass, GatewayClassStatus, Time,
        DEFAULT_CONTROLLER_NAME, SUPPORTED_VERSION,
    };
    use std::{collections::VecDeque, time::Duration};
    use tokio::time::{advance, pause};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct ScriptedWriter {
        responses: Mutex<VecDeque<Result<String, StatusError>>>,
        writes: Mutex<Vec<(String, GatewayClassStatus)>>,
    }

    impl ScriptedWriter {
        fn respond(self, response: Result<String, StatusError>) -> Self {
            self.responses.lock().push_back(response);
            self
        }
    }

    #[async_trait]
    impl StatusWriter<GatewayClass> for ScriptedWriter {
        async fn update_status(
            &self,
            obj: &GatewayClass,
            status: GatewayClassStatus,
        ) -> Result<String, StatusError> {
            let rv = obj.metadata.resource_version.clone().unwrap_or_default();
            self.writes.lock().push((rv, status));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("written".to_string()))
        }
    }

    struct StuckWriter;

    #[async_trait]
    impl StatusWriter<GatewayClass> for StuckWriter {
        async fn update_status(
            &self,
            _obj: &GatewayClass,
            _status: GatewayClassStatus,
        ) -> Result<String, StatusError> {
            futures::future::pending().await
        }
    }

    fn cached(classes: impl IntoIterator<Item = GatewayClass>) -> Store<GatewayClass> {
        let (reader, mut writer) = store();
        writer.apply_initial_list(classes);
        reader
    }

    fn class(api_version: &str) -> GatewayClass {
        let mut gc = GatewayClass::new("public", DEFAULT_CONTROLLER_NAME);
        gc.api_version = api_version.into();
        gc.metadata.resource_version = Some("10".into());
        gc.metadata.generation = Some(1);
        gc
    }

    fn epoch() -> Time {
        Time(DateTime::<Utc>::from_timestamp(0, 0).unwrap())
    }

    fn queue() -> WorkQueue<ObjectRef> {
        WorkQueue::new(RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(60)))
    }

    async fn take(queue: &WorkQueue<ObjectRef>) -> ObjectRef {
        queue.add(ObjectRef::new("public"));
        queue.get().await.unwrap()
    }

    #[tokio::test]
    async fn supported_class_is_accepted() {
        let reconciler = Reconciler::new(cached([class(SUPPORTED_VERSION)]), ScriptedWriter::default());
        let q = queue();
        let key = take(&q).await;
        let outcome = reconciler.process(&q, key, &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                resource_version: "written".into()
            }
        );

        let writes = reconciler.writer.writes.lock();
        assert_eq!(writes.len(), 1);
        let (rv, status) = &writes[0];
        assert_eq!(rv, "10");
        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].type_, "Accepted");
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.conditions[1].type_, "SupportedVersion");
        assert_eq!(status.conditions[1].status, "True");
        assert!(status.conditions.iter().all(|c| c.observed_generation == Some(1)));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn older_class_is_rejected() {
        let reconciler = Reconciler::new(
            cached([class("gateway.networking.k8s.io/v1beta1")]),
            ScriptedWriter::default(),
        );
        let q = queue();
        let key = take(&q).await;
        reconciler.process(&q, key, &CancellationToken::new()).await;

        let writes = reconciler.writer.writes.lock();
        let status = &writes[0].1;
        assert!(status.conditions.iter().all(|c| c.status == "False"));
        assert!(status.conditions[1].message.contains(SUPPORTED_VERSION));
    }

    #[tokio::test]
    async fn matching_status_is_not_rewritten() {
        let mut gc = class(SUPPORTED_VERSION);
        gc.status = Some(GatewayClassStatus {
            conditions: merge_conditions(
                &[],
                &compute_conditions(SUPPORTED_VERSION, SUPPORTED_VERSION),
                epoch(),
                Some(1),
            ),
        });
        let reconciler = Reconciler::new(cached([gc]), ScriptedWriter::default());
        let q = queue();
        for _ in 0..3 {
            let key = take(&q).await;
            let outcome = reconciler.process(&q, key, &CancellationToken::new()).await;
            assert_eq!(outcome, ReconcileOutcome::UpToDate);
        }
        assert!(reconciler.writer.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn generation_bump_alone_is_not_rewritten() {
        let mut gc = class(SUPPORTED_VERSION);
        gc.status = Some(GatewayClassStatus {
            conditions: merge_conditions(
                &[],
                &compute_conditions(SUPPORTED_VERSION, SUPPORTED_VERSION),
                epoch(),
                Some(1),
            ),
        });
        gc.metadata.generation = Some(2);
        let mut unstamped = class(SUPPORTED_VERSION);
        unstamped.metadata.name = Some("internal".into());
        unstamped.status = Some(GatewayClassStatus {
            conditions: merge_conditions(
                &[],
                &compute_conditions(SUPPORTED_VERSION, SUPPORTED_VERSION),
                epoch(),
                None,
            ),
        });
        let reconciler = Reconciler::new(cached([gc, unstamped]), ScriptedWriter::default());
        let q = queue();
        for name in ["public", "internal"] {
            q.add(ObjectRef::new(name));
            let key = q.get().await.unwrap();
            assert_eq!(
                reconciler.process(&q, key, &CancellationToken::new()).await,
                ReconcileOutcome::UpToDate
            );
        }
        assert!(reconciler.writer.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn rewrite_keeps_transition_times_and_stamps_generation() {
        let mut gc = class(SUPPORTED_VERSION);
        let mut conditions = merge_conditions(
            &[],
            &compute_conditions(SUPPORTED_VERSION, SUPPORTED_VERSION),
            epoch(),
            Some(1),
        );
        conditions[1].message = "stale".into();
        gc.status = Some(GatewayClassStatus { conditions });
        gc.metadata.generation = Some(2);
        let reconciler = Reconciler::new(cached([gc]), ScriptedWriter::default());
        let q = queue();
        let key = take(&q).await;
        reconciler.process(&q, key, &CancellationToken::new()).await;

        let writes = reconciler.writer.writes.lock();
        let status = &writes[0].1;
        // same status values, so transition times are preserved
        assert!(status.conditions.iter().all(|c| c.last_transition_time == epoch()));
        assert!(status.conditions.iter().all(|c| c.observed_generation == Some(2)));
        assert_eq!(status.conditions[1].message, "version supported by controller");
    }

    #[tokio::test]
    async fn missing_object_is_treated_as_deleted() {
        let reconciler = Reconciler::new(cached([]), ScriptedWriter::default());
        let q = queue();
        let key = take(&q).await;
        let outcome = reconciler.process(&q, key, &CancellationToken::new()).await;
        assert_eq!(outcome, ReconcileOutcome::Deleted);
        assert!(reconciler.writer.writes.lock().is_empty());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn deleted_via_tombstone_completes_without_error() {
        let (reader, mut writer) = store();
        writer.apply_initial_list([class(SUPPORTED_VERSION)]);
        writer.apply_watcher_event(&Event::DeletedFinalStateUnknown(crate::watcher::Tombstone {
            key: "public".into(),
            obj: None,
        }));
        let reconciler = Reconciler::new(reader, ScriptedWriter::default());
        let q = queue();
        let key = take(&q).await;
        assert_eq!(
            reconciler.process(&q, key, &CancellationToken::new()).await,
            ReconcileOutcome::Deleted
        );
        assert_eq!(q.failures(&ObjectRef::new("public")), 0);
    }

    #[tokio::test]
    async fn foreign_classes_are_left_alone() {
        let mut gc = class(SUPPORTED_VERSION);
        gc.spec.controller_name = "example.net/other".into();
        let reconciler = Reconciler::new(cached([gc.clone()]), ScriptedWriter::default());
        let q = queue();
        let key = take(&q).await;
        assert_eq!(
            reconciler.process(&q, key, &CancellationToken::new()).await,
            ReconcileOutcome::Ignored
        );
        assert!(reconciler.writer.writes.lock().is_empty());

        let claim_all = Reconciler::new(cached([gc]), ScriptedWriter::default()).controller_name(None);
        let key = take(&q).await;
        assert!(matches!(
            claim_all.process(&q, key, &CancellationToken::new()).await,
            ReconcileOutcome::Updated { .. }
        ));
    }

    #[tokio::test]
    async fn conflicts_requeue_immediately_without_counting() {
        let writer = ScriptedWriter::default()
            .respond(Err(StatusError::Conflict("modified".into())))
            .respond(Err(StatusError::Conflict("modified".into())));
        let reconciler = Reconciler::new(cached([class(SUPPORTED_VERSION)]), writer).max_retries(1);
        let q = queue();
        let token = CancellationToken::new();

        let key = take(&q).await;
        assert_eq!(reconciler.process(&q, key, &token).await, ReconcileOutcome::Conflict);
        assert_eq!(q.len(), 1);
        let key = q.get().await.unwrap();
        assert_eq!(reconciler.process(&q, key, &token).await, ReconcileOutcome::Conflict);
        let key = q.get().await.unwrap();
        assert_eq!(q.failures(&key), 0);
        assert!(matches!(
            reconciler.process(&q, key, &token).await,
            ReconcileOutcome::Updated { .. }
        ));
    }

    #[tokio::test]
    async fn transient_failures_are_dropped_after_max_retries() {
        pause();
        let writer = ScriptedWriter::default()
            .respond(Err(StatusError::Transient("boom".into())))
            .respond(Err(StatusError::Transient("boom".into())))
            .respond(Err(StatusError::Transient("boom".into())));
        let reconciler = Reconciler::new(cached([class(SUPPORTED_VERSION)]), writer).max_retries(3);
        let q = queue();
        let token = CancellationToken::new();

        let key = take(&q).await;
        assert_eq!(
            reconciler.process(&q, key, &token).await,
            ReconcileOutcome::Retrying {
                failures: 1,
                delay: Duration::from_secs(1)
            }
        );
        advance(Duration::from_secs(1)).await;
        let key = q.get().await.unwrap();
        assert_eq!(
            reconciler.process(&q, key, &token).await,
            ReconcileOutcome::Retrying {
                failures: 2,
                delay: Duration::from_secs(2)
            }
        );
        advance(Duration::from_secs(2)).await;
        let key = q.get().await.unwrap();
        assert_eq!(
            reconciler.process(&q, key, &token).await,
            ReconcileOutcome::Dropped { failures: 3 }
        );

        advance(Duration::from_secs(600)).await;
        assert!(q.is_empty());
        assert_eq!(q.failures(&ObjectRef::new("public")), 0);
        assert_eq!(reconciler.writer.writes.lock().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stuck_write() {
        let reconciler = Reconciler::new(cached([class(SUPPORTED_VERSION)]), StuckWriter);
        let q = queue();
        let token = CancellationToken::new();
        let key = take(&q).await;
        let pass = reconciler.process(&q, key, &token);
        token.cancel();
        assert_eq!(pass.await, ReconcileOutcome::Cancelled);
        // released, so a fresh add is handed out again
        q.add(ObjectRef::new("public"));
        assert_eq!(q.len(), 1);
    }
}
