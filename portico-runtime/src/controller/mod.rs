//! Runs reconcile workers over a shared [`WorkQueue`]

use std::{sync::Arc, time::Duration};

use portico_core::{Gateway, GatewayClass, DEFAULT_CONTROLLER_NAME, SUPPORTED_VERSION};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

use crate::{
    client::StatusWriter,
    reconciler::Reconciler,
    reflector::{ObjectCache, ObjectRef},
    router::{gateway_class_ref, EventRouter},
    utils::RetryBackoff,
    workqueue::WorkQueue,
};

/// Why the cache sync gate was never passed
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailure {
    /// Shutdown was requested before the cache synced
    #[error("shutdown requested")]
    Cancelled,
    /// The configured sync timeout elapsed
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors that stop a [`Controller`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The cache never reported itself synced
    #[error("error waiting for caches to sync: {0}")]
    CacheSyncFailed(#[source] SyncFailure),
}

/// Result type of [`Controller::run`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Accumulates all options that can be provided on a [`Controller`]
///
/// Options are set builder-style, and can also be loaded from any serde format, with
/// missing fields taking their defaults:
///
/// ```
/// use portico_runtime::controller::Config;
/// use std::time::Duration;
/// let config = Config::default().workers(4).max_retries(3).sync_timeout(Duration::from_secs(30));
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Failed status writes after which a key is dropped
    pub max_retries: u32,
    /// Backoff after the first failure, doubled on every further failure
    pub base_delay: Duration,
    /// Upper bound for the backoff
    pub max_delay: Duration,
    /// The only `apiVersion` accepted by the controller
    pub supported_version: String,
    /// The `spec.controllerName` owned by this controller, `None` to own every class
    pub controller_name: Option<String>,
    /// How long to wait for the cache to sync before giving up, `None` to wait forever
    pub sync_timeout: Option<Duration>,
    /// How often the cache is asked whether it has synced
    pub sync_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            supported_version: SUPPORTED_VERSION.to_string(),
            controller_name: Some(DEFAULT_CONTROLLER_NAME.to_string()),
            sync_timeout: None,
            sync_poll_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Sets the number of reconcile workers
    ///
    /// At least one worker always runs.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the number of failed writes after which a key is dropped
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff range for failed writes
    #[must_use]
    pub fn backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Sets the `apiVersion` the controller accepts
    #[must_use]
    pub fn supported_version(mut self, version: impl Into<String>) -> Self {
        self.supported_version = version.into();
        self
    }

    /// Sets the `spec.controllerName` the controller owns
    #[must_use]
    pub fn controller_name(mut self, name: Option<String>) -> Self {
        self.controller_name = name;
        self
    }

    /// Fails start-up if the cache has not synced within `timeout`
    #[must_use]
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Sets how often the cache sync gate is polled
    #[must_use]
    pub fn sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }
}

/// Reconciles [`GatewayClass`] status with a pool of workers
///
/// Events reach the controller's queue through routers obtained from
/// [`Controller::router`] and [`Controller::gateway_router`]; [`Controller::run`] then
/// works the queue until cancelled.
pub struct Controller<C, W> {
    reconciler: Arc<Reconciler<C, W>>,
    queue: WorkQueue<ObjectRef>,
    config: Config,
    span: Span,
}

impl<C, W> Controller<C, W>
where
    C: ObjectCache<GatewayClass> + 'static,
    W: StatusWriter<GatewayClass> + 'static,
{
    /// Creates a controller reading from `cache` and writing through `writer`
    pub fn new(cache: C, writer: W, config: Config) -> Self {
        let span = tracing::info_span!("controller");
        let queue = Self::queue_within(&config, &span);
        let reconciler = Reconciler::new(cache, writer)
            .supported_version(config.supported_version.clone())
            .controller_name(config.controller_name.clone())
            .max_retries(config.max_retries);
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            config,
            span,
        }
    }

    /// Emits all controller logs inside `span`, including those of its queue
    ///
    /// Replaces the queue, so call this before taking [`queue`](Self::queue) or router handles.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.queue = Self::queue_within(&self.config, &span);
        self.span = span;
        self
    }

    fn queue_within(config: &Config, span: &Span) -> WorkQueue<ObjectRef> {
        WorkQueue::with_span(
            RetryBackoff::new(config.base_delay, config.max_delay),
            tracing::debug_span!(parent: span, "workqueue"),
        )
    }

    /// A handle to the queue the workers consume
    pub fn queue(&self) -> WorkQueue<ObjectRef> {
        self.queue.clone()
    }

    /// A router feeding [`GatewayClass`] events into this controller
    pub fn router(&self) -> EventRouter<GatewayClass> {
        EventRouter::new(self.queue(), self.config.supported_version.clone())
            .with_span(tracing::debug_span!(parent: &self.span, "router", kind = "GatewayClass"))
    }

    /// A router feeding [`Gateway`] events into this controller, keyed by their class
    pub fn gateway_router(&self) -> EventRouter<Gateway, fn(&Gateway) -> Option<ObjectRef>> {
        EventRouter::new(self.queue(), self.config.supported_version.clone())
            .with_mapper(gateway_class_ref as fn(&Gateway) -> Option<ObjectRef>)
            .with_span(tracing::debug_span!(parent: &self.span, "router", kind = "Gateway"))
    }

    /// Waits for the cache, then reconciles until `token` is cancelled
    ///
    /// In-flight reconciles are allowed to observe the cancellation and finish before this
    /// returns.
    ///
    /// # Errors
    ///
    /// [`Error::CacheSyncFailed`] if `token` fires or the sync timeout elapses before the
    /// cache has synced.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.run_inner(token).instrument(span).await
    }

    async fn run_inner(self, token: CancellationToken) -> Result<()> {
        if let Err(failure) = self.wait_for_sync(&token).await {
            error!(error = %failure, "error waiting for caches to sync");
            self.queue.shutdown();
            return Err(Error::CacheSyncFailed(failure));
        }

        let workers = self.config.workers.max(1);
        info!(workers, "starting workers");
        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            let token = token.clone();
            let span = tracing::debug_span!(parent: &self.span, "worker", id);
            tasks.spawn(
                async move {
                    while let Some(key) = queue.get().await {
                        let outcome = reconciler.process(&queue, key, &token).await;
                        debug!(?outcome, "reconcile finished");
                        // immediate requeues must not starve the event feed
                        tokio::task::yield_now().await;
                    }
                    debug!("worker stopped");
                }
                .instrument(span),
            );
        }

        info!("started workers");
        token.cancelled().await;
        info!("shutting down workers");
        self.queue.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker failed");
            }
        }
        Ok(())
    }

    async fn wait_for_sync(&self, token: &CancellationToken) -> std::result::Result<(), SyncFailure> {
        let cache = self.reconciler.cache();
        let synced = async {
            let period = self.config.sync_poll_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if cache.has_synced() {
                    return;
                }
                debug!("waiting for cache to sync");
            }
        };
        let timeout = async {
            match self.config.sync_timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => futures::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = synced => Ok(()),
            () = token.cancelled() => Err(SyncFailure::Cancelled),
            timeout = timeout => Err(SyncFailure::TimedOut(timeout)),
        }
    }
}
