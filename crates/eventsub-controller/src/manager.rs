//! Subscription manager lifecycle.
//!
//! `Uninitialized -> Initialized -> Running -> Stopped`. The manager owns
//! exactly one backend, picked from configuration at start and kept for
//! its whole lifetime. Reconcile triggers arrive on an mpsc channel from
//! the external watch machinery; each one is reconciled in its own task.

use std::fmt;
use std::sync::Arc;

use eventsub_backend::{
    Backend, BackendKind, DynBackend, DynStreamClient, EventMeshBackend, OAuth2Credentials,
    SinkValidator, StreamBackend,
};
use eventsub_backend::mesh::{MAX_SUBSCRIPTION_NAME_LENGTH, SUBSCRIPTION_NAME_HASH_LENGTH};
use eventsub_backend::stream::{CONSUMER_NAME_HASH_LENGTH, MAX_CONSUMER_NAME_LENGTH};
use eventsub_core::subscription::reasons;
use eventsub_core::{
    DynEventRecorder, DynGatewayRuleStore, DynSubscriptionStore, EventTypeCleaner,
    HashedNameMapper, PrefixCleaner, RegistryCleaner, ResourceKey, SubjectAlphabet,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::cleanup::{CleanupCoordinator, CleanupReport};
use crate::config::{EventingConfig, SubscriptionDefaults};
use crate::error::{EventingError, EventingResult};
use crate::reconciler::{ReconcileOutcome, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initialized => f.write_str("initialized"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Collaborators handed to [`SubscriptionManager::init`].
#[derive(Clone)]
pub struct ManagerDeps {
    pub store: DynSubscriptionStore,
    pub recorder: DynEventRecorder,
    pub sink_validator: Option<Arc<dyn SinkValidator>>,
    /// Required for the stream backend
    pub stream_client: Option<DynStreamClient>,
    /// Required for the event mesh backend
    pub gateway_rules: Option<DynGatewayRuleStore>,
}

impl ManagerDeps {
    pub fn new(store: DynSubscriptionStore, recorder: DynEventRecorder) -> Self {
        Self {
            store,
            recorder,
            sink_validator: None,
            stream_client: None,
            gateway_rules: None,
        }
    }

    pub fn with_sink_validator(mut self, validator: Arc<dyn SinkValidator>) -> Self {
        self.sink_validator = Some(validator);
        self
    }

    pub fn with_stream_client(mut self, client: DynStreamClient) -> Self {
        self.stream_client = Some(client);
        self
    }

    pub fn with_gateway_rules(mut self, store: DynGatewayRuleStore) -> Self {
        self.gateway_rules = Some(store);
        self
    }
}

/// A request to reconcile one Subscription, optionally with a reply
/// channel for the outcome.
#[derive(Debug)]
pub struct ReconcileRequest {
    pub key: ResourceKey,
    pub reply: Option<oneshot::Sender<ReconcileOutcome>>,
}

impl ReconcileRequest {
    pub fn new(key: ResourceKey) -> Self {
        Self { key, reply: None }
    }

    pub fn with_reply(key: ResourceKey) -> (Self, oneshot::Receiver<ReconcileOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                key,
                reply: Some(tx),
            },
            rx,
        )
    }
}

pub struct StartParams {
    /// Client credentials for the event mesh. Unused by the stream backend.
    pub credentials: Option<OAuth2Credentials>,
    pub requests: mpsc::Receiver<ReconcileRequest>,
}

impl StartParams {
    pub fn new(requests: mpsc::Receiver<ReconcileRequest>) -> Self {
        Self {
            credentials: None,
            requests,
        }
    }

    pub fn with_credentials(mut self, credentials: OAuth2Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

pub struct SubscriptionManager {
    config: EventingConfig,
    state: ManagerState,
    deps: Option<ManagerDeps>,
    backend: Option<DynBackend>,
    shutdown: Option<watch::Sender<bool>>,
    dispatcher: Option<JoinHandle<()>>,
    last_cleanup_report: Option<CleanupReport>,
}

impl SubscriptionManager {
    pub fn new(config: EventingConfig) -> Self {
        Self {
            config,
            state: ManagerState::Uninitialized,
            deps: None,
            backend: None,
            shutdown: None,
            dispatcher: None,
            last_cleanup_report: None,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn config(&self) -> &EventingConfig {
        &self.config
    }

    /// The running backend, once started.
    pub fn backend(&self) -> Option<&DynBackend> {
        self.backend.as_ref()
    }

    /// Report of the last `stop(true)` sweep.
    pub fn last_cleanup_report(&self) -> Option<&CleanupReport> {
        self.last_cleanup_report.as_ref()
    }

    /// Validate configuration and collaborators. Any failure is fatal.
    pub fn init(&mut self, deps: ManagerDeps) -> EventingResult<()> {
        if self.state != ManagerState::Uninitialized {
            return Err(EventingError::state("init", self.state));
        }
        self.config.validate()?;

        match self.config.backend {
            BackendKind::Stream if deps.stream_client.is_none() => {
                return Err(EventingError::config(
                    "stream backend requires a stream client",
                ));
            }
            BackendKind::EventMesh if deps.gateway_rules.is_none() => {
                return Err(EventingError::config(
                    "event mesh backend requires a gateway rule store",
                ));
            }
            _ => {}
        }

        self.deps = Some(deps);
        self.state = ManagerState::Initialized;
        tracing::info!(backend = %self.config.backend, "Subscription manager initialized");
        Ok(())
    }

    /// Build and initialize the backend, then start dispatching reconcile
    /// requests. Nothing is left running when this fails.
    pub async fn start(
        &mut self,
        defaults: SubscriptionDefaults,
        params: StartParams,
    ) -> EventingResult<()> {
        if self.state != ManagerState::Initialized {
            return Err(EventingError::state("start", self.state));
        }
        let deps = self
            .deps
            .clone()
            .ok_or_else(|| EventingError::state("start", self.state))?;

        let backend = match self.config.backend {
            BackendKind::Stream => {
                let stream = self.stream_backend(&deps)?;
                initialize(stream.as_ref()).await?;
                delete_orphans(&stream, &deps).await;
                stream as DynBackend
            }
            BackendKind::EventMesh => {
                let mesh = self.mesh_backend(&deps, params.credentials)?;
                initialize(mesh.as_ref()).await?;
                mesh as DynBackend
            }
        };

        let cleaner = self.cleaner_for(backend.as_ref());
        let mut reconciler = Reconciler::new(
            deps.store.clone(),
            backend.clone(),
            cleaner,
            deps.recorder.clone(),
            defaults,
        );
        if let Some(validator) = deps.sink_validator.clone() {
            reconciler = reconciler.with_sink_validator(validator);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch(Arc::new(reconciler), params.requests, shutdown_rx));

        self.backend = Some(backend);
        self.shutdown = Some(shutdown_tx);
        self.dispatcher = Some(dispatcher);
        self.state = ManagerState::Running;
        tracing::info!(backend = %self.config.backend, "Subscription manager started");
        Ok(())
    }

    /// Stop dispatching. In-flight reconciles are left to finish on their
    /// own. With `run_cleanup` every Subscription is reset and its backend
    /// artifacts removed; otherwise ready Subscriptions are marked not
    /// ready. Partial cleanup failures are reported through
    /// [`Self::last_cleanup_report`], not returned.
    pub async fn stop(&mut self, run_cleanup: bool) -> EventingResult<()> {
        match self.state {
            ManagerState::Initialized | ManagerState::Running => {}
            state => return Err(EventingError::state("stop", state)),
        }
        self.state = ManagerState::Stopped;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(dispatcher) = self.dispatcher.take()
            && let Err(e) = dispatcher.await
        {
            tracing::warn!(error = %e, "Reconcile dispatcher ended abnormally");
        }

        let (Some(backend), Some(deps)) = (self.backend.clone(), self.deps.as_ref()) else {
            tracing::info!("Subscription manager stopped before start");
            return Ok(());
        };

        if run_cleanup {
            let report = CleanupCoordinator::new(deps.store.clone(), backend)
                .run()
                .await?;
            self.last_cleanup_report = Some(report);
        } else {
            mark_all_not_ready(&deps.store).await?;
        }

        tracing::info!(cleanup = run_cleanup, "Subscription manager stopped");
        Ok(())
    }

    fn stream_backend(&self, deps: &ManagerDeps) -> EventingResult<Arc<StreamBackend>> {
        let client = deps
            .stream_client
            .clone()
            .ok_or_else(|| EventingError::config("stream backend requires a stream client"))?;
        let mapper = HashedNameMapper::new(
            &self.config.stream.stream_name,
            MAX_CONSUMER_NAME_LENGTH,
            CONSUMER_NAME_HASH_LENGTH,
        );
        Ok(Arc::new(StreamBackend::new(
            self.config.stream.clone(),
            client,
            Arc::new(mapper),
        )))
    }

    fn mesh_backend(
        &self,
        deps: &ManagerDeps,
        credentials: Option<OAuth2Credentials>,
    ) -> EventingResult<Arc<EventMeshBackend>> {
        let credentials = credentials.ok_or_else(|| {
            EventingError::config("event mesh backend requires OAuth2 client credentials")
        })?;
        let gateway_rules = deps.gateway_rules.clone().ok_or_else(|| {
            EventingError::config("event mesh backend requires a gateway rule store")
        })?;
        let mapper = HashedNameMapper::new(
            &self.config.event_mesh.domain,
            MAX_SUBSCRIPTION_NAME_LENGTH,
            SUBSCRIPTION_NAME_HASH_LENGTH,
        );
        let backend = EventMeshBackend::new(
            self.config.event_mesh.clone(),
            credentials,
            gateway_rules,
            Arc::new(mapper),
        )
        .map_err(|e| EventingError::config(e.to_string()))?;
        Ok(Arc::new(backend))
    }

    /// Cleaner sized so a cleaned type still fits once the backend has
    /// qualified it.
    fn cleaner_for(&self, backend: &dyn Backend) -> Arc<dyn EventTypeCleaner> {
        let alphabet = match backend.kind() {
            BackendKind::Stream => SubjectAlphabet::Stream,
            BackendKind::EventMesh => SubjectAlphabet::Mesh,
        };
        let overhead = backend.qualified_subject("").len();
        let max_len = backend.subject_limits().max_len.saturating_sub(overhead);
        let cleaner = &self.config.cleaner;

        if cleaner.applications.is_empty() {
            Arc::new(PrefixCleaner::new(&cleaner.strip_prefix, alphabet, max_len))
        } else {
            Arc::new(RegistryCleaner::new(
                &cleaner.registry(),
                &cleaner.strip_prefix,
                alphabet,
                max_len,
            ))
        }
    }
}

async fn initialize(backend: &dyn Backend) -> EventingResult<()> {
    backend
        .initialize()
        .await
        .map_err(|source| EventingError::Startup {
            backend: backend.kind().to_string(),
            source,
        })
}

/// Drop consumers left behind by Subscriptions deleted while the manager
/// was down. Failures only cost a leftover consumer.
async fn delete_orphans(backend: &StreamBackend, deps: &ManagerDeps) {
    let subscriptions = match deps.store.list().await {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping orphaned consumer cleanup, cannot list subscriptions");
            return;
        }
    };
    match backend.delete_orphaned_consumers(&subscriptions).await {
        Ok(0) => {}
        Ok(deleted) => tracing::info!(deleted, "Deleted orphaned consumers"),
        Err(e) => tracing::warn!(error = %e, "Orphaned consumer cleanup failed"),
    }
}

async fn mark_all_not_ready(store: &DynSubscriptionStore) -> EventingResult<()> {
    let subscriptions = store.list().await.map_err(EventingError::List)?;
    for mut subscription in subscriptions.into_iter().filter(|s| s.status.ready) {
        let generation = subscription.metadata.generation;
        subscription.status.mark_not_ready(
            generation,
            reasons::BACKEND_STOPPED,
            "subscription manager stopped",
        );
        if let Err(e) = store.update_status(&subscription).await {
            tracing::warn!(
                subscription = %subscription.key(),
                error = %e,
                "Failed to mark subscription not ready"
            );
        }
    }
    Ok(())
}

async fn dispatch(
    reconciler: Arc<Reconciler>,
    mut requests: mpsc::Receiver<ReconcileRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Reconcile dispatcher started");

    loop {
        tokio::select! {
            biased;

            result = shutdown.changed() => {
                match result {
                    Ok(()) if *shutdown.borrow() => {
                        tracing::info!("Reconcile dispatcher shutting down");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => {
                        tracing::info!("Reconcile dispatcher shutdown channel closed");
                        break;
                    }
                }
            }
            request = requests.recv() => {
                let Some(request) = request else {
                    tracing::info!("Reconcile trigger channel closed");
                    break;
                };
                let reconciler = reconciler.clone();
                tokio::spawn(async move {
                    let outcome = reconciler.reconcile(&request.key).await;
                    tracing::debug!(subscription = %request.key, ?outcome, "Reconciled");
                    if let Some(reply) = request.reply {
                        let _ = reply.send(outcome);
                    }
                });
            }
        }
    }
}
