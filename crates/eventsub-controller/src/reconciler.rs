//! Per-Subscription convergence.
//!
//! One [`Reconciler::reconcile`] call handles one change notification for
//! one key. Failures never escape as errors: they are written to the
//! Subscription status and folded into a [`ReconcileOutcome`] that tells
//! the external queue whether to try again. The queue guarantees calls for
//! the same key are never concurrent.

use std::sync::Arc;
use std::time::Duration;

use eventsub_backend::{BackendError, DynBackend, SinkValidator};
use eventsub_core::subscription::reasons;
use eventsub_core::{
    CleanError, Condition, ConditionType, ConversionError, DynEventRecorder, DynSubscriptionStore,
    EventTypeCleaner, EventTypeStatus, ResourceKey, Subscription, SubscriptionStatus, TypeMatching,
};

use crate::config::SubscriptionDefaults;
use crate::error::{EventingError, EventingResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Backend matches the Subscription spec and the status says so.
    Synced,
    /// Backend resources are gone and the finalizer was released.
    Deleted,
    /// The Subscription no longer exists.
    NotFound,
    /// Transient failure; try again after the delay.
    Requeue { after: Duration, reason: String },
    /// Retrying will not help until the Subscription spec changes.
    Terminal { reason: String },
}

impl ReconcileOutcome {
    pub fn is_requeue(&self) -> bool {
        matches!(self, Self::Requeue { .. })
    }
}

pub struct Reconciler {
    store: DynSubscriptionStore,
    backend: DynBackend,
    cleaner: Arc<dyn EventTypeCleaner>,
    recorder: DynEventRecorder,
    sink_validator: Option<Arc<dyn SinkValidator>>,
    defaults: SubscriptionDefaults,
}

impl Reconciler {
    pub fn new(
        store: DynSubscriptionStore,
        backend: DynBackend,
        cleaner: Arc<dyn EventTypeCleaner>,
        recorder: DynEventRecorder,
        defaults: SubscriptionDefaults,
    ) -> Self {
        Self {
            store,
            backend,
            cleaner,
            recorder,
            sink_validator: None,
            defaults,
        }
    }

    pub fn with_sink_validator(mut self, validator: Arc<dyn SinkValidator>) -> Self {
        self.sink_validator = Some(validator);
        self
    }

    pub async fn reconcile(&self, key: &ResourceKey) -> ReconcileOutcome {
        match self.try_reconcile(key).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(subscription = %key, error = %e, "Reconcile aborted");
                self.outcome_for(&e)
            }
        }
    }

    fn outcome_for(&self, error: &EventingError) -> ReconcileOutcome {
        if error.is_retryable() {
            ReconcileOutcome::Requeue {
                after: self.defaults.requeue_after,
                reason: error.to_string(),
            }
        } else {
            ReconcileOutcome::Terminal {
                reason: error.to_string(),
            }
        }
    }

    async fn try_reconcile(&self, key: &ResourceKey) -> EventingResult<ReconcileOutcome> {
        let Some(mut subscription) = self.store.get(key).await? else {
            tracing::debug!(subscription = %key, "Subscription gone, nothing to reconcile");
            return Ok(ReconcileOutcome::NotFound);
        };

        if subscription.is_being_deleted() {
            return self.finalize(subscription).await;
        }

        if !subscription.has_finalizer() {
            subscription.add_finalizer();
            subscription = self.store.update(&subscription).await?;
            tracing::debug!(subscription = %key, "Added finalizer");
        }

        let stored_status = subscription.status.clone();
        let generation = subscription.metadata.generation;

        match self.sync(&mut subscription).await {
            Ok(()) => {
                subscription.status.mark_ready(generation);
                self.write_status(&subscription, &stored_status).await?;
                if !stored_status.ready {
                    self.recorder
                        .normal(key, reasons::SYNCED, "Subscription synced with backend");
                    tracing::info!(
                        subscription = %key,
                        backend = %self.backend.kind(),
                        types = subscription.status.types.len(),
                        "Subscription ready"
                    );
                }
                Ok(ReconcileOutcome::Synced)
            }
            Err(error) => {
                let reason = failure_reason(&error);
                let message = status_message(&error);
                subscription
                    .status
                    .mark_not_ready(generation, reason, message.as_str());
                self.write_status(&subscription, &stored_status).await?;
                self.recorder.warning(key, reason, &message);
                tracing::warn!(
                    subscription = %key,
                    reason,
                    retryable = error.is_retryable(),
                    error = %message,
                    "Subscription sync failed"
                );
                Ok(self.outcome_for(&error))
            }
        }
    }

    /// Sink check, cleaning, then the backend call. Conditions set along
    /// the way stay on the status whatever the result.
    async fn sync(&self, subscription: &mut Subscription) -> EventingResult<()> {
        let key = subscription.key();

        if let Some(validator) = &self.sink_validator {
            if let Err(source) = validator.validate(subscription).await {
                subscription.status.set_condition(Condition::new(
                    ConditionType::SinkValid,
                    false,
                    reasons::SINK_INVALID,
                    source.to_string(),
                ));
                return Err(EventingError::Conversion { key, source });
            }
            subscription.status.set_condition(Condition::new(
                ConditionType::SinkValid,
                true,
                reasons::SINK_VALID,
                "",
            ));
        }

        match self.clean_types(subscription) {
            Ok(types) => subscription.status.types = types,
            Err(source) => {
                subscription.status.types.clear();
                return Err(EventingError::Conversion { key, source });
            }
        }

        self.backend
            .sync_subscription(subscription)
            .await
            .map_err(|e| EventingError::sync(key, e))
    }

    /// Clean every distinct raw type and check the qualified subject
    /// against the backend limits.
    fn clean_types(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<EventTypeStatus>, ConversionError> {
        let raw_types = subscription.unique_types();
        if raw_types.is_empty() {
            return Err(ConversionError::NoEventTypes);
        }
        let limits = self.backend.subject_limits();

        raw_types
            .into_iter()
            .map(|raw| {
                let clean = match subscription.spec.type_matching {
                    TypeMatching::Exact if raw.trim().is_empty() => {
                        return Err(ConversionError::clean(raw, CleanError::empty(raw)));
                    }
                    TypeMatching::Exact => raw.to_string(),
                    TypeMatching::Standard => self
                        .cleaner
                        .clean(raw)
                        .map_err(|e| ConversionError::clean(raw, e))?,
                };

                let subject = self.backend.qualified_subject(&clean);
                if subject.len() > limits.max_len {
                    return Err(ConversionError::SubjectTooLong {
                        subject,
                        max: limits.max_len,
                    });
                }
                if let Some(max) = limits.max_segments
                    && subject.split('.').count() > max
                {
                    return Err(ConversionError::TooManySegments { subject, max });
                }

                Ok(EventTypeStatus {
                    original_type: raw.to_string(),
                    clean_type: clean,
                })
            })
            .collect()
    }

    async fn finalize(&self, mut subscription: Subscription) -> EventingResult<ReconcileOutcome> {
        let key = subscription.key();
        if !subscription.has_finalizer() {
            return Ok(ReconcileOutcome::Deleted);
        }

        if let Err(error) = self.teardown(&subscription).await {
            let stored_status = subscription.status.clone();
            let generation = subscription.metadata.generation;
            let message = error.to_string();
            subscription
                .status
                .mark_not_ready(generation, reasons::DELETE_FAILED, message.as_str());
            self.write_status(&subscription, &stored_status).await?;
            self.recorder.warning(&key, reasons::DELETE_FAILED, &message);
            tracing::warn!(subscription = %key, error = %message, "Backend teardown failed, keeping finalizer");
            return Ok(self.outcome_for(&EventingError::sync(key, error)));
        }

        subscription.remove_finalizer();
        self.store.update(&subscription).await?;
        self.recorder
            .normal(&key, reasons::DELETED, "Backend resources removed");
        tracing::info!(subscription = %key, "Subscription finalized");
        Ok(ReconcileOutcome::Deleted)
    }

    async fn teardown(&self, subscription: &Subscription) -> Result<(), BackendError> {
        match self.backend.delete_subscription(subscription).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        for resource in self.backend.side_resources(subscription) {
            self.backend.delete_side_resource(&resource).await?;
        }
        Ok(())
    }

    async fn write_status(
        &self,
        subscription: &Subscription,
        stored: &SubscriptionStatus,
    ) -> EventingResult<()> {
        if subscription.status == *stored {
            tracing::trace!(subscription = %subscription.key(), "Status unchanged");
            return Ok(());
        }
        self.store.update_status(subscription).await?;
        Ok(())
    }
}

fn failure_reason(error: &EventingError) -> &'static str {
    match error {
        EventingError::Conversion { source, .. } if source.is_invalid_sink() => {
            reasons::SINK_INVALID
        }
        EventingError::Conversion { .. } => reasons::CONVERSION_FAILED,
        _ => reasons::SYNC_FAILED,
    }
}

fn status_message(error: &EventingError) -> String {
    match error {
        EventingError::Sync { source, .. } => source.to_string(),
        EventingError::Conversion { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}
