//! Shutdown cleanup sweep.
//!
//! Every Subscription is reset to its never-reconciled status and its
//! backend artifacts are deleted. Items are independent: a failure on one
//! is recorded in the [`CleanupReport`] and the sweep moves on. Only a
//! failed list aborts the sweep.

use eventsub_backend::{DynBackend, SideResource};
use eventsub_core::{DynSubscriptionStore, Subscription};

use crate::error::{CleanupItemError, CleanupStage, EventingError, EventingResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub total: usize,
    pub status_reset: usize,
    pub backend_deleted: usize,
    pub side_resources_deleted: usize,
    pub failures: Vec<CleanupItemError>,
}

impl CleanupReport {
    /// No item failed any step.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, error: CleanupItemError) {
        tracing::warn!(
            subscription = %error.key,
            stage = %error.stage,
            error = %error.message,
            "Cleanup step failed, continuing"
        );
        self.failures.push(error);
    }
}

pub struct CleanupCoordinator {
    store: DynSubscriptionStore,
    backend: DynBackend,
}

impl CleanupCoordinator {
    pub fn new(store: DynSubscriptionStore, backend: DynBackend) -> Self {
        Self { store, backend }
    }

    pub async fn run(&self) -> EventingResult<CleanupReport> {
        let subscriptions = self.store.list().await.map_err(EventingError::List)?;
        tracing::info!(
            backend = %self.backend.kind(),
            count = subscriptions.len(),
            "Starting subscription cleanup"
        );

        let mut report = CleanupReport {
            total: subscriptions.len(),
            ..Default::default()
        };
        for subscription in &subscriptions {
            self.clean_one(subscription, &mut report).await;
        }

        if report.is_complete() {
            tracing::info!(
                total = report.total,
                backend_deleted = report.backend_deleted,
                side_resources_deleted = report.side_resources_deleted,
                "Subscription cleanup completed"
            );
        } else {
            tracing::warn!(
                total = report.total,
                backend_deleted = report.backend_deleted,
                failures = report.failures.len(),
                "Subscription cleanup partially failed"
            );
        }
        Ok(report)
    }

    async fn clean_one(&self, subscription: &Subscription, report: &mut CleanupReport) {
        let key = subscription.key();
        // The reset drops the backend fields that name the side resources.
        let side_resources: Vec<SideResource> = self.backend.side_resources(subscription);

        let reset = subscription.with_status_defaults();
        match self.store.update_status(&reset).await {
            Ok(_) => report.status_reset += 1,
            Err(e) => report.fail(CleanupItemError::new(key.clone(), CleanupStage::ResetStatus, e)),
        }

        match self.backend.delete_subscription(subscription).await {
            Ok(()) => report.backend_deleted += 1,
            Err(e) if e.is_not_found() => report.backend_deleted += 1,
            Err(e) => report.fail(CleanupItemError::new(key.clone(), CleanupStage::DeleteBackend, e)),
        }

        for resource in side_resources {
            match self.backend.purge_side_resource(&resource).await {
                Ok(true) => report.side_resources_deleted += 1,
                Ok(false) => {
                    tracing::debug!(subscription = %key, %resource, "Side resource already gone")
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => report.fail(CleanupItemError::new(
                    key.clone(),
                    CleanupStage::DeleteSideResource,
                    format!("{resource}: {e}"),
                )),
            }
        }
    }
}
