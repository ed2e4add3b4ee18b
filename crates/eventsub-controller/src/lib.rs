//! eventsub controller.
//!
//! Keeps Subscriptions converged with one backend: the [`Reconciler`]
//! handles per-key change notifications, the [`CleanupCoordinator`] sweeps
//! backend state at shutdown, and the [`SubscriptionManager`] owns the
//! lifecycle around both.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod manager;
pub mod observability;
pub mod reconciler;

pub use cleanup::{CleanupCoordinator, CleanupReport};
pub use config::{CleanerConfig, EventingConfig, LoggingConfig, SubscriptionDefaults};
pub use error::{CleanupItemError, CleanupStage, EventingError, EventingResult};
pub use manager::{ManagerDeps, ManagerState, ReconcileRequest, StartParams, SubscriptionManager};
pub use reconciler::{ReconcileOutcome, Reconciler};
