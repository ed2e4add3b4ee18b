//! Core types for eventsub.
//!
//! Holds the Subscription and gateway rule model, event type cleaning,
//! backend name mapping, and the store and recorder traits the controller
//! is written against.

pub mod cleaner;
pub mod error;
pub mod events;
pub mod gateway;
pub mod naming;
pub mod store;
pub mod subscription;

pub use cleaner::{
    ApplicationRegistry, EventTypeCleaner, PrefixCleaner, RegistryCleaner, SubjectAlphabet,
};
pub use error::{CleanError, ConversionError, StoreError};
pub use events::{DynEventRecorder, EventBroadcaster, EventKind, EventRecorder, RecordedEvent};
pub use gateway::{GatewayPath, GatewayRule, GatewayRuleSpec, GatewayRuleStatus, GatewayService};
pub use naming::{HashedNameMapper, NameMapper};
pub use store::{DynGatewayRuleStore, DynSubscriptionStore, GatewayRuleStore, SubscriptionStore};
pub use subscription::{
    BackendStatus, Condition, ConditionStatus, ConditionType, DeliveryConfig, EventTypeStatus,
    MeshTypeStatus, ObjectMeta, ResourceKey, Subscription, SubscriptionSpec, SubscriptionStatus,
    TypeMatching, reasons, SUBSCRIPTION_FINALIZER,
};
