//! In-memory collaborators for eventsub.
//!
//! Backs the standalone controller binary and the test suites. Every
//! collaborator exposes failure injection hooks so partial-failure paths
//! can be exercised deterministically.

pub mod gateway_rules;
pub mod stream_broker;
pub mod subscriptions;

pub use gateway_rules::InMemoryGatewayRuleStore;
pub use stream_broker::InMemoryStreamBroker;
pub use subscriptions::InMemorySubscriptionStore;
