//! Backends for eventsub.
//!
//! A [`Backend`] keeps exactly one broker-side consumer per Subscription.
//! Two variants exist: [`StreamBackend`] attaches durable consumers to a
//! shared stream, [`EventMeshBackend`] registers webhook subscriptions on a
//! cloud event mesh behind a gateway rule.

pub mod backend;
pub mod error;
pub mod mesh;
pub mod sink;
pub mod stream;

pub use backend::{Backend, BackendKind, DynBackend, SideResource, SubjectLimits};
pub use error::BackendError;
pub use mesh::{EventMeshBackend, EventMeshConfig, OAuth2Credentials};
pub use sink::{ClusterLocalSinkValidator, SinkValidator, parse_cluster_local_sink};
pub use stream::{DynStreamClient, StreamBackend, StreamClient, StreamConfig};
