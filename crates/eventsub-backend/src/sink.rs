//! Sink parsing and validation.

use async_trait::async_trait;
use eventsub_core::{ConversionError, Subscription};
use url::Url;

const CLUSTER_LOCAL_SUFFIX: &str = ".svc.cluster.local";

/// A sink URL pointing at an in-cluster service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLocalSink {
    pub service: String,
    pub namespace: String,
    pub port: u16,
    /// Path plus query, always starting with `/`
    pub path: String,
}

/// Parse `http(s)://<service>.<namespace>[.svc[.cluster.local]][:port]/path`.
pub fn parse_cluster_local_sink(sink: &str) -> Result<ClusterLocalSink, ConversionError> {
    let url = Url::parse(sink).map_err(|e| ConversionError::invalid_sink(sink, e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConversionError::invalid_sink(
            sink,
            format!("unsupported scheme {}", url.scheme()),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| ConversionError::invalid_sink(sink, "missing host"))?;
    let local = host
        .strip_suffix(CLUSTER_LOCAL_SUFFIX)
        .or_else(|| host.strip_suffix(".svc"))
        .unwrap_or(host);

    let parts: Vec<&str> = local.split('.').collect();
    let [service, namespace] = parts.as_slice() else {
        return Err(ConversionError::invalid_sink(
            sink,
            format!("host {host} is not <service>.<namespace>{CLUSTER_LOCAL_SUFFIX}"),
        ));
    };
    if service.is_empty() || namespace.is_empty() {
        return Err(ConversionError::invalid_sink(sink, "empty service or namespace"));
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| ConversionError::invalid_sink(sink, "missing port"))?;

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok(ClusterLocalSink {
        service: service.to_string(),
        namespace: namespace.to_string(),
        port,
        path,
    })
}

/// Checks a Subscription's sink before any backend call.
#[async_trait]
pub trait SinkValidator: Send + Sync {
    async fn validate(&self, subscription: &Subscription) -> Result<(), ConversionError>;
}

/// Accepts cluster-local service URLs in the Subscription's own namespace.
#[derive(Debug, Clone, Default)]
pub struct ClusterLocalSinkValidator;

#[async_trait]
impl SinkValidator for ClusterLocalSinkValidator {
    async fn validate(&self, subscription: &Subscription) -> Result<(), ConversionError> {
        let sink = parse_cluster_local_sink(&subscription.spec.sink)?;
        if sink.namespace != subscription.namespace() {
            return Err(ConversionError::invalid_sink(
                &subscription.spec.sink,
                format!(
                    "namespace {} does not match subscription namespace {}",
                    sink.namespace,
                    subscription.namespace()
                ),
            ));
        }
        Ok(())
    }
}
