use std::sync::Arc;

use eventsub_backend::{ClusterLocalSinkValidator, OAuth2Credentials};
use eventsub_controller::config::loader::load_config;
use eventsub_controller::observability;
use eventsub_controller::{ManagerDeps, ReconcileRequest, StartParams, SubscriptionManager};
use eventsub_core::EventBroadcaster;
use eventsub_memory::{InMemoryGatewayRuleStore, InMemoryStreamBroker, InMemorySubscriptionStore};
use tokio::sync::{broadcast, mpsc};

const REQUEST_BUFFER: usize = 256;

/// Client credentials come from the environment, never from the config file.
fn credentials_from_env() -> Option<OAuth2Credentials> {
    let client_id = std::env::var("EVENTSUB_CLIENT_ID").ok()?;
    let client_secret = std::env::var("EVENTSUB_CLIENT_SECRET").ok()?;
    let token_url = std::env::var("EVENTSUB_TOKEN_URL").ok()?;
    Some(OAuth2Credentials::new(client_id, client_secret, token_url))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    observability::init_tracing();

    let config_path = std::env::var("EVENTSUB_CONFIG").ok();
    let config = load_config(config_path.as_deref())?;
    observability::apply_logging_level(&config.logging.level);
    let defaults = config.subscription_defaults.clone();

    let store = Arc::new(InMemorySubscriptionStore::new());
    let mut deps = ManagerDeps::new(store.clone(), EventBroadcaster::new_shared())
        .with_stream_client(Arc::new(InMemoryStreamBroker::new()))
        .with_gateway_rules(Arc::new(InMemoryGatewayRuleStore::new()));
    if defaults.validate_sinks {
        deps = deps.with_sink_validator(Arc::new(ClusterLocalSinkValidator));
    }

    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
    let mut params = StartParams::new(requests_rx);
    if let Some(credentials) = credentials_from_env() {
        params = params.with_credentials(credentials);
    }

    let mut manager = SubscriptionManager::new(config);
    manager.init(deps)?;
    manager.start(defaults, params).await?;

    // Every store change becomes a reconcile trigger.
    let mut changes = store.subscribe_changes();
    let feeder = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(key) => {
                    if requests_tx.send(ReconcileRequest::new(key)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change feed lagged, some triggers were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    feeder.abort();

    manager.stop(true).await?;
    if let Some(report) = manager.last_cleanup_report() {
        tracing::info!(
            total = report.total,
            failures = report.failures.len(),
            complete = report.is_complete(),
            "Cleanup report"
        );
    }
    Ok(())
}
