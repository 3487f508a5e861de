//! One sweep over the targeted fleet.
//!
//! Discovery fans out across regions; each matched service then gets its
//! own rollout worker. Workers share nothing but the error aggregator,
//! and one service's failure never aborts the sweep.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ramp_core::{Strategy, Target};
use ramp_metrics::PrometheusProvider;
use ramp_rollout::{Rollout, RolloutError};
use ramp_serving::{ServiceRecord, ServiceStore, ServingClient, StoreError};

/// The remote endpoints a sweep talks to.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// `host:port` of the serving platform API.
    pub serving_api: String,
    /// `host:port` of the Prometheus query API.
    pub prometheus: String,
}

/// Run one sweep for a strategy and return every per-service error.
pub async fn run_sweep(
    endpoints: &Endpoints,
    strategy: &Strategy,
    shutdown: &watch::Receiver<bool>,
) -> Vec<RolloutError> {
    let discovery: Arc<dyn ServiceStore> =
        Arc::new(ServingClient::discovery(&endpoints.serving_api));
    let records = match discover_services(discovery, &strategy.target).await {
        Ok(records) => records,
        Err(err) => return vec![err.into()],
    };
    if records.is_empty() {
        warn!(
            label_selector = %strategy.target.label_selector,
            "no service matches the target"
        );
        return Vec::new();
    }
    debug!(n = records.len(), "targeted services discovered");

    let errors: Arc<Mutex<Vec<RolloutError>>> = Arc::default();
    let mut workers = JoinSet::new();
    for record in records {
        let errors = Arc::clone(&errors);
        let endpoints = endpoints.clone();
        let strategy = strategy.clone();
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            let service = record.service.metadata.name.clone();
            let region = record.region.clone();
            if let Err(err) = handle_rollout(&endpoints, &record, strategy, shutdown).await {
                warn!(%service, %region, error = %err, "rollout failed");
                errors.lock().unwrap().push(err);
            }
        });
    }
    while workers.join_next().await.is_some() {}

    let collected = errors.lock().unwrap().drain(..).collect();
    collected
}

/// List the services matching the target, fanning out across regions.
///
/// When the target names no regions, the full region list comes from the
/// serving API. The first listing failure aborts the scan.
pub async fn discover_services(
    store: Arc<dyn ServiceStore>,
    target: &Target,
) -> Result<Vec<ServiceRecord>, StoreError> {
    let regions = if target.regions.is_empty() {
        debug!("retrieving regions from the serving API");
        store.list_regions(&target.project).await?
    } else {
        debug!(n = target.regions.len(), "using configured region list");
        target.regions.clone()
    };

    let mut scans = JoinSet::new();
    for region in regions {
        let store = Arc::clone(&store);
        let project = target.project.clone();
        let selector = target.label_selector.clone();
        scans.spawn(async move {
            let services = store.list_services(&project, &region, &selector).await?;
            debug!(%region, n = services.len(), "region scanned");
            Ok::<_, StoreError>((region, services))
        });
    }

    let mut records = Vec::new();
    while let Some(joined) = scans.join_next().await {
        let (region, services) =
            joined.map_err(|e| StoreError::Transient(format!("region scan task: {e}")))??;
        for service in services {
            records.push(ServiceRecord {
                service,
                project: target.project.clone(),
                region: region.clone(),
            });
        }
    }
    Ok(records)
}

/// Run the rollout tick for one discovered service.
///
/// A shutdown signal aborts the tick at its next suspension point; a
/// cancelled tick makes no writes.
async fn handle_rollout(
    endpoints: &Endpoints,
    record: &ServiceRecord,
    strategy: Strategy,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RolloutError> {
    let service = record.service.metadata.name.as_str();
    let store: Arc<dyn ServiceStore> =
        Arc::new(ServingClient::new(&endpoints.serving_api, &record.region));
    let provider = Box::new(PrometheusProvider::new(&endpoints.prometheus, service));
    let mut rollout = Rollout::new(
        store,
        provider,
        &record.project,
        &record.region,
        service,
        strategy,
    );

    let changed = tick_until_shutdown(&mut rollout, &mut shutdown).await?;

    if changed {
        info!(%service, region = %record.region, "service updated");
    } else {
        debug!(%service, region = %record.region, "service unchanged");
    }
    Ok(())
}

/// Drive one tick, aborting it when the shutdown signal fires.
///
/// The shutdown branch is polled first, so a tick neither starts nor
/// resumes past a suspension point once the signal has fired.
async fn tick_until_shutdown(
    rollout: &mut Rollout,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<bool, RolloutError> {
    tokio::select! {
        biased;
        _ = shutdown.changed() => Err(RolloutError::Cancelled),
        result = rollout.tick() => result,
    }
}

/// Render sweep errors for logs and the HTTP trigger response.
pub fn errors_to_string(errors: &[RolloutError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, err)| format!("[error#{i}] {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use ramp_core::HealthCriterion;
    use ramp_metrics::mock::MockProvider;
    use ramp_rollout::STABLE_TAG;
    use ramp_serving::mock::InMemoryStore;
    use ramp_serving::{Service, TrafficTarget};

    fn gradual_service(name: &str) -> Service {
        let mut svc = Service::default();
        svc.metadata.name = name.to_string();
        svc.metadata
            .labels
            .insert("rollout-strategy".to_string(), "gradual".to_string());
        svc
    }

    fn target(regions: Vec<String>) -> Target {
        Target::new("my-project", regions, "rollout-strategy=gradual")
    }

    /// A service with a fresh candidate: the next tick would write.
    fn rollable_service(name: &str) -> Service {
        let mut svc = gradual_service(name);
        svc.spec.traffic = vec![TrafficTarget::to_revision("test-001", 100, STABLE_TAG)];
        svc.status.traffic = svc.spec.traffic.clone();
        svc.status.latest_ready_revision_name = "test-002".to_string();
        svc
    }

    fn rollout_for(store: &Arc<InMemoryStore>, name: &str) -> Rollout {
        let strategy = Strategy::new(
            target(vec!["us-east1".to_string()]),
            vec![5, 30, 60],
            Duration::from_secs(300),
            Duration::ZERO,
            vec![HealthCriterion::ErrorRate { threshold: 5.0 }],
        );
        Rollout::new(
            Arc::clone(store) as Arc<dyn ServiceStore>,
            Box::new(MockProvider::new()),
            "my-project",
            "us-east1",
            name,
            strategy,
        )
    }

    #[tokio::test]
    async fn discovery_uses_configured_regions() {
        let store = Arc::new(InMemoryStore::new());
        store.insert("my-project", "us-east1", gradual_service("a"));
        store.insert("my-project", "europe-west1", gradual_service("b"));

        let records = discover_services(
            Arc::clone(&store) as Arc<dyn ServiceStore>,
            &target(vec!["us-east1".to_string()]),
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service.metadata.name, "a");
        assert_eq!(records[0].region, "us-east1");
    }

    #[tokio::test]
    async fn discovery_fetches_regions_when_unconfigured() {
        let store = Arc::new(
            InMemoryStore::new().with_regions(&["us-east1", "europe-west1"]),
        );
        store.insert("my-project", "us-east1", gradual_service("a"));
        store.insert("my-project", "europe-west1", gradual_service("b"));

        let mut records = discover_services(
            Arc::clone(&store) as Arc<dyn ServiceStore>,
            &target(vec![]),
        )
        .await
        .unwrap();
        records.sort_by(|x, y| x.service.metadata.name.cmp(&y.service.metadata.name));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].region, "us-east1");
        assert_eq!(records[1].region, "europe-west1");
    }

    #[tokio::test]
    async fn discovery_skips_unlabeled_services() {
        let store = Arc::new(InMemoryStore::new());
        store.insert("my-project", "us-east1", gradual_service("a"));
        let mut unlabeled = Service::default();
        unlabeled.metadata.name = "plain".to_string();
        store.insert("my-project", "us-east1", unlabeled);

        let records = discover_services(
            Arc::clone(&store) as Arc<dyn ServiceStore>,
            &target(vec!["us-east1".to_string()]),
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service.metadata.name, "a");
    }

    #[tokio::test]
    async fn tick_writes_when_shutdown_is_quiet() {
        let store = Arc::new(InMemoryStore::new());
        store.insert("my-project", "us-east1", rollable_service("svc"));
        let mut rollout = rollout_for(&store, "svc");
        let (_tx, mut shutdown) = watch::channel(false);

        let changed = tick_until_shutdown(&mut rollout, &mut shutdown)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(store.replace_count(), 1);
    }

    #[tokio::test]
    async fn fired_shutdown_cancels_tick_without_writes() {
        let store = Arc::new(InMemoryStore::new());
        store.insert("my-project", "us-east1", rollable_service("svc"));
        let mut rollout = rollout_for(&store, "svc");

        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        let result = tick_until_shutdown(&mut rollout, &mut shutdown).await;
        assert!(matches!(result, Err(RolloutError::Cancelled)));
        assert_eq!(store.replace_count(), 0);
    }

    #[test]
    fn errors_render_one_line_each() {
        let errors = vec![
            RolloutError::Cancelled,
            RolloutError::UnknownVerdict("svc-002".to_string()),
        ];
        assert_eq!(
            errors_to_string(&errors),
            "[error#0] rollout cancelled\n\
             [error#1] cannot act on candidate svc-002: health verdict is unknown"
        );
    }
}
