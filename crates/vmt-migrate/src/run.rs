//! Drive every pending snapshot upgrade to a terminal phase

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use vmt_api::{ObjectKey, Phase, UpgradeRequest};
use vmt_engine::Controller;
use vmt_store::ObjectStore;

#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    pub(crate) namespace: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestSummary {
    pub(crate) request: String,
    pub(crate) target: String,
    pub(crate) phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) new_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
}

impl From<&UpgradeRequest> for RequestSummary {
    fn from(request: &UpgradeRequest) -> Self {
        Self {
            request: request.key().to_string(),
            target: request.spec.target_snapshot_name.clone(),
            phase: request.status.phase,
            new_name: request.status.result.as_ref().map(|r| r.new_name.clone()),
            reason: request.status.conditions.first().map(|c| c.reason.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Report {
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) requests: Vec<RequestSummary>,
}

impl Report {
    fn from_requests(requests: &[UpgradeRequest]) -> Self {
        let requests: Vec<RequestSummary> = requests.iter().map(RequestSummary::from).collect();
        Self {
            succeeded: requests.iter().filter(|r| r.phase == Phase::Succeeded).count(),
            failed: requests.iter().filter(|r| r.phase == Phase::Failed).count(),
            requests,
        }
    }

    pub(crate) fn render_text(&self) -> String {
        let mut out = format!(
            "Upgrade requests: {} succeeded, {} failed\n",
            self.succeeded, self.failed
        );
        for r in &self.requests {
            let detail = match (&r.new_name, &r.reason) {
                (Some(name), _) => format!(" -> {name}"),
                (None, Some(reason)) => format!(" ({reason})"),
                (None, None) => String::new(),
            };
            out.push_str(&format!("  {} {} {:?}{detail}\n", r.request, r.target, r.phase));
        }
        out
    }
}

/// Request upgrades for stale snapshots and wait for all of them
///
/// Requests already present in the store are driven as well.
pub(crate) async fn run(controller: &Controller, options: &RunOptions) -> Result<Report> {
    let store = controller.store();
    let mut keys: HashSet<ObjectKey> = controller
        .request_upgrades(options.namespace.clone())
        .await?
        .into_iter()
        .collect();
    for request in store.list_upgrade_requests(options.namespace.clone()).await? {
        keys.insert(request.key());
    }
    tracing::info!(requests = keys.len(), "starting upgrade run");

    let pool = controller.upgrade_controller();
    pool.start();
    for key in &keys {
        pool.enqueue(key.clone());
    }

    let deadline = Instant::now() + options.timeout;
    let requests = loop {
        let requests = collect(store.as_ref(), &keys).await?;
        if requests.iter().all(|r| r.status.phase.is_terminal()) {
            break requests;
        }
        if Instant::now() >= deadline {
            pool.shutdown().await;
            bail!(
                "{} upgrade requests still pending after {:?}",
                requests.iter().filter(|r| !r.status.phase.is_terminal()).count(),
                options.timeout
            );
        }
        tokio::time::sleep(options.poll_interval).await;
    };
    pool.shutdown().await;

    let report = Report::from_requests(&requests);
    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        stats = ?pool.stats(),
        "upgrade run finished"
    );
    Ok(report)
}

async fn collect(store: &dyn ObjectStore, keys: &HashSet<ObjectKey>) -> Result<Vec<UpgradeRequest>> {
    let mut requests = Vec::with_capacity(keys.len());
    for key in keys {
        requests.push(store.get_upgrade_request(key).await?);
    }
    requests.sort_by_key(UpgradeRequest::key);
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vmt_api::{SchemaVersion, TemplateKind};
    use vmt_engine::EngineConfig;
    use vmt_store::InMemoryStore;
    use vmt_test_utils::{identity, instancetype_envelope, stored_snapshot};

    async fn controller(snapshots: Vec<vmt_api::Snapshot>) -> (Arc<InMemoryStore>, Controller) {
        let store = Arc::new(InMemoryStore::new());
        for snapshot in snapshots {
            store.create_snapshot(snapshot).await.unwrap();
        }
        let controller = Controller::new(store.clone(), EngineConfig::default()).unwrap();
        (store, controller)
    }

    #[tokio::test]
    async fn stale_snapshots_are_upgraded() {
        let (store, controller) = controller(vec![stored_snapshot(
            "ns-T-legacy",
            TemplateKind::Instancetype,
            Some(SchemaVersion::V1alpha1),
            &identity("T"),
            instancetype_envelope("instancetype.vmt.io/v1alpha1"),
            Vec::new(),
        )])
        .await;

        let report = run(&controller, &RunOptions::default()).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            report.requests[0].new_name.as_deref(),
            Some("ns-T-v1beta1-T-uid-1")
        );
        assert_eq!(store.snapshot_count(), 2);

        // Nothing left to do on a second run
        let again = run(&controller, &RunOptions::default()).await.unwrap();
        assert_eq!(again.succeeded, 1);
        assert_eq!(again.requests.len(), 1);
    }

    #[tokio::test]
    async fn preexisting_failed_request_is_reported() {
        let (store, controller) = controller(Vec::new()).await;
        store
            .create_upgrade_request(UpgradeRequest::new("ns", "upgrade-gone", "gone"))
            .await
            .unwrap();

        let report = run(&controller, &RunOptions::default()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.requests[0].reason.as_deref(), Some("NotFound"));
        assert!(report.render_text().contains("upgrade-gone gone Failed (NotFound)"));
    }

    #[test]
    fn empty_report_renders_header() {
        assert_eq!(
            Report::default().render_text(),
            "Upgrade requests: 0 succeeded, 0 failed\n"
        );
    }
}
