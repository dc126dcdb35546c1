//! State dump loading
//!
//! A dump is one JSON document holding the objects an upgrade run needs.
//! Templates may be written at any schema version the decoder understands.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use vmt_api::{Snapshot, UpgradeRequest, Workload};
use vmt_engine::CompatibilityDecoder;
use vmt_store::{InMemoryStore, ObjectStore};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StateDump {
    #[serde(default)]
    pub(crate) templates: Vec<Value>,

    #[serde(default)]
    pub(crate) snapshots: Vec<Snapshot>,

    #[serde(default)]
    pub(crate) workloads: Vec<Workload>,

    #[serde(default)]
    pub(crate) upgrade_requests: Vec<UpgradeRequest>,
}

/// Objects loaded per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Seeded {
    pub(crate) templates: usize,
    pub(crate) snapshots: usize,
    pub(crate) workloads: usize,
    pub(crate) upgrade_requests: usize,
}

impl StateDump {
    pub(crate) fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading state dump {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing state dump {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write every object into `store`
    ///
    /// Templates are decoded to the canonical schema first; snapshots are
    /// stored as found so the run can upgrade them.
    pub(crate) async fn seed(
        self,
        store: &InMemoryStore,
        decoder: &CompatibilityDecoder,
    ) -> Result<Seeded> {
        let mut seeded = Seeded::default();
        for (i, payload) in self.templates.iter().enumerate() {
            let template = decoder
                .decode(payload)
                .with_context(|| format!("decoding template #{i}"))?;
            store.put_template(template).await?;
            seeded.templates += 1;
        }
        for snapshot in self.snapshots {
            let key = snapshot.key();
            store
                .create_snapshot(snapshot)
                .await
                .with_context(|| format!("loading snapshot {key}"))?;
            seeded.snapshots += 1;
        }
        for workload in self.workloads {
            store.put_workload(workload).await?;
            seeded.workloads += 1;
        }
        for request in self.upgrade_requests {
            let key = request.key();
            store
                .create_upgrade_request(request)
                .await
                .with_context(|| format!("loading upgrade request {key}"))?;
            seeded.upgrade_requests += 1;
        }
        tracing::info!(?seeded, "state loaded");
        Ok(seeded)
    }
}
