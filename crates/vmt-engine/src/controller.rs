//! Engine facade
//!
//! Wires every component over one store and one cache, and runs the
//! per-workload reconcile: apply the reference policy, capture snapshots,
//! upgrade them inline, then drop status refs for removed references.

use crate::compat::CompatibilityDecoder;
use crate::config::EngineConfig;
use crate::conflict::ConflictDetector;
use crate::error::EngineResult;
use crate::expand::Expander;
use crate::resolve::SpecResolver;
use crate::snapshot::SnapshotStore;
use crate::status::StatusReconciler;
use crate::upgrade::{Outcome, RequestExecutor, UpgradeController, Upgrader};
use std::sync::Arc;
use vmt_api::{ObjectKey, UpgradeRequest, Workload};
use vmt_store::{ObjectCache, ObjectStore};

/// Snapshot engine over one object store
#[derive(Clone)]
pub struct Controller {
    config: EngineConfig,
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache,
    decoder: CompatibilityDecoder,
    snapshots: SnapshotStore,
    resolver: SpecResolver,
    detector: ConflictDetector,
    reconciler: StatusReconciler,
    upgrader: Upgrader,
    expander: Expander,
    executor: RequestExecutor,
}

impl Controller {
    /// Build every component from `config`
    ///
    /// # Errors
    /// Returns [`crate::EngineError::Config`] for an invalid config.
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let cache = ObjectCache::with_ttl(config.cache.max_capacity, config.cache.ttl());
        let decoder = CompatibilityDecoder::default();
        let detector = ConflictDetector::default();
        let snapshots = SnapshotStore::new(store.clone(), cache.clone(), decoder.clone());
        let resolver = SpecResolver::new(store.clone(), cache.clone(), decoder.clone());
        let reconciler = StatusReconciler::new(
            store.clone(),
            snapshots.clone(),
            resolver.clone(),
            detector.clone(),
        );
        let upgrader = Upgrader::new(store.clone(), snapshots.clone(), decoder.clone());
        let expander = Expander::new(
            store.clone(),
            snapshots.clone(),
            resolver.clone(),
            detector.clone(),
            config.reference_policy,
        );
        let executor = RequestExecutor::new(store.clone(), upgrader.clone());

        tracing::debug!(policy = ?config.reference_policy, "engine initialized");
        Ok(Self {
            config,
            store,
            cache,
            decoder,
            snapshots,
            resolver,
            detector,
            reconciler,
            upgrader,
            expander,
            executor,
        })
    }

    /// Reconcile one workload and return it as stored afterwards
    ///
    /// # Errors
    /// Returns the first failing step's error. Retryable store errors leave
    /// the workload in a state the next sync picks up from.
    pub async fn sync(&self, key: &ObjectKey) -> EngineResult<Workload> {
        let workload = self.store.get_workload(key).await?;
        let workload = self.expander.expand(&workload).await?;
        let workload = self.reconciler.store(&workload).await?;
        let workload = self.upgrader.upgrade(&workload).await?;
        let workload = self.reconciler.clear(&workload).await?;
        tracing::debug!(workload = %key, "workload synced");
        Ok(workload)
    }

    /// Create one upgrade request per snapshot without the canonical label
    ///
    /// Requests are named after their target, so repeated calls return the
    /// existing requests instead of creating duplicates.
    ///
    /// # Errors
    /// Returns store errors other than an existing request.
    pub async fn request_upgrades(&self, namespace: Option<String>) -> EngineResult<Vec<ObjectKey>> {
        let mut keys = Vec::new();
        for snapshot in self.store.list_snapshots(namespace).await? {
            if snapshot.is_canonical() {
                continue;
            }
            let namespace = snapshot.metadata.namespace.clone().unwrap_or_default();
            let request = UpgradeRequest::new(
                namespace,
                format!("upgrade-{}", snapshot.name()),
                snapshot.name(),
            );
            let key = request.key();
            match self.store.create_upgrade_request(request).await {
                Ok(_) => tracing::debug!(request = %key, "created upgrade request"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e.into()),
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Run one async upgrade step for the request at `key`
    ///
    /// # Errors
    /// See [`RequestExecutor::execute`].
    pub async fn execute(&self, key: &ObjectKey) -> EngineResult<Outcome> {
        self.executor.execute(key).await
    }

    /// Worker pool sized from the config, not yet started
    #[must_use]
    pub fn upgrade_controller(&self) -> UpgradeController {
        UpgradeController::new(self.executor.clone(), &self.config)
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    #[inline]
    #[must_use]
    pub fn decoder(&self) -> &CompatibilityDecoder {
        &self.decoder
    }

    #[inline]
    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &SpecResolver {
        &self.resolver
    }

    #[inline]
    #[must_use]
    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> &StatusReconciler {
        &self.reconciler
    }

    #[inline]
    #[must_use]
    pub fn upgrader(&self) -> &Upgrader {
        &self.upgrader
    }

    #[inline]
    #[must_use]
    pub fn expander(&self) -> &Expander {
        &self.expander
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
