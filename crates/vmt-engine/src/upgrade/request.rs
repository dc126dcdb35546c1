//! One step of the upgrade request state machine

use super::Upgrader;
use crate::error::EngineResult;
use std::sync::Arc;
use vmt_api::{
    ObjectKey, Phase, SchemaVersion, UpgradeRequest, UpgradeRequestStatus, UpgradeResult,
};
use vmt_store::ObjectStore;

/// What a single execution step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Moved to `Running`; execute again to do the work
    Requeue,
    /// Reached a terminal phase in this step
    Completed(Phase),
    /// Already terminal, nothing done
    Terminal(Phase),
    /// Request no longer exists
    Missing,
}

/// Drives upgrade requests through `Unset → Running → Succeeded | Failed`
#[derive(Clone)]
pub struct RequestExecutor {
    store: Arc<dyn ObjectStore>,
    upgrader: Upgrader,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, upgrader: Upgrader) -> Self {
        Self { store, upgrader }
    }

    /// Advance the request at `key` by one phase
    ///
    /// Every upgrade failure, store errors included, becomes a `Failed`
    /// status with a condition naming the reason.
    ///
    /// # Errors
    /// Returns store errors reading the request or persisting its status,
    /// and illegal phase transitions.
    pub async fn execute(&self, key: &ObjectKey) -> EngineResult<Outcome> {
        let request = match self.store.get_upgrade_request(key).await {
            Ok(request) => request,
            Err(e) if e.is_not_found() => {
                tracing::debug!(request = %key, "upgrade request gone");
                return Ok(Outcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        let phase = request.status.phase;
        match phase {
            Phase::Unset => {
                let running = phase.transition_to(Phase::Running)?;
                let status = UpgradeRequestStatus {
                    phase: running,
                    ..request.status.clone()
                };
                self.store.update_upgrade_request_status(key, status).await?;
                tracing::debug!(request = %key, "upgrade request running");
                Ok(Outcome::Requeue)
            }
            Phase::Running => self.run(&request).await,
            Phase::Succeeded | Phase::Failed => Ok(Outcome::Terminal(phase)),
        }
    }

    async fn run(&self, request: &UpgradeRequest) -> EngineResult<Outcome> {
        let key = request.key();
        let target = request.target_key();

        let status = match self.upgrader.upgrade_one(&target).await {
            Ok(successor) => {
                let new_name = successor.map_or_else(|| target.name.clone(), |r| r.name);
                tracing::info!(request = %key, snapshot = %target, successor = %new_name, "upgrade succeeded");
                UpgradeRequestStatus::succeeded(UpgradeResult {
                    new_name,
                    version: SchemaVersion::CANONICAL.as_str().to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(request = %key, snapshot = %target, error = %e, "upgrade failed");
                UpgradeRequestStatus::failed(e.reason(), e.to_string())
            }
        };

        let phase = request.status.phase.transition_to(status.phase)?;
        self.store.update_upgrade_request_status(&key, status).await?;
        Ok(Outcome::Completed(phase))
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("upgrader", &self.upgrader)
            .finish_non_exhaustive()
    }
}
