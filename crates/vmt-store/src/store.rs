//! Authoritative object store contract
//!
//! The engine never locks: uniqueness comes from [`ObjectStore::create_snapshot`]
//! rejecting duplicate names, and races on workloads are settled by `test`
//! operations inside [`ObjectStore::patch_workload`].

use crate::error::StoreResult;
use async_trait::async_trait;
use vmt_api::{
    ObjectKey, OwnerReference, Patch, Snapshot, Template, TemplateKind, UpgradeRequest,
    UpgradeRequestStatus, Workload,
};

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

/// Store of templates, snapshots, workloads and upgrade requests
///
/// Every method is a single all-or-nothing round trip.
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a canonical template; cluster-scoped kinds use a key without namespace
    async fn get_template(&self, kind: TemplateKind, key: &ObjectKey) -> StoreResult<Template>;

    /// Create or replace a template
    async fn put_template(&self, template: Template) -> StoreResult<Template>;

    /// Create a snapshot; fails with `AlreadyExists` when the name is taken
    async fn create_snapshot(&self, snapshot: Snapshot) -> StoreResult<Snapshot>;

    async fn get_snapshot(&self, key: &ObjectKey) -> StoreResult<Snapshot>;

    /// List snapshots, optionally restricted to one namespace
    async fn list_snapshots(&self, namespace: Option<String>) -> StoreResult<Vec<Snapshot>>;

    async fn delete_snapshot(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Add an owner unless one with the same uid is present
    async fn add_snapshot_owner(
        &self,
        key: &ObjectKey,
        owner: OwnerReference,
    ) -> StoreResult<Snapshot>;

    async fn get_workload(&self, key: &ObjectKey) -> StoreResult<Workload>;

    /// Create or replace a workload
    async fn put_workload(&self, workload: Workload) -> StoreResult<Workload>;

    /// Apply a JSON patch atomically; a failing `test` yields `Conflict`
    async fn patch_workload(&self, key: &ObjectKey, patch: &Patch) -> StoreResult<Workload>;

    async fn create_upgrade_request(&self, request: UpgradeRequest) -> StoreResult<UpgradeRequest>;

    async fn get_upgrade_request(&self, key: &ObjectKey) -> StoreResult<UpgradeRequest>;

    async fn list_upgrade_requests(
        &self,
        namespace: Option<String>,
    ) -> StoreResult<Vec<UpgradeRequest>>;

    /// Replace the status of an upgrade request
    async fn update_upgrade_request_status(
        &self,
        key: &ObjectKey,
        status: UpgradeRequestStatus,
    ) -> StoreResult<UpgradeRequest>;
}
