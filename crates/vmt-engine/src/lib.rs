//! VMT Engine - immutable template snapshots
//!
//! Workloads reference reusable instance type and preference templates. The
//! engine freezes the template a workload adopted into an immutable snapshot,
//! keeps the workload's status pointing at it, and migrates snapshots written
//! by older schema versions to the canonical one.
//!
//! # Core Concepts
//!
//! - [`CompatibilityDecoder`]: decodes any historical payload into a canonical [`vmt_api::Template`]
//! - [`SnapshotStore`]: deterministic snapshot identity, create-or-verify, shared ownership
//! - [`StatusReconciler`]: mirrors references into status and captures snapshots
//! - [`Upgrader`]: inline snapshot upgrades; [`UpgradeController`] runs them from requests
//! - [`ConflictDetector`]: merges template specs and reports conflicting fields
//! - [`SpecResolver`]: resolves references, honouring pinned snapshots
//! - [`Controller`]: wires the above over one store
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmt_engine::{Controller, EngineConfig};
//! use vmt_store::InMemoryStore;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let controller = Controller::new(store, EngineConfig::default())?;
//! let workload = controller.sync(&key).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod compat;
pub mod config;
pub mod conflict;
pub mod controller;
pub mod error;
pub mod expand;
pub mod resolve;
pub mod slot;
pub mod snapshot;
pub mod status;
pub mod upgrade;

pub use compat::{CompatibilityDecoder, ConversionFn, ConversionRegistry, VersionedTemplate};
pub use config::{CacheConfig, EngineConfig, QueueConfig, ReferencePolicy};
pub use conflict::{ConflictDetector, Conflicts, RequirementError};
pub use controller::Controller;
pub use error::{DecodeError, EngineError, EngineResult};
pub use expand::Expander;
pub use resolve::SpecResolver;
pub use slot::TemplateSlot;
pub use snapshot::{snapshot_name, SnapshotStore};
pub use status::{status_patch, sync_status_ref, StatusReconciler};
pub use upgrade::{ControllerStats, Outcome, RequestExecutor, UpgradeController, Upgrader, WorkQueue};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine
    pub use crate::{
        CompatibilityDecoder, ConflictDetector, Controller, EngineConfig, EngineError,
        EngineResult, ReferencePolicy, SnapshotStore, SpecResolver, StatusReconciler,
        TemplateSlot, UpgradeController, Upgrader,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
