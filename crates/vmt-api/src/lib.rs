//! VMT API types
//!
//! Versioned instance type and preference templates, the workloads that
//! reference them, the immutable snapshots that freeze them, and the requests
//! that migrate old snapshots forward.
//!
//! # Core Concepts
//!
//! - [`Template`]: canonical (`v1beta1`) template, a tagged union over the four kinds
//! - [`Workload`]: references templates and records the snapshot in effect
//! - [`Snapshot`]: immutable, labelled, metadata-stripped template payload
//! - [`UpgradeRequest`]: asks for one snapshot to be migrated, tracked by [`Phase`]
//! - [`Patch`]: JSON patch used for compare-and-swap writes
//!
//! # Example
//!
//! ```rust,ignore
//! use vmt_api::{ObjectMeta, Quantity, SchemaVersion, Template, TemplateKind};
//! use vmt_api::instancetype::{Object, v1beta1::InstancetypeSpec};
//!
//! let spec = InstancetypeSpec::new(2, Quantity::parse("128Mi")?);
//! let template = Template::Instancetype(Object::new(
//!     SchemaVersion::CANONICAL,
//!     TemplateKind::Instancetype,
//!     ObjectMeta::named("small").with_namespace("ns"),
//!     spec,
//! ));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod instancetype;
mod meta;
mod patch;
mod path;
mod quantity;
mod snapshot;
mod upgrade;
mod workload;

pub use instancetype::{Family, Object, SchemaVersion, TemplateKind, TemplateOf, GROUP};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference};
pub use patch::{escape_token, Patch, PatchOperation};
pub use path::FieldPath;
pub use quantity::{Quantity, QuantityError};
pub use snapshot::{
    snapshot_labels, Snapshot, LABEL_OBJECT_GENERATION, LABEL_OBJECT_KIND, LABEL_OBJECT_NAME,
    LABEL_OBJECT_UID, LABEL_OBJECT_VERSION,
};
pub use upgrade::{
    Condition, ConditionStatus, ConditionType, Phase, TransitionError, UpgradeRequest,
    UpgradeRequestSpec, UpgradeRequestStatus, UpgradeResult, UPGRADE_REQUEST_API_VERSION,
    UPGRADE_REQUEST_KIND,
};
pub use workload::{
    Bios, Bootloader, Cpu, Devices, Disk, DomainSpec, Efi, Firmware, InferFromVolumeFailurePolicy,
    InstanceSpec, InstanceTemplate, Interface, Machine, Memory, ResourceRequirements, SnapshotRef,
    StatusRef, TemplateMeta, TemplateReference, Workload, WorkloadSpec, WorkloadStatus,
    WORKLOAD_API_VERSION, WORKLOAD_KIND,
};

/// Canonical template
pub type Template = instancetype::v1beta1::Template;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with VMT types
    pub use crate::instancetype::v1beta1::{InstancetypeSpec, PreferenceSpec};
    pub use crate::{
        ObjectKey, ObjectMeta, Patch, Quantity, SchemaVersion, Snapshot, SnapshotRef, StatusRef,
        Template, TemplateKind, TemplateReference, UpgradeRequest, Workload,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
