//! Store error types

use vmt_api::ObjectKey;

/// Errors returned by an [`ObjectStore`](crate::ObjectStore)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{resource} {key} not found")]
    NotFound { resource: Resource, key: ObjectKey },

    /// Create rejected because the name is taken
    #[error("{resource} {key} already exists")]
    AlreadyExists { resource: Resource, key: ObjectKey },

    /// Conditional write lost (a `test` operation failed)
    #[error("conflict writing {resource} {key}: {message}")]
    Conflict {
        resource: Resource,
        key: ObjectKey,
        message: String,
    },

    /// Request is malformed
    #[error("invalid {resource} {key}: {message}")]
    Invalid {
        resource: Resource,
        key: ObjectKey,
        message: String,
    },

    /// Transport or backend failure
    #[error("store failure: {0}")]
    Internal(String),
}

impl StoreError {
    #[inline]
    #[must_use]
    pub fn not_found(resource: Resource, key: &ObjectKey) -> Self {
        Self::NotFound {
            resource,
            key: key.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn already_exists(resource: Resource, key: &ObjectKey) -> Self {
        Self::AlreadyExists {
            resource,
            key: key.clone(),
        }
    }

    /// Map a patch failure onto the store error space
    ///
    /// A failed `test` is a lost compare-and-swap; anything else means the
    /// patch itself does not fit the object.
    #[must_use]
    pub fn from_patch(resource: Resource, key: &ObjectKey, err: &json_patch::PatchError) -> Self {
        if matches!(err.kind, json_patch::PatchErrorKind::TestFailed) {
            Self::Conflict {
                resource,
                key: key.clone(),
                message: err.to_string(),
            }
        } else {
            Self::Invalid {
                resource,
                key: key.clone(),
                message: err.to_string(),
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if error is transient
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Internal(_))
    }
}

/// Stored resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Template,
    Snapshot,
    Workload,
    UpgradeRequest,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Template => "template",
            Self::Snapshot => "snapshot",
            Self::Workload => "workload",
            Self::UpgradeRequest => "upgrade request",
        })
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
