//! Error types for the snapshot engine
//!
//! - [`DecodeError`]: payload, version or kind could not be decoded
//! - [`EngineError`]: everything an engine operation can fail with

use crate::conflict::{Conflicts, RequirementError};
use vmt_api::{ObjectKey, SchemaVersion, TemplateKind, TransitionError};
use vmt_store::{Resource, StoreError};

/// Payload decoding errors
///
/// Fatal to the resolution that hit them; never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Neither a known legacy envelope nor a registered type
    #[error("unrecognized object type: apiVersion={api_version:?}, kind={kind:?}")]
    UnknownType { api_version: String, kind: String },

    /// Legacy envelope carrying a version that never used envelopes
    #[error("unexpected legacy spec revision version: {0}")]
    UnsupportedEnvelopeVersion(String),

    /// Payload is not valid JSON for the detected type
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// No conversion registered for a non-canonical type
    #[error("no conversion registered for {kind} {version}")]
    MissingConversion {
        version: SchemaVersion,
        kind: TemplateKind,
    },

    /// A conversion was handed an object it does not convert
    #[error("conversion for {expected_kind} {expected_version} received {found_kind} {found_version}")]
    ConversionMismatch {
        expected_version: SchemaVersion,
        expected_kind: TemplateKind,
        found_version: SchemaVersion,
        found_kind: TemplateKind,
    },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Stored payload could not be decoded
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Referenced template or snapshot is missing
    #[error("{resource} {key} not found")]
    NotFound { resource: Resource, key: ObjectKey },

    /// Template values collide with values set on the workload
    #[error(transparent)]
    Conflicts(#[from] Conflicts),

    /// Same snapshot name, different content
    #[error("found existing snapshot with unexpected data: {name}")]
    SnapshotIdentityConflict { name: String },

    /// Two payloads that must share a kind do not
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: TemplateKind,
        found: TemplateKind,
    },

    /// Reference kind does not belong to its slot
    #[error("got unexpected kind in {matcher}: {kind}")]
    UnexpectedKind { matcher: &'static str, kind: String },

    /// Reference still waits for its name to be inferred from a volume
    #[error("{matcher} name has not been inferred from volume {volume}")]
    UninferredReference { matcher: &'static str, volume: String },

    /// Preference requirements not met
    #[error(transparent)]
    Requirements(#[from] RequirementError),

    /// Store failure other than not-found
    #[error("store error: {0}")]
    Store(StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Illegal upgrade phase change
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { resource, key } => Self::NotFound { resource, key },
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if error is transient
    ///
    /// Only store failures are; everything else will fail the same way again.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }

    /// Short machine-readable reason
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DecodeFailed",
            Self::NotFound { .. } => "NotFound",
            Self::Conflicts(_) => "Conflict",
            Self::SnapshotIdentityConflict { .. } => "SnapshotIdentityConflict",
            Self::KindMismatch { .. } => "KindMismatch",
            Self::UnexpectedKind { .. } => "UnexpectedKind",
            Self::UninferredReference { .. } => "InferFromVolumeFailure",
            Self::Requirements(_) => "RequirementsNotMet",
            Self::Store(_) => "StoreError",
            Self::Config(_) => "InvalidConfiguration",
            Self::Transition(_) => "IllegalTransition",
        }
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Encode a value for a patch operation
pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> EngineResult<serde_json::Value> {
    Ok(serde_json::to_value(value).map_err(DecodeError::from)?)
}
