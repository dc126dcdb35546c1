//! Upgrade requests and their phase state machine
//!
//! `Unset → Running → Succeeded | Failed`. Both end states are terminal.

use crate::meta::{ObjectKey, ObjectMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UPGRADE_REQUEST_API_VERSION: &str = "instancetype.vmt.io/v1alpha1";
pub const UPGRADE_REQUEST_KIND: &str = "SnapshotUpgradeRequest";

/// Illegal phase change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal upgrade phase transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    #[serde(rename = "")]
    Unset,
    Running,
    Succeeded,
    Failed,
}

impl Phase {
    pub const ALL: [Self; 4] = [Self::Unset, Self::Running, Self::Succeeded, Self::Failed];

    /// Phases reachable from `self` in one step
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Phase> {
        match self {
            Self::Unset => vec![Self::Running],
            Self::Running => vec![Self::Succeeded, Self::Failed],
            Self::Succeeded | Self::Failed => vec![],
        }
    }

    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: Phase) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Validate a phase change
    ///
    /// # Errors
    /// Returns [`TransitionError`] when `to` is not reachable from `self`.
    pub fn transition_to(self, to: Phase) -> Result<Phase, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: self, to })
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    #[serde(default = "request_api_version")]
    pub api_version: String,

    #[serde(default = "request_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: UpgradeRequestSpec,

    #[serde(default)]
    pub status: UpgradeRequestStatus,
}

impl UpgradeRequest {
    /// Request migration of one snapshot
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        target_snapshot_name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: request_api_version(),
            kind: request_kind(),
            metadata: ObjectMeta::named(name).with_namespace(namespace),
            spec: UpgradeRequestSpec {
                target_snapshot_name: target_snapshot_name.into(),
            },
            status: UpgradeRequestStatus::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Key of the snapshot to migrate
    #[inline]
    #[must_use]
    pub fn target_key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.metadata.namespace.clone(),
            name: self.spec.target_snapshot_name.clone(),
        }
    }
}

fn request_api_version() -> String {
    UPGRADE_REQUEST_API_VERSION.to_string()
}

fn request_kind() -> String {
    UPGRADE_REQUEST_KIND.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequestSpec {
    pub target_snapshot_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequestStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UpgradeResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl UpgradeRequestStatus {
    /// Status for a successful upgrade
    #[must_use]
    pub fn succeeded(result: UpgradeResult) -> Self {
        Self {
            phase: Phase::Succeeded,
            result: Some(result),
            conditions: Vec::new(),
        }
    }

    /// Status for a failed upgrade
    #[must_use]
    pub fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Failed,
            result: None,
            conditions: vec![Condition {
                condition_type: ConditionType::Failure,
                status: ConditionStatus::True,
                reason: reason.into(),
                message: message.into(),
                last_transition_time: Utc::now(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeResult {
    pub new_name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}
