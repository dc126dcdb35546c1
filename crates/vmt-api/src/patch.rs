//! JSON patch builder (RFC 6902 subset)
//!
//! Only `test`, `add`, `replace` and `remove` are built here. Application is
//! left to [`json_patch::patch`], which reverts every operation when one
//! fails; `test` operations make a patch a compare-and-swap.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single patch operation, in RFC 6902 wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Test { path: String, value: Value },
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    /// Target path of this operation
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Test { path, .. }
            | Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path } => path,
        }
    }
}

/// Ordered list of operations applied as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Vec<PatchOperation>);

impl Patch {
    /// Create empty patch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builder: assert `path` currently equals `value`
    #[must_use]
    pub fn test(mut self, path: impl Into<String>, value: Value) -> Self {
        self.0.push(PatchOperation::Test {
            path: path.into(),
            value,
        });
        self
    }

    /// Builder: add `value` at `path`
    #[must_use]
    pub fn add(mut self, path: impl Into<String>, value: Value) -> Self {
        self.0.push(PatchOperation::Add {
            path: path.into(),
            value,
        });
        self
    }

    /// Builder: replace the value at `path`
    #[must_use]
    pub fn replace(mut self, path: impl Into<String>, value: Value) -> Self {
        self.0.push(PatchOperation::Replace {
            path: path.into(),
            value,
        });
        self
    }

    /// Builder: remove the value at `path`
    #[must_use]
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.0.push(PatchOperation::Remove { path: path.into() });
        self
    }

    /// Append all operations of another patch
    pub fn append(&mut self, other: Patch) {
        self.0.extend(other.0);
    }

    /// Operations in order
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a patch [`json_patch::patch`] can apply
    ///
    /// # Errors
    /// Returns the serde error when a path is not a valid JSON pointer.
    pub fn to_json_patch(&self) -> serde_json::Result<json_patch::Patch> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// Escape a key for use as a JSON pointer token
#[must_use]
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
