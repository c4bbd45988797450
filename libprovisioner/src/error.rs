//! Provisioner error types.
//!
//! Every fallible operation in `libprovisioner` returns a
//! [`ProvisionerError`].  Mount failures are reported by the mount cache as a
//! standalone [`MountError`] and wrapped by the lifecycle engine into the
//! provision- or delete-specific variant, so the caller can tell at which
//! stage a call failed.  All errors carry plain strings and derive
//! [`Serialize`]/[`Deserialize`] so they can be logged as structured data.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ExportTarget;

/// A local mount of an export could not be established.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[error("mount of {target} at {mount_point} failed: {reason}")]
pub struct MountError {
    /// Export that was being mounted.
    pub target: ExportTarget,
    /// Local directory the export was to be mounted on.
    pub mount_point: String,
    /// Underlying cause (directory creation or the mount command).
    pub reason: String,
}

/// Stage at which a provision call failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProvisionCause {
    Mount,
    DirectoryCreate,
}

impl fmt::Display for ProvisionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount => f.write_str("mount"),
            Self::DirectoryCreate => f.write_str("directory create"),
        }
    }
}

/// Stage at which a delete call failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeleteCause {
    Mount,
    Rename,
    /// Only produced under [`DeleteBehavior::Purge`](crate::types::DeleteBehavior::Purge).
    Remove,
}

impl fmt::Display for DeleteCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount => f.write_str("mount"),
            Self::Rename => f.write_str("rename"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Unified error type for provisioner operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ProvisionerError {
    /// The claim asked to select among existing volumes.
    #[error("claim selector is not supported")]
    UnsupportedSelector,

    /// One or more required parameters were absent.
    #[error("missing required parameter(s): {0}")]
    MissingParameter(String),

    /// A parameter was present but unusable.
    #[error("invalid parameter {key}: {reason}")]
    InvalidParameter {
        /// Parameter key.
        key: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A grouping key or volume name breaks the directory naming rules.
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidName {
        /// Which part of the name was rejected.
        field: String,
        /// The rejected value.
        value: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A descriptor handed to delete cannot be mapped back to a directory.
    #[error("invalid volume descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("provision failed at {cause} on {target} ({path}): {reason}")]
    ProvisionFailed {
        target: String,
        path: String,
        cause: ProvisionCause,
        reason: String,
    },

    #[error("delete failed at {cause} on {target} ({path}): {reason}")]
    DeleteFailed {
        target: String,
        path: String,
        cause: DeleteCause,
        reason: String,
    },

    #[error("listing volumes on {target} failed: {reason}")]
    ListFailed { target: String, reason: String },

    /// The provisioner configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProvisionerError {
    /// Wrap a [`MountError`] raised while provisioning.
    pub fn provision_mount(err: MountError) -> Self {
        Self::ProvisionFailed {
            target: err.target.to_string(),
            path: err.mount_point,
            cause: ProvisionCause::Mount,
            reason: err.reason,
        }
    }

    /// Wrap a [`MountError`] raised while deleting.
    pub fn delete_mount(err: MountError) -> Self {
        Self::DeleteFailed {
            target: err.target.to_string(),
            path: err.mount_point,
            cause: DeleteCause::Mount,
            reason: err.reason,
        }
    }

    /// Create a [`ProvisionerError::InvalidName`].
    pub fn invalid_name(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidName {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`ProvisionerError::Config`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn config<E: fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Whether a retry of the same call may succeed.
    ///
    /// Filesystem and mount failures are transient; malformed requests and
    /// descriptors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProvisionFailed { .. } | Self::DeleteFailed { .. } | Self::ListFailed { .. }
        )
    }
}
