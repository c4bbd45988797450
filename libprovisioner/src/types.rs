//! Core provisioner types: export targets, requests, descriptors.
//!
//! These types form the data model shared by the namer, the mount cache, the
//! lifecycle engine and the controller adapter.  They are all
//! [`Serialize`]/[`Deserialize`] so descriptors can be persisted by the caller
//! and handed back verbatim.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Export target
// ---------------------------------------------------------------------------

/// A `(server, path)` pair identifying one NFS export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExportTarget {
    /// Host name or address of the NFS server.
    pub server: String,
    /// Absolute path on the server.
    pub path: String,
}

impl ExportTarget {
    pub fn new(server: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            path: path.into(),
        }
    }

    /// The same export with [`normalize_remote_path`] applied to its path.
    pub fn normalized(&self) -> Self {
        Self::new(self.server.clone(), normalize_remote_path(&self.path))
    }

    /// The export one directory deeper, at `path/<dir>`.
    pub fn child(&self, dir: &str) -> Self {
        let path = normalize_remote_path(&self.path);
        let base = path.trim_end_matches('/');
        Self {
            server: self.server.clone(),
            path: format!("{base}/{dir}"),
        }
    }

    /// Split into the parent export and the final path component.
    ///
    /// Returns `None` for the root path or a path without components.  Both
    /// halves come out normalized.
    pub fn split_last(&self) -> Option<(Self, String)> {
        let path = normalize_remote_path(&self.path);
        let (parent, last) = path.rsplit_once('/')?;
        if last.is_empty() {
            return None;
        }
        let parent = if parent.is_empty() { "/" } else { parent };
        Some((
            Self::new(self.server.clone(), parent),
            last.to_owned(),
        ))
    }

    /// The `server:path` source string understood by `mount`.
    pub fn source(&self) -> String {
        format!("{}:{}", self.server, self.path)
    }
}

/// Collapse repeated `/` and drop trailing ones, keeping a lone root `/`.
///
/// `.` and `..` are left alone; the server resolves them.
pub fn normalize_remote_path(path: &str) -> String {
    let joined = path
        .split('/')
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

impl fmt::Display for ExportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.path)
    }
}

// ---------------------------------------------------------------------------
// Grouping identity
// ---------------------------------------------------------------------------

/// Ordered grouping identity of a claim (e.g. tenant, stack, service).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupingKeys(pub Vec<String>);

impl GroupingKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Access mode & reclaim policy
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// What the orchestrator does with a volume once its claim is released.
///
/// Copied verbatim from the request; the engine itself never acts on it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
    Recycle,
}

/// How the engine reclaims a backing directory on delete.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteBehavior {
    /// Rename to `archived-<name>` so an operator can recover the data.
    #[default]
    Archive,
    /// Recursively remove the directory.
    Purge,
}

impl std::str::FromStr for DeleteBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Ok(Self::Archive),
            "purge" => Ok(Self::Purge),
            other => Err(format!("unknown delete behavior {other:?} (expected archive or purge)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests & descriptors
// ---------------------------------------------------------------------------

/// Label-based selection among pre-existing volumes.  Never supported; its
/// presence on a request is an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Request to provision a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeRequest {
    /// Orchestrator-visible volume name.
    pub name: String,
    /// Grouping identity, in the namer's field order.
    #[serde(default)]
    pub grouping: GroupingKeys,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Requested capacity as an orchestrator quantity, e.g. `"1Gi"`.
    #[serde(default)]
    pub capacity: String,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub selector: Option<LabelSelector>,
    /// Storage-class parameters; `server` and `remotePath` are required.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Storage handle for a provisioned volume.
///
/// Returned by provision, persisted by the caller and handed back to delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub name: String,
    pub capacity: String,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    /// Grouping label key -> grouping value.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Export of the volume itself: the parent export plus the directory name.
    pub export: ExportTarget,
}

/// A backing directory found beneath a mounted export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeEntry {
    /// Directory name on disk, including any archive prefix.
    pub dir_name: String,
    pub grouping: GroupingKeys,
    /// Volume name decoded from the directory name.
    pub name: String,
    pub archived: bool,
    pub local_path: PathBuf,
}
