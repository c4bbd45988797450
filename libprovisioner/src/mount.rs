//! Local mounts of remote exports.
//!
//! [`MountCache`] keeps at most one local mount point per [`ExportTarget`].
//! The mount point is derived from the target itself, so no table has to be
//! persisted: every call for the same target resolves to the same path and
//! the kernel mount table is the source of truth for whether it is mounted.
//!
//! # Local layout
//!
//! ```text
//! <mount_root>/
//!   <escaped server>/
//!     <escaped remote path>/   # mount point, e.g. nfs1/%2Fexport
//!       <volume dir>/
//!       archived-<volume dir>/
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::MountError;
use crate::types::ExportTarget;

/// Bytes left unescaped in mount point components.  `/` is always encoded,
/// so a remote path folds into a single component.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'-');

/// Default mount table consulted by [`SystemMounter`].
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Backend that inspects the mount table and performs mounts.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Whether `mount_point` is currently an active mount point.
    ///
    /// Implementations answer `false` when the table cannot be read.
    async fn is_mounted(&self, mount_point: &Path) -> bool;

    /// Mount `target` on the existing directory `mount_point`.
    async fn mount(&self, target: &ExportTarget, mount_point: &Path) -> io::Result<()>;
}

/// [`Mounter`] backed by the host's `mount` command and `/proc/self/mounts`.
///
/// Mounting requires root privileges in the host mount namespace.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    fs_type: String,
    options: Vec<String>,
    mount_table: PathBuf,
}

impl SystemMounter {
    pub fn new(fs_type: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            fs_type: fs_type.into(),
            options,
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Read mount points from another table file (tests, alternate procfs).
    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new("nfs", Vec::new())
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn is_mounted(&self, mount_point: &Path) -> bool {
        let contents = match tokio::fs::read_to_string(&self.mount_table).await {
            Ok(c) => c,
            Err(e) => {
                debug!(table = %self.mount_table.display(), error = %e, "mount table unreadable, assuming not mounted");
                return false;
            }
        };
        let wanted = mount_point.to_string_lossy();
        mount_points(&contents).any(|mp| mp == wanted)
    }

    async fn mount(&self, target: &ExportTarget, mount_point: &Path) -> io::Result<()> {
        let mut cmd = tokio::process::Command::new("mount");
        cmd.arg("-t").arg(&self.fs_type);
        if !self.options.is_empty() {
            cmd.arg("-o").arg(self.options.join(","));
        }
        cmd.arg(target.source()).arg(mount_point);

        debug!(?cmd, "running mount");
        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::other(format!(
                "mount exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Iterate the mount point column of a `/proc/mounts`-style table.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// whitespace and backslashes in paths written as octal escapes (`\040`).
fn mount_points(table: &str) -> impl Iterator<Item = String> + '_ {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_octal)
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        // Three octal digits fit a byte only up to \377; anything larger is
        // kept literally.
        let escape = bytes.get(i + 1..i + 4).filter(|digits| {
            bytes[i] == b'\\'
                && (b'0'..=b'3').contains(&digits[0])
                && digits[1..].iter().all(|b| (b'0'..=b'7').contains(b))
        });
        match escape {
            Some(digits) => {
                out.push(digits.iter().fold(0u8, |acc, d| acc * 8 + (d - b'0')));
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Tracks and establishes one local mount point per export.
///
/// # Thread safety
///
/// Calls for the same target are serialized by a per-target async mutex, so
/// concurrent callers never race to mount twice.  Different targets hold
/// different locks and mount in parallel.
pub struct MountCache {
    root: PathBuf,
    mounter: Arc<dyn Mounter>,
    locks: DashMap<ExportTarget, Arc<Mutex<()>>>,
}

impl MountCache {
    pub fn new(root: impl Into<PathBuf>, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            root: root.into(),
            mounter,
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The local mount point for `target`.  Pure; touches nothing.
    ///
    /// Spellings of the same remote path (`/export`, `/export/`,
    /// `//export`) share one mount point.
    pub fn mount_point(&self, target: &ExportTarget) -> PathBuf {
        let target = target.normalized();
        self.root
            .join(utf8_percent_encode(&target.server, COMPONENT).to_string())
            .join(utf8_percent_encode(&target.path, COMPONENT).to_string())
    }

    /// Make sure `target` is mounted and return its local mount point.
    ///
    /// Idempotent: an already-mounted target costs one mount-table read.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn ensure_mounted(&self, target: &ExportTarget) -> Result<PathBuf, MountError> {
        let target = &target.normalized();
        let mount_point = self.mount_point(target);
        let fail = |reason: String| MountError {
            target: target.clone(),
            mount_point: mount_point.display().to_string(),
            reason,
        };

        validate_target(target).map_err(&fail)?;

        let lock = Arc::clone(self.locks.entry(target.clone()).or_default().value());
        let _guard = lock.lock().await;

        if self.mounter.is_mounted(&mount_point).await {
            debug!(mount_point = %mount_point.display(), "already mounted");
            return Ok(mount_point);
        }

        tokio::fs::create_dir_all(&mount_point)
            .await
            .map_err(|e| fail(format!("create mount point: {e}")))?;

        if let Err(e) = self.mounter.mount(target, &mount_point).await {
            warn!(server = %target.server, path = %target.path, error = %e, "mount failed");
            return Err(fail(e.to_string()));
        }

        info!(mount_point = %mount_point.display(), "export mounted");
        Ok(mount_point)
    }
}

fn validate_target(target: &ExportTarget) -> Result<(), String> {
    if target.server.is_empty() {
        return Err("server must not be empty".into());
    }
    if target.server.contains('/') {
        return Err("server must not contain '/'".into());
    }
    if !target.path.starts_with('/') {
        return Err("remote path must be absolute".into());
    }
    Ok(())
}
