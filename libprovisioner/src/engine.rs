//! Volume lifecycle: provision and reclaim backing directories.
//!
//! The engine owns a [`MountCache`] and a [`PathNamer`].  Provision mounts
//! the export named by the request parameters, creates one directory for the
//! volume and returns a [`VolumeDescriptor`] pointing at it.  Delete mounts
//! the descriptor's parent export and archives (or, when configured, purges)
//! that directory.  The descriptor is the only state; nothing is kept between
//! calls besides the mount locks.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::error::{DeleteCause, ProvisionCause, ProvisionerError};
use crate::mount::MountCache;
use crate::namer::{ARCHIVE_PREFIX, PathNamer};
use crate::types::{
    DeleteBehavior, ExportTarget, VolumeDescriptor, VolumeEntry, VolumeRequest, normalize_remote_path,
};

/// Parameter naming the NFS server.
pub const PARAM_SERVER: &str = "server";
/// Parameter naming the absolute export path on the server.
pub const PARAM_REMOTE_PATH: &str = "remotePath";

/// Mode for backing directories: writable by any pod user.
const VOLUME_DIR_MODE: u32 = 0o777;

/// Provision / delete contract over directory-backed NFS volumes.
pub struct VolumeLifecycleEngine {
    mounts: MountCache,
    namer: PathNamer,
    on_delete: DeleteBehavior,
}

impl VolumeLifecycleEngine {
    pub fn new(mounts: MountCache, namer: PathNamer, on_delete: DeleteBehavior) -> Self {
        Self {
            mounts,
            namer,
            on_delete,
        }
    }

    pub fn mounts(&self) -> &MountCache {
        &self.mounts
    }

    pub fn namer(&self) -> &PathNamer {
        &self.namer
    }

    pub fn delete_behavior(&self) -> DeleteBehavior {
        self.on_delete
    }

    /// Create the backing directory for `req` and describe it.
    ///
    /// Request validation happens before any filesystem mutation.  A
    /// directory left over from an earlier attempt for the same request is
    /// reused.
    #[instrument(skip_all, fields(name = %req.name))]
    pub async fn provision(&self, req: &VolumeRequest) -> Result<VolumeDescriptor, ProvisionerError> {
        if req.selector.is_some() {
            return Err(ProvisionerError::UnsupportedSelector);
        }
        let target = export_from_parameters(req)?;
        let dir_name = self.namer.volume_dir_name(req)?;

        let mount_point = self
            .mounts
            .ensure_mounted(&target)
            .await
            .map_err(ProvisionerError::provision_mount)?;

        let volume_dir = mount_point.join(&dir_name);
        create_volume_dir(&volume_dir).await.map_err(|e| {
            warn!(server = %target.server, path = %target.path, dir = %volume_dir.display(), error = %e,
                "failed to create volume directory");
            ProvisionerError::ProvisionFailed {
                target: target.to_string(),
                path: volume_dir.display().to_string(),
                cause: ProvisionCause::DirectoryCreate,
                reason: e.to_string(),
            }
        })?;

        let descriptor = VolumeDescriptor {
            name: req.name.clone(),
            capacity: req.capacity.clone(),
            access_modes: req.access_modes.clone(),
            reclaim_policy: req.reclaim_policy,
            labels: self.namer.labels(&req.grouping),
            export: target.child(&dir_name),
        };

        info!(export = %descriptor.export, dir = %volume_dir.display(), "volume provisioned");
        Ok(descriptor)
    }

    /// Reclaim the directory behind `descriptor`.
    ///
    /// Retry-safe: a directory that is already gone counts as reclaimed, and
    /// a failure leaves the directory where it was.
    #[instrument(skip_all, fields(name = %descriptor.name, export = %descriptor.export))]
    pub async fn delete(&self, descriptor: &VolumeDescriptor) -> Result<(), ProvisionerError> {
        let (parent, path_dir) = descriptor.export.split_last().ok_or_else(|| {
            ProvisionerError::InvalidDescriptor(format!(
                "export path {:?} has no parent directory",
                descriptor.export.path
            ))
        })?;

        let grouping = self.namer.grouping_from_labels(&descriptor.labels)?;
        let dir_name = self
            .namer
            .dir_name(&grouping, &descriptor.name)
            .map_err(|e| ProvisionerError::InvalidDescriptor(e.to_string()))?;
        if dir_name != path_dir {
            return Err(ProvisionerError::InvalidDescriptor(format!(
                "labels name directory {dir_name:?} but export path ends in {path_dir:?}"
            )));
        }

        let mount_point = self
            .mounts
            .ensure_mounted(&parent)
            .await
            .map_err(|e| {
                warn!(server = %parent.server, path = %parent.path, mount_point = %e.mount_point,
                    "failed to mount export for delete");
                ProvisionerError::delete_mount(e)
            })?;

        match self.on_delete {
            DeleteBehavior::Archive => archive(&parent, &mount_point, &dir_name).await,
            DeleteBehavior::Purge => purge(&parent, &mount_point, &dir_name).await,
        }
    }

    /// Decode every backing directory beneath `target`.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn list_volumes(&self, target: &ExportTarget) -> Result<Vec<VolumeEntry>, ProvisionerError> {
        let list_failed = |reason: String| ProvisionerError::ListFailed {
            target: target.to_string(),
            reason,
        };

        let mount_point = self
            .mounts
            .ensure_mounted(target)
            .await
            .map_err(|e| list_failed(e.to_string()))?;

        let mut dir = tokio::fs::read_dir(&mount_point)
            .await
            .map_err(|e| list_failed(format!("read_dir {}: {e}", mount_point.display())))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| list_failed(e.to_string()))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let Some(dir_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_dir {
                continue;
            }

            let (archived, live_name) = match dir_name.strip_prefix(ARCHIVE_PREFIX) {
                Some(rest) => (true, rest),
                None => (false, dir_name.as_str()),
            };
            match self.namer.parse_grouping_keys(live_name) {
                Ok((grouping, name)) => entries.push(VolumeEntry {
                    local_path: entry.path(),
                    dir_name: dir_name.clone(),
                    grouping,
                    name,
                    archived,
                }),
                Err(e) => debug!(%dir_name, error = %e, "skipping undecodable directory"),
            }
        }

        entries.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(entries)
    }
}

/// Resolve the export target from the request's parameters.
fn export_from_parameters(req: &VolumeRequest) -> Result<ExportTarget, ProvisionerError> {
    let server = req.parameters.get(PARAM_SERVER);
    let path = req.parameters.get(PARAM_REMOTE_PATH);

    let (server, path) = match (server, path) {
        (Some(server), Some(path)) => (server, path),
        _ => {
            let missing: Vec<&str> = [(PARAM_SERVER, server), (PARAM_REMOTE_PATH, path)]
                .into_iter()
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| k)
                .collect();
            return Err(ProvisionerError::MissingParameter(missing.join(", ")));
        }
    };

    if server.is_empty() || server.contains('/') {
        return Err(ProvisionerError::InvalidParameter {
            key: PARAM_SERVER.to_owned(),
            reason: format!("{server:?} is not a host name or address"),
        });
    }
    if !path.starts_with('/') {
        return Err(ProvisionerError::InvalidParameter {
            key: PARAM_REMOTE_PATH.to_owned(),
            reason: format!("{path:?} is not an absolute path"),
        });
    }

    for key in req.parameters.keys() {
        if key != PARAM_SERVER && key != PARAM_REMOTE_PATH {
            debug!(%key, "ignoring unrecognized parameter");
        }
    }

    // "/export/" and "/export" must resolve to one mount point.
    Ok(ExportTarget::new(server.clone(), normalize_remote_path(path)))
}

async fn create_volume_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(VOLUME_DIR_MODE)
        .create(dir)
        .await?;
    // The builder's mode is filtered through the umask.
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(VOLUME_DIR_MODE)).await
}

async fn archive(parent: &ExportTarget, mount_point: &Path, dir_name: &str) -> Result<(), ProvisionerError> {
    let source = mount_point.join(dir_name);
    let dest = mount_point.join(format!("{ARCHIVE_PREFIX}{dir_name}"));
    let rename_failed = |reason: String| {
        warn!(server = %parent.server, path = %parent.path, from = %source.display(), to = %dest.display(),
            %reason, "failed to archive volume directory");
        ProvisionerError::DeleteFailed {
            target: parent.to_string(),
            path: source.display().to_string(),
            cause: DeleteCause::Rename,
            reason,
        }
    };

    if !path_exists(&source).await {
        if path_exists(&dest).await {
            debug!(dest = %dest.display(), "volume already archived");
        } else {
            warn!(source = %source.display(), "volume directory missing, nothing to archive");
        }
        return Ok(());
    }
    // rename(2) would silently replace an empty directory at the destination.
    if path_exists(&dest).await {
        return Err(rename_failed(format!(
            "archive destination {} already exists",
            dest.display()
        )));
    }

    info!(from = %source.display(), to = %dest.display(), "archiving volume directory");
    match tokio::fs::rename(&source, &dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(source = %source.display(), "volume directory vanished during archive");
            Ok(())
        }
        Err(e) => Err(rename_failed(e.to_string())),
    }
}

async fn purge(parent: &ExportTarget, mount_point: &Path, dir_name: &str) -> Result<(), ProvisionerError> {
    let dir = mount_point.join(dir_name);
    info!(dir = %dir.display(), "removing volume directory");
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "volume directory already removed");
            Ok(())
        }
        Err(e) => {
            warn!(server = %parent.server, path = %parent.path, dir = %dir.display(), error = %e,
                "failed to remove volume directory");
            Err(ProvisionerError::DeleteFailed {
                target: parent.to_string(),
                path: dir.display().to_string(),
                cause: DeleteCause::Remove,
                reason: e.to_string(),
            })
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}
