//! NFS provisioner plugin for the external provision controller.
//!
//! [`NfsProvisioner`] implements [`Provisioner`] and [`ProvisionerIdentity`]
//! on top of a [`VolumeLifecycleEngine`].  It only translates between the
//! controller's shapes and the engine's, logs failures with the export they
//! concern, and sorts errors into transient and permanent ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument};

use crate::config::ProvisionerConfig;
use crate::controller::{
    ControllerError, NfsVolumeSource, ObjectMeta, PersistentVolume, PersistentVolumeSpec,
    Provisioner, RESOURCE_STORAGE, VolumeOptions,
};
use crate::engine::{PARAM_REMOTE_PATH, PARAM_SERVER, VolumeLifecycleEngine};
use crate::error::ProvisionerError;
use crate::identity::{PluginInfo, ProvisionerIdentity};
use crate::mount::{MountCache, SystemMounter};
use crate::namer::PathNamer;
use crate::types::{ExportTarget, GroupingKeys, VolumeDescriptor, VolumeRequest};

impl From<ProvisionerError> for ControllerError {
    fn from(err: ProvisionerError) -> Self {
        if err.is_retryable() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

/// Directory-per-volume NFS provisioner.
pub struct NfsProvisioner {
    name: String,
    engine: VolumeLifecycleEngine,
}

impl NfsProvisioner {
    /// Build a provisioner that mounts through the host's `mount` command.
    pub fn new(config: &ProvisionerConfig) -> Self {
        let mounter = SystemMounter::new(config.fs_type.clone(), config.mount_options.clone());
        let mounts = MountCache::new(config.mount_root.clone(), Arc::new(mounter));
        let namer = PathNamer::new(config.grouping_labels.iter().cloned());
        Self::with_engine(
            config.name.clone(),
            VolumeLifecycleEngine::new(mounts, namer, config.on_delete),
        )
    }

    pub fn with_engine(name: impl Into<String>, engine: VolumeLifecycleEngine) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }

    pub fn engine(&self) -> &VolumeLifecycleEngine {
        &self.engine
    }
}

/// Translate controller options into an engine request.
fn volume_request(options: VolumeOptions) -> VolumeRequest {
    VolumeRequest {
        capacity: options
            .claim
            .requests
            .get(RESOURCE_STORAGE)
            .cloned()
            .unwrap_or_default(),
        name: options.pv_name,
        grouping: GroupingKeys(options.grouping),
        access_modes: options.claim.access_modes,
        reclaim_policy: options.reclaim_policy,
        selector: options.claim.selector,
        parameters: options.parameters,
    }
}

fn persistent_volume(desc: VolumeDescriptor) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: desc.name,
            labels: desc.labels,
        },
        spec: PersistentVolumeSpec {
            persistent_volume_reclaim_policy: desc.reclaim_policy,
            access_modes: desc.access_modes,
            capacity: BTreeMap::from([(RESOURCE_STORAGE.to_owned(), desc.capacity)]),
            nfs: Some(NfsVolumeSource {
                server: desc.export.server,
                path: desc.export.path,
                read_only: false,
            }),
        },
    }
}

fn volume_descriptor(volume: &PersistentVolume) -> Result<VolumeDescriptor, ControllerError> {
    let nfs = volume.spec.nfs.as_ref().ok_or_else(|| {
        ControllerError::Permanent(format!(
            "volume {} has no NFS source",
            volume.metadata.name
        ))
    })?;
    Ok(VolumeDescriptor {
        name: volume.metadata.name.clone(),
        capacity: volume
            .spec
            .capacity
            .get(RESOURCE_STORAGE)
            .cloned()
            .unwrap_or_default(),
        access_modes: volume.spec.access_modes.clone(),
        reclaim_policy: volume.spec.persistent_volume_reclaim_policy,
        labels: volume.metadata.labels.clone(),
        export: ExportTarget::new(nfs.server.clone(), nfs.path.clone()),
    })
}

#[async_trait]
impl Provisioner for NfsProvisioner {
    #[instrument(skip_all, fields(pv = %options.pv_name))]
    async fn provision(&self, options: VolumeOptions) -> Result<PersistentVolume, ControllerError> {
        let server = options.parameters.get(PARAM_SERVER).cloned().unwrap_or_default();
        let path = options.parameters.get(PARAM_REMOTE_PATH).cloned().unwrap_or_default();
        let request = volume_request(options);

        match self.engine.provision(&request).await {
            Ok(desc) => {
                info!(server = %desc.export.server, path = %desc.export.path, "provisioned volume");
                Ok(persistent_volume(desc))
            }
            Err(e) => {
                error!(%server, %path, error = %e, retryable = e.is_retryable(), "provision failed");
                Err(e.into())
            }
        }
    }

    #[instrument(skip_all, fields(pv = %volume.metadata.name))]
    async fn delete(&self, volume: &PersistentVolume) -> Result<(), ControllerError> {
        let desc = volume_descriptor(volume)?;
        match self.engine.delete(&desc).await {
            Ok(()) => {
                info!(server = %desc.export.server, path = %desc.export.path, "reclaimed volume");
                Ok(())
            }
            Err(e) => {
                error!(server = %desc.export.server, path = %desc.export.path, error = %e,
                    retryable = e.is_retryable(), "delete failed");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ProvisionerIdentity for NfsProvisioner {
    async fn plugin_info(&self) -> Result<PluginInfo, ProvisionerError> {
        Ok(PluginInfo {
            name: self.name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, ProvisionerError> {
        // Healthy when the mount root exists and is a directory.
        let healthy = tokio::fs::metadata(self.engine.mounts().root())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use super::*;
    use crate::controller::ClaimSpec;
    use crate::mount::testing::FakeMounter;
    use crate::types::{AccessMode, DeleteBehavior, LabelSelector, ReclaimPolicy};

    fn provisioner(root: &Path, mounter: Arc<FakeMounter>) -> NfsProvisioner {
        let engine = VolumeLifecycleEngine::new(
            MountCache::new(root, mounter),
            PathNamer::new(["tenant", "stack", "service"]),
            DeleteBehavior::Archive,
        );
        NfsProvisioner::with_engine("example.com/nfs", engine)
    }

    fn options() -> VolumeOptions {
        VolumeOptions {
            pv_name: "pvc-1234".into(),
            reclaim_policy: ReclaimPolicy::Delete,
            claim: ClaimSpec {
                access_modes: vec![AccessMode::ReadWriteMany],
                requests: BTreeMap::from([(RESOURCE_STORAGE.into(), "5Gi".into())]),
                selector: None,
            },
            grouping: vec!["acme".into(), "shop".into(), "db".into()],
            parameters: HashMap::from([
                ("server".into(), "10.0.0.5".into()),
                ("remotePath".into(), "/srv/nfs".into()),
            ]),
        }
    }

    #[tokio::test]
    async fn provision_then_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(tmp.path(), FakeMounter::new());

        let pv = p.provision(options()).await.unwrap();
        assert_eq!(pv.metadata.name, "pvc-1234");
        assert_eq!(pv.metadata.labels.get("service").map(String::as_str), Some("db"));
        assert_eq!(
            pv.spec.capacity.get(RESOURCE_STORAGE).map(String::as_str),
            Some("5Gi")
        );
        let nfs = pv.spec.nfs.clone().unwrap();
        assert_eq!(nfs.server, "10.0.0.5");
        assert_eq!(nfs.path, "/srv/nfs/acme-shop-db-pvc-1234");

        let mount_point = p
            .engine()
            .mounts()
            .mount_point(&ExportTarget::new("10.0.0.5", "/srv/nfs"));
        assert!(mount_point.join("acme-shop-db-pvc-1234").is_dir());

        p.delete(&pv).await.unwrap();
        assert!(mount_point.join("archived-acme-shop-db-pvc-1234").is_dir());
    }

    #[tokio::test]
    async fn request_errors_are_permanent() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(tmp.path(), FakeMounter::new());

        let mut opts = options();
        opts.claim.selector = Some(LabelSelector::default());
        assert!(matches!(
            p.provision(opts).await,
            Err(ControllerError::Permanent(_))
        ));

        let mut opts = options();
        opts.parameters.clear();
        assert!(matches!(
            p.provision(opts).await,
            Err(ControllerError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn mount_errors_are_transient() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::new();
        mounter.fail_next(1);
        let p = provisioner(tmp.path(), mounter);

        let err = p.provision(options()).await.unwrap_err();
        assert!(err.is_transient());
        // The controller's retry succeeds.
        p.provision(options()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_without_nfs_source_is_permanent() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(tmp.path(), FakeMounter::new());
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: "pv-hostpath".into(),
                labels: BTreeMap::new(),
            },
            spec: PersistentVolumeSpec::default(),
        };
        assert!(matches!(
            p.delete(&pv).await,
            Err(ControllerError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn identity() {
        let tmp = tempfile::tempdir().unwrap();
        let p = provisioner(tmp.path(), FakeMounter::new());
        let info = p.plugin_info().await.unwrap();
        assert_eq!(info.name, "example.com/nfs");
        assert!(p.probe().await.unwrap());

        let missing = provisioner(Path::new("/nonexistent/path/for/test"), FakeMounter::new());
        assert!(!missing.probe().await.unwrap());
    }

    #[test]
    fn new_uses_config() {
        let mut config = ProvisionerConfig::new("example.com/nfs");
        config.grouping_labels = vec!["team".into()];
        config.on_delete = DeleteBehavior::Purge;
        let p = NfsProvisioner::new(&config);
        assert_eq!(p.engine().namer().arity(), 1);
        assert_eq!(p.engine().delete_behavior(), DeleteBehavior::Purge);
        assert_eq!(p.engine().mounts().root(), Path::new("/persistentvolumes"));
    }
}
