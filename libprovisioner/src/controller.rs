//! Plugin contract of the external provision controller.
//!
//! The controller watches claims, persists the volumes it gets back and
//! decides when to retry.  It drives a plugin through exactly two calls,
//! [`Provisioner::provision`] and [`Provisioner::delete`], using the
//! orchestrator-shaped types below.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccessMode, LabelSelector, ReclaimPolicy};

/// Resource name of storage capacity in requests and capacities.
pub const RESOURCE_STORAGE: &str = "storage";

/// How a plugin failure should be handled by the controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Worth retrying later (mount or filesystem trouble).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying the same call cannot succeed.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ControllerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Claim fields the plugin needs: access modes, requests and selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    /// Resource name -> quantity, e.g. `storage: 1Gi`.
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub selector: Option<LabelSelector>,
}

/// Everything the controller hands a plugin for one provision call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeOptions {
    /// Name the controller chose for the new volume.
    pub pv_name: String,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub claim: ClaimSpec,
    /// Ordered grouping identity of the claim (e.g. tenant, stack, service).
    #[serde(default)]
    pub grouping: Vec<String>,
    /// Storage-class parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NfsVolumeSource {
    pub server: String,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeSpec {
    #[serde(default)]
    pub persistent_volume_reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub access_modes: Vec<AccessMode>,
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
    #[serde(default)]
    pub nfs: Option<NfsVolumeSource>,
}

/// Volume object the controller persists after a successful provision and
/// hands back on delete.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentVolume {
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeSpec,
}

/// Plugin interface the external controller drives.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create storage for a claim and describe it.
    async fn provision(&self, options: VolumeOptions) -> Result<PersistentVolume, ControllerError>;

    /// Reclaim the storage behind a previously provisioned volume.
    async fn delete(&self, volume: &PersistentVolume) -> Result<(), ControllerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_options_from_yaml() {
        let yaml = r#"
pvName: pv-1
reclaimPolicy: Retain
claim:
  accessModes: [ReadWriteMany]
  requests:
    storage: 1Gi
grouping: [acme, web, api]
parameters:
  server: nfs1
  remotePath: /export
"#;
        let options: VolumeOptions = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(options.pv_name, "pv-1");
        assert_eq!(options.reclaim_policy, ReclaimPolicy::Retain);
        assert_eq!(options.claim.access_modes, vec![AccessMode::ReadWriteMany]);
        assert_eq!(options.claim.requests.get(RESOURCE_STORAGE).map(String::as_str), Some("1Gi"));
        assert!(options.claim.selector.is_none());
        assert_eq!(options.grouping, vec!["acme", "web", "api"]);
    }

    #[test]
    fn persistent_volume_uses_camel_case() {
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: "pv-1".into(),
                labels: BTreeMap::new(),
            },
            spec: PersistentVolumeSpec {
                persistent_volume_reclaim_policy: ReclaimPolicy::Delete,
                access_modes: vec![AccessMode::ReadWriteOnce],
                capacity: BTreeMap::from([(RESOURCE_STORAGE.into(), "1Gi".into())]),
                nfs: Some(NfsVolumeSource {
                    server: "nfs1".into(),
                    path: "/export/pv-1".into(),
                    read_only: false,
                }),
            },
        };
        let json = serde_json::to_value(&pv).expect("serialize");
        assert_eq!(json["spec"]["persistentVolumeReclaimPolicy"], "Delete");
        assert_eq!(json["spec"]["nfs"]["readOnly"], false);
    }

    #[test]
    fn transient_classification() {
        assert!(ControllerError::Transient("mount".into()).is_transient());
        assert!(!ControllerError::Permanent("selector".into()).is_transient());
    }
}
