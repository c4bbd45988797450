//! Provisioner configuration.
//!
//! Read from environment variables:
//! - `PROVISIONER_NAME`: name the controller registers this plugin under. Required.
//! - `NFS_PROVISIONER_MOUNT_ROOT`: root directory for local mount points.
//!   Defaults to `/persistentvolumes`.
//! - `NFS_PROVISIONER_FS_TYPE`: filesystem type passed to `mount -t`. Defaults to `nfs`.
//! - `NFS_PROVISIONER_MOUNT_OPTIONS`: comma-separated `mount -o` options. Defaults to none.
//! - `NFS_PROVISIONER_ON_DELETE`: `archive` or `purge`. Defaults to `archive`.
//! - `NFS_PROVISIONER_GROUPING_LABELS`: comma-separated grouping label keys,
//!   in directory-name order.

use std::path::PathBuf;

use crate::error::ProvisionerError;
use crate::types::DeleteBehavior;

pub const ENV_PROVISIONER_NAME: &str = "PROVISIONER_NAME";
pub const ENV_MOUNT_ROOT: &str = "NFS_PROVISIONER_MOUNT_ROOT";
pub const ENV_FS_TYPE: &str = "NFS_PROVISIONER_FS_TYPE";
pub const ENV_MOUNT_OPTIONS: &str = "NFS_PROVISIONER_MOUNT_OPTIONS";
pub const ENV_ON_DELETE: &str = "NFS_PROVISIONER_ON_DELETE";
pub const ENV_GROUPING_LABELS: &str = "NFS_PROVISIONER_GROUPING_LABELS";

static MOUNT_ROOT: &str = "/persistentvolumes";
static DEFAULT_GROUPING_LABELS: [&str; 3] = [
    "nfs-provisioner/tenant",
    "nfs-provisioner/stack",
    "nfs-provisioner/service",
];

/// Settings for one provisioner process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    pub name: String,
    pub mount_root: PathBuf,
    pub fs_type: String,
    pub mount_options: Vec<String>,
    pub on_delete: DeleteBehavior,
    /// Grouping label keys; their count is the number of grouping fields in
    /// every directory name.
    pub grouping_labels: Vec<String>,
}

impl ProvisionerConfig {
    /// Defaults for everything but the provisioner name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_root: PathBuf::from(MOUNT_ROOT),
            fs_type: "nfs".to_owned(),
            mount_options: Vec::new(),
            on_delete: DeleteBehavior::default(),
            grouping_labels: DEFAULT_GROUPING_LABELS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ProvisionerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProvisionerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = lookup(ENV_PROVISIONER_NAME)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ProvisionerError::Config(format!(
                    "environment variable {ENV_PROVISIONER_NAME} is not set"
                ))
            })?;
        let mut config = Self::new(name.trim());

        if let Some(root) = lookup(ENV_MOUNT_ROOT).filter(|v| !v.is_empty()) {
            let root = PathBuf::from(root);
            if !root.is_absolute() {
                return Err(ProvisionerError::Config(format!(
                    "{ENV_MOUNT_ROOT} must be an absolute path, got {}",
                    root.display()
                )));
            }
            config.mount_root = root;
        }
        if let Some(fs_type) = lookup(ENV_FS_TYPE).filter(|v| !v.trim().is_empty()) {
            config.fs_type = fs_type.trim().to_owned();
        }
        if let Some(options) = lookup(ENV_MOUNT_OPTIONS) {
            config.mount_options = split_list(&options);
        }
        if let Some(on_delete) = lookup(ENV_ON_DELETE) {
            config.on_delete = on_delete
                .parse()
                .map_err(|e| ProvisionerError::config(format!("{ENV_ON_DELETE}: {e}")))?;
        }
        if let Some(labels) = lookup(ENV_GROUPING_LABELS) {
            config.grouping_labels = split_list(&labels);
        }
        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ProvisionerConfig, ProvisionerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ProvisionerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[(ENV_PROVISIONER_NAME, "example.com/nfs")]).unwrap();
        assert_eq!(config, ProvisionerConfig::new("example.com/nfs"));
        assert_eq!(config.mount_root, PathBuf::from("/persistentvolumes"));
        assert_eq!(config.on_delete, DeleteBehavior::Archive);
        assert_eq!(config.grouping_labels.len(), 3);
    }

    #[test]
    fn name_is_required() {
        assert!(matches!(load(&[]), Err(ProvisionerError::Config(_))));
        assert!(matches!(
            load(&[(ENV_PROVISIONER_NAME, "  ")]),
            Err(ProvisionerError::Config(_))
        ));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            (ENV_PROVISIONER_NAME, "example.com/nfs"),
            (ENV_MOUNT_ROOT, "/mnt/pv"),
            (ENV_FS_TYPE, "nfs4"),
            (ENV_MOUNT_OPTIONS, "vers=4.1, hard,,"),
            (ENV_ON_DELETE, "purge"),
            (ENV_GROUPING_LABELS, "team,app"),
        ])
        .unwrap();
        assert_eq!(config.mount_root, PathBuf::from("/mnt/pv"));
        assert_eq!(config.fs_type, "nfs4");
        assert_eq!(config.mount_options, vec!["vers=4.1", "hard"]);
        assert_eq!(config.on_delete, DeleteBehavior::Purge);
        assert_eq!(config.grouping_labels, vec!["team", "app"]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[(ENV_PROVISIONER_NAME, "p"), (ENV_ON_DELETE, "shred")]).is_err());
        assert!(load(&[(ENV_PROVISIONER_NAME, "p"), (ENV_MOUNT_ROOT, "relative")]).is_err());
    }
}
