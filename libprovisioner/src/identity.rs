//! Plugin discovery and health.
//!
//! Lets operators (and the `probe` command) check which provisioner name a
//! process serves and whether its mount root is usable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;

/// Information about the provisioner plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Name the controller registers the plugin under.
    pub name: String,
    /// Version of this crate.
    pub vendor_version: String,
}

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait ProvisionerIdentity: Send + Sync {
    /// Return the plugin name and version.
    async fn plugin_info(&self) -> Result<PluginInfo, ProvisionerError>;

    /// Liveness probe.  Returns `true` when the plugin is healthy.
    async fn probe(&self) -> Result<bool, ProvisionerError>;
}
