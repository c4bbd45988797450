//! # libprovisioner: directory-per-volume NFS provisioning
//!
//! `libprovisioner` turns shared NFS exports into a pool of persistent
//! volumes.  Each volume is a subdirectory of an export, named after the
//! claim's grouping keys and the volume name; deleting a volume archives (or
//! purges) that directory.  The crate plugs into an external provision
//! controller through the [`Provisioner`] trait and follows the usual
//! conventions of the workspace (Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: export targets, requests, descriptors. |
//! | [`error`] | [`ProvisionerError`] enum covering all failure modes. |
//! | [`namer`] | [`PathNamer`]: reversible directory names and labels. |
//! | [`mount`] | [`MountCache`] and the [`Mounter`] seam over `mount(8)`. |
//! | [`engine`] | [`VolumeLifecycleEngine`]: provision, delete, list. |
//! | [`controller`] | [`Provisioner`] trait and controller-facing objects. |
//! | [`identity`] | [`ProvisionerIdentity`] trait: plugin discovery & health. |
//! | [`adapter`] | [`NfsProvisioner`], the plugin wired from configuration. |
//! | [`config`] | [`ProvisionerConfig`] loaded from the environment. |

pub mod adapter;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod identity;
pub mod mount;
pub mod namer;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use adapter::NfsProvisioner;
pub use config::ProvisionerConfig;
pub use controller::{ControllerError, PersistentVolume, Provisioner, VolumeOptions};
pub use engine::VolumeLifecycleEngine;
pub use error::ProvisionerError;
pub use identity::ProvisionerIdentity;
pub use mount::{MountCache, Mounter, SystemMounter};
pub use namer::PathNamer;
pub use types::*;
