//! Operator CLI for the NFS subdirectory provisioner.
//!
//! Loads [`ProvisionerConfig`] from the environment and runs one plugin call
//! per invocation, the way the external controller would.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use libprovisioner::{
    ExportTarget, NfsProvisioner, PersistentVolume, Provisioner, ProvisionerConfig,
    ProvisionerIdentity, VolumeOptions,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "nfs-provisioner", version, about = "Directory-per-volume NFS provisioner")]
struct Cli {
    /// Log output format (text, json)
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Format of printed objects (yaml, json)
    #[arg(short, long, value_enum, default_value = "yaml", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision a volume for a claim and print the resulting volume object
    Provision {
        /// Volume options (YAML or JSON)
        #[arg(long, value_name = "FILE")]
        claim: PathBuf,
    },
    /// Reclaim the storage of a previously provisioned volume
    Delete {
        /// Volume object (YAML or JSON)
        #[arg(long, value_name = "FILE")]
        volume: PathBuf,
    },
    /// List volume directories beneath an export
    List {
        #[arg(long)]
        server: String,
        /// Absolute export path on the server
        #[arg(long, value_name = "PATH")]
        path: String,
    },
    /// Print plugin info and fail when the mount root is unusable
    Probe,
}

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn read_object<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both.
    serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_object<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let text = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value).context("Failed to encode YAML")?,
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).context("Failed to encode JSON")? + "\n"
        }
    };
    print!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let config = ProvisionerConfig::from_env().context("Failed to load configuration")?;
    if !matches!(cli.command, Command::Probe) && !nix::unistd::geteuid().is_root() {
        warn!("not running as root; mount calls will likely fail");
    }
    info!(name = %config.name, root = %config.mount_root.display(), "starting provisioner");
    let provisioner = NfsProvisioner::new(&config);

    match cli.command {
        Command::Provision { claim } => {
            let options: VolumeOptions = read_object(&claim).await?;
            let volume = provisioner
                .provision(options)
                .await
                .context("Provision failed")?;
            print_object(cli.output, &volume)?;
        }
        Command::Delete { volume } => {
            let volume: PersistentVolume = read_object(&volume).await?;
            provisioner
                .delete(&volume)
                .await
                .with_context(|| format!("Failed to delete volume {}", volume.metadata.name))?;
        }
        Command::List { server, path } => {
            let target = ExportTarget::new(server, path);
            let entries = provisioner
                .engine()
                .list_volumes(&target)
                .await
                .with_context(|| format!("Failed to list volumes on {target}"))?;
            print_object(cli.output, &entries)?;
        }
        Command::Probe => {
            let plugin = provisioner.plugin_info().await?;
            print_object(cli.output, &plugin)?;
            if !provisioner.probe().await? {
                bail!(
                    "mount root {} is not a usable directory",
                    config.mount_root.display()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from([
            "nfs-provisioner",
            "--log-format",
            "json",
            "list",
            "--server",
            "10.0.0.5",
            "--path",
            "/srv/nfs",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.output, OutputFormat::Yaml);
        match cli.command {
            Command::List { server, path } => {
                assert_eq!(server, "10.0.0.5");
                assert_eq!(path, "/srv/nfs");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn reads_json_and_yaml_claims() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("claim.yaml");
        std::fs::write(&yaml, "pvName: pv-1\ngrouping: [a, b, c]\n").unwrap();
        let json = dir.path().join("claim.json");
        std::fs::write(&json, r#"{"pvName": "pv-2", "grouping": ["a", "b", "c"]}"#).unwrap();

        let from_yaml: VolumeOptions = read_object(&yaml).await.unwrap();
        let from_json: VolumeOptions = read_object(&json).await.unwrap();
        assert_eq!(from_yaml.pv_name, "pv-1");
        assert_eq!(from_json.pv_name, "pv-2");
        assert!(read_object::<VolumeOptions>(&dir.path().join("missing")).await.is_err());
    }
}
