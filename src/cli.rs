//! # SFCTL CLI
//!
//! Standalone driver of the Software Factory engine, for clusters without the managed
//! operator.
//!
//! ## Usage
//!
//! ```bash
//! # Converge a namespace toward a manifest (exit 0 only once everything is ready)
//! sfctl --namespace sf deploy my-sf.yaml
//!
//! # Export credentials, keystore and database
//! sfctl --namespace sf sf backup --backup_dir /var/backups/sf
//!
//! # Rebuild an empty namespace from a backup, then converge it
//! sfctl --namespace sf sf restore --backup_dir /var/backups/sf my-sf.yaml
//!
//! # Rotate the keystore password and the authenticator secret
//! sfctl --namespace sf sf rotate-secrets my-sf.yaml
//!
//! # Tear the deployment down
//! sfctl --namespace sf sf wipe
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use sf_operator::config::{load_config, ControllerConfig};
use sf_operator::controller::backup::{BackupArchive, BackupWorkflow};
use sf_operator::controller::retry::Cancellation;
use sf_operator::controller::rotation::rotate_secrets;
use sf_operator::controller::standalone::{deployed_spec, owned_context, StandaloneLoop};
use sf_operator::controller::wipe::Wipe;
use sf_operator::controller::{OperationContext, Orchestrator, StepOutcome};
use sf_operator::crd::SoftwareFactory;
use sf_operator::runtime::{init_tracing, install_crypto_provider};
use sf_operator::store::KubeStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

/// Software Factory standalone CLI
#[derive(Parser)]
#[command(name = "sfctl")]
#[command(about = "Deploy and operate a Software Factory without the operator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to the manifest namespace, then the context namespace)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Kubernetes context to use
    #[arg(short, long, global = true)]
    context: Option<String>,

    /// Validate every write with the API server without persisting it
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge the namespace toward a SoftwareFactory manifest
    Deploy {
        /// Path of the SoftwareFactory manifest
        manifest: PathBuf,
    },
    /// Lifecycle operations on a running Software Factory
    Sf {
        #[command(subcommand)]
        command: SfCommands,
    },
}

#[derive(Subcommand)]
enum SfCommands {
    /// Export credentials, keystore and database into a directory
    Backup {
        #[arg(long = "backup_dir", visible_alias = "backup-dir")]
        backup_dir: PathBuf,
    },
    /// Rebuild an empty namespace from a backup directory
    Restore {
        #[arg(long = "backup_dir", visible_alias = "backup-dir")]
        backup_dir: PathBuf,
        /// Path of the SoftwareFactory manifest
        manifest: PathBuf,
    },
    /// Rotate the keystore password and the client authenticator secret
    RotateSecrets {
        /// Path of the SoftwareFactory manifest
        manifest: PathBuf,
    },
    /// Stop the Zuul services and delete the deployment
    Wipe,
}

struct Session {
    store: KubeStore,
    ctx: OperationContext,
    config: ControllerConfig,
    cancel: Cancellation,
}

fn load_manifest(path: &Path) -> Result<SoftwareFactory> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))
}

async fn kube_config(context: Option<String>) -> Result<Config> {
    match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context.clone()),
                ..KubeConfigOptions::default()
            };
            let kubeconfig = Kubeconfig::read().context("Failed to read kubeconfig")?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .with_context(|| format!("Failed to load kube context {context}"))
        }
        None => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration. Ensure kubeconfig is configured."),
    }
}

async fn open_session(cli: &Cli, manifest: Option<&SoftwareFactory>) -> Result<Session> {
    let config = kube_config(cli.context.clone()).await?;
    let namespace = cli
        .namespace
        .clone()
        .or_else(|| manifest.and_then(|sf| sf.metadata.namespace.clone()))
        .unwrap_or_else(|| config.default_namespace.clone());
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;

    let cancel = Cancellation::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next attempt boundary");
            on_signal.cancel();
        }
    });

    let (controller_config, _) = load_config();
    info!(namespace = %namespace, dry_run = cli.dry_run, "Using namespace {}", namespace);
    Ok(Session {
        store: KubeStore::new(client),
        ctx: OperationContext::new(namespace).with_dry_run(cli.dry_run),
        config: controller_config,
        cancel,
    })
}

fn print_outcome(outcome: &StepOutcome) {
    for (id, readiness) in outcome.readiness.iter() {
        println!("  {:<20} {:?} {}", id.as_str(), readiness.state, readiness.reason);
    }
}

async fn deploy_command(cli: &Cli, manifest: &Path) -> Result<()> {
    let sf = load_manifest(manifest)?;
    let session = open_session(cli, Some(&sf)).await?;
    let orchestrator = Orchestrator::standard();
    let standalone = StandaloneLoop::new(
        &session.store,
        &orchestrator,
        session.config.reconcile_policy(),
    )
    .with_cancellation(session.cancel.clone());

    let outcome = standalone.run(&session.ctx, &sf.spec).await?;
    if session.ctx.dry_run {
        println!("Dry run of {}:", session.ctx.namespace);
        print_outcome(&outcome);
    } else {
        println!("✅ Software Factory ready in namespace {}", session.ctx.namespace);
    }
    Ok(())
}

async fn backup_command(cli: &Cli, backup_dir: &Path) -> Result<()> {
    if cli.dry_run {
        bail!("backup does not support --dry-run");
    }
    let session = open_session(cli, None).await?;
    let spec = match deployed_spec(&session.ctx, &session.store).await? {
        Some(spec) => spec,
        None => {
            warn!("No recorded spec, connection credentials are not backed up");
            Default::default()
        }
    };
    let workflow = BackupWorkflow::new(
        &session.store,
        BackupArchive::new(backup_dir),
        session.config.backing_tier_policy(),
    )
    .with_cancellation(session.cancel.clone());
    workflow.backup(&session.ctx, &spec).await?;
    println!("✅ Backup written to {}", backup_dir.display());
    Ok(())
}

async fn restore_command(cli: &Cli, backup_dir: &Path, manifest: &Path) -> Result<()> {
    if cli.dry_run {
        bail!("restore does not support --dry-run");
    }
    let sf = load_manifest(manifest)?;
    let session = open_session(cli, Some(&sf)).await?;
    let orchestrator = Orchestrator::standard();
    let standalone = StandaloneLoop::new(
        &session.store,
        &orchestrator,
        session.config.reconcile_policy(),
    )
    .with_cancellation(session.cancel.clone());
    let workflow = BackupWorkflow::new(
        &session.store,
        BackupArchive::new(backup_dir),
        session.config.backing_tier_policy(),
    )
    .with_cancellation(session.cancel.clone());

    workflow.restore(&session.ctx, &sf.spec, &standalone).await?;
    println!(
        "✅ Software Factory restored from {} in namespace {}",
        backup_dir.display(),
        session.ctx.namespace
    );
    Ok(())
}

async fn rotate_command(cli: &Cli, manifest: &Path) -> Result<()> {
    let sf = load_manifest(manifest)?;
    let session = open_session(cli, Some(&sf)).await?;
    let owned = owned_context(&session.ctx, &session.store).await?;
    let report = rotate_secrets(&owned, &session.store).await?;
    if !report.restarted.is_empty() {
        println!("Restarted: {}", report.restarted.join(", "));
    }

    let orchestrator = Orchestrator::standard();
    let standalone = StandaloneLoop::new(
        &session.store,
        &orchestrator,
        session.config.reconcile_policy(),
    )
    .with_cancellation(session.cancel.clone());
    standalone.run(&session.ctx, &sf.spec).await?;
    println!("✅ Secrets rotated");
    Ok(())
}

async fn wipe_command(cli: &Cli) -> Result<()> {
    let session = open_session(cli, None).await?;
    let wipe = Wipe::new(
        &session.store,
        session.config.termination_policy(),
        session.config.reconcile_policy(),
    )
    .with_cancellation(session.cancel.clone());
    let report = wipe.run(&session.ctx).await?;
    for name in &report.still_running {
        println!("⚠️  {name} pods were still running when the deployment was deleted");
    }
    match report.owner {
        Some((kind, name)) => println!("✅ Deleted {kind} {name}"),
        None => println!("Nothing to wipe in namespace {}", session.ctx.namespace),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Deploy { manifest } => deploy_command(&cli, manifest)
            .await
            .context("deploy failed"),
        Commands::Sf { command } => match command {
            SfCommands::Backup { backup_dir } => backup_command(&cli, backup_dir)
                .await
                .context("backup failed"),
            SfCommands::Restore {
                backup_dir,
                manifest,
            } => restore_command(&cli, backup_dir, manifest)
                .await
                .context("restore failed"),
            SfCommands::RotateSecrets { manifest } => rotate_command(&cli, manifest)
                .await
                .context("rotate-secrets failed"),
            SfCommands::Wipe => wipe_command(&cli).await.context("wipe failed"),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    install_crypto_provider();
    init_tracing("sfctl=info,sf_operator=info");

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
