use std::{io, path::PathBuf};

use clap::Parser;
use rift::{
    config::{Config, Paths, resolve_path},
    login::SsoLogin,
    sync::{SyncOptions, Syncer},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "rift-sync",
    about = "Discover AWS SSO roles and EKS clusters and sync AWS profiles and kube contexts"
)]
struct Cli {
    /// Config file (defaults to ~/.config/rift/config.yaml).
    #[arg(long)]
    config: Option<String>,
    /// State file (defaults to ~/.config/rift/state.json).
    #[arg(long)]
    state: Option<String>,
    /// Preview changes without writing files.
    #[arg(long)]
    dry_run: bool,
    /// Run `aws sso login` first.
    #[arg(long)]
    login: bool,
    /// Use the device-code flow when logging in.
    #[arg(long, requires = "login")]
    no_browser: bool,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let mut paths = Paths::discover()?;
    if let Some(path) = &cli.config {
        paths.config = resolve_path(path)?;
    }
    if let Some(path) = &cli.state {
        paths.state = resolve_path(path)?;
    }
    let config = Config::load(&paths.config)?;

    if cli.login {
        println!("Starting AWS SSO login...");
        SsoLogin::new(paths.aws_config.clone())
            .no_browser(cli.no_browser)
            .run(&config)
            .await?;
        println!("SSO login complete.");
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let state_path: PathBuf = paths.state.clone();
    let syncer = Syncer::aws(config, paths).await;
    let report = match syncer
        .run(SyncOptions { dry_run: cli.dry_run }, &cancel)
        .await
    {
        Ok(report) => report,
        Err(err) if err.is_login_required() => {
            anyhow::bail!("{err}. Run this demo again with --login")
        }
        Err(err) => return Err(err.into()),
    };

    if report.dry_run {
        println!("Dry run complete (no files written)");
    }
    println!("Discovered roles:    {}", report.state.roles.len());
    println!("Discovered clusters: {}", report.state.clusters.len());
    if report.namespaces.enabled {
        println!(
            "Namespaces: tried={} updated={} errors={}",
            report.namespaces.tried, report.namespaces.updated, report.namespaces.errors
        );
    }
    println!(
        "AWS profiles: +{} ~{} -{}",
        report.profiles.added, report.profiles.updated, report.profiles.removed
    );
    println!(
        "Kube contexts: +{} ~{} -{}",
        report.contexts.added, report.contexts.updated, report.contexts.removed
    );
    if !report.dry_run {
        println!("State written: {}", state_path.display());
    }
    Ok(())
}
