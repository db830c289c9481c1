mod cli;

use plexscan::{
    config::{self, Config},
    daemon::{self, DaemonOptions},
    library::{merge_sections, LibraryResolver},
    mapping::PathMapper,
    orchestrator::{CycleOutcome, CycleResult, Orchestrator},
    plex::{MediaServer, PlexClient},
};
use plexscan_common::RootId;
use plexscan_snapshot::{RetentionPolicy, SnapshotStore};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit status of `once` when at least one root was aborted.
const EXIT_ROOT_ABORTED: u8 = 2;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "plexscan=debug,plexscan_snapshot=debug,plexscan_common=debug".to_string()
        } else {
            "plexscan=info,plexscan_snapshot=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_daemon(config))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Once { root, json } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_once(config, root, json))
        }
        Commands::Check => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check(&config))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Map { path } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(map_path(&config, &path))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Snapshots { root } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            list_snapshots(&config, &root)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("plexscan {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_orchestrator(config: Config) -> Result<Arc<Orchestrator>> {
    let config = Arc::new(config);
    let server: Arc<dyn MediaServer> = Arc::new(PlexClient::new(&config.plex));
    let orchestrator = Orchestrator::new(config, server).context("Failed to set up orchestrator")?;
    Ok(Arc::new(orchestrator))
}

/// Cancel the token on Ctrl-C.
fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, finishing current state");
                cancel.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn run_daemon(config: Config) -> Result<()> {
    let options = DaemonOptions {
        interval: Duration::from_secs(config.cycle.interval_secs.max(1)),
        watch_settle: config
            .cycle
            .watch
            .then(|| Duration::from_secs(config.cycle.watch_settle_secs)),
    };
    let orchestrator = build_orchestrator(config)?;

    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    daemon::run(orchestrator, options, cancel).await
}

async fn run_once(config: Config, root: Option<String>, json: bool) -> Result<ExitCode> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    let results = match root {
        Some(root) => {
            let id = RootId::new(root);
            if !orchestrator.roots().iter().any(|r| r.id == id) {
                anyhow::bail!("Unknown root: {}", id);
            }
            orchestrator.run_roots(&[id], &cancel).await
        }
        None => orchestrator.run_all(&cancel).await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            print_result(result);
        }
    }

    if results.iter().any(CycleResult::is_aborted) {
        Ok(ExitCode::from(EXIT_ROOT_ABORTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_result(result: &CycleResult) {
    let outcome = match &result.outcome {
        CycleOutcome::Completed => "completed".to_string(),
        CycleOutcome::Seeded => "seeded (first run)".to_string(),
        CycleOutcome::Skipped => "skipped (already running)".to_string(),
        CycleOutcome::TimedOut => "timed out".to_string(),
        CycleOutcome::Aborted { state, reason } => format!("aborted while {}: {}", state, reason),
    };
    println!("{}: {}", result.root_id, outcome);
    println!("  Changes: {}", result.changes_found);
    println!("  Scans dispatched: {}", result.scans_dispatched);
    println!("  Scans failed: {}", result.scans_failed);
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
}

async fn check(config: &Config) -> Result<()> {
    let client = PlexClient::new(&config.plex);

    let identity = client
        .test_connection()
        .await
        .with_context(|| format!("Cannot reach media server at {}", config.plex.url))?;
    println!(
        "✓ Connected to {} (version {})",
        config.plex.url,
        identity.version.as_deref().unwrap_or("unknown")
    );

    let sections = client.list_sections().await.context("Failed to list sections")?;
    println!("\nSections: {}", sections.len());
    for section in &sections {
        println!("  [{}] {} ({})", section.id, section.label(), section.section_type);
        for path in &section.remote_root_paths {
            println!("      {}", path);
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => config::load_config_or_default(None)?,
    };

    println!("✓ Configuration is valid");
    println!("  Media server: {}", config.plex.url);
    println!("  Roots: {}", config.roots.len());
    for root in &config.roots {
        println!("    {} -> {:?}", root.root_id(), root.path);
    }
    println!("  Path mappings: {}", config.path_mappings.len());
    println!("  Sections: {}", config.sections.len());
    println!("  Section discovery: {}", config.discover_sections());
    println!(
        "  First run scans: {}{}",
        config.cycle.first_run_scans(),
        if config.cycle.first_run_scans.is_none() {
            " (unset)"
        } else {
            ""
        }
    );
    println!("  Wait for completion: {}", config.dispatch.wait_for_completion);

    Ok(())
}

async fn map_path(config: &Config, path: &str) -> Result<()> {
    let mapper = PathMapper::from_config(&config.path_mappings);
    let remote = mapper.to_remote(path);

    let mut sections = config.sections.clone();
    if config.discover_sections() {
        match PlexClient::new(&config.plex).list_sections().await {
            Ok(discovered) => sections = merge_sections(&config.sections, discovered),
            Err(e) => tracing::warn!("Section discovery failed: {}", e),
        }
    }
    let resolver = LibraryResolver::new(
        sections,
        config.resolve.overlap,
        config.resolve.case_insensitive,
    );

    println!("Local:  {}", path);
    match mapper.matching(path) {
        Some(mapping) => println!("Remote: {} (via {} -> {})", remote, mapping.local, mapping.remote),
        None => println!("Remote: {} (no mapping)", remote),
    }

    let owners = resolver.resolve(&remote);
    if owners.is_empty() {
        println!("Sections: none");
    } else {
        println!("Sections:");
        for section in owners {
            println!("  [{}] {} ({})", section.id, section.label(), section.section_type);
        }
    }

    Ok(())
}

fn list_snapshots(config: &Config, root: &str) -> Result<()> {
    let root_id = config
        .roots
        .iter()
        .map(|r| r.root_id())
        .find(|id| id.as_str() == root || Path::new(root) == Path::new(id.as_str()))
        .unwrap_or_else(|| RootId::new(root));

    let store = SnapshotStore::new(config.snapshot.dir.clone(), RetentionPolicy::default());
    let snapshots = store.list(&root_id)?;

    if snapshots.is_empty() {
        println!("No snapshots for {}", root_id);
        return Ok(());
    }

    println!("Snapshots for {} ({:?}):", root_id, store.root_dir(&root_id));
    for info in snapshots {
        println!(
            "  #{}  {}  {} bytes  {}",
            info.sequence,
            info.captured_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "unreadable".to_string()),
            info.size_bytes,
            info.path.display()
        );
    }
    Ok(())
}
