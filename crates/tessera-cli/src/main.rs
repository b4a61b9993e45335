//! Command-line host for Tessera extensions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tessera_core::config::CONFIG_FILE_NAME;
use tessera_core::extension::{discovery, ContextServices, ManagerOptions, ModuleRegistry, MANIFEST_FILE_NAME};
use tessera_core::prelude::*;
use tessera_storage::open_storage;

/// Tessera - discover, validate and host extensions.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Runtime configuration file.
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate one extension directory or manifest file.
    Validate {
        #[arg(required = true)]
        path: PathBuf,
        /// Also open the artifact and check the entry point.
        #[arg(long)]
        instantiate: bool,
    },
    /// Run full discovery and print the dependency load order.
    Discover {
        /// Directory to scan instead of the configured ones.
        #[arg(short, long)]
        dir: Vec<PathBuf>,
    },
    /// List extensions found in the search locations.
    List {
        /// Directory to scan instead of the configured ones.
        #[arg(short, long)]
        dir: Vec<PathBuf>,
        /// Extension type filter (e.g. `tool`, `message-processor`).
        #[arg(short = 't', long = "type")]
        ty: Option<String>,
    },
    /// Host extensions until interrupted.
    Run {
        /// Install and enable discovered extensions that are not installed yet.
        #[arg(long)]
        install_discovered: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Validate { path, instantiate } => validate(&path, instantiate),
        Command::Discover { dir } => discover(&args.config, dir).await,
        Command::List { dir, ty } => list(&args.config, dir, ty),
        Command::Run { install_discovered } => run(&args.config, install_discovered).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("TESSERA_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "tessera={lvl},tessera_core={lvl},tessera_storage={lvl},warn",
            lvl = default_level
        ))
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn validate(path: &Path, instantiate: bool) -> Result<()> {
    let manifest_path = if path.is_dir() {
        path.join(MANIFEST_FILE_NAME)
    } else {
        path.to_path_buf()
    };

    let manifest = discovery::read_manifest(&manifest_path)
        .with_context(|| format!("{} is not a valid extension", manifest_path.display()))?;

    println!("Extension Validation");
    println!("====================\n");
    println!("  ID:          {}", manifest.id);
    println!("  Name:        {}", manifest.name);
    println!("  Version:     {}", manifest.version);
    println!("  Type:        {}", manifest.extension_type);
    println!("  Entry point: {} ({})", manifest.entry_point.assembly, manifest.entry_point.type_name);
    if !manifest.dependencies.is_empty() {
        println!("  Depends on:  {}", manifest.dependencies.join(", "));
    }
    if let Some(min) = &manifest.minimum_host_version {
        println!("  Host:        >= {}", min);
    }

    if instantiate {
        let modules = ModuleRegistry::new();
        let ext = modules
            .instantiate(&manifest.artifact_path(), &manifest.entry_point.type_name)
            .context("entry point could not be instantiated")?;
        println!("\n  Instantiated {} {} (reports id '{}')", ext.name(), ext.version(), ext.id());
        if ext.id() != manifest.id {
            println!("  Warning: instance id differs from manifest id");
        }
    }

    println!("\nOK");
    Ok(())
}

async fn discover(config_path: &Path, dirs: Vec<PathBuf>) -> Result<()> {
    let config = RuntimeConfig::load(config_path)?;
    let dirs = if dirs.is_empty() {
        config.extension_dirs.clone()
    } else {
        dirs
    };

    let manager = ExtensionManager::from_config(&config)?;
    for dir in &dirs {
        manager.add_search_location(dir).await;
    }
    let manifests = manager.discover_extensions().await;

    println!("Extension Discovery");
    println!("===================\n");
    if manifests.is_empty() {
        println!("  (none)");
        return Ok(());
    }

    let host = manager.host_version();
    for manifest in &manifests {
        let compat = if manifest.is_compatible_with(host) {
            ""
        } else {
            " (incompatible with this host)"
        };
        println!(
            "  {} {} [{}]{}",
            manifest.id, manifest.version, manifest.extension_type, compat
        );
    }

    let ids: Vec<String> = manifests.iter().map(|m| m.id.clone()).collect();
    println!();
    match manager.load_order(&ids).await {
        Ok(order) => println!("Load order: {}", order.join(" -> ")),
        Err(e) => println!("Load order unavailable: {}", e),
    }
    Ok(())
}

fn list(config_path: &Path, dirs: Vec<PathBuf>, ty: Option<String>) -> Result<()> {
    let filter = match ty.as_deref() {
        Some(t) => match ExtensionType::from_string(t) {
            Some(parsed) => Some(parsed),
            None => bail!("unknown extension type '{}'", t),
        },
        None => None,
    };

    let dirs = if dirs.is_empty() {
        RuntimeConfig::load(config_path)?.extension_dirs
    } else {
        dirs
    };

    println!("Discovered Extensions");
    println!("=====================\n");

    let mut found = 0;
    for dir in &dirs {
        if !dir.is_dir() {
            tracing::debug!(path = %dir.display(), "Skipping missing search location");
            continue;
        }
        for manifest in discovery::scan_location(dir) {
            if filter.as_ref().is_some_and(|f| *f != manifest.extension_type) {
                continue;
            }
            found += 1;
            println!("  {} {} [{}]", manifest.id, manifest.version, manifest.extension_type);
            if !manifest.description.is_empty() {
                println!("      {}", manifest.description);
            }
            if !manifest.dependencies.is_empty() {
                println!("      depends on: {}", manifest.dependencies.join(", "));
            }
        }
    }

    if found == 0 {
        println!("  (none)");
    }
    Ok(())
}

async fn run(config_path: &Path, install_discovered: bool) -> Result<()> {
    let config = RuntimeConfig::load(config_path)?;
    let storage = open_storage(&config).context("failed to open storage")?;

    let services = ContextServices::new(config.data_dir.clone())
        .with_temp_root(config.temp_root())
        .with_storage(Arc::new(ExtensionStorage::new(storage.backend.clone())));
    let manager = Arc::new(ExtensionManager::new(
        services,
        ManagerOptions::from_config(&config)?,
    ));

    for dir in &config.extension_dirs {
        manager.add_search_location(dir).await;
    }
    let discovered = manager.discover_extensions().await;
    tracing::info!(count = discovered.len(), "Extensions discovered");

    let service = ExtensionService::new(manager.clone(), storage.repository.clone());
    let report = service.restore().await;
    for (id, e) in &report.failed {
        tracing::warn!(extension_id = %id, error = %e, "Extension not restored");
    }

    if install_discovered {
        for manifest in &discovered {
            if service.repository().exists_by_id(&manifest.id).await? {
                continue;
            }
            if let Err(e) = service.install(&manifest.id).await {
                tracing::warn!(error = %e, "Install failed");
                continue;
            }
            if let Err(e) = service.enable(&manifest.id).await {
                tracing::warn!(error = %e, "Enable failed");
            }
        }
    }

    let loaded = manager.loaded_ids().await;
    tracing::info!(loaded = loaded.len(), "Tessera host running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    let report = manager.shutdown().await;
    for (id, e) in &report.failed {
        tracing::warn!(extension_id = %id, error = %e, "Extension did not shut down cleanly");
    }
    Ok(())
}
