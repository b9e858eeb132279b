mod cli;

use mediastash::{
    cache::CacheStore,
    config, refresh,
    server,
    tools::{self, FFMPEG, YTDLP},
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting mediastash server");
    tracing::info!(
        cache_dir = ?config.cache.dir,
        max_size_bytes = config.cache.max_size_bytes,
        max_concurrent = config.downloads.max_concurrent,
        sources = config.refresh.sources.len(),
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediastash=trace,mediastash_common=debug,tower_http=debug".to_string()
        } else {
            "mediastash=debug,mediastash_common=info,tower_http=info".to_string()
        }
    });

    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Sweep { json } => sweep(cli.config.as_deref(), json),
        Commands::Refresh { json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_refresh(cli.config.as_deref(), json))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediastash {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn sweep(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let store = CacheStore::open(&config.cache)
        .with_context(|| format!("Failed to open cache dir {:?}", config.cache.dir))?;
    let report = store.sweep().context("Sweep failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Swept {:?}", store.dir());
        println!("  Orphans removed: {}", report.orphans_removed);
        println!("  Expired removed: {}", report.expired_removed);
        println!("  Evicted for size: {}", report.evicted);
        println!("  Skipped (in use): {}", report.skipped_in_use);
        println!("  Bytes freed: {}", report.bytes_freed);
        println!(
            "  Remaining: {} files, {} bytes (budget {})",
            report.files_remaining, report.bytes_remaining, config.cache.max_size_bytes
        );
    }
    Ok(())
}

async fn run_refresh(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    if config.refresh.sources.is_empty() {
        anyhow::bail!("No [[refresh.sources]] configured");
    }

    let report = refresh::scheduler_from_config(&config).run_once().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Sources processed: {}", report.sources_processed);
        println!("Records saved: {}", report.records_saved);
        println!("Elapsed: {} ms", report.elapsed_ms);
        if !report.errors.is_empty() {
            println!("Errors:");
            for error in &report.errors {
                println!("  {}: {}", error.source, error.message);
            }
        }
        println!("Records file: {:?}", config.refresh.records_path);
    }
    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let checks = [
        (YTDLP, config.tools.ytdlp_path.as_deref(), "--version"),
        (FFMPEG, config.tools.ffmpeg_path.as_deref(), "-version"),
    ];
    let mut all_ok = true;

    for (name, configured, flag) in checks {
        match tools::resolve(configured, name) {
            Ok(path) => {
                let version = tools::version(&path, flag)
                    .await
                    .unwrap_or_else(|e| format!("version unknown: {e}"));
                println!("✓ {} ({}) - {}", name, version, path.display());
            }
            Err(e) => {
                all_ok = false;
                println!("✗ {} - {}", name, e);
            }
        }
    }

    match config.tools.cookies_path.as_deref() {
        Some(path) if path.exists() => println!("✓ cookies - {}", path.display()),
        Some(path) => println!("✗ cookies - {} does not exist", path.display()),
        None => {}
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Downloads and refreshes will fail until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Cache dir: {:?}", config.cache.dir);
            println!(
                "  Cache TTL: {}s (orphans {}s)",
                config.cache.ttl_secs, config.cache.orphan_ttl_secs
            );
            println!("  Cache budget: {} bytes", config.cache.max_size_bytes);
            println!("  Max concurrent fetches: {}", config.downloads.max_concurrent);
            println!("  Refresh enabled: {}", config.refresh.enabled);
            println!("  Refresh sources: {}", config.refresh.sources.len());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Cache dir: {:?}", config.cache.dir);
        }
    }

    Ok(())
}
