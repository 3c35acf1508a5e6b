mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_pipeline::{GenerationRequest, GenerationService, PipelineKind};

fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env_overrides();
    config
}

fn open_service(config: &Config) -> Result<GenerationService> {
    let db = rf_server::open_database(config)?;
    let service = GenerationService::from_config(config, db, Arc::new(EventBus::default()))?;
    Ok(service)
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path);
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting reelforge server");
    rf_server::start(config).await?;
    Ok(())
}

async fn generate(
    config_path: Option<&Path>,
    kind: &str,
    req: GenerationRequest,
) -> Result<()> {
    let config = load_config(config_path);
    let kind: PipelineKind = kind.parse()?;
    let service = open_service(&config)?;

    let job = service.submit(&kind, &req).await?;
    tracing::info!(job_id = %job.id, status = %job.status, "Pipeline finished");

    // Video jobs finish in the background poller; wait for it here.
    let job = if job.status.is_terminal() {
        job
    } else {
        println!("Waiting for video operation...");
        service.supervisor().wait(job.id).await;
        service.get_job(job.id).await?
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    service.shutdown().await;
    Ok(())
}

async fn refresh(config_path: Option<&Path>, job_id: &str) -> Result<()> {
    let config = load_config(config_path);
    let job_id = job_id
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid job ID: {job_id}"))?;
    let service = open_service(&config)?;

    let job = service.refresh(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    for warning in &warnings {
        println!("⚠ {warning}");
    }
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    }
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.server.db_path.display());
    println!("  Storage root: {}", config.storage.root_dir.display());
    println!("  Cache enabled: {}", config.cache.enabled);
    println!("  Verify ownership: {}", config.nft.verify_ownership);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,rf_pipeline=debug,rf_media=debug,rf_ai=debug,rf_db=debug,rf_server=debug,tower_http=debug".to_string()
        } else {
            "reelforge=debug,rf_pipeline=info,rf_media=info,rf_ai=info,rf_db=info,rf_server=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, config_path))
        }
        Commands::Generate {
            nft,
            prompt,
            wallet,
            pipeline,
            options,
        } => {
            let options = match options {
                Some(raw) => serde_json::from_str(&raw).context("--options must be JSON")?,
                None => serde_json::Value::Null,
            };
            let req = GenerationRequest {
                nft_id: nft,
                user_prompt: prompt,
                wallet_address: wallet,
                options,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(generate(config_path, &pipeline, req))
        }
        Commands::Refresh { job_id } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(refresh(config_path, &job_id))
        }
        Commands::Validate {
            config: validate_path,
        } => validate_config(validate_path.as_deref().or(config_path)),
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
