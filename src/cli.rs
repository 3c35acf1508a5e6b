use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(author, version, about = "NFT-to-video generation pipeline")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one generation to completion and print the resulting job
    Generate {
        /// NFT identifier
        #[arg(long)]
        nft: String,

        /// Free-form prompt describing the desired output
        #[arg(long)]
        prompt: String,

        /// Wallet address the job is created for
        #[arg(long)]
        wallet: String,

        /// Pipeline: standard, image-only, prompt-only, video-only, or custom:<stages>
        #[arg(long, default_value = "standard")]
        pipeline: String,

        /// Generation options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },

    /// Re-mint the signed URLs of a stored job
    Refresh {
        /// Job ID
        job_id: String,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
