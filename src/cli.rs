use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recmux")]
#[command(author, version, about = "Incremental fragmented MP4 muxer")]
pub struct Cli {
    /// Path to config file
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
    /// Mux an ADTS AAC stream into a fragmented MP4 file
    Mux {
        /// ADTS input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output MP4 file
        #[arg(short, long)]
        output: PathBuf,

        /// Fragment duration in seconds (overrides the config file)
        #[arg(long)]
        fragment_secs: Option<u32>,
    },

    /// Print the box tree of an MP4 file
    Inspect {
        /// File to inspect
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
