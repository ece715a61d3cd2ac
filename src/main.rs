mod cli;

use recmux::adts::AdtsFileEncoder;
use recmux::config;
use recmux::encoder::TrackEncoder;
use recmux::MediaEncoder;
use recmux_mp4::inspect::{self, BoxInfo};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use tokio::io::AsyncWriteExt;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Validate { .. } => config::Config::default(),
        _ => config::load_config_or_default(cli.config.as_deref())?,
    };

    // Respect RUST_LOG env var if set, then the config file, then the verbose flag
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| config.logging.filter.clone())
        .unwrap_or_else(|| {
            if cli.verbose {
                "recmux=trace,recmux_mp4=trace".to_string()
            } else {
                "recmux=info,recmux_mp4=info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Mux {
            input,
            output,
            fragment_secs,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(mux_file(&input, &output, fragment_secs, &config))
        }
        Commands::Inspect { file } => inspect_file(&file),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

async fn mux_file(
    input: &Path,
    output: &Path,
    fragment_secs: Option<u32>,
    config: &config::Config,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let mut muxer_config = config.muxer.muxer_config();
    if let Some(secs) = fragment_secs {
        muxer_config.fragment_duration_secs = secs;
    }

    let source = AdtsFileEncoder::open(input, config.encoder.batch_size).await?;
    tracing::info!(
        "Muxing {:?}: {} Hz, {} channels",
        input,
        source.audio_metadata().sample_rate,
        source.audio_metadata().channels
    );
    let encoders: Vec<Box<dyn TrackEncoder>> = vec![Box::new(source)];
    let mut encoder = MediaEncoder::new(muxer_config, encoders)?;

    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create output file: {:?}", output))?;

    let mut total = 0usize;
    let mut buffers = 0usize;
    let mut mime_type = encoder.mime_type();
    while !encoder.is_done() {
        let produced = encoder.get_encoded_data().await?;
        mime_type = produced.mime_type;
        for buffer in &produced.buffers {
            file.write_all(buffer).await?;
            total += buffer.len();
            buffers += 1;
        }
    }
    file.flush().await?;

    println!("Output: {:?}", output);
    println!("MIME type: {}", mime_type);
    println!("Wrote {} bytes in {} buffers", total, buffers);
    Ok(())
}

fn inspect_file(file: &Path) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let boxes = inspect::parse_boxes(&data)?;

    println!("File: {}", file.display());
    println!("Size: {} bytes", data.len());
    println!();
    for info in &boxes {
        print_box(info, 0);
    }

    let fragments = boxes.iter().filter(|b| b.tag == recmux_mp4::FourCc::MOOF).count();
    println!("\nFragments: {}", fragments);
    Ok(())
}

fn print_box(info: &BoxInfo, depth: usize) {
    println!(
        "{:indent$}{} @{} ({} bytes)",
        "",
        info.tag,
        info.offset,
        info.size,
        indent = depth * 2
    );
    for child in &info.children {
        print_box(child, depth + 1);
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!(
                "  Fragment duration: {}s",
                config.muxer.fragment_duration_secs
            );
            println!("  Encoder batch size: {}", config.encoder.batch_size);
            println!(
                "  Encoder channel capacity: {}",
                config.encoder.channel_capacity
            );
            if let Some(ref filter) = config.logging.filter {
                println!("  Log filter: {}", filter);
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!(
                "  Fragment duration: {}s",
                config.muxer.fragment_duration_secs
            );
        }
    }

    Ok(())
}
