//! Simcast CLI — Command-line interface for simulation-to-video export.
//!
//! Usage:
//!   simcast export [OPTIONS]   Export the built-in demo scene to video
//!   simcast check              Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "simcast",
    about = "Export a running simulation to a finished video file",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the built-in demo scene to a video file
    Export {
        /// Output file path (container implied by extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compressed audio asset to mux (a synthetic tone when omitted)
        #[arg(short, long)]
        audio: Option<PathBuf>,

        /// Scene duration in seconds
        #[arg(long, default_value = "5.0")]
        duration: f64,

        /// Output width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Output frame rate
        #[arg(long, default_value = "60")]
        fps: u32,

        /// Playback speed multiplier
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Video codec identifier
        #[arg(long, default_value = "libx264")]
        video_codec: String,

        /// Audio codec identifier
        #[arg(long, default_value = "aac")]
        audio_codec: String,

        /// Pace production at wall-clock frame rate instead of running
        /// as fast as the pipeline allows
        #[arg(long)]
        realtime: bool,
    },

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    simcast_common::logging::init_logging(&simcast_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
        file: None,
    });

    match cli.command {
        Commands::Export {
            output,
            audio,
            duration,
            width,
            height,
            fps,
            speed,
            video_codec,
            audio_codec,
            realtime,
        } => {
            commands::export::run(
                output,
                audio,
                duration,
                width,
                height,
                fps,
                speed,
                video_codec,
                audio_codec,
                realtime,
            )
            .await
        }
        Commands::Check => commands::check::run(),
    }
}
