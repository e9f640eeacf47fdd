//! clipforge CLI: command-line interface for exporting edited timelines.
//!
//! Usage:
//!   clipforge export <PROJECT>    Render a project to a video file
//!   clipforge mixdown <PROJECT>   Mix a project's audio to WAV
//!   clipforge info <PROJECT>      Show project information
//!   clipforge check               Check encoder capabilities
//!   clipforge config              Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clipforge_common::config::AppConfig;

mod commands;
mod project;

#[derive(Parser)]
#[command(
    name = "clipforge",
    about = "Render edited timelines to video",
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
    /// Export a project to video
    Export {
        /// Path to the project file
        path: PathBuf,

        /// Output file path (defaults to the exports directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Container: mp4, webm or mov
        #[arg(long)]
        container: Option<String>,

        /// Video codec: h264, h265, vp8 or vp9
        #[arg(long)]
        codec: Option<String>,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Render at a lower rate and repeat frames up to --fps
        #[arg(long)]
        render_fps: Option<u32>,

        /// Quality preset: low, medium or high
        #[arg(long)]
        quality: Option<String>,

        /// Encoder backend: auto, ffmpeg or gstreamer
        #[arg(long)]
        backend: Option<String>,

        /// Pace the export at playback speed
        #[arg(long)]
        realtime: bool,
    },

    /// Mix a project's audio down to a WAV file
    Mixdown {
        /// Path to the project file
        path: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show project information
    Info {
        /// Path to the project file
        path: PathBuf,
    },

    /// Check encoder capabilities
    Check {
        /// Encoder backend: auto, ffmpeg or gstreamer
        #[arg(long)]
        backend: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    clipforge_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            path,
            output,
            container,
            codec,
            width,
            height,
            fps,
            render_fps,
            quality,
            backend,
            realtime,
        } => {
            commands::export::run(
                commands::export::ExportArgs {
                    path,
                    output,
                    container,
                    codec,
                    width,
                    height,
                    fps,
                    render_fps,
                    quality,
                    backend,
                    realtime,
                },
                &config,
            )
            .await
        }
        Commands::Mixdown { path, output } => commands::mixdown::run(path, output, &config).await,
        Commands::Info { path } => commands::info::run(path, &config),
        Commands::Check { backend } => commands::check::run(backend, &config),
        Commands::Config { init } => commands::config::run(init, &config),
    }
}
