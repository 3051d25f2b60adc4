// SPDX-License-Identifier: GPL-3.0-only

use cam_iface::constants::capture::DEFAULT_NUM_BUFFERS;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "cam-iface")]
#[command(about = "Inspect and capture from cameras on every configured backend")]
#[command(version = env!("CAM_IFACE_GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: ~/.config/cam_iface/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras and their modes
    List,

    /// Capture frames and report their timing
    Grab {
        /// Device number (from 'cam-iface list')
        #[arg(short, long, default_value = "0")]
        device: usize,

        /// Mode number of the device
        #[arg(short, long, default_value = "0")]
        mode: usize,

        /// Frame buffers to allocate
        #[arg(short, long, default_value_t = DEFAULT_NUM_BUFFERS)]
        buffers: usize,

        /// Frames to capture; runs until Ctrl+C when omitted
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Per-frame timeout in seconds; negative waits forever
        #[arg(short, long, allow_negative_numbers = true)]
        timeout: Option<f32>,

        /// Append raw frame data to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show properties and trigger modes of a camera
    Props {
        /// Device number (from 'cam-iface list')
        #[arg(short, long, default_value = "0")]
        device: usize,

        /// Mode number of the device
        #[arg(short, long, default_value = "0")]
        mode: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=cam_iface=debug for backend details
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => cli::list_cameras(&config),
        Commands::Grab {
            device,
            buffers,
            mode,
            count,
            timeout,
            output,
        } => cli::grab(
            &config,
            cli::GrabOptions {
                device,
                buffers,
                mode,
                count,
                timeout,
                output,
            },
        ),
        Commands::Props { device, mode } => cli::show_properties(&config, device, mode),
    }
}
