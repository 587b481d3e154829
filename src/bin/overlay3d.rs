use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use overlay3d::{
    camera::CameraModel,
    colorize::colorize,
    config::CaptureConfig,
    device::simulated::{SimulatedScene, SimulatedSystem},
    error::OverlayError,
    io::{read_calibration, write_colorized_ply, PlyOptions},
    pipeline::OverlayPipeline,
    ColorFrame, DepthCalibration, DepthFrame,
};
use tracing::info;

#[derive(Parser)]
#[command(
    about = "Color overlay of time-of-flight point clouds",
    after_help = "Calibration files are read as OpenCV FileStorage JSON. Convert an \
                  orientation.yml with cv::FileStorage by saving it under a .json name."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Colorize a recorded depth/color pair
    Offline {
        /// Raw little-endian depth buffer (Coord3D_ABCY16 by default)
        #[arg(long)]
        depth: PathBuf,
        /// Depth frame width in pixels
        #[arg(long)]
        width: usize,
        /// Depth frame height in pixels
        #[arg(long)]
        height: usize,
        /// u16 channels per depth pixel, 4 for ABCY16 and 3 for XYZ
        #[arg(long, default_value = "4")]
        channels: usize,
        /// Color image
        #[arg(long)]
        color: PathBuf,
        /// Calibration in OpenCV FileStorage JSON. An `orientation.yml` from
        /// the orientation step must be re-saved as `.json` first
        #[arg(long, default_value = "orientation.json")]
        calibration: PathBuf,
        /// Millimeters per raw unit
        #[arg(long, default_value = "0.25")]
        scale: f64,
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        x_offset: f64,
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        y_offset: f64,
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        z_offset: f64,
        /// Output ply file
        #[arg(short, long)]
        output: PathBuf,
        /// Keep points without a valid depth measurement
        #[arg(long, action)]
        keep_invalid: bool,
        /// Write a binary ply
        #[arg(long, action)]
        binary: bool,
    },
    /// Run the capture loop against simulated cameras
    Simulate {
        /// JSON capture configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Calibration in OpenCV FileStorage JSON (`.yml` is not read),
        /// defaults to the simulated scene's own
        #[arg(long)]
        calibration: Option<PathBuf>,
        /// Overrides the number of captures
        #[arg(short, long)]
        iterations: Option<usize>,
    },
}

fn load_model(path: Option<PathBuf>, scene: &SimulatedScene) -> Result<CameraModel, OverlayError> {
    match path {
        Some(path) => read_calibration(path),
        None => Ok(scene.camera_model()),
    }
}

fn run(cli: Cli) -> Result<(), OverlayError> {
    match cli.command {
        Commands::Offline {
            depth,
            width,
            height,
            channels,
            color,
            calibration,
            scale,
            x_offset,
            y_offset,
            z_offset,
            output,
            keep_invalid,
            binary,
        } => {
            let model = read_calibration(&calibration)?;
            let depth_calibration = DepthCalibration::new(scale, x_offset, y_offset, z_offset);
            let depth_frame = DepthFrame::from_le_bytes(
                width,
                height,
                channels,
                &std::fs::read(&depth)?,
                depth_calibration,
            )?;
            let color_frame = ColorFrame::load(&color)?;
            info!(
                depth_valid = depth_frame.valid_count(),
                color_width = color_frame.width(),
                color_height = color_frame.height(),
                "Loaded frames"
            );

            let colorized = colorize(&depth_frame, &color_frame, &model)?;
            let written = write_colorized_ply(
                &output,
                &colorized,
                &PlyOptions {
                    filter_invalid: !keep_invalid,
                    binary,
                    calibration: Some(depth_calibration),
                },
            )?;
            info!(path = %output.display(), points = written, "Saved overlay");
            Ok(())
        }
        Commands::Simulate {
            config,
            calibration,
            iterations,
        } => {
            let mut config = match config {
                Some(path) => CaptureConfig::load(path)?,
                None => CaptureConfig {
                    ptp_poll_interval_ms: 10,
                    ..CaptureConfig::default()
                },
            };
            if let Some(iterations) = iterations {
                config.num_iterations = iterations;
            }

            let scene = SimulatedScene::default();
            let model = load_model(calibration, &scene)?;
            let mut pipeline = OverlayPipeline::prepare(SimulatedSystem::new(scene), config, model)?;
            let reports = pipeline.run()?;
            info!(captures = reports.len(), "Example complete");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    // RUST_LOG controls the level, e.g. RUST_LOG=overlay3d=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
