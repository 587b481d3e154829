use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};

/// Keys the transport system stamps on action commands, and the devices
/// must match, for a scheduled trigger to fire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionCommandConfig {
    pub device_key: u32,
    pub group_key: u32,
    pub group_mask: u32,
    /// Destination of the command; broadcast reaches every camera on the subnet.
    pub target_ip: Ipv4Addr,
}

impl Default for ActionCommandConfig {
    fn default() -> Self {
        Self {
            device_key: 1,
            group_key: 1,
            group_mask: 1,
            target_ip: Ipv4Addr::BROADCAST,
        }
    }
}

/// Depth camera operating modes. Single frequency modes capture faster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Distance8333mmMultiFreq,
    Distance6000mmSingleFreq,
    Distance5000mmMultiFreq,
    Distance4000mmSingleFreq,
    Distance3000mmSingleFreq,
    Distance1250mmSingleFreq,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Depth camera exposure presets. Shorter exposures capture faster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureTime {
    Exp1000Us,
    Exp250Us,
    #[serde(rename = "Exp62_5Us")]
    Exp62p5Us,
}

impl fmt::Display for ExposureTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExposureTime::Exp1000Us => write!(f, "Exp1000Us"),
            ExposureTime::Exp250Us => write!(f, "Exp250Us"),
            ExposureTime::Exp62p5Us => write!(f, "Exp62_5Us"),
        }
    }
}

/// Settings for a capture session. Built once and shared read-only by the
/// orchestration code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub action: ActionCommandConfig,
    /// Trigger both cameras with a scheduled action command.
    pub use_scheduled_action: bool,
    /// Seconds between latching the PTP time and firing the action.
    pub action_delta_time_s: u32,
    /// Schedule the action on a whole second.
    pub round_up_action_time: bool,
    /// Number of frame pairs to capture.
    pub num_iterations: usize,
    pub depth_mode: OperatingMode,
    pub exposure: ExposureTime,
    /// Model name of the color camera to use.
    pub color_model: String,
    pub calibration_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    /// Drop invalid depth points from the written clouds.
    pub filter_points: bool,
    /// Write binary instead of ASCII ply files.
    pub binary_ply: bool,
    /// Save depth and color preview images next to each cloud.
    pub save_previews: bool,
    pub device_discovery_timeout_ms: u64,
    pub ptp_poll_interval_ms: u64,
    pub ptp_max_polls: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            action: ActionCommandConfig::default(),
            use_scheduled_action: true,
            action_delta_time_s: 1,
            round_up_action_time: true,
            num_iterations: 3,
            depth_mode: OperatingMode::Distance3000mmSingleFreq,
            exposure: ExposureTime::Exp1000Us,
            color_model: "TRI032S-C".to_string(),
            calibration_path: PathBuf::from("orientation.json"),
            output_dir: PathBuf::from("Images"),
            output_prefix: "overlay".to_string(),
            filter_points: true,
            binary_ply: false,
            save_previews: true,
            device_discovery_timeout_ms: 100,
            ptp_poll_interval_ms: 1000,
            ptp_max_polls: 60,
        }
    }
}

impl CaptureConfig {
    /// Loads a JSON configuration. Missing fields take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_iterations == 0 {
            return Err(OverlayError::invalid_parameter(
                "num_iterations must be at least 1",
            ));
        }
        if self.ptp_max_polls == 0 {
            return Err(OverlayError::invalid_parameter(
                "ptp_max_polls must be at least 1",
            ));
        }
        if self.color_model.is_empty() {
            return Err(OverlayError::invalid_parameter("color_model is empty"));
        }
        Ok(())
    }

    /// How long an image acquisition may block: twice the action delay.
    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(2 * self.action_delta_time_s as u64)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.device_discovery_timeout_ms)
    }

    pub fn ptp_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ptp_poll_interval_ms)
    }

    /// Upper bound on the PTP role negotiation, saturating at `Duration::MAX`.
    pub fn ptp_timeout(&self) -> Duration {
        u32::try_from(self.ptp_max_polls)
            .ok()
            .and_then(|polls| self.ptp_poll_interval().checked_mul(polls))
            .unwrap_or(Duration::MAX)
    }

    pub fn cloud_path(&self, counter: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{counter}.ply", self.output_prefix))
    }

    pub fn depth_preview_path(&self, counter: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_XYZ{counter}.png", self.output_prefix))
    }

    pub fn color_preview_path(&self, counter: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_RGB{counter}.png", self.output_prefix))
    }
}
