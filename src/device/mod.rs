//! Camera and transport abstractions for the capture loop.
//!
//! The traits mirror the small part of a GenICam SDK the overlay needs:
//! discovery, PTP role negotiation, node settings, scheduled action
//! commands and buffered image acquisition. A hardware backend implements
//! them on top of its SDK; [`simulated`] implements them in memory.

use std::fmt;
use std::time::Duration;

use crate::config::{ActionCommandConfig, CaptureConfig, ExposureTime, OperatingMode};
use crate::error::{OverlayError, Result};
use crate::image::{ColorFrame, DepthCalibration, DepthFrame};

pub mod simulated;

/// Identification of a discovered device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model_name: String,
    pub serial: String,
}

impl DeviceInfo {
    pub fn new<M: Into<String>, S: Into<String>>(model_name: M, serial: S) -> Self {
        Self {
            model_name: model_name.into(),
            serial: serial.into(),
        }
    }
}

/// What a device is used for in the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// Time-of-flight camera (Helios2 and Helios2+ families).
    Depth,
    /// The RGB camera with the configured model name.
    Color,
}

impl DeviceKind {
    pub fn classify(info: &DeviceInfo, color_model: &str) -> Option<Self> {
        if info.model_name.contains("HLT") || info.model_name.contains("HTP") {
            Some(DeviceKind::Depth)
        } else if info.model_name == color_model {
            Some(DeviceKind::Color)
        } else {
            None
        }
    }
}

/// Picks the depth and color devices among the discovered ones.
///
/// # Returns
///
/// * `(depth_index, color_index)` into `infos`.
pub fn select_devices(infos: &[DeviceInfo], color_model: &str) -> Result<(usize, usize)> {
    let mut depth = None;
    let mut color = None;

    for (index, info) in infos.iter().enumerate() {
        match DeviceKind::classify(info, color_model) {
            Some(DeviceKind::Depth) if depth.is_some() => {
                return Err(OverlayError::device("too many depth devices connected"))
            }
            Some(DeviceKind::Depth) => depth = Some(index),
            Some(DeviceKind::Color) if color.is_some() => {
                return Err(OverlayError::device(format!(
                    "too many {color_model} devices connected"
                )))
            }
            Some(DeviceKind::Color) => color = Some(index),
            None => (),
        }
    }

    let color = color
        .ok_or_else(|| OverlayError::device(format!("no applicable {color_model} devices")))?;
    let depth = depth.ok_or_else(|| OverlayError::device("no applicable depth devices"))?;
    Ok((depth, color))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtpRole {
    Master,
    Slave,
}

/// The `PtpStatus` node of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtpStatus {
    Disabled,
    Initializing,
    Listening,
    Uncalibrated,
    Master,
    Slave,
    Faulty,
}

impl PtpStatus {
    pub fn has_role(&self, role: PtpRole) -> bool {
        matches!(
            (self, role),
            (PtpStatus::Master, PtpRole::Master) | (PtpStatus::Slave, PtpRole::Slave)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Coord3dAbcy16,
    Rgb8,
    Mono8,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PixelFormat::Coord3dAbcy16 => write!(f, "Coord3D_ABCY16"),
            PixelFormat::Rgb8 => write!(f, "RGB8"),
            PixelFormat::Mono8 => write!(f, "Mono8"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exposure {
    Preset(ExposureTime),
    Continuous,
}

/// Node values applied to a device before streaming.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSettings {
    pub pixel_format: PixelFormat,
    /// Trigger `FrameStart` on `Action0` with these keys, in unconditional
    /// action mode. `None` leaves the device free running.
    pub trigger: Option<ActionCommandConfig>,
    pub operating_mode: Option<OperatingMode>,
    pub exposure: Exposure,
}

impl DeviceSettings {
    pub fn depth(config: &CaptureConfig) -> Self {
        Self {
            pixel_format: PixelFormat::Coord3dAbcy16,
            trigger: config.use_scheduled_action.then(|| config.action.clone()),
            operating_mode: Some(config.depth_mode),
            exposure: Exposure::Preset(config.exposure),
        }
    }

    pub fn color(config: &CaptureConfig) -> Self {
        Self {
            pixel_format: PixelFormat::Rgb8,
            trigger: config.use_scheduled_action.then(|| config.action.clone()),
            operating_mode: None,
            exposure: Exposure::Continuous,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImageData {
    Coord3dAbcy16(Vec<u16>),
    Rgb8(Vec<u8>),
}

/// A buffer handed out by [`CameraDevice::get_image`]. Return it with
/// [`CameraDevice::requeue`] once processed.
#[derive(Clone, Debug, PartialEq)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    pub frame_id: u64,
    /// Device timestamp in PTP nanoseconds.
    pub timestamp_ns: i64,
    pub data: ImageData,
}

impl RawImage {
    pub fn to_depth_frame(&self, calibration: DepthCalibration) -> Result<DepthFrame> {
        match &self.data {
            ImageData::Coord3dAbcy16(data) => {
                DepthFrame::from_abcy16(self.width, self.height, data, calibration)
            }
            ImageData::Rgb8(_) => Err(OverlayError::device(format!(
                "frame {} is RGB8, expected {}",
                self.frame_id,
                PixelFormat::Coord3dAbcy16
            ))),
        }
    }

    pub fn to_color_frame(&self) -> Result<ColorFrame> {
        match &self.data {
            ImageData::Rgb8(data) => ColorFrame::from_rgb8(self.width, self.height, data.clone()),
            ImageData::Coord3dAbcy16(_) => Err(OverlayError::device(format!(
                "frame {} is {}, expected RGB8",
                self.frame_id,
                PixelFormat::Coord3dAbcy16
            ))),
        }
    }
}

/// One camera as seen through the vendor SDK.
pub trait CameraDevice {
    fn info(&self) -> &DeviceInfo;
    fn set_ptp_role(&mut self, role: PtpRole) -> Result<()>;
    fn ptp_status(&mut self) -> Result<PtpStatus>;
    fn pixel_format(&self) -> Result<PixelFormat>;
    fn set_pixel_format(&mut self, format: &PixelFormat) -> Result<()>;
    fn apply_settings(&mut self, settings: &DeviceSettings) -> Result<()>;
    fn start_stream(&mut self) -> Result<()>;
    fn stop_stream(&mut self) -> Result<()>;
    /// Latches and reads the device PTP clock in nanoseconds.
    fn latch_ptp_time(&mut self) -> Result<i64>;
    /// Scale and offsets of the coordinate channels. Depth devices only.
    fn depth_calibration(&mut self) -> Result<DepthCalibration>;
    /// Blocks until the next image arrives, failing with
    /// [`OverlayError::DeviceTimeout`] after `timeout`.
    fn get_image(&mut self, timeout: Duration) -> Result<RawImage>;
    fn requeue(&mut self, image: RawImage) -> Result<()>;
}

/// The transport layer system: device discovery and action commands.
pub trait TransportSystem {
    type Device: CameraDevice;

    fn update_devices(&mut self, timeout: Duration) -> Result<Vec<DeviceInfo>>;
    fn create_device(&mut self, info: &DeviceInfo) -> Result<Self::Device>;
    fn configure_action_command(&mut self, action: &ActionCommandConfig) -> Result<()>;
    /// Schedules `Action0` on every matching device at `execute_time_ns`.
    fn fire_action_command(&mut self, execute_time_ns: i64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{select_devices, DeviceInfo, DeviceKind, DeviceSettings, ImageData, RawImage};
    use crate::config::CaptureConfig;
    use crate::error::OverlayError;
    use crate::image::DepthCalibration;

    const COLOR: &str = "TRI032S-C";

    #[rstest]
    #[case("HLT003S-001", Some(DeviceKind::Depth))]
    #[case("HTP003S-001", Some(DeviceKind::Depth))]
    #[case("TRI032S-C", Some(DeviceKind::Color))]
    #[case("TRI050S-C", None)]
    fn classifies_by_model_name(#[case] model: &str, #[case] expected: Option<DeviceKind>) {
        assert_eq!(
            DeviceKind::classify(&DeviceInfo::new(model, "1"), COLOR),
            expected
        );
    }

    #[test]
    fn selects_one_of_each() {
        let infos = vec![
            DeviceInfo::new("PHX050S-C", "0"),
            DeviceInfo::new(COLOR, "1"),
            DeviceInfo::new("HLT003S-001", "2"),
        ];
        assert_eq!(select_devices(&infos, COLOR).unwrap(), (2, 1));
    }

    #[rstest]
    #[case(vec![DeviceInfo::new("HLT003S-001", "0"), DeviceInfo::new("HTP003S-001", "1"), DeviceInfo::new(COLOR, "2")])]
    #[case(vec![DeviceInfo::new("HLT003S-001", "0"), DeviceInfo::new(COLOR, "1"), DeviceInfo::new(COLOR, "2")])]
    #[case(vec![DeviceInfo::new("HLT003S-001", "0")])]
    #[case(vec![DeviceInfo::new(COLOR, "0")])]
    #[case(vec![])]
    fn bad_device_sets_fail(#[case] infos: Vec<DeviceInfo>) {
        assert!(matches!(
            select_devices(&infos, COLOR),
            Err(OverlayError::Device(_))
        ));
    }

    #[test]
    fn trigger_follows_scheduled_action_flag() {
        let mut config = CaptureConfig::default();
        assert!(DeviceSettings::depth(&config).trigger.is_some());
        config.use_scheduled_action = false;
        assert!(DeviceSettings::color(&config).trigger.is_none());
    }

    #[test]
    fn wrong_pixel_format_is_rejected() {
        let image = RawImage {
            width: 1,
            height: 1,
            frame_id: 4,
            timestamp_ns: 0,
            data: ImageData::Rgb8(vec![1, 2, 3]),
        };
        assert!(image.to_color_frame().is_ok());
        assert!(matches!(
            image.to_depth_frame(DepthCalibration::default()),
            Err(OverlayError::Device(_))
        ));
    }
}
