//! In-memory devices rendering a synthetic scene: a flat wall in front of
//! both cameras, painted with a color gradient.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

use super::{
    CameraDevice, DeviceInfo, DeviceKind, DeviceSettings, ImageData, PixelFormat, PtpRole,
    PtpStatus, RawImage, TransportSystem,
};
use crate::camera::{CameraIntrinsics, CameraModel, Distortion};
use crate::config::ActionCommandConfig;
use crate::error::{OverlayError, Result};
use crate::image::{DepthCalibration, ABCY16_CHANNELS, INVALID_SAMPLE};
use crate::transform::Transform;

pub const DEPTH_MODEL: &str = "HLT003S-001";
pub const COLOR_MODEL: &str = "TRI032S-C";

/// Geometry of the synthetic scene.
#[derive(Clone, Debug)]
pub struct SimulatedScene {
    pub depth_width: usize,
    pub depth_height: usize,
    pub color_width: usize,
    pub color_height: usize,
    /// Depth camera focal length in pixels.
    pub depth_focal_px: f64,
    /// Distance from the depth camera to the wall.
    pub wall_distance_mm: f64,
    /// Baseline between the depth and color cameras along X.
    pub baseline_mm: f64,
    pub calibration: DepthCalibration,
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self {
            depth_width: 64,
            depth_height: 48,
            color_width: 128,
            color_height: 96,
            depth_focal_px: 60.0,
            wall_distance_mm: 1000.0,
            baseline_mm: 50.0,
            calibration: DepthCalibration::new(0.25, -8192.0, -8192.0, 0.0),
        }
    }
}

impl SimulatedScene {
    /// Color camera model matching the scene: same orientation as the depth
    /// camera, shifted by the baseline, with twice its resolution.
    pub fn camera_model(&self) -> CameraModel {
        let scale = self.color_width as f64 / self.depth_width as f64;
        CameraModel::new(
            CameraIntrinsics::from_simple_intrinsic(
                self.depth_focal_px * scale,
                self.depth_focal_px * scale,
                self.color_width as f64 / 2.0,
                self.color_height as f64 / 2.0,
            ),
            Distortion::default(),
            Transform::from_rotation_vector(
                &nalgebra::Vector3::zeros(),
                &nalgebra::Vector3::new(-self.baseline_mm, 0.0, 0.0),
            ),
        )
    }

    fn to_raw(&self, value_mm: f64, offset_mm: f64) -> u16 {
        let raw = ((value_mm - offset_mm) / self.calibration.scale_mm).round();
        num::clamp(raw, 0.0, (INVALID_SAMPLE - 1) as f64) as u16
    }

    /// Renders the wall as a `Coord3D_ABCY16` buffer. The first column has
    /// no return signal and is marked invalid.
    pub fn depth_raster(&self) -> Vec<u16> {
        let (width, height) = (self.depth_width, self.depth_height);
        let mut data = Vec::with_capacity(width * height * ABCY16_CHANNELS);
        for row in 0..height {
            for col in 0..width {
                if col == 0 {
                    data.extend([INVALID_SAMPLE, INVALID_SAMPLE, INVALID_SAMPLE, 0]);
                    continue;
                }
                let z = self.wall_distance_mm;
                let x = (col as f64 - width as f64 / 2.0) * z / self.depth_focal_px;
                let y = (row as f64 - height as f64 / 2.0) * z / self.depth_focal_px;
                data.extend([
                    self.to_raw(x, self.calibration.x_offset_mm),
                    self.to_raw(y, self.calibration.y_offset_mm),
                    self.to_raw(z, self.calibration.z_offset_mm),
                    1000,
                ]);
            }
        }
        data
    }

    /// Renders the color view: red grows along the columns, green along the rows.
    pub fn color_raster(&self) -> Vec<u8> {
        let (width, height) = (self.color_width, self.color_height);
        let mut data = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            for col in 0..width {
                data.extend([
                    (col * 255 / width.max(1)) as u8,
                    (row * 255 / height.max(1)) as u8,
                    128,
                ]);
            }
        }
        data
    }
}

#[derive(Debug)]
struct SharedState {
    clock_ns: i64,
    action: Option<ActionCommandConfig>,
    pending_action_ns: Option<i64>,
}

/// A transport system with one depth and one color camera attached.
pub struct SimulatedSystem {
    scene: SimulatedScene,
    devices: Vec<DeviceInfo>,
    state: Arc<Mutex<SharedState>>,
    /// Polls of `PtpStatus` answered with `Listening` before the role settles.
    pub ptp_settle_polls: usize,
}

impl SimulatedSystem {
    pub fn new(scene: SimulatedScene) -> Self {
        Self::with_devices(
            scene,
            vec![
                DeviceInfo::new(DEPTH_MODEL, "sim-depth"),
                DeviceInfo::new(COLOR_MODEL, "sim-color"),
            ],
        )
    }

    pub fn with_devices(scene: SimulatedScene, devices: Vec<DeviceInfo>) -> Self {
        Self {
            scene,
            devices,
            state: Arc::new(Mutex::new(SharedState {
                clock_ns: 1_700_000_000_250_000_000,
                action: None,
                pending_action_ns: None,
            })),
            ptp_settle_polls: 2,
        }
    }
}

fn lock(state: &Mutex<SharedState>) -> Result<MutexGuard<'_, SharedState>> {
    state
        .lock()
        .map_err(|_| OverlayError::device("simulated system state poisoned"))
}

impl TransportSystem for SimulatedSystem {
    type Device = SimulatedDevice;

    fn update_devices(&mut self, _timeout: Duration) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn create_device(&mut self, info: &DeviceInfo) -> Result<SimulatedDevice> {
        if !self.devices.contains(info) {
            return Err(OverlayError::device(format!(
                "device {} ({}) is not connected",
                info.model_name, info.serial
            )));
        }
        let kind = DeviceKind::classify(info, COLOR_MODEL).ok_or_else(|| {
            OverlayError::device(format!("cannot simulate a {}", info.model_name))
        })?;

        Ok(SimulatedDevice {
            info: info.clone(),
            kind,
            scene: self.scene.clone(),
            state: self.state.clone(),
            pixel_format: PixelFormat::Mono8,
            role: None,
            status_polls: 0,
            ptp_settle_polls: self.ptp_settle_polls,
            settings: None,
            streaming: false,
            frame_id: 0,
            last_action_ns: None,
            outstanding: 0,
        })
    }

    fn configure_action_command(&mut self, action: &ActionCommandConfig) -> Result<()> {
        lock(&self.state)?.action = Some(action.clone());
        Ok(())
    }

    fn fire_action_command(&mut self, execute_time_ns: i64) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.action.is_none() {
            return Err(OverlayError::device(
                "action command keys are not configured",
            ));
        }
        state.pending_action_ns = Some(execute_time_ns);
        state.clock_ns = state.clock_ns.max(execute_time_ns);
        trace!(execute_time_ns, "Simulated action command fired");
        Ok(())
    }
}

pub struct SimulatedDevice {
    info: DeviceInfo,
    kind: DeviceKind,
    scene: SimulatedScene,
    state: Arc<Mutex<SharedState>>,
    pixel_format: PixelFormat,
    role: Option<PtpRole>,
    status_polls: usize,
    ptp_settle_polls: usize,
    settings: Option<DeviceSettings>,
    streaming: bool,
    frame_id: u64,
    last_action_ns: Option<i64>,
    outstanding: usize,
}

impl SimulatedDevice {
    /// Buffers handed out and not yet requeued.
    pub fn outstanding_buffers(&self) -> usize {
        self.outstanding
    }

    fn next_timestamp(&mut self) -> Result<i64> {
        let state = lock(&self.state)?;
        let triggered = self
            .settings
            .as_ref()
            .map_or(false, |settings| settings.trigger.is_some());
        if !triggered {
            return Ok(state.clock_ns + self.frame_id as i64 * 33_000_000);
        }

        let keys_match = match (&state.action, self.settings.as_ref()) {
            (Some(system), Some(DeviceSettings { trigger: Some(device), .. })) => {
                system.device_key == device.device_key
                    && system.group_key == device.group_key
                    && system.group_mask & device.group_mask != 0
            }
            _ => false,
        };

        match state.pending_action_ns {
            Some(at) if keys_match && self.last_action_ns != Some(at) => {
                self.last_action_ns = Some(at);
                // Exposure starts a few microseconds after the scheduled time.
                let jitter = match self.kind {
                    DeviceKind::Depth => 1_200,
                    DeviceKind::Color => 2_700,
                };
                Ok(at + jitter)
            }
            _ => Err(OverlayError::timeout(
                format!("waiting for a triggered frame from {}", self.info.model_name),
                Duration::ZERO,
            )),
        }
    }
}

impl CameraDevice for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn set_ptp_role(&mut self, role: PtpRole) -> Result<()> {
        self.role = Some(role);
        self.status_polls = 0;
        Ok(())
    }

    fn ptp_status(&mut self) -> Result<PtpStatus> {
        let Some(role) = self.role else {
            return Ok(PtpStatus::Disabled);
        };
        self.status_polls += 1;
        if self.status_polls <= self.ptp_settle_polls {
            return Ok(PtpStatus::Listening);
        }
        Ok(match role {
            PtpRole::Master => PtpStatus::Master,
            PtpRole::Slave => PtpStatus::Slave,
        })
    }

    fn pixel_format(&self) -> Result<PixelFormat> {
        Ok(self.pixel_format.clone())
    }

    fn set_pixel_format(&mut self, format: &PixelFormat) -> Result<()> {
        self.pixel_format = format.clone();
        Ok(())
    }

    fn apply_settings(&mut self, settings: &DeviceSettings) -> Result<()> {
        let supported = match self.kind {
            DeviceKind::Depth => settings.pixel_format == PixelFormat::Coord3dAbcy16,
            DeviceKind::Color => settings.pixel_format == PixelFormat::Rgb8,
        };
        if !supported {
            return Err(OverlayError::device(format!(
                "{} does not support {}",
                self.info.model_name, settings.pixel_format
            )));
        }
        self.pixel_format = settings.pixel_format.clone();
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        Ok(())
    }

    fn latch_ptp_time(&mut self) -> Result<i64> {
        let mut state = lock(&self.state)?;
        state.clock_ns += 1_000_000;
        Ok(state.clock_ns)
    }

    fn depth_calibration(&mut self) -> Result<DepthCalibration> {
        match self.kind {
            DeviceKind::Depth => Ok(self.scene.calibration),
            DeviceKind::Color => Err(OverlayError::device(format!(
                "{} has no coordinate calibration",
                self.info.model_name
            ))),
        }
    }

    fn get_image(&mut self, timeout: Duration) -> Result<RawImage> {
        if !self.streaming {
            return Err(OverlayError::device(format!(
                "{} is not streaming",
                self.info.model_name
            )));
        }
        let timestamp_ns = self.next_timestamp().map_err(|err| match err {
            OverlayError::DeviceTimeout { operation, .. } => {
                OverlayError::DeviceTimeout { operation, timeout }
            }
            err => err,
        })?;

        self.frame_id += 1;
        self.outstanding += 1;
        let (width, height, data) = match self.kind {
            DeviceKind::Depth => (
                self.scene.depth_width,
                self.scene.depth_height,
                ImageData::Coord3dAbcy16(self.scene.depth_raster()),
            ),
            DeviceKind::Color => (
                self.scene.color_width,
                self.scene.color_height,
                ImageData::Rgb8(self.scene.color_raster()),
            ),
        };

        Ok(RawImage {
            width,
            height,
            frame_id: self.frame_id,
            timestamp_ns,
            data,
        })
    }

    fn requeue(&mut self, _image: RawImage) -> Result<()> {
        self.outstanding = self.outstanding.saturating_sub(1);
        Ok(())
    }
}
