use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::camera::CameraModel;
use crate::colorize::colorize;
use crate::config::CaptureConfig;
use crate::device::{
    select_devices, CameraDevice, DeviceSettings, PixelFormat, PtpRole, RawImage, TransportSystem,
};
use crate::error::{OverlayError, Result};
use crate::image::DepthCalibration;
use crate::io::{write_colorized_ply, PlyOptions};
use crate::sync::{fire_scheduled_action, negotiate_ptp_role, FramePairGrabber};

/// Outcome of one captured frame pair.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureReport {
    pub counter: usize,
    pub cloud_path: PathBuf,
    /// Points in the written cloud, after the invalid-point filter.
    pub points_written: usize,
    /// Depth points whose color was sampled from the color frame.
    pub points_in_frame: usize,
    /// Depth frame timestamp minus the scheduled action time.
    pub depth_offset_ns: Option<i64>,
    pub color_offset_ns: Option<i64>,
}

/// Captures synchronized frame pairs from a depth and a color camera and
/// writes each as a colorized point cloud.
pub struct OverlayPipeline<S: TransportSystem> {
    system: S,
    depth: S::Device,
    color: S::Device,
    config: CaptureConfig,
    model: CameraModel,
    calibration: DepthCalibration,
    grabber: FramePairGrabber,
    initial_formats: (PixelFormat, PixelFormat),
}

impl<S: TransportSystem> OverlayPipeline<S> {
    /// Discovers the cameras, negotiates PTP roles (depth is master) and
    /// applies the capture settings.
    pub fn prepare(mut system: S, config: CaptureConfig, model: CameraModel) -> Result<Self> {
        config.validate()?;

        let infos = system.update_devices(config.discovery_timeout())?;
        if infos.is_empty() {
            return Err(OverlayError::device("no camera connected"));
        }
        for (index, info) in infos.iter().enumerate() {
            info!(index, model = %info.model_name, serial = %info.serial, "Detected device");
        }

        let (depth_index, color_index) = select_devices(&infos, &config.color_model)?;

        let mut depth = system.create_device(&infos[depth_index])?;
        negotiate_ptp_role(&mut depth, PtpRole::Master, &config)?;
        let depth_format = depth.pixel_format()?;
        depth.apply_settings(&DeviceSettings::depth(&config))?;
        info!(
            mode = %config.depth_mode,
            exposure = %config.exposure,
            "Applied depth camera settings"
        );

        let mut color = system.create_device(&infos[color_index])?;
        negotiate_ptp_role(&mut color, PtpRole::Slave, &config)?;
        let color_format = color.pixel_format()?;
        color.apply_settings(&DeviceSettings::color(&config))?;
        info!("Applied color camera settings: continuous exposure, RGB8");

        if config.use_scheduled_action {
            system.configure_action_command(&config.action)?;
            info!(
                device_key = config.action.device_key,
                group_key = config.action.group_key,
                group_mask = config.action.group_mask,
                target_ip = %config.action.target_ip,
                "Configured action commands"
            );
        }

        let calibration = depth.depth_calibration()?;
        debug!(?calibration, "Depth coordinate calibration");

        Ok(Self {
            grabber: FramePairGrabber::new(config.image_timeout()),
            system,
            depth,
            color,
            config,
            model,
            calibration,
            initial_formats: (depth_format, color_format),
        })
    }

    /// Streams, captures `num_iterations` frame pairs and restores the
    /// devices' pixel formats.
    pub fn run(&mut self) -> Result<Vec<CaptureReport>> {
        fs::create_dir_all(&self.config.output_dir)?;

        self.depth.start_stream()?;
        self.color.start_stream()?;

        info!(iterations = self.config.num_iterations, "Capturing overlays");
        let mut reports = Vec::with_capacity(self.config.num_iterations);
        let mut result = Ok(());
        for counter in 0..self.config.num_iterations {
            match self.capture(counter) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        let finished = self.finish();
        result?;
        finished?;
        Ok(reports)
    }

    fn finish(&mut self) -> Result<()> {
        self.depth.stop_stream()?;
        self.color.stop_stream()?;
        self.depth.set_pixel_format(&self.initial_formats.0)?;
        self.color.set_pixel_format(&self.initial_formats.1)?;
        Ok(())
    }

    /// Captures a single frame pair and writes its overlay. Streams must be running.
    fn capture(&mut self, counter: usize) -> Result<CaptureReport> {
        let scheduled_ns = if self.config.use_scheduled_action {
            Some(fire_scheduled_action(
                &mut self.system,
                &mut self.depth,
                &self.config,
            )?)
        } else {
            None
        };

        let (depth_image, color_image) = self.grabber.grab(&mut self.depth, &mut self.color)?;
        let depth_offset_ns = scheduled_ns.map(|at| depth_image.timestamp_ns - at);
        let color_offset_ns = scheduled_ns.map(|at| color_image.timestamp_ns - at);
        info!(
            frame_id = depth_image.frame_id,
            timestamp_ns = depth_image.timestamp_ns,
            offset_ns = ?depth_offset_ns,
            "Got depth frame"
        );
        info!(
            frame_id = color_image.frame_id,
            timestamp_ns = color_image.timestamp_ns,
            offset_ns = ?color_offset_ns,
            "Got color frame"
        );

        let written = self.write_overlay(counter, &depth_image, &color_image);

        if let Err(err) = self.depth.requeue(depth_image) {
            warn!(%err, "Could not requeue depth buffer");
        }
        if let Err(err) = self.color.requeue(color_image) {
            warn!(%err, "Could not requeue color buffer");
        }

        let (cloud_path, points_written, points_in_frame) = written?;
        Ok(CaptureReport {
            counter,
            cloud_path,
            points_written,
            points_in_frame,
            depth_offset_ns,
            color_offset_ns,
        })
    }

    /// Decodes a frame pair, saves the previews and writes the colorized cloud.
    ///
    /// # Returns
    ///
    /// * The cloud path, the number of points written and the number of
    ///   points inside the color frame.
    fn write_overlay(
        &self,
        counter: usize,
        depth_image: &RawImage,
        color_image: &RawImage,
    ) -> Result<(PathBuf, usize, usize)> {
        let depth_frame = depth_image.to_depth_frame(self.calibration)?;
        let color_frame = color_image.to_color_frame()?;

        if self.config.save_previews {
            depth_frame
                .to_luma_image()
                .save(self.config.depth_preview_path(counter))?;
            color_frame.save(self.config.color_preview_path(counter))?;
        }

        let colorized = colorize(&depth_frame, &color_frame, &self.model)?;
        let points_in_frame = colorized.iter().filter(|p| p.in_frame).count();

        let cloud_path = self.config.cloud_path(counter);
        let options = PlyOptions {
            filter_invalid: self.config.filter_points,
            binary: self.config.binary_ply,
            calibration: Some(self.calibration),
        };
        let points_written = write_colorized_ply(&cloud_path, &colorized, &options)?;
        info!(path = %cloud_path.display(), points_written, points_in_frame, "Saved overlay");

        Ok((cloud_path, points_written, points_in_frame))
    }
}
