use image::GrayImage;
use itertools::iproduct;
use nalgebra::Vector3;
use ndarray::{Array2, Array3, ArrayView1, Axis};
use serde_derive::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};

/// Raw channel value the depth camera writes for a failed measurement.
pub const INVALID_SAMPLE: u16 = 0xFFFF;

/// Number of u16 channels in a `Coord3D_ABCY16` pixel (X, Y, Z and intensity).
pub const ABCY16_CHANNELS: usize = 4;

/// One raw measurement of the depth grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthSample {
    pub x_raw: u16,
    pub y_raw: u16,
    pub z_raw: u16,
}

impl DepthSample {
    pub fn new(x_raw: u16, y_raw: u16, z_raw: u16) -> Self {
        Self { x_raw, y_raw, z_raw }
    }

    /// A sample is invalid if any of its channels holds the sentinel.
    pub fn is_valid(&self) -> bool {
        self.x_raw != INVALID_SAMPLE && self.y_raw != INVALID_SAMPLE && self.z_raw != INVALID_SAMPLE
    }
}

/// Scale and per-axis offsets that turn raw samples into millimeters.
///
/// The device reports these once per session (`Scan3dCoordinateScale` and
/// `Scan3dCoordinateOffset` for coordinates A, B and C).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthCalibration {
    pub scale_mm: f64,
    pub x_offset_mm: f64,
    pub y_offset_mm: f64,
    pub z_offset_mm: f64,
}

impl Default for DepthCalibration {
    fn default() -> Self {
        Self {
            scale_mm: 1.0,
            x_offset_mm: 0.0,
            y_offset_mm: 0.0,
            z_offset_mm: 0.0,
        }
    }
}

impl DepthCalibration {
    pub fn new(scale_mm: f64, x_offset_mm: f64, y_offset_mm: f64, z_offset_mm: f64) -> Self {
        Self {
            scale_mm,
            x_offset_mm,
            y_offset_mm,
            z_offset_mm,
        }
    }

    /// Converts a raw sample into millimeters.
    ///
    /// # Returns
    ///
    /// * The scaled point, or the zero vector if the sample is invalid.
    pub fn to_point(&self, sample: &DepthSample) -> Vector3<f32> {
        if !sample.is_valid() {
            return Vector3::zeros();
        }

        Vector3::new(
            (sample.x_raw as f64 * self.scale_mm + self.x_offset_mm) as f32,
            (sample.y_raw as f64 * self.scale_mm + self.y_offset_mm) as f32,
            (sample.z_raw as f64 * self.scale_mm + self.z_offset_mm) as f32,
        )
    }
}

/// A grid of raw XYZ samples from the time-of-flight camera.
///
/// Samples are stored with shape `(height, width, 3)`.
#[derive(Clone, Debug)]
pub struct DepthFrame {
    samples: Array3<u16>,
    pub calibration: DepthCalibration,
}

impl DepthFrame {
    /// Wraps an already shaped `(height, width, 3)` array.
    pub fn new(samples: Array3<u16>, calibration: DepthCalibration) -> Result<Self> {
        let (height, width, channels) = samples.dim();
        if width == 0 || height == 0 {
            return Err(OverlayError::shape_mismatch(format!(
                "depth frame must not be empty, got {width}x{height}"
            )));
        }
        if channels != 3 {
            return Err(OverlayError::shape_mismatch(format!(
                "depth frame needs 3 channels, got {channels}"
            )));
        }
        Ok(Self {
            samples,
            calibration,
        })
    }

    /// Builds a frame from an interleaved buffer with `channels` values per
    /// pixel. Only the first three channels are kept.
    pub fn from_interleaved(
        width: usize,
        height: usize,
        channels: usize,
        data: &[u16],
        calibration: DepthCalibration,
    ) -> Result<Self> {
        if channels < 3 {
            return Err(OverlayError::shape_mismatch(format!(
                "depth pixels need at least 3 channels, got {channels}"
            )));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(channels))
            .ok_or_else(|| {
                OverlayError::shape_mismatch(format!(
                    "depth frame size {width}x{height}x{channels} overflows"
                ))
            })?;
        if data.len() != expected {
            return Err(OverlayError::shape_mismatch(format!(
                "depth buffer has {} values, expected {width}x{height}x{channels} = {expected}",
                data.len()
            )));
        }

        let samples = Array3::from_shape_fn((height, width, 3), |(row, col, c)| {
            data[(row * width + col) * channels + c]
        });
        Self::new(samples, calibration)
    }

    /// Builds a frame from the `Coord3D_ABCY16` layout, ignoring the intensity channel.
    pub fn from_abcy16(
        width: usize,
        height: usize,
        data: &[u16],
        calibration: DepthCalibration,
    ) -> Result<Self> {
        Self::from_interleaved(width, height, ABCY16_CHANNELS, data, calibration)
    }

    /// Builds a frame from packed XYZ triples.
    pub fn from_xyz(
        width: usize,
        height: usize,
        data: &[u16],
        calibration: DepthCalibration,
    ) -> Result<Self> {
        Self::from_interleaved(width, height, 3, data, calibration)
    }

    /// Decodes little-endian raw bytes, as dumped from a device buffer.
    pub fn from_le_bytes(
        width: usize,
        height: usize,
        channels: usize,
        bytes: &[u8],
        calibration: DepthCalibration,
    ) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(OverlayError::shape_mismatch(format!(
                "raw depth data has an odd number of bytes ({})",
                bytes.len()
            )));
        }
        let data: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_interleaved(width, height, channels, &data, calibration)
    }

    pub fn width(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    pub fn height(&self) -> usize {
        self.samples.len_of(Axis(0))
    }

    pub fn len(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample(&self, row: usize, col: usize) -> DepthSample {
        DepthSample::new(
            self.samples[[row, col, 0]],
            self.samples[[row, col, 1]],
            self.samples[[row, col, 2]],
        )
    }

    /// The point in millimeters measured at `(row, col)`.
    pub fn point(&self, row: usize, col: usize) -> Vector3<f32> {
        self.calibration.to_point(&self.sample(row, col))
    }

    /// Iterates over the samples in row-major order.
    pub fn samples(&self) -> impl Iterator<Item = DepthSample> + '_ {
        self.samples
            .lanes(Axis(2))
            .into_iter()
            .map(|lane: ArrayView1<u16>| DepthSample::new(lane[0], lane[1], lane[2]))
    }

    /// Converts every sample into millimeters.
    ///
    /// # Returns
    ///
    /// * An array with shape `(width * height, 3)` in row-major grid order.
    ///   Invalid samples become zero rows, they are never dropped.
    pub fn to_points(&self) -> Array2<f32> {
        let mut points = Array2::<f32>::zeros((self.len(), 3));
        for (sample, mut out) in self.samples().zip(points.axis_iter_mut(Axis(0))) {
            let point = self.calibration.to_point(&sample);
            out[0] = point[0];
            out[1] = point[1];
            out[2] = point[2];
        }
        points
    }

    pub fn valid_count(&self) -> usize {
        self.samples().filter(DepthSample::is_valid).count()
    }

    /// Renders the Z channel as an 8-bit image for inspection. Invalid
    /// samples are black.
    pub fn to_luma_image(&self) -> GrayImage {
        let (height, width) = (self.height(), self.width());
        let depths: Vec<Option<f32>> = iproduct!(0..height, 0..width)
            .map(|(row, col)| {
                let sample = self.sample(row, col);
                sample.is_valid().then(|| self.point(row, col)[2])
            })
            .collect();

        let (min, max) = depths
            .iter()
            .flatten()
            .fold((f32::MAX, f32::MIN), |(min, max), z| (min.min(*z), max.max(*z)));
        let range = if max > min { max - min } else { 1.0 };

        let pixels = depths
            .iter()
            .map(|z| match z {
                Some(z) => num::clamp(((z - min) / range) * 254.0 + 1.0, 1.0, 255.0) as u8,
                None => 0,
            })
            .collect();

        GrayImage::from_vec(width as u32, height as u32, pixels)
            .expect("buffer length matches the frame size")
    }
}
