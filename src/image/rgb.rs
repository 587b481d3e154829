use std::path::Path;

use image::{flat::SampleLayout, RgbImage};
use ndarray::{Array3, Axis, ShapeBuilder};

use crate::error::{OverlayError, Result};

/// Trait to convert into ndarray::Array3, this is different than nshare version
/// because it uses the shape [height, width, channels] instead of [channels, height, width].
pub trait IntoArray3 {
    fn into_array3(self) -> Array3<u8>;
}

impl IntoArray3 for RgbImage {
    fn into_array3(self) -> Array3<u8> {
        let SampleLayout {
            channels,
            channel_stride,
            height,
            height_stride,
            width,
            width_stride,
        } = self.sample_layout();
        let shape = (height as usize, width as usize, channels as usize);
        let strides = (height_stride, width_stride, channel_stride);
        Array3::from_shape_vec(shape.strides(strides), self.into_raw())
            .expect("RgbImage sample layout is always contiguous")
    }
}

/// Trait to convert objects into image::RgbImage
pub trait IntoImageRgb8 {
    fn into_image_rgb8(self) -> RgbImage;
}

impl IntoImageRgb8 for Array3<u8> {
    fn into_image_rgb8(self) -> RgbImage {
        let (height, width, _) = self.dim();
        let raw = self.as_standard_layout().into_owned().into_raw_vec();
        RgbImage::from_raw(width as u32, height as u32, raw)
            .expect("array has three channels")
    }
}

/// An RGB raster from the color camera, stored with shape `(height, width, 3)`.
#[derive(Clone, Debug)]
pub struct ColorFrame {
    pixels: Array3<u8>,
}

impl ColorFrame {
    pub fn new(pixels: Array3<u8>) -> Result<Self> {
        let (height, width, channels) = pixels.dim();
        if width == 0 || height == 0 {
            return Err(OverlayError::shape_mismatch(format!(
                "color frame must not be empty, got {width}x{height}"
            )));
        }
        if channels != 3 {
            return Err(OverlayError::shape_mismatch(format!(
                "color frame needs 3 channels, got {channels}"
            )));
        }
        Ok(Self { pixels })
    }

    /// Builds a frame from a packed `RGB8` buffer.
    pub fn from_rgb8(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(3))
            .ok_or_else(|| {
                OverlayError::shape_mismatch(format!("color frame size {width}x{height} overflows"))
            })?;
        if data.len() != expected {
            return Err(OverlayError::shape_mismatch(format!(
                "color buffer has {} bytes, expected {width}x{height}x3 = {expected}",
                data.len()
            )));
        }
        let pixels = Array3::from_shape_vec((height, width, 3), data)
            .map_err(|err| OverlayError::shape_mismatch(err.to_string()))?;
        Self::new(pixels)
    }

    pub fn from_image(image: RgbImage) -> Result<Self> {
        Self::new(image.into_array3())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = image::io::Reader::open(path)?.decode()?.into_rgb8();
        Self::from_image(image)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_image().save(path)?;
        Ok(())
    }

    pub fn to_image(&self) -> RgbImage {
        self.pixels.clone().into_image_rgb8()
    }

    pub fn width(&self) -> usize {
        self.pixels.len_of(Axis(1))
    }

    pub fn height(&self) -> usize {
        self.pixels.len_of(Axis(0))
    }

    /// The color at `(row, col)`. Panics when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> [u8; 3] {
        [
            self.pixels[[row, col, 0]],
            self.pixels[[row, col, 1]],
            self.pixels[[row, col, 2]],
        ]
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }
}
