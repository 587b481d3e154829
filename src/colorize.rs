//! Color overlay of depth-camera points.
//!
//! Every depth sample is converted to millimeters, projected into the color
//! camera with the calibrated [`CameraModel`] and colored with the pixel it
//! lands on. The output keeps one entry per depth cell in row-major order,
//! so the index of an entry is its only link back to the depth grid.

use nalgebra::Vector3;
use ndarray::Axis;
use tracing::debug;

use crate::camera::CameraModel;
use crate::error::{OverlayError, Result};
use crate::image::{ColorFrame, DepthFrame};
use crate::pointcloud::PointCloud;

/// Color given to points that do not land inside the color frame.
pub const DEFAULT_COLOR: [u8; 3] = [0, 0, 0];

/// A depth point with the color sampled for it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorizedPoint {
    /// Position in millimeters, zero for invalid samples.
    pub position: Vector3<f32>,
    pub color: [u8; 3],
    /// Whether the color was sampled from the color frame.
    pub in_frame: bool,
}

impl ColorizedPoint {
    /// False for points carrying the invalid-sample zero vector.
    pub fn is_valid(&self) -> bool {
        self.position != Vector3::zeros()
    }
}

/// Rounds a projected coordinate to the pixel it falls on.
///
/// # Arguments
///
/// * `x`, `y` - Projected coordinates, x along the columns.
/// * `width`, `height` - Size of the color frame.
///
/// # Returns
///
/// * `(row, col)` if the rounded pixel lies in `[0, height) x [0, width)`.
pub fn pixel_at(x: f64, y: f64, width: usize, height: usize) -> Option<(usize, usize)> {
    let (col, row) = (x.round(), y.round());
    if !col.is_finite() || !row.is_finite() {
        return None;
    }
    if row < 0.0 || col < 0.0 || row >= height as f64 || col >= width as f64 {
        return None;
    }
    Some((row as usize, col as usize))
}

/// Colors each depth point with the color camera pixel it projects onto.
///
/// # Arguments
///
/// * `depth` - The depth frame; its calibration converts samples to millimeters.
/// * `color` - The color frame, possibly with a different resolution.
/// * `model` - Color camera model relative to the depth camera.
///
/// # Returns
///
/// * Exactly `depth.width() * depth.height()` points in row-major order.
///   Points outside the color frame keep [`DEFAULT_COLOR`].
pub fn colorize(
    depth: &DepthFrame,
    color: &ColorFrame,
    model: &CameraModel,
) -> Result<Vec<ColorizedPoint>> {
    if depth.is_empty() {
        return Err(OverlayError::shape_mismatch("depth frame is empty"));
    }
    if color.width() == 0 || color.height() == 0 {
        return Err(OverlayError::shape_mismatch("color frame is empty"));
    }

    let points = depth.to_points();
    let projected = model.project_points(&points)?;
    let (width, height) = (color.width(), color.height());

    let colorized: Vec<ColorizedPoint> = points
        .axis_iter(Axis(0))
        .zip(projected.axis_iter(Axis(0)))
        .map(|(point, pixel)| {
            let position = Vector3::new(point[0], point[1], point[2]);
            match pixel_at(pixel[0], pixel[1], width, height) {
                Some((row, col)) => ColorizedPoint {
                    position,
                    color: color.get(row, col),
                    in_frame: true,
                },
                None => ColorizedPoint {
                    position,
                    color: DEFAULT_COLOR,
                    in_frame: false,
                },
            }
        })
        .collect();

    debug!(
        points = colorized.len(),
        in_frame = colorized.iter().filter(|p| p.in_frame).count(),
        "Colorized depth frame"
    );

    Ok(colorized)
}

/// Colorizes and packs the result for the point cloud writer.
pub fn colorize_into_point_cloud(
    depth: &DepthFrame,
    color: &ColorFrame,
    model: &CameraModel,
    filter_invalid: bool,
) -> Result<PointCloud> {
    let colorized = colorize(depth, color, model)?;
    Ok(PointCloud::from_colorized(&colorized, filter_invalid))
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;
    use ndarray::Array3;
    use rstest::rstest;

    use super::{colorize, colorize_into_point_cloud, pixel_at, DEFAULT_COLOR};
    use crate::camera::CameraModel;
    use crate::image::{ColorFrame, DepthCalibration, DepthFrame, INVALID_SAMPLE};
    use crate::unit_test::{sample_camera_model, sample_color_frame, sample_depth_frame};

    /// Camera at the depth origin with focal length 1 and no principal point
    /// offset, so a point at z = 1 lands on pixel (x, y).
    fn unit_camera() -> CameraModel {
        CameraModel::from_slices(
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            &[],
            &[0.0; 3],
            &[0.0; 3],
        )
        .unwrap()
    }

    fn gradient_frame(width: usize, height: usize) -> ColorFrame {
        ColorFrame::new(Array3::from_shape_fn((height, width, 3), |(r, c, ch)| {
            (r * 10 + c + ch * 100) as u8
        }))
        .unwrap()
    }

    fn single_point_frame(x: u16, y: u16, z: u16) -> DepthFrame {
        DepthFrame::from_xyz(1, 1, &[x, y, z], DepthCalibration::default()).unwrap()
    }

    #[test]
    fn bounds_are_inclusive_below_and_exclusive_above() {
        assert_eq!(pixel_at(0.0, 0.0, 4, 3), Some((0, 0)));
        assert_eq!(pixel_at(3.0, 2.0, 4, 3), Some((2, 3)));
        assert_eq!(pixel_at(0.0, 3.0, 4, 3), None);
        assert_eq!(pixel_at(4.0, 0.0, 4, 3), None);
        assert_eq!(pixel_at(-0.6, 0.0, 4, 3), None);
        assert_eq!(pixel_at(-0.4, 0.0, 4, 3), Some((0, 0)));
        assert_eq!(pixel_at(2.6, 1.4, 4, 3), Some((1, 3)));
        assert_eq!(pixel_at(f64::NAN, 0.0, 4, 3), None);
        assert_eq!(pixel_at(f64::INFINITY, 0.0, 4, 3), None);
    }

    #[test]
    fn samples_exact_pixel_without_interpolation() {
        let color = gradient_frame(4, 3);
        let points = colorize(&single_point_frame(3, 2, 1), &color, &unit_camera()).unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].in_frame);
        assert_eq!(points[0].color, color.get(2, 3));
    }

    #[test]
    fn translation_shifts_the_sampled_column() {
        let model = CameraModel::from_slices(
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            &[],
            &[0.0; 3],
            &[2.0, 0.0, 0.0],
        )
        .unwrap();
        let color = ColorFrame::new(Array3::from_shape_fn((1, 4, 3), |(_, c, _)| (c * 10) as u8))
            .unwrap();

        let points = colorize(&single_point_frame(0, 0, 1), &color, &model).unwrap();
        assert!(points[0].in_frame);
        assert_eq!(points[0].color, [20, 20, 20]);
    }

    #[test]
    fn rotation_and_translation_pick_the_expected_pixel() {
        // Rotating (1, 0, 10) by 90 degrees about Z gives (0, 1, 10), the
        // translation moves it to (5, 1, 10), so it lands on
        // u = 10 * 0.5 + 2 = 7 and v = 10 * 0.1 + 1 = 2.
        let model = CameraModel::from_slices(
            &[10.0, 0.0, 2.0, 0.0, 10.0, 1.0, 0.0, 0.0, 1.0],
            &[],
            &[0.0, 0.0, std::f64::consts::FRAC_PI_2],
            &[5.0, 0.0, 0.0],
        )
        .unwrap();
        let color = gradient_frame(8, 4);

        let points = colorize(&single_point_frame(1, 0, 10), &color, &model).unwrap();
        assert!(points[0].in_frame);
        assert_eq!(points[0].color, color.get(2, 7));
        assert_eq!(points[0].color, [27, 127, 227]);
    }

    #[test]
    fn row_equal_to_height_is_out_of_frame() {
        let color = gradient_frame(4, 3);
        let points = colorize(&single_point_frame(0, 3, 1), &color, &unit_camera()).unwrap();
        assert_eq!(points.len(), 1);
        assert!(!points[0].in_frame);
        assert_eq!(points[0].color, DEFAULT_COLOR);
    }

    #[test]
    fn origin_pixel_is_in_frame() {
        let color = gradient_frame(4, 3);
        let points = colorize(&single_point_frame(0, 0, 1), &color, &unit_camera()).unwrap();
        assert!(points[0].in_frame);
        assert_eq!(points[0].color, color.get(0, 0));
    }

    #[test]
    fn example_frame_with_invalid_sample() {
        let depth = DepthFrame::from_xyz(
            2,
            1,
            &[100, 200, 300, INVALID_SAMPLE, INVALID_SAMPLE, INVALID_SAMPLE],
            DepthCalibration::new(0.1, 0.0, 0.0, 0.0),
        )
        .unwrap();
        let color = gradient_frame(8, 8);
        let model = unit_camera();

        let points = colorize(&depth, &color, &model).unwrap();
        assert_eq!(points.len(), 2);
        approx::assert_relative_eq!(
            points[0].position,
            Vector3::new(10.0, 20.0, 30.0),
            epsilon = 1e-4
        );
        assert_eq!(points[1].position, Vector3::zeros());
        assert!(points[0].is_valid());
        assert!(!points[1].is_valid());

        let kept = colorize_into_point_cloud(&depth, &color, &model, true).unwrap();
        assert_eq!(kept.len(), 1);
        let all = colorize_into_point_cloud(&depth, &color, &model, false).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[rstest]
    fn output_is_aligned_with_depth_grid(
        sample_depth_frame: DepthFrame,
        sample_color_frame: ColorFrame,
        sample_camera_model: CameraModel,
    ) {
        let points = colorize(&sample_depth_frame, &sample_color_frame, &sample_camera_model)
            .unwrap();
        assert_eq!(points.len(), sample_depth_frame.width() * sample_depth_frame.height());

        for (i, point) in points.iter().enumerate() {
            let (row, col) = (i / sample_depth_frame.width(), i % sample_depth_frame.width());
            assert_eq!(point.position, sample_depth_frame.point(row, col));
            if !point.in_frame {
                assert_eq!(point.color, DEFAULT_COLOR);
            }
        }
        assert!(points.iter().any(|p| p.in_frame));
        assert!(points.iter().any(|p| !p.in_frame));
    }

    #[rstest]
    fn colorize_is_deterministic(
        sample_depth_frame: DepthFrame,
        sample_color_frame: ColorFrame,
        sample_camera_model: CameraModel,
    ) {
        let first = colorize(&sample_depth_frame, &sample_color_frame, &sample_camera_model)
            .unwrap();
        let second = colorize(&sample_depth_frame, &sample_color_frame, &sample_camera_model)
            .unwrap();
        assert_eq!(first, second);
    }

    #[rstest]
    fn everything_out_of_frame_keeps_length(
        sample_depth_frame: DepthFrame,
        sample_camera_model: CameraModel,
    ) {
        let mut model = sample_camera_model;
        model.intrinsics.cx = -1.0e6;
        let tiny = gradient_frame(1, 1);
        let points = colorize(&sample_depth_frame, &tiny, &model).unwrap();
        assert_eq!(points.len(), sample_depth_frame.len());
        assert!(points.iter().all(|p| !p.in_frame && p.color == DEFAULT_COLOR));
    }

    #[test]
    fn depth_and_color_sizes_are_independent() {
        let depth = DepthFrame::from_xyz(
            3,
            2,
            &[1, 1, 1, 2, 1, 1, 3, 1, 1, 1, 2, 1, 2, 2, 1, 3, 2, 1],
            DepthCalibration::default(),
        )
        .unwrap();
        let color = gradient_frame(2, 5);
        let points = colorize(&depth, &color, &unit_camera()).unwrap();
        assert_eq!(points.len(), 6);
        assert_eq!(points[0].color, color.get(1, 1));
        // Column 2 does not exist in a 2 pixel wide frame.
        assert!(!points[2].in_frame);
    }
}
