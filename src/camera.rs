use nalgebra::{Matrix3, Vector2, Vector3};
use ndarray::{Array2, Axis};

use crate::error::{OverlayError, Result};
use crate::transform::Transform;

/// Camera intrinsic parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length and pixel scale in the X-axis.
    pub fx: f64,
    /// Focal length and pixel scale in the Y-axis.
    pub fy: f64,
    /// Camera X-center.
    pub cx: f64,
    /// Camera Y-center.
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn from_simple_intrinsic(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Reads the parameters from a 3x3 camera matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    ///
    /// The skew term is ignored, as OpenCV's projection does.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Result<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(OverlayError::invalid_camera_model(
                "camera matrix has non-finite entries",
            ));
        }
        if matrix[(2, 0)] != 0.0 || matrix[(2, 1)] != 0.0 || matrix[(2, 2)] != 1.0 {
            return Err(OverlayError::invalid_camera_model(format!(
                "camera matrix last row must be [0, 0, 1], got [{}, {}, {}]",
                matrix[(2, 0)],
                matrix[(2, 1)],
                matrix[(2, 2)]
            )));
        }
        if matrix[(0, 0)] == 0.0 || matrix[(1, 1)] == 0.0 {
            return Err(OverlayError::invalid_camera_model(
                "camera matrix focal lengths must be non-zero",
            ));
        }

        Ok(Self {
            fx: matrix[(0, 0)],
            fy: matrix[(1, 1)],
            cx: matrix[(0, 2)],
            cy: matrix[(1, 2)],
        })
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Maps normalized image coordinates into pixels.
    pub fn to_pixel(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            normalized[0] * self.fx + self.cx,
            normalized[1] * self.fy + self.cy,
        )
    }
}

/// Lens distortion in OpenCV's rational model.
///
/// `k*` are radial terms, `p*` tangential. The usual 5 coefficient
/// calibration leaves `k4..k6` at zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    /// Reads a coefficient vector in OpenCV order `(k1, k2, p1, p2[, k3[, k4, k5, k6[, ...]]])`.
    ///
    /// Thin prism and tilt terms (12 and 14 coefficient layouts) are accepted
    /// only when they are zero.
    pub fn from_coefficients(coefficients: &[f64]) -> Result<Self> {
        if !matches!(coefficients.len(), 0 | 4 | 5 | 8 | 12 | 14) {
            return Err(OverlayError::invalid_camera_model(format!(
                "distortion must have 0, 4, 5, 8, 12 or 14 coefficients, got {}",
                coefficients.len()
            )));
        }
        if coefficients.iter().any(|v| !v.is_finite()) {
            return Err(OverlayError::invalid_camera_model(
                "distortion has non-finite coefficients",
            ));
        }
        if coefficients.iter().skip(8).any(|v| *v != 0.0) {
            return Err(OverlayError::invalid_camera_model(
                "thin prism and tilt distortion terms are not supported",
            ));
        }

        let k = |i: usize| coefficients.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: k(0),
            k2: k(1),
            p1: k(2),
            p2: k(3),
            k3: k(4),
            k4: k(5),
            k5: k(6),
            k6: k(7),
        })
    }

    /// Coefficients in OpenCV order, 8 when the rational terms are used and 5 otherwise.
    pub fn coefficients(&self) -> Vec<f64> {
        let mut coefficients = vec![self.k1, self.k2, self.p1, self.p2, self.k3];
        if self.is_rational() {
            coefficients.extend([self.k4, self.k5, self.k6]);
        }
        coefficients
    }

    fn is_rational(&self) -> bool {
        self.k4 != 0.0 || self.k5 != 0.0 || self.k6 != 0.0
    }

    /// Applies the distortion to normalized image coordinates.
    pub fn distort(&self, x: f64, y: f64) -> Vector2<f64> {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6);
        let xy2 = 2.0 * x * y;

        Vector2::new(
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2,
        )
    }
}

/// The color camera as seen from the depth camera: intrinsics, lens
/// distortion and the pose mapping depth-frame points into the color frame.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
    pub extrinsics: Transform,
}

impl CameraModel {
    pub fn new(intrinsics: CameraIntrinsics, distortion: Distortion, extrinsics: Transform) -> Self {
        Self {
            intrinsics,
            distortion,
            extrinsics,
        }
    }

    /// Builds the model from flat buffers as stored in a calibration file.
    ///
    /// # Arguments
    ///
    /// * `matrix` - Row-major 3x3 camera matrix.
    /// * `distortion` - Distortion coefficients, see [`Distortion::from_coefficients`].
    /// * `rotation` - Rodrigues rotation vector, 3 values.
    /// * `translation` - Translation vector, 3 values.
    pub fn from_slices(
        matrix: &[f64],
        distortion: &[f64],
        rotation: &[f64],
        translation: &[f64],
    ) -> Result<Self> {
        if matrix.len() != 9 {
            return Err(OverlayError::invalid_camera_model(format!(
                "camera matrix must have 9 entries, got {}",
                matrix.len()
            )));
        }
        let intrinsics = CameraIntrinsics::from_matrix(&Matrix3::from_row_slice(matrix))?;
        let distortion = Distortion::from_coefficients(distortion)?;
        let rotation = vector3_from_slice("rotation vector", rotation)?;
        let translation = vector3_from_slice("translation vector", translation)?;

        Ok(Self::new(
            intrinsics,
            distortion,
            Transform::from_rotation_vector(&rotation, &translation),
        ))
    }

    /// Project a 3D point from the depth frame into color image space.
    ///
    /// # Arguments
    ///
    /// * point: The 3D point, in the same unit as the calibration translation.
    ///
    /// # Returns
    ///
    /// * (x and y) coordinates, x along the columns.
    pub fn project(&self, point: &Vector3<f32>) -> Vector2<f64> {
        let camera_point = self.extrinsics.transform_point(&point.cast::<f64>());
        // Same convention as OpenCV for points on the camera plane.
        let inv_z = if camera_point[2] != 0.0 {
            1.0 / camera_point[2]
        } else {
            1.0
        };
        let distorted = self
            .distortion
            .distort(camera_point[0] * inv_z, camera_point[1] * inv_z);
        self.intrinsics.to_pixel(&distorted)
    }

    /// Projects every row of a `(N, 3)` array.
    ///
    /// # Returns
    ///
    /// * An array with shape `(N, 2)` holding (x, y) pixel coordinates in the same order.
    pub fn project_points(&self, points: &Array2<f32>) -> Result<Array2<f64>> {
        if points.ncols() != 3 {
            return Err(OverlayError::shape_mismatch(format!(
                "points must have 3 columns, got {}",
                points.ncols()
            )));
        }

        let mut projected = Array2::<f64>::zeros((points.nrows(), 2));
        for (point, mut out) in points
            .axis_iter(Axis(0))
            .zip(projected.axis_iter_mut(Axis(0)))
        {
            let pixel = self.project(&Vector3::new(point[0], point[1], point[2]));
            out[0] = pixel[0];
            out[1] = pixel[1];
        }
        Ok(projected)
    }
}

fn vector3_from_slice(name: &str, values: &[f64]) -> Result<Vector3<f64>> {
    if values.len() != 3 {
        return Err(OverlayError::invalid_camera_model(format!(
            "{name} must have 3 entries, got {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(OverlayError::invalid_camera_model(format!(
            "{name} has non-finite entries"
        )));
    }
    Ok(Vector3::from_column_slice(values))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};
    use ndarray::array;
    use rstest::rstest;

    use super::{CameraModel, Distortion};
    use crate::error::OverlayError;
    use crate::unit_test::sample_camera_model;

    const MATRIX: [f64; 9] = [500.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 0.0, 1.0];

    #[test]
    fn identity_pose_is_plain_pinhole() {
        let model = CameraModel::from_slices(&MATRIX, &[], &[0.0; 3], &[0.0; 3]).unwrap();
        let pixel = model.project(&Vector3::new(100.0, -50.0, 1000.0));
        assert_relative_eq!(pixel, Vector2::new(370.0, 220.0), epsilon = 1e-9);
    }

    #[test]
    fn translation_is_applied_before_division() {
        let model = CameraModel::from_slices(&MATRIX, &[], &[0.0; 3], &[10.0, 0.0, 0.0]).unwrap();
        let pixel = model.project(&Vector3::new(0.0, 0.0, 500.0));
        assert_relative_eq!(pixel, Vector2::new(330.0, 240.0), epsilon = 1e-9);
    }

    #[test]
    fn zero_depth_uses_unit_inverse() {
        let model = CameraModel::from_slices(&MATRIX, &[], &[0.0; 3], &[0.0; 3]).unwrap();
        let pixel = model.project(&Vector3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(pixel, Vector2::new(320.0, 240.0));
    }

    #[test]
    fn radial_and_tangential_terms() {
        let distortion = Distortion::from_coefficients(&[0.1, 0.01, 0.001, 0.002, 0.0]).unwrap();
        let (x, y) = (0.2, -0.1);
        let r2: f64 = 0.05;
        let radial = 1.0 + 0.1 * r2 + 0.01 * r2 * r2;
        let expected = Vector2::new(
            x * radial + 0.001 * 2.0 * x * y + 0.002 * (r2 + 2.0 * x * x),
            y * radial + 0.001 * (r2 + 2.0 * y * y) + 0.002 * 2.0 * x * y,
        );
        assert_relative_eq!(distortion.distort(x, y), expected, epsilon = 1e-12);
        assert_eq!(distortion.coefficients().len(), 5);
    }

    #[test]
    fn rational_coefficients_are_kept() {
        let coefficients = [0.1, 0.01, 0.0, 0.0, 0.0, 0.05, 0.0, 0.0];
        let distortion = Distortion::from_coefficients(&coefficients).unwrap();
        assert_eq!(distortion.coefficients(), coefficients.to_vec());
    }

    #[rstest]
    #[case(&[1.0; 8], &[], &[0.0; 3], &[0.0; 3])]
    #[case(&MATRIX, &[0.1, 0.2, 0.3], &[0.0; 3], &[0.0; 3])]
    #[case(&MATRIX, &[], &[0.0; 2], &[0.0; 3])]
    #[case(&MATRIX, &[], &[0.0; 3], &[0.0; 4])]
    #[case(&[500.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 1.0, 1.0], &[], &[0.0; 3], &[0.0; 3])]
    #[case(&MATRIX, &[], &[f64::NAN, 0.0, 0.0], &[0.0; 3])]
    fn malformed_calibration_is_rejected(
        #[case] matrix: &[f64],
        #[case] distortion: &[f64],
        #[case] rotation: &[f64],
        #[case] translation: &[f64],
    ) {
        let result = CameraModel::from_slices(matrix, distortion, rotation, translation);
        assert!(matches!(result, Err(OverlayError::InvalidCameraModel(_))));
    }

    #[rstest]
    fn project_points_keeps_order(sample_camera_model: CameraModel) {
        let points = array![[0.0f32, 0.0, 1000.0], [10.0, 20.0, 800.0], [0.0, 0.0, 0.0]];
        let projected = sample_camera_model.project_points(&points).unwrap();
        assert_eq!(projected.shape(), &[3, 2]);
        for (i, row) in points.outer_iter().enumerate() {
            let pixel = sample_camera_model.project(&Vector3::new(row[0], row[1], row[2]));
            assert_eq!(projected[[i, 0]], pixel[0]);
            assert_eq!(projected[[i, 1]], pixel[1]);
        }
    }

    #[rstest]
    fn project_points_rejects_wrong_width(sample_camera_model: CameraModel) {
        let result = sample_camera_model.project_points(&array![[1.0f32, 2.0]]);
        assert!(matches!(result, Err(OverlayError::ShapeMismatch(_))));
    }
}
