use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::camera::CameraModel;
use crate::error::{OverlayError, Result};

const OPENCV_MATRIX: &str = "opencv-matrix";

/// A matrix node as written by OpenCV's `FileStorage` in JSON mode.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct OpenCvMatrix {
    type_id: String,
    rows: usize,
    cols: usize,
    dt: String,
    data: Vec<f64>,
}

impl OpenCvMatrix {
    fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        Self {
            type_id: OPENCV_MATRIX.to_string(),
            rows,
            cols,
            dt: "d".to_string(),
            data,
        }
    }

    fn values(&self, name: &str) -> Result<&[f64]> {
        if self.type_id != OPENCV_MATRIX {
            return Err(OverlayError::invalid_camera_model(format!(
                "{name} has type {}, expected {OPENCV_MATRIX}",
                self.type_id
            )));
        }
        if self.rows.checked_mul(self.cols) != Some(self.data.len()) {
            return Err(OverlayError::invalid_camera_model(format!(
                "{name} is declared {}x{} but holds {} values",
                self.rows,
                self.cols,
                self.data.len()
            )));
        }
        Ok(&self.data)
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Document {
    camera_matrix: OpenCvMatrix,
    dist_coeffs: OpenCvMatrix,
    rotation_vector: OpenCvMatrix,
    translation_vector: OpenCvMatrix,
}

/// Reads the color camera calibration produced by the orientation step.
///
/// The file holds `cameraMatrix`, `distCoeffs`, `rotationVector` and
/// `translationVector` nodes in OpenCV's JSON `FileStorage` layout.
pub fn read_calibration<P: AsRef<Path>>(filepath: P) -> Result<CameraModel> {
    let reader = BufReader::new(File::open(filepath)?);
    let doc: Document = serde_json::from_reader(reader)?;

    CameraModel::from_slices(
        doc.camera_matrix.values("cameraMatrix")?,
        doc.dist_coeffs.values("distCoeffs")?,
        doc.rotation_vector.values("rotationVector")?,
        doc.translation_vector.values("translationVector")?,
    )
}

/// Writes the model in the layout [`read_calibration`] reads.
pub fn write_calibration<P: AsRef<Path>>(filepath: P, model: &CameraModel) -> Result<()> {
    let matrix = model.intrinsics.matrix();
    let distortion = model.distortion.coefficients();
    let rotation = model.extrinsics.rotation_vector();
    let translation = model.extrinsics.translation();

    let doc = Document {
        camera_matrix: OpenCvMatrix::new(
            3,
            3,
            (0..3)
                .flat_map(|r| (0..3).map(move |c| (r, c)))
                .map(|(r, c)| matrix[(r, c)])
                .collect(),
        ),
        dist_coeffs: OpenCvMatrix::new(1, distortion.len(), distortion),
        rotation_vector: OpenCvMatrix::new(3, 1, rotation.iter().copied().collect()),
        translation_vector: OpenCvMatrix::new(3, 1, translation.iter().copied().collect()),
    };

    let writer = BufWriter::new(File::create(filepath)?);
    serde_json::to_writer_pretty(writer, &doc)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_relative_eq;
    use rstest::rstest;

    use super::{read_calibration, write_calibration};
    use crate::camera::CameraModel;
    use crate::error::OverlayError;
    use crate::unit_test::sample_camera_model;

    fn write_text(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_opencv_json() {
        let file = write_text(
            r#"{
                "cameraMatrix": {"type_id": "opencv-matrix", "rows": 3, "cols": 3, "dt": "d",
                    "data": [1000.0, 0.0, 1024.0, 0.0, 1001.0, 768.0, 0.0, 0.0, 1.0]},
                "distCoeffs": {"type_id": "opencv-matrix", "rows": 1, "cols": 5, "dt": "d",
                    "data": [-0.1, 0.05, 0.001, -0.002, 0.0]},
                "rotationVector": {"type_id": "opencv-matrix", "rows": 3, "cols": 1, "dt": "d",
                    "data": [0.01, -0.02, 0.003]},
                "translationVector": {"type_id": "opencv-matrix", "rows": 3, "cols": 1, "dt": "d",
                    "data": [-60.0, 2.0, -5.0]}
            }"#,
        );

        let model = read_calibration(file.path()).unwrap();
        assert_eq!(model.intrinsics.fx, 1000.0);
        assert_eq!(model.intrinsics.fy, 1001.0);
        assert_eq!(model.intrinsics.cx, 1024.0);
        assert_eq!(model.intrinsics.cy, 768.0);
        assert_eq!(model.distortion.k1, -0.1);
        assert_eq!(model.distortion.p2, -0.002);
        assert_relative_eq!(model.extrinsics.translation()[0], -60.0);
    }

    #[test]
    fn declared_shape_must_match_data() {
        let file = write_text(
            r#"{
                "cameraMatrix": {"type_id": "opencv-matrix", "rows": 3, "cols": 3, "dt": "d",
                    "data": [1000.0, 0.0, 1024.0, 0.0, 1001.0, 768.0]},
                "distCoeffs": {"type_id": "opencv-matrix", "rows": 1, "cols": 0, "dt": "d", "data": []},
                "rotationVector": {"type_id": "opencv-matrix", "rows": 3, "cols": 1, "dt": "d",
                    "data": [0.0, 0.0, 0.0]},
                "translationVector": {"type_id": "opencv-matrix", "rows": 3, "cols": 1, "dt": "d",
                    "data": [0.0, 0.0, 0.0]}
            }"#,
        );
        let result = read_calibration(file.path());
        assert!(matches!(result, Err(OverlayError::InvalidCameraModel(_))));
    }

    #[test]
    fn oversized_declared_shape_is_rejected() {
        let file = write_text(
            r#"{
                "cameraMatrix": {"type_id": "opencv-matrix", "rows": 4294967296, "cols": 4294967296,
                    "dt": "d", "data": [1000.0, 0.0, 1024.0, 0.0, 1001.0, 768.0, 0.0, 0.0, 1.0]},
                "distCoeffs": {"type_id": "opencv-matrix", "rows": 1, "cols": 0, "dt": "d", "data": []},
                "rotationVector": {"type_id": "opencv-matrix", "rows": 3, "cols": 1, "dt": "d",
                    "data": [0.0, 0.0, 0.0]},
                "translationVector": {"type_id": "opencv-matrix", "rows": 3, "cols": 1, "dt": "d",
                    "data": [0.0, 0.0, 0.0]}
            }"#,
        );
        let result = read_calibration(file.path());
        assert!(matches!(result, Err(OverlayError::InvalidCameraModel(_))));
    }

    #[test]
    fn broken_json_is_parser_error() {
        let file = write_text("{\"cameraMatrix\": ");
        let result = read_calibration(file.path());
        assert!(matches!(result, Err(OverlayError::Parser(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = read_calibration("no/such/orientation.json");
        assert!(matches!(result, Err(OverlayError::Io(_))));
    }

    #[rstest]
    fn written_calibration_reads_back(sample_camera_model: CameraModel) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orientation.json");
        write_calibration(&path, &sample_camera_model).unwrap();

        let model = read_calibration(&path).unwrap();
        assert_eq!(model.intrinsics, sample_camera_model.intrinsics);
        assert_eq!(model.distortion, sample_camera_model.distortion);
        assert_relative_eq!(
            model.extrinsics.rotation_vector(),
            sample_camera_model.extrinsics.rotation_vector(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            model.extrinsics.translation(),
            sample_camera_model.extrinsics.translation(),
            epsilon = 1e-12
        );
    }
}
