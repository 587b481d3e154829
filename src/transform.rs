use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

/// Rigid transform taking points from the depth camera frame into the
/// color camera frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform(Isometry3<f64>);

impl Transform {
    /// Creates the transform from a Rodrigues rotation vector and a translation,
    /// the representation produced by `solvePnP`.
    pub fn from_rotation_vector(rotation: &Vector3<f64>, translation: &Vector3<f64>) -> Self {
        Self(Isometry3::from_parts(
            Translation3::new(translation[0], translation[1], translation[2]),
            UnitQuaternion::from_scaled_axis(*rotation),
        ))
    }

    /// The rotation as an axis scaled by its angle in radians.
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.0.rotation.scaled_axis()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.0.translation.vector
    }

    /// Rotates then translates a point. Isometries only translate
    /// `Point3`, so the input is wrapped as one.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.0.transform_point(&Point3::from(*point)).coords
    }
}

#[cfg(test)]
mod tests {
    use super::Transform;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_transform_point() {
        let transform = Transform::from_rotation_vector(&Vector3::zeros(), &Vector3::zeros());
        let point = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(transform.transform_point(&point), point);

        let transform = Transform::from_rotation_vector(
            &(Vector3::y() * std::f64::consts::PI),
            &Vector3::new(0., 0., 3.),
        );
        assert_relative_eq!(
            transform.transform_point(&point),
            Vector3::new(-1.0, 2.0, 0.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn translation_is_added_after_rotation() {
        let transform = Transform::from_rotation_vector(
            &(Vector3::z() * std::f64::consts::FRAC_PI_2),
            &Vector3::new(5.0, 0.0, 0.0),
        );
        assert_relative_eq!(
            transform.transform_point(&Vector3::new(1.0, 0.0, 10.0)),
            Vector3::new(5.0, 1.0, 10.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn rotation_vector_round_trips() {
        let rvec = Vector3::new(0.1, -0.2, 0.05);
        let tvec = Vector3::new(-60.0, 5.0, 12.5);
        let transform = Transform::from_rotation_vector(&rvec, &tvec);

        assert_relative_eq!(transform.rotation_vector(), rvec, epsilon = 1e-12);
        assert_relative_eq!(transform.translation(), tvec);
        assert_relative_eq!(transform.transform_point(&Vector3::zeros()), tvec, epsilon = 1e-12);
    }
}
