use ndarray::prelude::*;

use crate::colorize::ColorizedPoint;

/// Points with optional per-point RGB colors, the shape the writers consume.
#[derive(Clone, Debug, PartialEq)]
pub struct PointCloud {
    /// The 3D points. Shape is (Nx3).
    pub points: Array2<f32>,
    /// The RGB colors. Shape is (Nx3).
    pub colors: Option<Array2<u8>>,
}

impl PointCloud {
    pub fn new(points: Array2<f32>, colors: Option<Array2<u8>>) -> Self {
        Self { points, colors }
    }

    /// Packs colorized points into parallel position and color buffers.
    ///
    /// # Arguments
    ///
    /// * `colorized` - Points in depth grid order.
    /// * `filter_invalid` - Drops the points whose position is the
    ///   invalid-sample zero vector. Otherwise every entry is kept.
    pub fn from_colorized(colorized: &[ColorizedPoint], filter_invalid: bool) -> Self {
        let kept: Vec<&ColorizedPoint> = colorized
            .iter()
            .filter(|point| !filter_invalid || point.is_valid())
            .collect();

        let points = Array2::from_shape_fn((kept.len(), 3), |(i, c)| kept[i].position[c]);
        let colors = Array2::from_shape_fn((kept.len(), 3), |(i, c)| kept[i].color[c]);

        Self {
            points,
            colors: Some(colors),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::PointCloud;
    use crate::colorize::ColorizedPoint;

    fn colorized() -> Vec<ColorizedPoint> {
        vec![
            ColorizedPoint {
                position: Vector3::new(1.0, 2.0, 3.0),
                color: [10, 20, 30],
                in_frame: true,
            },
            ColorizedPoint {
                position: Vector3::zeros(),
                color: [40, 50, 60],
                in_frame: true,
            },
            ColorizedPoint {
                position: Vector3::new(4.0, 5.0, 6.0),
                color: [0, 0, 0],
                in_frame: false,
            },
        ]
    }

    #[test]
    fn keeps_every_point_without_filter() {
        let pcl = PointCloud::from_colorized(&colorized(), false);
        assert_eq!(pcl.len(), 3);
        assert_eq!(pcl.colors.as_ref().unwrap().row(1).to_vec(), vec![40, 50, 60]);
    }

    #[test]
    fn filter_drops_only_zero_positions() {
        let pcl = PointCloud::from_colorized(&colorized(), true);
        assert_eq!(pcl.len(), 2);
        assert_eq!(pcl.points.row(1).to_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(pcl.colors.unwrap().row(0).to_vec(), vec![10, 20, 30]);
    }

    #[test]
    fn empty_cloud() {
        let pcl = PointCloud::from_colorized(&[], true);
        assert!(pcl.is_empty());
        assert!(pcl.colors.unwrap().is_empty());
    }
}
