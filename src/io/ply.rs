use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array2, Axis};
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use ply_rs::{parser, ply};
use tracing::debug;

use crate::colorize::ColorizedPoint;
use crate::error::{OverlayError, Result};
use crate::image::DepthCalibration;
use crate::pointcloud::PointCloud;

/// How a point cloud is written.
#[derive(Clone, Debug)]
pub struct PlyOptions {
    /// Drop points carrying the invalid-sample zero vector.
    pub filter_invalid: bool,
    /// Write `binary_little_endian` instead of ASCII.
    pub binary: bool,
    /// Depth calibration stored in the header comments.
    pub calibration: Option<DepthCalibration>,
}

impl Default for PlyOptions {
    fn default() -> Self {
        Self {
            filter_invalid: true,
            binary: false,
            calibration: None,
        }
    }
}

struct Vertex {
    point: [f32; 3],
    color: [u8; 3],
}

impl ply::PropertyAccess for Vertex {
    fn new() -> Self {
        Vertex {
            point: [0f32; 3],
            color: [0u8; 3],
        }
    }
    fn set_property(&mut self, key: String, property: ply::Property) {
        match (key.as_str(), property) {
            ("x", ply::Property::Float(v)) => self.point[0] = v,
            ("y", ply::Property::Float(v)) => self.point[1] = v,
            ("z", ply::Property::Float(v)) => self.point[2] = v,
            ("red", ply::Property::UChar(v)) => self.color[0] = v,
            ("green", ply::Property::UChar(v)) => self.color[1] = v,
            ("blue", ply::Property::UChar(v)) => self.color[2] = v,
            (_, _) => (),
        }
    }
}

const CALIBRATION_KEYS: [&str; 4] = ["scale_mm", "x_offset_mm", "y_offset_mm", "z_offset_mm"];

fn calibration_comments(calibration: &DepthCalibration) -> Vec<String> {
    let values = [
        calibration.scale_mm,
        calibration.x_offset_mm,
        calibration.y_offset_mm,
        calibration.z_offset_mm,
    ];
    CALIBRATION_KEYS
        .iter()
        .zip(values)
        .map(|(key, value)| format!("{key} {value}"))
        .collect()
}

fn calibration_from_comments(comments: &[String]) -> Option<DepthCalibration> {
    let value = |key: &str| {
        comments.iter().find_map(|comment| {
            let mut tokens = comment.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some(k), Some(v)) if k == key => v.parse::<f64>().ok(),
                _ => None,
            }
        })
    };

    Some(DepthCalibration::new(
        value(CALIBRATION_KEYS[0])?,
        value(CALIBRATION_KEYS[1])?,
        value(CALIBRATION_KEYS[2])?,
        value(CALIBRATION_KEYS[3])?,
    ))
}

/// Reads a point cloud with optional colors.
///
/// # Returns
///
/// * The cloud and the depth calibration found in the header comments, if any.
pub fn read_ply<P>(filepath: P) -> Result<(PointCloud, Option<DepthCalibration>)>
where
    P: AsRef<Path>,
{
    let mut f = BufReader::new(File::open(filepath)?);

    let vertex_parser = parser::Parser::<Vertex>::new();
    let header = vertex_parser.read_header(&mut f)?;

    let mut cloud = None;
    for (_ignore_key, element) in &header.elements {
        match element.name.as_str() {
            "vertex" => {
                let vertex_vec = vertex_parser.read_payload_for_element(&mut f, element, &header)?;

                let points = Array2::<f32>::from_shape_fn((vertex_vec.len(), 3), |(i, c)| {
                    vertex_vec[i].point[c]
                });

                let colors = ["red", "green", "blue"]
                    .iter()
                    .all(|k| element.properties.contains_key(*k))
                    .then(|| {
                        Array2::<u8>::from_shape_fn((vertex_vec.len(), 3), |(i, c)| {
                            vertex_vec[i].color[c]
                        })
                    });

                cloud = Some(PointCloud::new(points, colors));
            }
            name => {
                return Err(OverlayError::Parser(format!(
                    "unexpected ply element {name}"
                )))
            }
        }
    }

    let cloud = cloud.ok_or_else(|| OverlayError::Parser("ply has no vertex element".into()))?;
    Ok((cloud, calibration_from_comments(&header.comments)))
}

/// Writes the point cloud, with colors when it has them.
pub fn write_ply<P>(filepath: P, pcl: &PointCloud, options: &PlyOptions) -> Result<()>
where
    P: AsRef<Path>,
{
    let mut ply = {
        let mut ply = Ply::<DefaultElement>::new();
        let mut vertex_element = ElementDef::new("vertex".to_string());
        ["x", "y", "z"].iter().for_each(|key| {
            vertex_element.properties.add(PropertyDef::new(
                key.to_string(),
                PropertyType::Scalar(ScalarType::Float),
            ));
        });

        let mut vertex_array: Vec<DefaultElement> = pcl
            .points
            .axis_iter(Axis(0))
            .map(|point| {
                let mut elem = DefaultElement::new();
                elem.insert("x".to_string(), Property::Float(point[0]));
                elem.insert("y".to_string(), Property::Float(point[1]));
                elem.insert("z".to_string(), Property::Float(point[2]));
                elem
            })
            .collect();

        if let Some(colors) = &pcl.colors {
            if colors.nrows() != pcl.len() {
                return Err(OverlayError::shape_mismatch(format!(
                    "point cloud has {} points but {} colors",
                    pcl.len(),
                    colors.nrows()
                )));
            }

            ["red", "green", "blue"].iter().for_each(|key| {
                vertex_element.properties.add(PropertyDef::new(
                    key.to_string(),
                    PropertyType::Scalar(ScalarType::UChar),
                ));
            });

            colors
                .axis_iter(Axis(0))
                .zip(vertex_array.iter_mut())
                .for_each(|(color, elem)| {
                    elem.insert("red".to_string(), Property::UChar(color[0]));
                    elem.insert("green".to_string(), Property::UChar(color[1]));
                    elem.insert("blue".to_string(), Property::UChar(color[2]));
                });
        }

        ply.header.elements.add(vertex_element);
        ply.payload.insert("vertex".to_string(), vertex_array);

        ply.header.comments.push("generated by overlay3d".to_string());
        if let Some(calibration) = &options.calibration {
            ply.header
                .comments
                .extend(calibration_comments(calibration));
        }

        ply.make_consistent()
            .map_err(|err| OverlayError::Parser(format!("{err:?}")))?;
        ply
    };

    ply.header.encoding = if options.binary {
        Encoding::BinaryLittleEndian
    } else {
        Encoding::Ascii
    };

    let mut buf = BufWriter::new(File::create(filepath)?);
    let written = Writer::new().write_ply(&mut buf, &mut ply)?;
    debug!(points = pcl.len(), bytes = written, "Wrote ply");

    Ok(())
}

/// Writes colorized points, applying the invalid-point filter from `options`.
pub fn write_colorized_ply<P>(
    filepath: P,
    colorized: &[ColorizedPoint],
    options: &PlyOptions,
) -> Result<usize>
where
    P: AsRef<Path>,
{
    let pcl = PointCloud::from_colorized(colorized, options.filter_invalid);
    write_ply(filepath, &pcl, options)?;
    Ok(pcl.len())
}
