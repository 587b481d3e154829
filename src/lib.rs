pub mod camera;
pub mod colorize;
pub mod config;
pub mod device;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod pointcloud;
pub mod sync;
pub mod transform;


pub mod image;
pub use crate::image::{ColorFrame, DepthCalibration, DepthFrame, DepthSample};
