mod rgb;
pub use rgb::{ColorFrame, IntoArray3, IntoImageRgb8};

mod depth;
pub use depth::{DepthCalibration, DepthFrame, DepthSample, ABCY16_CHANNELS, INVALID_SAMPLE};
