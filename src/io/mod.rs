mod calibration;
pub use calibration::{read_calibration, write_calibration};

mod ply;
pub use ply::{read_ply, write_colorized_ply, write_ply, PlyOptions};
