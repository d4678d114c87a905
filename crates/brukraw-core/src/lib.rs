//! Core Bruker acquisition types: parameter tables (from JCAMP-DX files),
//! pulse program records, and acquisition shape inference.

pub mod params;
pub mod pulseprog;
pub mod shape;

pub use params::{ParamValue, ParameterTable};
pub use pulseprog::{LoopCount, PulseProgram};
pub use shape::{guess_shape, AcqParams, AcquisitionShape, ShapeError};
