//! The common dataset model every reader produces: an N-dimensional array
//! with per-axis calibration and the decoded metadata tree.

pub mod array;
pub mod axis;
#[allow(clippy::module_inception)]
mod dataset;

pub use array::{ArrayRetrievalError, Bytes, DataArray, ElementType};
pub use axis::{normalize_unit, CalibratedAxis, DimensionKind, NormalizedUnit};
pub use dataset::{DataKind, Dataset};
