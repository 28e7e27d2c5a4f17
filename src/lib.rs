//! `emdata` reads electron microscopy and scanning probe instrument data
//! files into a common model: an N-dimensional array with one calibrated
//! axis per dimension and the full instrument metadata tree alongside.
//!
//! Two families of formats are supported, Gatan DigitalMicrograph DM3/DM4
//! (see [`io::dm`]) and NT-MDT `.mdt` (see [`io::mdt`]). The usual entry
//! point is [`io::read_file`], which infers the format from the file's
//! leading bytes and routes to the right reader:
//!
//! ```no_run
//! use emdata::io::read_file;
//!
//! # fn main() -> Result<(), emdata::io::ReaderDispatchError> {
//! let datasets = read_file("haadf_survey.dm4")?.expect("file should decode");
//! for (name, dataset) in datasets.iter() {
//!     println!("{}: {} {:?} in {}", name, dataset.kind(), dataset.shape(), dataset.units());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The readers themselves are generic over any `Read + Seek` source, so
//! in-memory buffers work the same way as files:
//!
//! ```no_run
//! use std::fs;
//! use emdata::io::DMReader;
//!
//! # fn main() -> Result<(), emdata::io::DMError> {
//! let mut reader = DMReader::new(fs::File::open("eels_si.dm3")?)?;
//! let dataset = reader.read()?;
//! let energies = dataset.axis(dataset.rank() - 1).unwrap().coordinates();
//! # Ok(())
//! # }
//! ```

pub mod dataset;
pub mod io;
pub mod meta;

pub use crate::dataset::{
    ArrayRetrievalError, CalibratedAxis, DataArray, DataKind, Dataset, DimensionKind, ElementType,
};
pub use crate::io::{infer_format, read_file, FormatReader, MicroscopyFormat, ReaderRegistry};
pub use crate::meta::{TagGroup, TagNode, TagValue};
