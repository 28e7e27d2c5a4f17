//! Readers for the supported instrument file formats, plus the format
//! inference and dispatch machinery that routes a path to the right one.

pub mod dispatch;
pub mod dm;
pub mod mdt;

pub use crate::io::dispatch::{
    infer_format, infer_from_stream, read_file, DMFormatReader, FormatReader, MDTFormatReader,
    MicroscopyFormat, ReaderDispatchError, ReaderError, ReaderRegistry,
};
pub use crate::io::dm::{is_dm, DMError, DMReader};
pub use crate::io::mdt::{is_mdt, MDTError, MDTReader};
