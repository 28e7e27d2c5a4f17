//! Reader for the Gatan DigitalMicrograph DM3/DM4 container: a recursive,
//! self-describing binary tag tree holding the pixel payload, its
//! dimensions and per-axis calibrations, and the instrument metadata.
//!
//! The grammar is shared between both versions; version 3 uses 32-bit
//! counts and a 32-bit root size, version 4 widens them to 64 bits and adds
//! a declared byte extent to every tag entry.

mod reader;
mod tags;

#[cfg(test)]
pub(crate) mod test_stream;

pub use reader::DMReader;
pub use tags::{is_dm, DMError, DMHeader, TagTypeCode};
