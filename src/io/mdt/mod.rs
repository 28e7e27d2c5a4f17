//! Reader for the NT-MDT `.mdt` container used by Solver and NTEGRA
//! scanning probe microscopes: a flat sequence of self-sized frames, each
//! holding one scanned image or spectroscopy sweep with its axis scales
//! and acquisition timestamp.

mod reader;

pub use reader::{is_mdt, MDTError, MDTFrameType, MDTReader, MDT_MAGIC};
