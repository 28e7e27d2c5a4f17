//! Format inference and reader dispatch.
//!
//! [`infer_format`] sniffs a file's leading bytes to name its format;
//! [`ReaderRegistry`] holds the set of available readers and routes a path
//! to whichever one claims it.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::warn;
use thiserror::Error;

use crate::dataset::Dataset;
use crate::io::dm::{is_dm, DMError, DMHeader, DMReader};
use crate::io::mdt::{is_mdt, MDTError, MDTReader};

/// The file formats this crate can identify from their leading bytes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MicroscopyFormat {
    DM3,
    DM4,
    NTMDT,
    #[default]
    Unknown,
}

impl Display for MicroscopyFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DM3 => write!(f, "DM3"),
            Self::DM4 => write!(f, "DM4"),
            Self::NTMDT => write!(f, "NT-MDT"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Identify the format of a seekable stream from its leading bytes,
/// restoring the stream position afterwards
pub fn infer_from_stream<R: Read + Seek>(source: &mut R) -> io::Result<MicroscopyFormat> {
    let start = source.stream_position()?;
    let format = match DMHeader::read(source) {
        Ok(header) if header.version == 3 => MicroscopyFormat::DM3,
        Ok(_) => MicroscopyFormat::DM4,
        Err(_) => {
            source.seek(SeekFrom::Start(start))?;
            if is_mdt(source) {
                MicroscopyFormat::NTMDT
            } else {
                MicroscopyFormat::Unknown
            }
        }
    };
    source.seek(SeekFrom::Start(start))?;
    Ok(format)
}

/// Identify the format of a file on disk from its leading bytes
pub fn infer_format<P: Into<PathBuf>>(path: P) -> io::Result<MicroscopyFormat> {
    let mut handle = fs::File::open(path.into())?;
    infer_from_stream(&mut handle)
}

/// Any error a format reader can surface while decoding a claimed file
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Dm(#[from] DMError),
    #[error(transparent)]
    Mdt(#[from] MDTError),
    #[error("Encountered an IO error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}

#[derive(Debug, Error)]
pub enum ReaderDispatchError {
    #[error("No registered reader recognizes {0:?}")]
    NoSuitableReader(PathBuf),
    #[error("Encountered an IO error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}

/// One file-format reader behind the registry: a cheap magic-byte probe
/// and a full decode into named datasets.
///
/// `probe` must never error; a file the reader cannot open is simply not
/// claimed.
pub trait FormatReader {
    /// A short stable identifier for log messages and tie-break reporting
    fn name(&self) -> &'static str;

    /// Whether this reader claims the file, judged from its leading bytes
    fn probe(&self, path: &Path) -> bool;

    /// Decode the file into datasets keyed by channel or frame
    fn read(&self, path: &Path) -> Result<IndexMap<String, Dataset>, ReaderError>;
}

/// Reader adapter for Gatan DM3/DM4 files. A DM file holds one image, so
/// the result carries a single `Channel_000` entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DMFormatReader;

impl FormatReader for DMFormatReader {
    fn name(&self) -> &'static str {
        "gatan"
    }

    fn probe(&self, path: &Path) -> bool {
        fs::File::open(path)
            .map(|mut handle| is_dm(&mut handle))
            .unwrap_or(false)
    }

    fn read(&self, path: &Path) -> Result<IndexMap<String, Dataset>, ReaderError> {
        let dataset = DMReader::open_path(path)?.read()?;
        let mut datasets = IndexMap::new();
        datasets.insert("Channel_000".to_string(), dataset);
        Ok(datasets)
    }
}

/// Reader adapter for NT-MDT files
#[derive(Debug, Default, Clone, Copy)]
pub struct MDTFormatReader;

impl FormatReader for MDTFormatReader {
    fn name(&self) -> &'static str {
        "ntmdt"
    }

    fn probe(&self, path: &Path) -> bool {
        fs::File::open(path)
            .map(|mut handle| is_mdt(&mut handle))
            .unwrap_or(false)
    }

    fn read(&self, path: &Path) -> Result<IndexMap<String, Dataset>, ReaderError> {
        Ok(MDTReader::open_path(path)?.read()?)
    }
}

/// The set of registered format readers.
///
/// Dispatch probes every reader and, when more than one claims a file, the
/// most recently registered claimant wins, so callers can override the
/// built-in readers by registering their own afterwards.
pub struct ReaderRegistry {
    readers: Vec<Box<dyn FormatReader>>,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DMFormatReader);
        registry.register(MDTFormatReader);
        registry
    }
}

impl ReaderRegistry {
    /// A registry with no readers
    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    pub fn register<T: FormatReader + 'static>(&mut self, reader: T) {
        self.readers.push(Box::new(reader));
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Probe every registered reader and pick the one to decode this file
    pub fn probe(&self, path: &Path) -> Option<&dyn FormatReader> {
        let claimants: Vec<&dyn FormatReader> = self
            .readers
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| r.probe(path))
            .collect();
        if claimants.len() > 1 {
            let names: Vec<_> = claimants.iter().map(|r| r.name()).collect();
            warn!(
                "{:?} is claimed by multiple readers {:?}, using the most recently registered",
                path, names
            );
        }
        claimants.last().copied()
    }

    /// Decode a file with whichever reader claims it.
    ///
    /// Returns `Err` when no reader claims the file at all, and `Ok(None)`
    /// when a reader claimed it but failed to decode it, so a caller
    /// sweeping a directory can keep going past one corrupt file.
    pub fn read<P: Into<PathBuf>>(
        &self,
        path: P,
    ) -> Result<Option<IndexMap<String, Dataset>>, ReaderDispatchError> {
        let path = path.into();
        let reader = self
            .probe(&path)
            .ok_or_else(|| ReaderDispatchError::NoSuitableReader(path.clone()))?;
        match reader.read(&path) {
            Ok(datasets) => Ok(Some(datasets)),
            Err(problem) => {
                warn!(
                    "reader {} failed to decode {:?}: {}",
                    reader.name(),
                    path,
                    problem
                );
                Ok(None)
            }
        }
    }
}

/// Read a file with the built-in readers. See [`ReaderRegistry::read`] for
/// the error contract.
pub fn read_file<P: Into<PathBuf>>(
    path: P,
) -> Result<Option<IndexMap<String, Dataset>>, ReaderDispatchError> {
    ReaderRegistry::default().read(path)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::dm::test_stream::DMStreamBuilder;
    use crate::io::mdt::MDT_MAGIC;
    use std::io::Cursor;

    fn temp_file_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut handle = tempfile::NamedTempFile::new().unwrap();
        handle.write_all(bytes).unwrap();
        handle.flush().unwrap();
        handle
    }

    #[test]
    fn test_infer_from_stream() {
        let mut b3 = DMStreamBuilder::new(3);
        b3.begin_group(0);
        let mut stream = Cursor::new(b3.finish());
        assert_eq!(
            infer_from_stream(&mut stream).unwrap(),
            MicroscopyFormat::DM3
        );
        assert_eq!(stream.position(), 0);

        let mut b4 = DMStreamBuilder::new(4);
        b4.begin_group(0);
        assert_eq!(
            infer_from_stream(&mut Cursor::new(b4.finish())).unwrap(),
            MicroscopyFormat::DM4
        );

        let mut mdt = MDT_MAGIC.to_vec();
        mdt.extend_from_slice(&[0u8; 29]);
        assert_eq!(
            infer_from_stream(&mut Cursor::new(mdt)).unwrap(),
            MicroscopyFormat::NTMDT
        );

        assert_eq!(
            infer_from_stream(&mut Cursor::new(vec![0u8; 64])).unwrap(),
            MicroscopyFormat::Unknown
        );
        assert_eq!(
            infer_from_stream(&mut Cursor::new(Vec::new())).unwrap(),
            MicroscopyFormat::Unknown
        );
    }

    #[test]
    fn test_infer_format_from_disk() {
        let mut b = DMStreamBuilder::new(4);
        b.begin_group(0);
        let dm = temp_file_with(&b.finish());
        assert_eq!(infer_format(dm.path()).unwrap(), MicroscopyFormat::DM4);

        let mdt = temp_file_with(&MDT_MAGIC);
        assert_eq!(infer_format(mdt.path()).unwrap(), MicroscopyFormat::NTMDT);
    }

    #[test]
    fn test_default_registry_probes_by_magic() {
        let registry = ReaderRegistry::default();
        assert_eq!(registry.len(), 2);

        let mut b = DMStreamBuilder::new(3);
        b.begin_group(0);
        let dm = temp_file_with(&b.finish());
        assert_eq!(registry.probe(dm.path()).unwrap().name(), "gatan");

        let mdt = temp_file_with(&MDT_MAGIC);
        assert_eq!(registry.probe(mdt.path()).unwrap().name(), "ntmdt");

        let garbage = temp_file_with(&[0u8; 32]);
        assert!(registry.probe(garbage.path()).is_none());
    }

    #[test]
    fn test_unclaimed_file_is_an_error() {
        let garbage = temp_file_with(&[0u8; 32]);
        let err = ReaderRegistry::default().read(garbage.path()).unwrap_err();
        assert!(matches!(err, ReaderDispatchError::NoSuitableReader(_)));
    }

    struct ClaimEverything(&'static str);

    impl FormatReader for ClaimEverything {
        fn name(&self) -> &'static str {
            self.0
        }

        fn probe(&self, _path: &Path) -> bool {
            true
        }

        fn read(&self, _path: &Path) -> Result<IndexMap<String, Dataset>, ReaderError> {
            let mut datasets = IndexMap::new();
            datasets.insert(self.0.to_string(), Dataset::default());
            Ok(datasets)
        }
    }

    #[test]
    fn test_last_registered_claimant_wins() {
        let mut registry = ReaderRegistry::empty();
        registry.register(ClaimEverything("first"));
        registry.register(ClaimEverything("second"));
        let garbage = temp_file_with(&[0u8; 8]);
        assert_eq!(registry.probe(garbage.path()).unwrap().name(), "second");
        // the winning claimant's read output is what comes back
        let datasets = registry.read(garbage.path()).unwrap().unwrap();
        assert!(datasets.contains_key("second"));
        assert!(!datasets.contains_key("first"));
    }

    struct AlwaysFails;

    impl FormatReader for AlwaysFails {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn probe(&self, _path: &Path) -> bool {
            true
        }

        fn read(&self, _path: &Path) -> Result<IndexMap<String, Dataset>, ReaderError> {
            Err(ReaderError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated",
            )))
        }
    }

    #[test_log::test]
    fn test_decode_failure_is_not_fatal() {
        let mut registry = ReaderRegistry::empty();
        registry.register(AlwaysFails);
        let garbage = temp_file_with(&[0u8; 8]);
        // the file was claimed, so a decode failure degrades to None
        assert!(registry.read(garbage.path()).unwrap().is_none());
    }

    #[test_log::test]
    fn test_read_file_end_to_end() {
        // a structurally valid DM3 with an empty root decodes no image, so
        // the claimed-but-undecodable path yields None rather than an error
        let mut b = DMStreamBuilder::new(3);
        b.begin_group(0);
        let dm = temp_file_with(&b.finish());
        assert!(read_file(dm.path()).unwrap().is_none());
    }
}
