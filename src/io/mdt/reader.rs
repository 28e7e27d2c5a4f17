use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::NaiveDate;
use indexmap::IndexMap;
use log::{debug, warn};
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::dataset::axis::assign_axis_names;
use crate::dataset::{CalibratedAxis, DataArray, DataKind, Dataset, ElementType};
use crate::meta::{TagGroup, TagNode, TagValue};

/// The four magic bytes opening every MDT file
pub const MDT_MAGIC: [u8; 4] = [0x01, 0xB0, 0x93, 0xFF];

/// Fixed file header length
const FILE_HEADER_LEN: u64 = 33;

/// Fixed per-frame header length, included in the frame's declared size
const FRAME_HEADER_LEN: u32 = 22;

/// The three axis-scale triples at the start of a frame's variables block
const AXIS_SCALES_LEN: u16 = 30;

#[derive(Debug, Error)]
pub enum MDTError {
    #[error("Not an NT-MDT file: bad magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("Frame {index} declares {size} bytes, smaller than its own header")]
    MalformedFrame { index: usize, size: u32 },
    #[error("Encountered an IO error: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
}

/// The frame types this reader recognizes. Scanned and spectroscopy frames
/// are decoded into datasets; everything else is skipped over using the
/// frame's declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum MDTFrameType {
    Scanned = 0,
    Spectroscopy = 1,
    Text = 3,
    Mda = 106,
}

/// The vendor's axis unit enumeration, truncated to the codes these
/// instruments actually emit. Unknown codes degrade to generic units.
fn unit_name(code: i16) -> &'static str {
    match code {
        -10 => "1/cm",
        -5 => "m",
        -4 => "cm",
        -3 => "mm",
        -2 => "um",
        -1 => "nm",
        0 => "A",
        1 => "nA",
        2 => "V",
        3 => "",
        4 => "kHz",
        5 => "deg",
        6 => "%",
        7 => "C",
        8 => "V",
        9 => "s",
        10 => "ms",
        _ => "generic",
    }
}

/// One axis-scale triple from a frame's variables block
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisScale {
    offset: f32,
    step: f32,
    unit: i16,
}

impl AxisScale {
    fn read<R: Read>(source: &mut R) -> io::Result<Self> {
        let offset = source.read_f32::<LittleEndian>()?;
        let step = source.read_f32::<LittleEndian>()?;
        let unit = source.read_i16::<LittleEndian>()?;
        Ok(Self { offset, step, unit })
    }

    fn units(&self) -> &'static str {
        unit_name(self.unit)
    }

    /// Express `offset + i * step` in the dataset model's
    /// `(i - origin) * scale` form
    fn to_axis(self, len: usize) -> CalibratedAxis {
        if self.step == 0.0 {
            return CalibratedAxis::identity("", len);
        }
        let origin = -(self.offset as f64) / self.step as f64;
        CalibratedAxis::from_calibration(self.units(), self.step as f64, origin, len)
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    size: u32,
    frame_type: u16,
    version_minor: u8,
    version_major: u8,
    year: u16,
    month: u16,
    day: u16,
    hour: u16,
    minute: u16,
    second: u16,
    var_size: u16,
}

impl FrameHeader {
    fn read<R: Read>(source: &mut R) -> io::Result<Self> {
        Ok(Self {
            size: source.read_u32::<LittleEndian>()?,
            frame_type: source.read_u16::<LittleEndian>()?,
            version_minor: source.read_u8()?,
            version_major: source.read_u8()?,
            year: source.read_u16::<LittleEndian>()?,
            month: source.read_u16::<LittleEndian>()?,
            day: source.read_u16::<LittleEndian>()?,
            hour: source.read_u16::<LittleEndian>()?,
            minute: source.read_u16::<LittleEndian>()?,
            second: source.read_u16::<LittleEndian>()?,
            var_size: source.read_u16::<LittleEndian>()?,
        })
    }

    fn acquired(&self) -> Option<String> {
        let date = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?;
        let stamp = date.and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)?;
        Some(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

/// Check whether the stream starts with the MDT magic. Restores the stream
/// position and never errors.
pub fn is_mdt<R: Read + Seek>(source: &mut R) -> bool {
    let start = match source.stream_position() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let mut magic = [0u8; 4];
    let matched = source
        .read_exact(&mut magic)
        .map(|_| magic == MDT_MAGIC)
        .unwrap_or(false);
    let _ = source.seek(SeekFrom::Start(start));
    matched
}

/// Reader for NT-MDT `.mdt` files: a flat sequence of sized frames behind
/// a fixed file header, each frame carrying its own type code, acquisition
/// timestamp, variables block and payload.
#[derive(Debug)]
pub struct MDTReader<R: Read + Seek> {
    source: R,
    frame_count: usize,
    source_name: Option<String>,
}

impl MDTReader<fs::File> {
    pub fn open_path<P: Into<PathBuf>>(path: P) -> Result<Self, MDTError> {
        let path = path.into();
        let handle = fs::File::open(&path)?;
        let mut this = Self::new(handle)?;
        this.source_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(this)
    }
}

impl<R: Read + Seek> MDTReader<R> {
    /// Wrap a seekable stream, validating the fixed file header
    pub fn new(mut source: R) -> Result<Self, MDTError> {
        source.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if magic != MDT_MAGIC {
            return Err(MDTError::BadMagic(magic));
        }
        let _total_frame_bytes = source.read_u32::<LittleEndian>()?;
        source.seek(SeekFrom::Current(4))?;
        let last_frame = source.read_u16::<LittleEndian>()?;
        Ok(Self {
            source,
            frame_count: last_frame as usize + 1,
            source_name: None,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    /// Decode every frame, keyed `Frame_000`, `Frame_001`, ... by position
    /// in the file. Frames of unrecognized type are skipped with a warning
    /// and keep their index.
    pub fn read(&mut self) -> Result<IndexMap<String, Dataset>, MDTError> {
        self.source.seek(SeekFrom::Start(FILE_HEADER_LEN))?;
        let mut datasets = IndexMap::new();
        for index in 0..self.frame_count {
            let frame_start = self.source.stream_position()?;
            let header = FrameHeader::read(&mut self.source)?;
            if header.size < FRAME_HEADER_LEN {
                return Err(MDTError::MalformedFrame {
                    index,
                    size: header.size,
                });
            }
            let frame_end = frame_start + header.size as u64;

            match MDTFrameType::try_from(header.frame_type) {
                Ok(kind @ (MDTFrameType::Scanned | MDTFrameType::Spectroscopy)) => {
                    match self.read_data_frame(index, &header, kind, frame_end) {
                        Ok(dataset) => {
                            datasets.insert(format!("Frame_{:03}", index), dataset);
                        }
                        Err(problem) => {
                            warn!("skipping undecodable frame {}: {}", index, problem);
                        }
                    }
                }
                Ok(other) => {
                    debug!("frame {} has undecoded type {:?}, skipping", index, other);
                }
                Err(_) => {
                    warn!(
                        "frame {} has unknown type code {}, skipping",
                        index, header.frame_type
                    );
                }
            }
            self.source.seek(SeekFrom::Start(frame_end))?;
        }
        Ok(datasets)
    }

    /// Decode one scanned or spectroscopy frame into a dataset
    fn read_data_frame(
        &mut self,
        index: usize,
        header: &FrameHeader,
        kind: MDTFrameType,
        frame_end: u64,
    ) -> Result<Dataset, MDTError> {
        if header.var_size < AXIS_SCALES_LEN {
            return Err(MDTError::MalformedFrame {
                index,
                size: header.size,
            });
        }
        let var_start = self.source.stream_position()?;
        let x_scale = AxisScale::read(&mut self.source)?;
        let y_scale = AxisScale::read(&mut self.source)?;
        let z_scale = AxisScale::read(&mut self.source)?;
        // later format revisions append variables we do not decode
        self.source
            .seek(SeekFrom::Start(var_start + header.var_size as u64))?;

        let mode = self.source.read_u16::<LittleEndian>()?;
        let xres = self.source.read_u16::<LittleEndian>()? as usize;
        let yres = self.source.read_u16::<LittleEndian>()? as usize;
        let ndacq = self.source.read_u16::<LittleEndian>()?;

        let (shape, mut axes) = if kind == MDTFrameType::Spectroscopy && yres <= 1 {
            (vec![xres], vec![x_scale.to_axis(xres)])
        } else {
            (
                vec![yres, xres],
                vec![y_scale.to_axis(yres), x_scale.to_axis(xres)],
            )
        };

        let sample_count = shape.iter().product::<usize>();
        let byte_len = sample_count as u64 * 2;
        if self.source.stream_position()? + byte_len > frame_end {
            return Err(MDTError::MalformedFrame {
                index,
                size: header.size,
            });
        }
        let mut payload = vec![0u8; byte_len as usize];
        self.source.read_exact(&mut payload)?;

        assign_axis_names(&mut axes);
        // the Z triple calibrates the sample values, not an array dimension;
        // its unit is kept raw since the samples themselves are not rescaled
        let units = z_scale.units();
        let quantity = match units {
            "m" | "cm" | "mm" | "um" | "nm" | "A" => "height",
            _ => "signal",
        };

        let title = format!("Frame_{:03}", index);
        let metadata = frame_metadata(header, mode, ndacq, &[x_scale, y_scale, z_scale]);
        Ok(Dataset::new(
            DataArray::wrap(ElementType::I16, payload),
            shape,
            axes.clone(),
            metadata,
            title,
            quantity,
            units,
            DataKind::classify(&axes, false),
            header.frame_type as u32,
        ))
    }
}

/// Record the frame header fields and axis scales as a metadata tree in
/// the same shape the tag-tree readers produce
fn frame_metadata(
    header: &FrameHeader,
    mode: u16,
    ndacq: u16,
    scales: &[AxisScale; 3],
) -> TagGroup {
    let mut group = TagGroup::new();
    group.insert(
        "FrameType".to_string(),
        TagNode::Leaf(TagValue::UInt(header.frame_type as u64)),
    );
    group.insert(
        "Version".to_string(),
        TagNode::Leaf(TagValue::String(format!(
            "{}.{}",
            header.version_major, header.version_minor
        ))),
    );
    if let Some(stamp) = header.acquired() {
        group.insert("Acquired".to_string(), TagNode::Leaf(TagValue::String(stamp)));
    }
    group.insert("Mode".to_string(), TagNode::Leaf(TagValue::UInt(mode as u64)));
    group.insert(
        "Averaging".to_string(),
        TagNode::Leaf(TagValue::UInt(ndacq as u64)),
    );
    for (name, scale) in ["XScale", "YScale", "ZScale"].iter().zip(scales) {
        let mut triple = TagGroup::new();
        triple.insert(
            "Offset".to_string(),
            TagNode::Leaf(TagValue::Float(scale.offset as f64)),
        );
        triple.insert(
            "Step".to_string(),
            TagNode::Leaf(TagValue::Float(scale.step as f64)),
        );
        triple.insert(
            "Units".to_string(),
            TagNode::Leaf(TagValue::String(scale.units().to_string())),
        );
        group.insert(name.to_string(), TagNode::Group(triple));
    }
    group
}
