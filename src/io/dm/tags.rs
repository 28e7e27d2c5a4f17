use std::io::{self, prelude::*, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::warn;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::dataset::array::ElementType;
use crate::meta::{LazyBlob, TagGroup, TagNode, TagValue};

/// Entry marker: the entry is itself a subgroup
const GROUP_MARKER: u8 = 20;
/// Entry marker: the entry is a leaf data tag
const DATA_MARKER: u8 = 21;
/// Entry marker: stop reading this group early
const END_MARKER: u8 = 0;

/// The four-byte delimiter preceding every tag definition. A mismatch means
/// the cursor has desynchronized from the stream and nothing after it can
/// be trusted.
const TAG_DELIMITER: &[u8; 4] = b"%%%%";

/// Nesting deeper than this is treated as a corrupt file rather than
/// recursed into
const MAX_GROUP_DEPTH: usize = 64;

/// Upper bound on tag definition entries; real files use a handful
const MAX_DEFINITION_LEN: u64 = 4096;

/// Arrays of unsigned 16-bit values shorter than this are the format's way
/// of embedding text and decode as UTF-16LE strings; longer ones are bulk
/// data and are skipped
const STRING_PROMOTION_LIMIT: u64 = 256;

#[derive(Debug, Error)]
pub enum DMError {
    #[error("Unsupported DigitalMicrograph version {0}, expected 3 or 4")]
    UnsupportedVersion(u32),
    #[error("Unsupported byte order flag {0}, only little-endian tag data is supported")]
    UnsupportedByteOrder(u32),
    #[error("Tag delimiter mismatch at offset {offset}: found {found:?}")]
    DelimiterMismatch { offset: u64, found: [u8; 4] },
    #[error("Invalid tag entry marker {marker} at offset {offset}")]
    InvalidEntryMarker { marker: u8, offset: u64 },
    #[error("Tag group nesting exceeded {0} levels")]
    RecursionLimit(usize),
    #[error("Tag definition of {0} entries is implausibly large")]
    OversizedDefinition(u64),
    #[error("Required tag `{0}` is missing")]
    MissingTag(String),
    #[error("Unsupported pixel data type code {0}")]
    UnsupportedPixelType(u64),
    #[error("Pixel payload of {actual} bytes does not match the {expected} bytes implied by the dimension tags")]
    DataSizeMismatch { expected: u64, actual: u64 },
    #[error("Encountered an IO error: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
}

/// The tag data type codes the format defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(i64)]
pub enum TagTypeCode {
    Short = 2,
    Long = 3,
    UShort = 4,
    ULong = 5,
    Float = 6,
    Double = 7,
    Boolean = 8,
    Char = 9,
    Octet = 10,
    LongLong = 11,
    ULongLong = 12,
    Struct = 15,
    String = 18,
    Array = 20,
}

impl TagTypeCode {
    /// The encoded width of one value of this type, for the fixed-width
    /// scalar codes
    pub const fn scalar_size(&self) -> Option<u32> {
        match self {
            Self::Boolean | Self::Char | Self::Octet => Some(1),
            Self::Short | Self::UShort => Some(2),
            Self::Long | Self::ULong | Self::Float => Some(4),
            Self::Double | Self::LongLong | Self::ULongLong => Some(8),
            Self::Struct | Self::String | Self::Array => None,
        }
    }

    const fn element_type(&self) -> ElementType {
        match self {
            Self::Short => ElementType::I16,
            Self::Long => ElementType::I32,
            Self::UShort => ElementType::U16,
            Self::ULong => ElementType::U32,
            Self::Float => ElementType::F32,
            Self::Double => ElementType::F64,
            Self::Boolean => ElementType::Boolean,
            Self::Char | Self::Octet => ElementType::I8,
            Self::LongLong => ElementType::I64,
            Self::ULongLong => ElementType::U64,
            Self::Struct | Self::String | Self::Array => ElementType::Unknown,
        }
    }
}

/// The fixed file preamble: format version, declared root byte size, and
/// the byte order flag.
///
/// Version 3 stores the size as a 32-bit integer, version 4 as 64-bit, so
/// the full header spans 12 or 16 bytes. All three fields are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DMHeader {
    pub version: u32,
    pub declared_byte_size: u64,
}

impl DMHeader {
    pub fn read<R: Read + Seek>(source: &mut R) -> Result<Self, DMError> {
        let version = source.read_u32::<BigEndian>()?;
        if version != 3 && version != 4 {
            return Err(DMError::UnsupportedVersion(version));
        }
        let declared_byte_size = if version == 3 {
            source.read_u32::<BigEndian>()? as u64
        } else {
            source.read_u64::<BigEndian>()?
        };
        let byte_order = source.read_u32::<BigEndian>()?;
        // The general format allows either order here, but everything these
        // instruments write is little-endian tag data and the decoder only
        // supports that
        if byte_order != 1 {
            return Err(DMError::UnsupportedByteOrder(byte_order));
        }
        Ok(Self {
            version,
            declared_byte_size,
        })
    }

    /// Total preamble size in bytes: 12 for version 3, 16 for version 4
    pub const fn len(&self) -> u64 {
        if self.version == 3 {
            12
        } else {
            16
        }
    }
}

/// Check whether the stream starts with a DM3/DM4 version prefix. Restores
/// the stream position and never errors; anything unreadable is simply not
/// a match.
pub fn is_dm<R: Read + Seek>(source: &mut R) -> bool {
    let start = match source.stream_position() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let version = source.read_u32::<BigEndian>();
    let _ = source.seek(SeekFrom::Start(start));
    matches!(version, Ok(3) | Ok(4))
}

/// Recursive-descent reader over the tag stream following the file
/// preamble.
///
/// Each call builds and returns its own [`TagGroup`] bottom-up; nothing is
/// mutated through shared state, so the per-tag readers are testable in
/// isolation. Bulk array payloads are skipped and recorded as [`LazyBlob`]
/// references rather than materialized.
pub(crate) struct TagStreamReader<'a, R: Read + Seek> {
    source: &'a mut R,
    version: u32,
}

impl<'a, R: Read + Seek> TagStreamReader<'a, R> {
    pub fn new(source: &'a mut R, version: u32) -> Self {
        Self { source, version }
    }

    fn position(&mut self) -> io::Result<u64> {
        self.source.stream_position()
    }

    /// Counts are big-endian at the version's integer width, regardless of
    /// the byte order the header declared for tag data. This is a quirk of
    /// the format that has to be preserved.
    fn read_count(&mut self) -> Result<u64, DMError> {
        let v = if self.version == 3 {
            self.source.read_u32::<BigEndian>()? as u64
        } else {
            self.source.read_u64::<BigEndian>()?
        };
        Ok(v)
    }

    pub fn read_root(&mut self) -> Result<TagGroup, DMError> {
        self.read_group(0)
    }

    fn read_name(&mut self, len: usize) -> Result<String, DMError> {
        let mut raw = vec![0u8; len];
        self.source.read_exact(&mut raw)?;
        // vendor software writes these in the platform's legacy code page;
        // invalid bytes get replaced, never abort decoding
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&raw);
        Ok(decoded.into_owned())
    }

    fn read_group(&mut self, depth: usize) -> Result<TagGroup, DMError> {
        if depth > MAX_GROUP_DEPTH {
            return Err(DMError::RecursionLimit(MAX_GROUP_DEPTH));
        }
        let _is_sorted = self.source.read_u8()?;
        let _is_open = self.source.read_u8()?;
        let count = self.read_count()?;

        let mut group = TagGroup::new();
        for index in 0..count {
            let marker_offset = self.position()?;
            let marker = self.source.read_u8()?;
            if marker == END_MARKER {
                break;
            }
            if marker != GROUP_MARKER && marker != DATA_MARKER {
                return Err(DMError::InvalidEntryMarker {
                    marker,
                    offset: marker_offset,
                });
            }
            let name_len = self.source.read_u16::<BigEndian>()? as usize;
            let mut name = self.read_name(name_len)?;
            if name.is_empty() {
                // unnamed entries are legal; key them by position
                name = index.to_string();
            }
            // version 4 declares the byte extent of every entry body
            let declared = if self.version == 4 {
                self.source.read_u64::<BigEndian>()?
            } else {
                0
            };
            let body_start = self.position()?;

            let node = if marker == GROUP_MARKER {
                TagNode::Group(self.read_group(depth + 1)?)
            } else {
                TagNode::Leaf(self.read_tag_value()?)
            };

            if self.version == 4 && declared > 0 {
                let end = body_start + declared;
                let now = self.position()?;
                if now != end {
                    warn!(
                        "tag entry `{}` ended at offset {} instead of the declared {}, resynchronizing",
                        name, now, end
                    );
                    self.source.seek(SeekFrom::Start(end))?;
                }
            }
            group.insert(name, node);
        }
        Ok(group)
    }

    /// Read one leaf tag: the `%%%%` delimiter, the type definition, then
    /// the value itself.
    ///
    /// Only the delimiter check is fatal. Every other failure in type
    /// dispatch degrades to [`TagValue::Missing`] with a warning so one
    /// malformed tag cannot abort an otherwise usable file.
    pub fn read_tag_value(&mut self) -> Result<TagValue, DMError> {
        let offset = self.position()?;
        let mut delim = [0u8; 4];
        self.source.read_exact(&mut delim)?;
        if &delim != TAG_DELIMITER {
            return Err(DMError::DelimiterMismatch {
                offset,
                found: delim,
            });
        }
        let def_len = self.read_count()?;
        if def_len > MAX_DEFINITION_LEN {
            return Err(DMError::OversizedDefinition(def_len));
        }
        let mut definition = Vec::with_capacity(def_len as usize);
        for _ in 0..def_len {
            definition.push(self.source.read_i64::<BigEndian>()?);
        }
        self.decode_definition(&definition)
    }

    fn decode_definition(&mut self, definition: &[i64]) -> Result<TagValue, DMError> {
        let Some(first) = definition.first() else {
            warn!("empty tag definition, recording the value as missing");
            return Ok(TagValue::Missing);
        };
        match TagTypeCode::try_from(*first) {
            Ok(TagTypeCode::Struct) => self.read_struct(definition),
            Ok(TagTypeCode::String) => self.read_string(definition),
            Ok(TagTypeCode::Array) => self.read_array(definition),
            Ok(scalar) => self.read_scalar(scalar),
            Err(_) => {
                warn!(
                    "unknown tag type code {}, recording the value as missing",
                    first
                );
                Ok(TagValue::Missing)
            }
        }
    }

    /// Scalar payloads are little-endian, unlike the big-endian counts and
    /// type codes around them
    fn read_scalar(&mut self, kind: TagTypeCode) -> Result<TagValue, DMError> {
        let value = match kind {
            TagTypeCode::Short => TagValue::Int(self.source.read_i16::<LittleEndian>()? as i64),
            TagTypeCode::Long => TagValue::Int(self.source.read_i32::<LittleEndian>()? as i64),
            TagTypeCode::LongLong => TagValue::Int(self.source.read_i64::<LittleEndian>()?),
            TagTypeCode::Octet => TagValue::Int(self.source.read_i8()? as i64),
            TagTypeCode::UShort => TagValue::UInt(self.source.read_u16::<LittleEndian>()? as u64),
            TagTypeCode::ULong => TagValue::UInt(self.source.read_u32::<LittleEndian>()? as u64),
            TagTypeCode::ULongLong => TagValue::UInt(self.source.read_u64::<LittleEndian>()?),
            TagTypeCode::Float => TagValue::Float(self.source.read_f32::<LittleEndian>()? as f64),
            TagTypeCode::Double => TagValue::Float(self.source.read_f64::<LittleEndian>()?),
            TagTypeCode::Boolean => TagValue::Boolean(self.source.read_u8()? != 0),
            TagTypeCode::Char => {
                let raw = [self.source.read_u8()?];
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&raw);
                TagValue::String(decoded.into_owned())
            }
            TagTypeCode::Struct | TagTypeCode::String | TagTypeCode::Array => {
                unreachable!("compound codes are dispatched before read_scalar")
            }
        };
        Ok(value)
    }

    /// Struct definition layout: `[15, name_len, field_count,
    /// {field_name_len, field_type} * field_count]`. The name lengths are
    /// always zero in practice and are ignored either way.
    fn read_struct(&mut self, definition: &[i64]) -> Result<TagValue, DMError> {
        let Some(kinds) = struct_field_kinds(definition) else {
            warn!("malformed struct definition {:?}, recording the value as missing", definition);
            return Ok(TagValue::Missing);
        };
        let mut fields = Vec::with_capacity(kinds.len());
        for kind in kinds {
            fields.push(self.read_scalar(kind)?);
        }
        Ok(TagValue::Struct(fields))
    }

    /// String definition layout: `[18, byte_length]`
    fn read_string(&mut self, definition: &[i64]) -> Result<TagValue, DMError> {
        let Some(len) = definition.get(1).copied().filter(|v| *v >= 0) else {
            warn!("malformed string definition {:?}, recording the value as missing", definition);
            return Ok(TagValue::Missing);
        };
        let text = self.read_name(len as usize)?;
        Ok(TagValue::String(text))
    }

    /// Array definition layout: `[20, element_definition..., count]`, where
    /// the element definition may itself be a struct or a nested array.
    ///
    /// Short unsigned-short arrays are the format's convention for embedded
    /// text and are decoded as UTF-16LE. Everything else is recorded as a
    /// [`LazyBlob`] and the payload is seeked past, not read; the bulk
    /// pixel-data tag can run to many megabytes and must not be
    /// materialized during the tree walk.
    fn read_array(&mut self, definition: &[i64]) -> Result<TagValue, DMError> {
        if definition.len() < 3 {
            warn!("malformed array definition {:?}, recording the value as missing", definition);
            return Ok(TagValue::Missing);
        }
        let count = definition[definition.len() - 1];
        if count < 0 {
            warn!("negative array length {}, recording the value as missing", count);
            return Ok(TagValue::Missing);
        }
        let count = count as u64;
        let element = &definition[1..definition.len() - 1];

        if element == [TagTypeCode::UShort as i64] && count < STRING_PROMOTION_LIMIT {
            let mut raw = vec![0u8; (count * 2) as usize];
            self.source.read_exact(&mut raw)?;
            let (decoded, _, _) = encoding_rs::UTF_16LE.decode(&raw);
            return Ok(TagValue::String(decoded.into_owned()));
        }

        let Some((item_size, elem)) = element_layout(element) else {
            warn!(
                "array element definition {:?} is not decodable, recording the value as missing",
                element
            );
            return Ok(TagValue::Missing);
        };
        let Some(byte_len) = count.checked_mul(item_size as u64) else {
            warn!("array length overflow, recording the value as missing");
            return Ok(TagValue::Missing);
        };
        let offset = self.position()?;
        self.source.seek(SeekFrom::Current(byte_len as i64))?;
        Ok(TagValue::Blob(LazyBlob {
            offset,
            byte_len,
            elem,
            item_size,
            count,
        }))
    }
}

/// Parse a struct definition into the ordered scalar field kinds, or `None`
/// if the definition is malformed or names a non-scalar field
fn struct_field_kinds(definition: &[i64]) -> Option<Vec<TagTypeCode>> {
    if definition.len() < 3 || definition[0] != TagTypeCode::Struct as i64 {
        return None;
    }
    let field_count = usize::try_from(definition[2]).ok()?;
    if definition.len() != 3 + 2 * field_count {
        return None;
    }
    let mut kinds = Vec::with_capacity(field_count);
    for i in 0..field_count {
        let kind = TagTypeCode::try_from(definition[4 + 2 * i]).ok()?;
        kind.scalar_size()?;
        kinds.push(kind);
    }
    Some(kinds)
}

/// Compute the per-element byte size for an array element definition, plus
/// the element type when the definition names a single scalar. Struct and
/// nested-array elements size correctly but report [`ElementType::Unknown`].
fn element_layout(definition: &[i64]) -> Option<(u32, ElementType)> {
    let first = TagTypeCode::try_from(*definition.first()?).ok()?;
    match first {
        TagTypeCode::Struct => {
            let kinds = struct_field_kinds(definition)?;
            let size = kinds
                .iter()
                .map(|k| k.scalar_size().unwrap_or(0))
                .sum::<u32>();
            Some((size, ElementType::Unknown))
        }
        TagTypeCode::Array => {
            if definition.len() < 3 {
                return None;
            }
            let count = u32::try_from(definition[definition.len() - 1]).ok()?;
            let (inner, _) = element_layout(&definition[1..definition.len() - 1])?;
            Some((inner.checked_mul(count)?, ElementType::Unknown))
        }
        TagTypeCode::String => None,
        scalar => {
            if definition.len() != 1 {
                return None;
            }
            Some((scalar.scalar_size()?, scalar.element_type()))
        }
    }
}
