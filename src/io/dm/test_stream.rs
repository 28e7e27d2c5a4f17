//! Synthetic DM3/DM4 byte-stream construction for tests. Builds the same
//! grammar the decoder consumes: big-endian counts and type codes,
//! little-endian payloads.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use super::tags::TagTypeCode;

pub(crate) struct DMStreamBuilder {
    pub version: u32,
    pub buf: Vec<u8>,
}

impl DMStreamBuilder {
    /// Start a stream with the fixed file preamble (declared size zero,
    /// little-endian order flag)
    pub fn new(version: u32) -> Self {
        let mut b = Self::bare(version);
        b.buf.write_u32::<BigEndian>(version).unwrap();
        if version == 3 {
            b.buf.write_u32::<BigEndian>(0).unwrap();
        } else {
            b.buf.write_u64::<BigEndian>(0).unwrap();
        }
        b.buf.write_u32::<BigEndian>(1).unwrap();
        b
    }

    /// Start with no preamble, for feeding `read_group` directly
    pub fn bare(version: u32) -> Self {
        Self {
            version,
            buf: Vec::new(),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_count_into(&self, buf: &mut Vec<u8>, value: u64) {
        if self.version == 3 {
            buf.write_u32::<BigEndian>(value as u32).unwrap();
        } else {
            buf.write_u64::<BigEndian>(value).unwrap();
        }
    }

    fn put_count(&mut self, value: u64) {
        let version = self.version;
        if version == 3 {
            self.buf.write_u32::<BigEndian>(value as u32).unwrap();
        } else {
            self.buf.write_u64::<BigEndian>(value).unwrap();
        }
    }

    /// Open a group: sorted/open flag bytes plus the declared entry count
    pub fn begin_group(&mut self, count: u64) {
        self.buf.push(1);
        self.buf.push(0);
        self.put_count(count);
    }

    fn entry(&mut self, marker: u8, name: &str, body: &[u8]) {
        self.buf.push(marker);
        self.buf
            .write_u16::<BigEndian>(name.len() as u16)
            .unwrap();
        self.buf.extend_from_slice(name.as_bytes());
        if self.version == 4 {
            self.buf.write_u64::<BigEndian>(body.len() as u64).unwrap();
        }
        self.buf.extend_from_slice(body);
    }

    /// Append a leaf entry holding pre-encoded tag bytes
    pub fn leaf(&mut self, name: &str, tag: &[u8]) {
        self.entry(21, name, tag);
    }

    /// Append a subgroup entry whose body was built separately with a
    /// `bare` builder
    pub fn subgroup(&mut self, name: &str, body: &[u8]) {
        self.entry(20, name, body);
    }

    fn tag_prelude(&self, definition: &[i64]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%%%%");
        self.put_count_into(&mut buf, definition.len() as u64);
        for code in definition {
            buf.write_i64::<BigEndian>(*code).unwrap();
        }
        buf
    }

    pub fn tag_long(&self, value: i32) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[TagTypeCode::Long as i64]);
        buf.write_i32::<LittleEndian>(value).unwrap();
        buf
    }

    pub fn tag_ulong(&self, value: u32) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[TagTypeCode::ULong as i64]);
        buf.write_u32::<LittleEndian>(value).unwrap();
        buf
    }

    pub fn tag_float(&self, value: f32) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[TagTypeCode::Float as i64]);
        buf.write_f32::<LittleEndian>(value).unwrap();
        buf
    }

    pub fn tag_double(&self, value: f64) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[TagTypeCode::Double as i64]);
        buf.write_f64::<LittleEndian>(value).unwrap();
        buf
    }

    pub fn tag_bool(&self, value: bool) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[TagTypeCode::Boolean as i64]);
        buf.push(value as u8);
        buf
    }

    /// A struct tag from (field type, little-endian field bytes) pairs
    pub fn tag_struct(&self, fields: &[(TagTypeCode, Vec<u8>)]) -> Vec<u8> {
        let mut definition = vec![TagTypeCode::Struct as i64, 0, fields.len() as i64];
        for (kind, _) in fields {
            definition.push(0);
            definition.push(*kind as i64);
        }
        let mut buf = self.tag_prelude(&definition);
        for (_, bytes) in fields {
            buf.extend_from_slice(bytes);
        }
        buf
    }

    /// An array-of-structs tag with a zeroed payload
    pub fn tag_struct_array(&self, fields: &[TagTypeCode], count: usize) -> Vec<u8> {
        let mut definition = vec![
            TagTypeCode::Array as i64,
            TagTypeCode::Struct as i64,
            0,
            fields.len() as i64,
        ];
        let mut item_size = 0usize;
        for kind in fields {
            definition.push(0);
            definition.push(*kind as i64);
            item_size += kind.scalar_size().unwrap() as usize;
        }
        definition.push(count as i64);
        let mut buf = self.tag_prelude(&definition);
        buf.extend(std::iter::repeat(0u8).take(item_size * count));
        buf
    }

    /// Text embedded the format's way: a short unsigned-short array of
    /// UTF-16LE code units
    pub fn tag_text(&self, text: &str) -> Vec<u8> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut buf = self.tag_prelude(&[
            TagTypeCode::Array as i64,
            TagTypeCode::UShort as i64,
            units.len() as i64,
        ]);
        for unit in units {
            buf.write_u16::<LittleEndian>(unit).unwrap();
        }
        buf
    }

    /// A bulk unsigned-short array (above the string-promotion threshold)
    /// with a zeroed payload
    pub fn tag_u16_array(&self, count: usize) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[
            TagTypeCode::Array as i64,
            TagTypeCode::UShort as i64,
            count as i64,
        ]);
        buf.extend(std::iter::repeat(0u8).take(count * 2));
        buf
    }

    pub fn tag_f32_array(&self, values: &[f32]) -> Vec<u8> {
        let mut buf = self.tag_prelude(&[
            TagTypeCode::Array as i64,
            TagTypeCode::Float as i64,
            values.len() as i64,
        ]);
        for v in values {
            buf.write_f32::<LittleEndian>(*v).unwrap();
        }
        buf
    }

    /// A tag whose definition names a type code the decoder does not know
    pub fn tag_unknown(&self, code: i64) -> Vec<u8> {
        self.tag_prelude(&[code])
    }
}
