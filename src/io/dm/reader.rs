use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::path::PathBuf;

use crate::dataset::axis::assign_axis_names;
use crate::dataset::{CalibratedAxis, DataArray, DataKind, Dataset, ElementType};
use crate::meta::{TagGroup, TagNode, TagValue};

use super::tags::{DMError, DMHeader, TagStreamReader};

/// Map the `ImageData.DataType` code onto the element type of the pixel
/// payload. These are the fourteen pixel encodings the format defines,
/// including the packed-complex FFT layout and the packed RGB(A) layouts.
fn pixel_element_type(code: u64) -> Result<ElementType, DMError> {
    let dtype = match code {
        1 => ElementType::I16,
        2 => ElementType::F32,
        3 => ElementType::Complex64,
        5 => ElementType::PackedComplexF32,
        6 => ElementType::U8,
        7 => ElementType::I32,
        8 => ElementType::RGB,
        9 => ElementType::I8,
        10 => ElementType::U16,
        11 => ElementType::U32,
        12 => ElementType::F64,
        13 => ElementType::Complex128,
        14 => ElementType::Boolean,
        23 => ElementType::RGB,
        other => return Err(DMError::UnsupportedPixelType(other)),
    };
    Ok(dtype)
}

fn group_f64(group: &TagGroup, name: &str) -> Option<f64> {
    group.get(name).and_then(TagNode::as_leaf).and_then(TagValue::as_f64)
}

/// Reader for Gatan DigitalMicrograph DM3/DM4 files.
///
/// The constructor validates the file preamble; [`DMReader::read`] walks
/// the tag tree and assembles a [`Dataset`] from the pixel-data tag, the
/// dimension tags and the per-axis calibrations. The bulk pixel payload is
/// materialized through the still-open handle before the dataset is
/// returned, so the caller never holds a reference into the file.
#[derive(Debug)]
pub struct DMReader<R: Read + Seek> {
    source: R,
    header: DMHeader,
    source_name: Option<String>,
}

impl DMReader<fs::File> {
    pub fn open_path<P: Into<PathBuf>>(path: P) -> Result<Self, DMError> {
        let path = path.into();
        let handle = fs::File::open(&path)?;
        let mut this = Self::new(handle)?;
        this.source_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(this)
    }
}

impl<R: Read + Seek> DMReader<R> {
    /// Wrap a seekable stream, validating the fixed preamble
    pub fn new(mut source: R) -> Result<Self, DMError> {
        source.seek(SeekFrom::Start(0))?;
        let header = DMHeader::read(&mut source)?;
        Ok(Self {
            source,
            header,
            source_name: None,
        })
    }

    /// The format version from the preamble, 3 or 4
    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn set_source_name(&mut self, name: impl Into<String>) {
        self.source_name = Some(name.into());
    }

    /// Decode the complete tag tree without building a dataset
    pub fn read_tags(&mut self) -> Result<TagGroup, DMError> {
        self.source.seek(SeekFrom::Start(self.header.len()))?;
        TagStreamReader::new(&mut self.source, self.header.version).read_root()
    }

    /// Parse the file and assemble the dataset it contains
    pub fn read(&mut self) -> Result<Dataset, DMError> {
        let root = self.read_tags()?;
        let title = self
            .source_name
            .clone()
            .unwrap_or_else(|| "untitled".to_string());
        assemble_dataset(&mut self.source, root, title)
    }
}

/// Locate the pixel-data tag and its dimension/calibration siblings in the
/// decoded tree and build the dataset.
///
/// Missing structural tags (`Dimensions`, `DataType`, `Data`) are fatal; a
/// missing calibration for one axis falls back to an identity calibration
/// instead.
fn assemble_dataset<R: Read + Seek>(
    source: &mut R,
    root: TagGroup,
    title: String,
) -> Result<Dataset, DMError> {
    let (blob, code, dtype, shape, mut axes, si_flag, units) = {
        let image_list = root
            .get_path("ImageList")
            .and_then(TagNode::as_group)
            .ok_or_else(|| DMError::MissingTag("ImageList".to_string()))?;
        // the list usually starts with a thumbnail; the final entry is the
        // image the vendor software actually displays and saves
        let image = image_list
            .iter()
            .rev()
            .find_map(|(_, node)| node.as_group().filter(|g| g.contains("ImageData")))
            .ok_or_else(|| DMError::MissingTag("ImageList.ImageData".to_string()))?;
        let image_data = image
            .get("ImageData")
            .and_then(TagNode::as_group)
            .ok_or_else(|| DMError::MissingTag("ImageList.ImageData".to_string()))?;

        let dims_group = image_data
            .get("Dimensions")
            .and_then(TagNode::as_group)
            .ok_or_else(|| DMError::MissingTag("ImageData.Dimensions".to_string()))?;
        let mut dims: Vec<usize> = Vec::with_capacity(dims_group.len());
        for (key, node) in dims_group.iter() {
            let extent = node
                .as_leaf()
                .and_then(TagValue::as_u64)
                .ok_or_else(|| DMError::MissingTag(format!("ImageData.Dimensions.{}", key)))?;
            dims.push(extent as usize);
        }
        if dims.is_empty() {
            return Err(DMError::MissingTag("ImageData.Dimensions".to_string()));
        }

        let blob = *image_data
            .get("Data")
            .and_then(TagNode::as_leaf)
            .and_then(TagValue::as_blob)
            .ok_or_else(|| DMError::MissingTag("ImageData.Data".to_string()))?;
        let code = image_data
            .get("DataType")
            .and_then(TagNode::as_leaf)
            .and_then(TagValue::as_u64)
            .ok_or_else(|| DMError::MissingTag("ImageData.DataType".to_string()))?;
        let dtype = pixel_element_type(code)?;

        let mut axes: Vec<CalibratedAxis> = Vec::with_capacity(dims.len());
        for (k, len) in dims.iter().enumerate() {
            let calibration = image_data
                .get_path(&format!("Calibrations.Dimension.{}", k))
                .and_then(TagNode::as_group);
            let axis = match calibration {
                Some(cal) => {
                    let scale = group_f64(cal, "Scale").unwrap_or(1.0);
                    let origin = group_f64(cal, "Origin").unwrap_or(0.0);
                    let units = cal
                        .get("Units")
                        .and_then(TagNode::as_leaf)
                        .and_then(TagValue::as_str)
                        .unwrap_or("generic");
                    CalibratedAxis::from_calibration(units, scale, origin, *len)
                }
                None => CalibratedAxis::identity("", *len),
            };
            axes.push(axis);
        }

        // dimension tags are stored fastest-varying first; flip both the
        // shape and the axes into row-major order
        let mut shape = dims;
        shape.reverse();
        axes.reverse();

        let si_flag = image.get_path("ImageTags.SI").is_some();
        let units = image_data
            .get_path("Calibrations.Brightness.Units")
            .and_then(TagNode::as_leaf)
            .and_then(TagValue::as_str)
            .unwrap_or("")
            .to_string();
        (blob, code, dtype, shape, axes, si_flag, units)
    };

    let expected = shape.iter().product::<usize>() as u64 * dtype.size_of() as u64;
    if blob.byte_len != expected {
        return Err(DMError::DataSizeMismatch {
            expected,
            actual: blob.byte_len,
        });
    }
    let bytes = blob.materialize(source).map_err(io::Error::from)?;

    assign_axis_names(&mut axes);
    let kind = DataKind::classify(&axes, si_flag);
    Ok(Dataset::new(
        DataArray::wrap(dtype, bytes),
        shape,
        axes,
        root,
        title,
        "intensity",
        units,
        kind,
        code as u32,
    ))
}
