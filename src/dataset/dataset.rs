use std::fmt::{self, Display, Formatter};

use super::array::{ArrayRetrievalError, DataArray};
use super::axis::{CalibratedAxis, DimensionKind};
use crate::meta::TagGroup;

/// What kind of acquisition a dataset represents.
///
/// Shape alone is ambiguous for the 1D and 3D cases, so readers combine the
/// array rank, the axis kinds, and (where the format records one) an explicit
/// acquisition-mode tag, with the tag taking priority.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataKind {
    Image,
    ImageStack,
    Spectrum,
    SpectrumImage,
    LineScan,
    #[default]
    Unknown,
}

impl Display for DataKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl DataKind {
    /// Classify from axis kinds and an optional explicit spectrum-image
    /// flag. The flag wins over the shape heuristics when present.
    pub fn classify(axes: &[CalibratedAxis], spectrum_image_flag: bool) -> DataKind {
        if spectrum_image_flag {
            return DataKind::SpectrumImage;
        }
        let spectral = axes.iter().any(|a| a.kind == DimensionKind::Spectral);
        match axes.len() {
            0 => DataKind::Unknown,
            1 => {
                if spectral {
                    DataKind::Spectrum
                } else {
                    DataKind::LineScan
                }
            }
            2 => {
                if spectral {
                    DataKind::SpectrumImage
                } else {
                    DataKind::Image
                }
            }
            _ => {
                if spectral {
                    DataKind::SpectrumImage
                } else {
                    DataKind::ImageStack
                }
            }
        }
    }
}

/// The common output of every reader: an N-dimensional numeric array, one
/// [`CalibratedAxis`] per dimension, and the full decoded metadata tree.
///
/// A dataset is immutable after construction apart from the relabeling
/// setters; the array bytes are always fully materialized, never backed by
/// the source file.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dataset {
    data: DataArray,
    shape: Vec<usize>,
    axes: Vec<CalibratedAxis>,
    metadata: TagGroup,
    title: String,
    quantity: String,
    units: String,
    kind: DataKind,
    /// The raw pixel-encoding code from the source file, kept for
    /// downstream consumers that dispatch on the vendor enumeration
    source_data_type: u32,
}

impl Dataset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data: DataArray,
        shape: Vec<usize>,
        axes: Vec<CalibratedAxis>,
        metadata: TagGroup,
        title: impl Into<String>,
        quantity: impl Into<String>,
        units: impl Into<String>,
        kind: DataKind,
        source_data_type: u32,
    ) -> Self {
        debug_assert_eq!(shape.len(), axes.len());
        Self {
            data,
            shape,
            axes,
            metadata,
            title: title.into(),
            quantity: quantity.into(),
            units: units.into(),
            kind,
            source_data_type,
        }
    }

    pub fn data(&self) -> &DataArray {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn axes(&self) -> &[CalibratedAxis] {
        &self.axes
    }

    pub fn axis(&self, dim: usize) -> Option<&CalibratedAxis> {
        self.axes.get(dim)
    }

    pub fn metadata(&self) -> &TagGroup {
        &self.metadata
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn source_data_type(&self) -> u32 {
        self.source_data_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn quantity(&self) -> &str {
        &self.quantity
    }

    pub fn set_quantity(&mut self, quantity: impl Into<String>) {
        self.quantity = quantity.into();
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn set_units(&mut self, units: impl Into<String>) {
        self.units = units.into();
    }

    pub fn rename_axis(&mut self, dim: usize, name: impl Into<String>) {
        if let Some(axis) = self.axes.get_mut(dim) {
            axis.name = name.into();
        }
    }

    /// Convenience pass-through to [`DataArray::to_f64`]
    pub fn to_f64(&self) -> Result<Vec<f64>, ArrayRetrievalError> {
        self.data.to_f64()
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dataset({} {:?} {} {})",
            self.title, self.shape, self.data.dtype, self.kind
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dataset::array::ElementType;

    fn axis(kind: DimensionKind, len: usize) -> CalibratedAxis {
        CalibratedAxis::new("a", "nm", "distance", kind, 1.0, 0.0, len)
    }

    #[test]
    fn test_classify_by_shape() {
        use DimensionKind::*;
        assert_eq!(
            DataKind::classify(&[axis(Spectral, 8)], false),
            DataKind::Spectrum
        );
        assert_eq!(
            DataKind::classify(&[axis(Spatial, 8)], false),
            DataKind::LineScan
        );
        assert_eq!(
            DataKind::classify(&[axis(Spatial, 4), axis(Spatial, 4)], false),
            DataKind::Image
        );
        assert_eq!(
            DataKind::classify(&[axis(Spatial, 4), axis(Spectral, 64)], false),
            DataKind::SpectrumImage
        );
        assert_eq!(
            DataKind::classify(
                &[axis(Spatial, 4), axis(Spatial, 4), axis(Spatial, 10)],
                false
            ),
            DataKind::ImageStack
        );
        assert_eq!(
            DataKind::classify(
                &[axis(Spatial, 4), axis(Spatial, 4), axis(Spectral, 100)],
                false
            ),
            DataKind::SpectrumImage
        );
    }

    #[test]
    fn test_classify_flag_priority() {
        use DimensionKind::*;
        // the explicit acquisition tag overrides the shape heuristic
        assert_eq!(
            DataKind::classify(&[axis(Spatial, 4), axis(Spatial, 4)], true),
            DataKind::SpectrumImage
        );
    }

    #[test]
    fn test_relabeling() {
        let mut ds = Dataset::new(
            DataArray::from_values(ElementType::F32, &[0.0f32; 4]),
            vec![4],
            vec![axis(DimensionKind::Spatial, 4)],
            TagGroup::default(),
            "untitled",
            "intensity",
            "counts",
            DataKind::LineScan,
            2,
        );
        assert_eq!(ds.title(), "untitled");
        ds.set_title("scan-12");
        ds.rename_axis(0, "x");
        assert_eq!(ds.title(), "scan-12");
        assert_eq!(ds.axis(0).unwrap().name, "x");
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.rank(), 1);
    }
}
