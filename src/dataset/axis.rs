use std::fmt::{self, Display, Formatter};

/// What physical kind of quantity an axis steps through.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DimensionKind {
    /// Real-space position
    Spatial,
    /// Energy or another spectral coordinate
    Spectral,
    /// Reciprocal-space position or scattering angle
    Reciprocal,
    Temporal,
    #[default]
    Unknown,
}

impl Display for DimensionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The outcome of normalizing a vendor unit string: the cleaned-up unit,
/// the axis kind it implies, a default quantity label, and a factor to fold
/// into the axis scale (1.0 except where the vendor convention demands a
/// rescale, e.g. micrometers are stored where nanometers are meant).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUnit {
    pub units: String,
    pub kind: DimensionKind,
    pub quantity: &'static str,
    pub rescale: f64,
}

/// Map a raw unit string from a calibration tag to its normalized form.
///
/// The rules follow the conventions observed in these instrument formats:
/// anything carrying "eV" is a spectral energy axis, a leading "1/" or an
/// angular unit marks reciprocal space, and micrometer units are rescaled
/// by 1000 and relabeled as nanometers.
pub fn normalize_unit(raw: &str) -> NormalizedUnit {
    let trimmed = raw.trim();
    if trimmed.contains("eV") {
        return NormalizedUnit {
            units: trimmed.to_string(),
            kind: DimensionKind::Spectral,
            quantity: "energy",
            rescale: 1.0,
        };
    }
    if trimmed.starts_with("1/") || trimmed == "mrad" || trimmed == "rad" {
        return NormalizedUnit {
            units: trimmed.to_string(),
            kind: DimensionKind::Reciprocal,
            quantity: "reciprocal distance",
            rescale: 1.0,
        };
    }
    if matches!(trimmed, "µm" | "um" | "micron" | "microns") {
        return NormalizedUnit {
            units: "nm".to_string(),
            kind: DimensionKind::Spatial,
            quantity: "distance",
            rescale: 1000.0,
        };
    }
    if matches!(trimmed, "s" | "sec" | "ms" | "us" | "µs" | "ns") {
        return NormalizedUnit {
            units: trimmed.to_string(),
            kind: DimensionKind::Temporal,
            quantity: "time",
            rescale: 1.0,
        };
    }
    if trimmed.is_empty() || trimmed == "generic" {
        return NormalizedUnit {
            units: "generic".to_string(),
            kind: DimensionKind::Unknown,
            quantity: "generic",
            rescale: 1.0,
        };
    }
    NormalizedUnit {
        units: trimmed.to_string(),
        kind: DimensionKind::Spatial,
        quantity: "distance",
        rescale: 1.0,
    }
}

/// Assign the conventional sequential axis names in place: `x, y, z` for
/// spatial axes, `u, v, w` for reciprocal ones, `energy` and `time` for
/// spectral and temporal axes.
pub fn assign_axis_names(axes: &mut [CalibratedAxis]) {
    const SPATIAL: [&str; 3] = ["x", "y", "z"];
    const RECIPROCAL: [&str; 3] = ["u", "v", "w"];
    let mut counts = [0usize; 5];
    for (index, axis) in axes.iter_mut().enumerate() {
        let slot = match axis.kind {
            DimensionKind::Spatial => 0,
            DimensionKind::Reciprocal => 1,
            DimensionKind::Spectral => 2,
            DimensionKind::Temporal => 3,
            DimensionKind::Unknown => 4,
        };
        let nth = counts[slot];
        counts[slot] += 1;
        axis.name = match axis.kind {
            DimensionKind::Spatial => SPATIAL
                .get(nth)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("x{}", nth)),
            DimensionKind::Reciprocal => RECIPROCAL
                .get(nth)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("u{}", nth)),
            DimensionKind::Spectral => {
                if nth == 0 {
                    "energy".to_string()
                } else {
                    format!("energy-{}", nth + 1)
                }
            }
            DimensionKind::Temporal => {
                if nth == 0 {
                    "time".to_string()
                } else {
                    format!("time-{}", nth + 1)
                }
            }
            DimensionKind::Unknown => format!("dim-{}", index),
        };
    }
}

/// Per-axis calibration: everything needed to turn an integer index along
/// one array dimension into a physical coordinate.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibratedAxis {
    pub name: String,
    pub units: String,
    pub quantity: String,
    pub kind: DimensionKind,
    pub scale: f64,
    pub origin: f64,
    pub len: usize,
}

impl CalibratedAxis {
    pub fn new(
        name: impl Into<String>,
        units: impl Into<String>,
        quantity: impl Into<String>,
        kind: DimensionKind,
        scale: f64,
        origin: f64,
        len: usize,
    ) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            quantity: quantity.into(),
            kind,
            scale,
            origin,
            len,
        }
    }

    /// An uncalibrated axis: unit spacing from zero, generic units
    pub fn identity(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, "generic", "generic", DimensionKind::Unknown, 1.0, 0.0, len)
    }

    /// Build an axis from a raw calibration triple, applying unit
    /// normalization. The name starts as the normalized quantity label;
    /// readers assign the sequential axis names afterwards.
    pub fn from_calibration(raw_units: &str, scale: f64, origin: f64, len: usize) -> Self {
        let norm = normalize_unit(raw_units);
        Self::new(
            norm.quantity,
            norm.units,
            norm.quantity,
            norm.kind,
            scale * norm.rescale,
            origin,
            len,
        )
    }

    /// The physical coordinate of every index: `(i - origin) * scale`
    pub fn coordinates(&self) -> Vec<f64> {
        (0..self.len)
            .map(|i| (i as f64 - self.origin) * self.scale)
            .collect()
    }
}

impl Display for CalibratedAxis {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} x {} {}]",
            self.name, self.len, self.scale, self.units
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_spectral() {
        let n = normalize_unit("eV");
        assert_eq!(n.kind, DimensionKind::Spectral);
        assert_eq!(n.units, "eV");
        assert_eq!(n.rescale, 1.0);
        assert_eq!(normalize_unit("keV").kind, DimensionKind::Spectral);
    }

    #[test]
    fn test_normalize_reciprocal() {
        assert_eq!(normalize_unit("1/nm").kind, DimensionKind::Reciprocal);
        assert_eq!(normalize_unit("1/cm").kind, DimensionKind::Reciprocal);
        assert_eq!(normalize_unit("mrad").kind, DimensionKind::Reciprocal);
        assert_eq!(normalize_unit("rad").kind, DimensionKind::Reciprocal);
    }

    #[test]
    fn test_normalize_micrometer_rescale() {
        let n = normalize_unit("µm");
        assert_eq!(n.kind, DimensionKind::Spatial);
        assert_eq!(n.units, "nm");
        assert_eq!(n.rescale, 1000.0);
        assert_eq!(normalize_unit("um").units, "nm");
    }

    #[test]
    fn test_normalize_plain_spatial_and_temporal() {
        let n = normalize_unit("nm");
        assert_eq!(n.kind, DimensionKind::Spatial);
        assert_eq!(n.units, "nm");
        assert_eq!(n.rescale, 1.0);
        assert_eq!(normalize_unit("s").kind, DimensionKind::Temporal);
        assert_eq!(normalize_unit("").kind, DimensionKind::Unknown);
    }

    #[test]
    fn test_coordinates() {
        let axis = CalibratedAxis::new("energy", "eV", "energy", DimensionKind::Spectral, 2.0, 0.0, 4);
        assert_eq!(axis.coordinates(), vec![0.0, 2.0, 4.0, 6.0]);

        let axis = CalibratedAxis::new("x", "nm", "distance", DimensionKind::Spatial, 0.5, 2.0, 3);
        assert_eq!(axis.coordinates(), vec![-1.0, -0.5, 0.0]);
    }

    #[test]
    fn test_from_calibration_folds_rescale() {
        let axis = CalibratedAxis::from_calibration("µm", 0.25, 0.0, 2);
        assert_eq!(axis.units, "nm");
        assert_eq!(axis.scale, 250.0);
        assert_eq!(axis.kind, DimensionKind::Spatial);
    }
}
