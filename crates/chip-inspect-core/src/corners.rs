use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical chip corner naming, as seen in the 2D camera image
/// (x grows right, y grows down).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CornerLabel {
    LeftTop,
    RightTop,
    LeftBottom,
    RightBottom,
}

impl CornerLabel {
    pub const ALL: [CornerLabel; 4] = [
        CornerLabel::LeftTop,
        CornerLabel::RightTop,
        CornerLabel::LeftBottom,
        CornerLabel::RightBottom,
    ];

    /// Short identifier used in measurement item names.
    pub fn key(self) -> &'static str {
        match self {
            CornerLabel::LeftTop => "lt",
            CornerLabel::RightTop => "rt",
            CornerLabel::LeftBottom => "lb",
            CornerLabel::RightBottom => "rb",
        }
    }

    /// Left-right mirror. The 3D sensor's x axis is mirrored relative to the
    /// 2D camera, so sensor-space corners map to physical labels through this.
    pub fn mirrored(self) -> CornerLabel {
        match self {
            CornerLabel::LeftTop => CornerLabel::RightTop,
            CornerLabel::RightTop => CornerLabel::LeftTop,
            CornerLabel::LeftBottom => CornerLabel::RightBottom,
            CornerLabel::RightBottom => CornerLabel::LeftBottom,
        }
    }

    /// Offset of this corner from the chip center, in chip-local units of
    /// `(length/2, width/2)`: left/top negative, right/bottom positive.
    pub fn half_extent_signs(self) -> Vector2<f64> {
        match self {
            CornerLabel::LeftTop => Vector2::new(-1.0, -1.0),
            CornerLabel::RightTop => Vector2::new(1.0, -1.0),
            CornerLabel::LeftBottom => Vector2::new(-1.0, 1.0),
            CornerLabel::RightBottom => Vector2::new(1.0, 1.0),
        }
    }
}

impl fmt::Display for CornerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Reconstructed state of one chip corner for the current cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChipCorner {
    pub label: CornerLabel,
    /// Diagnostic back-projection into 2D camera pixels; never feeds back
    /// into height computation.
    pub pixel: Point2<f64>,
    /// Position in 3D-image metric coordinates (mm).
    pub position: Point3<f64>,
    /// Chip-plane height at this corner (mm).
    pub chip_height: f64,
    /// Reference-plane height at this corner (mm).
    pub ref_height: f64,
    /// `chip_height - ref_height`.
    pub relative_height: f64,
}

/// Look up a corner by label in an estimator output.
pub fn corner_by_label(corners: &[ChipCorner], label: CornerLabel) -> Option<&ChipCorner> {
    corners.iter().find(|c| c.label == label)
}
