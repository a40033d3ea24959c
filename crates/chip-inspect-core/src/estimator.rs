//! Chip-corner height reconstruction from 2D pose and 3D plane/edge fits.
//!
//! Two strategies coexist, selected per cycle by the data that arrived:
//!
//! - **edge-intersection** (preferred): the 3D recipe measured the chip's
//!   bottom and left edges plus their intersection, which anchors the chip
//!   frame directly in 3D-image coordinates;
//! - **legacy PKG-center**: corners are placed from the 2D chip pose relative
//!   to the PKG center and transferred into 3D coordinates via the measured
//!   reference-line angle.
//!
//! Neither strategy supersedes the other; selection is purely data-driven.

use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

use crate::corners::{ChipCorner, CornerLabel};
use crate::params::{rotate2, ChipParams2D, ChipParams3D, Line3, PlaneFit};

/// 2D camera pixel pitch in millimetres.
pub const DEFAULT_PIXEL_SIZE_MM: f64 = 0.004;

const UM_PER_MM: f64 = 1000.0;
const MIN_EDGE_LEN_MM: f64 = 1e-6;

/// Why an estimation pass produced no corners.
///
/// `Disabled` and the `Incomplete*` variants are expected operating states,
/// not faults; `Degenerate` marks measured geometry the math cannot use.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimateSkip {
    #[error("chip height estimation disabled by configuration")]
    Disabled,
    #[error("2D chip parameters incomplete")]
    Incomplete2d,
    #[error("3D parameters incomplete for both strategies")]
    Incomplete3d,
    #[error("degenerate geometry: {0}")]
    Degenerate(&'static str),
}

/// Configuration for [`ChipHeightEstimator`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Feature flag; when off, estimation is skipped without error.
    pub enabled: bool,
    /// 2D pixel pitch used for mm→pixel conversions.
    pub pixel_size_mm: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pixel_size_mm: DEFAULT_PIXEL_SIZE_MM,
        }
    }
}

/// Pure geometric estimator: 2D pose + 3D fits → four corner heights.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChipHeightEstimator {
    config: EstimatorConfig,
}

impl ChipHeightEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Reconstruct the four corner records, or report why not.
    ///
    /// The edge-intersection strategy is used whenever the 3D set has edge
    /// data; the legacy PKG-center strategy otherwise. Any skip leaves no
    /// partial output.
    pub fn estimate(
        &self,
        p2: &ChipParams2D,
        p3: &ChipParams3D,
    ) -> Result<[ChipCorner; 4], EstimateSkip> {
        if !self.config.enabled {
            return Err(EstimateSkip::Disabled);
        }
        if !p2.is_valid() {
            return Err(EstimateSkip::Incomplete2d);
        }
        if p3.has_edge_data() {
            self.estimate_from_edges(p2, p3)
        } else if p3.is_valid_legacy() {
            self.estimate_legacy(p2, p3)
        } else {
            Err(EstimateSkip::Incomplete3d)
        }
    }

    fn estimate_from_edges(
        &self,
        p2: &ChipParams2D,
        p3: &ChipParams3D,
    ) -> Result<[ChipCorner; 4], EstimateSkip> {
        let (origin, bottom, left, chip_plane, ref_plane) = match (
            p3.intersection,
            p3.bottom_edge,
            p3.left_edge,
            p3.chip_plane,
            p3.ref_plane,
        ) {
            (Some(o), Some(b), Some(l), Some(cp), Some(rp)) => (o, b, l, cp, rp),
            _ => return Err(EstimateSkip::Incomplete3d),
        };

        let (bottom_dir, bottom_obs) = edge_direction(&bottom, &origin)?;
        let (left_dir, left_obs) = edge_direction(&left, &origin)?;

        let length_mm = p2.chip_length_um / UM_PER_MM;
        let width_mm = p2.chip_width_um / UM_PER_MM;
        if length_mm <= 0.0 || width_mm <= 0.0 {
            return Err(EstimateSkip::Degenerate("non-positive chip dimensions"));
        }

        // Which physical dimension each measured edge spans is ambiguous when
        // the chip is near-square or the recipe's edge roles are swapped;
        // resolve against the 2D-measured dimensions.
        let straight = (bottom_obs - length_mm).abs() + (left_obs - width_mm).abs();
        let swapped = (bottom_obs - width_mm).abs() + (left_obs - length_mm).abs();
        let (bottom_extent, left_extent) = if straight <= swapped {
            (length_mm, width_mm)
        } else {
            (width_mm, length_mm)
        };

        // Sensor-space frame: the intersection is the corner where the bottom
        // and left edges meet. Chip dimensions are plan-view quantities, so
        // corners advance along the XY projections of the edges; heights come
        // from the fitted planes. The sensor's x axis is mirrored relative to
        // the physical naming, so each sensor label maps through `mirrored()`.
        let origin_xy = Point2::new(origin.x, origin.y);
        let sensor_corners = [
            (CornerLabel::LeftBottom, origin_xy),
            (CornerLabel::RightBottom, origin_xy + bottom_dir * bottom_extent),
            (CornerLabel::LeftTop, origin_xy + left_dir * left_extent),
            (
                CornerLabel::RightTop,
                origin_xy + bottom_dir * bottom_extent + left_dir * left_extent,
            ),
        ];

        let mut out = [unplaced_corner(); 4];
        for (slot, (sensor_label, xy)) in out.iter_mut().zip(sensor_corners) {
            let label = sensor_label.mirrored();
            let position = Point3::new(xy.x, xy.y, chip_plane.height_at(xy.x, xy.y));
            *slot = corner_record(
                label,
                position,
                self.pixel_diag(p2, label),
                &chip_plane,
                &ref_plane,
            );
        }
        Ok(out)
    }

    fn estimate_legacy(
        &self,
        p2: &ChipParams2D,
        p3: &ChipParams3D,
    ) -> Result<[ChipCorner; 4], EstimateSkip> {
        let (pkg_center_3d, reference_line, chip_plane, ref_plane) = match (
            p3.pkg_center,
            p3.reference_line,
            p3.chip_plane,
            p3.ref_plane,
        ) {
            (Some(pc), Some(rl), Some(cp), Some(rp)) => (pc, rl, cp, rp),
            _ => return Err(EstimateSkip::Incomplete3d),
        };

        let length_mm = p2.chip_length_um / UM_PER_MM;
        let width_mm = p2.chip_width_um / UM_PER_MM;
        if length_mm <= 0.0 || width_mm <= 0.0 {
            return Err(EstimateSkip::Degenerate("non-positive chip dimensions"));
        }

        let ref_xy = Vector2::new(
            reference_line.end.x - reference_line.start.x,
            reference_line.end.y - reference_line.start.y,
        );
        if ref_xy.norm() < MIN_EDGE_LEN_MM {
            return Err(EstimateSkip::Degenerate("reference line has no XY extent"));
        }
        let pkg_angle = reference_line.angle_xy();

        let chip_angle = p2.chip_angle_deg.to_radians();
        let chip_from_pkg_mm = (p2.chip_center - p2.pkg_center) * self.config.pixel_size_mm;

        let mut out = [unplaced_corner(); 4];
        for (slot, label) in out.iter_mut().zip(CornerLabel::ALL) {
            // Corner offset in the 2D frame, then re-expressed from the PKG
            // center, mirrored into the 3D frame and rotated to the measured
            // PKG orientation.
            let half = Vector2::new(length_mm / 2.0, width_mm / 2.0);
            let local = label.half_extent_signs().component_mul(&half);
            let from_chip = rotate2(local, -chip_angle);
            let from_pkg = from_chip + chip_from_pkg_mm;
            let mirrored = Vector2::new(-from_pkg.x, from_pkg.y);
            let world = rotate2(mirrored, pkg_angle);

            let x = pkg_center_3d.x + world.x;
            let y = pkg_center_3d.y + world.y;
            let position = Point3::new(x, y, chip_plane.height_at(x, y));
            *slot = corner_record(
                label,
                position,
                self.pixel_diag(p2, label),
                &chip_plane,
                &ref_plane,
            );
        }
        Ok(out)
    }

    /// Diagnostic 2D pixel back-projection of a corner. Display only; the
    /// height path never reads it.
    fn pixel_diag(&self, p2: &ChipParams2D, label: CornerLabel) -> Point2<f64> {
        let half = Vector2::new(
            p2.chip_length_um / UM_PER_MM / 2.0,
            p2.chip_width_um / UM_PER_MM / 2.0,
        );
        let local = label.half_extent_signs().component_mul(&half);
        let rotated = rotate2(local, -p2.chip_angle_deg.to_radians());
        p2.chip_center + rotated / self.config.pixel_size_mm
    }
}

/// XY direction and extent of an edge, oriented away from the corner.
fn edge_direction(
    edge: &Line3,
    origin: &Point3<f64>,
) -> Result<(Vector2<f64>, f64), EstimateSkip> {
    let (near, far) = edge.oriented_from(origin);
    let v = Vector2::new(far.x - near.x, far.y - near.y);
    let len = v.norm();
    if len < MIN_EDGE_LEN_MM {
        return Err(EstimateSkip::Degenerate("edge has no XY extent"));
    }
    Ok((v / len, len))
}

fn corner_record(
    label: CornerLabel,
    position: Point3<f64>,
    pixel: Point2<f64>,
    chip_plane: &PlaneFit,
    ref_plane: &PlaneFit,
) -> ChipCorner {
    let chip_height = chip_plane.height_at(position.x, position.y);
    let ref_height = ref_plane.height_at(position.x, position.y);
    ChipCorner {
        label,
        pixel,
        position,
        chip_height,
        ref_height,
        relative_height: chip_height - ref_height,
    }
}

fn unplaced_corner() -> ChipCorner {
    ChipCorner {
        label: CornerLabel::LeftTop,
        pixel: Point2::origin(),
        position: Point3::origin(),
        chip_height: 0.0,
        ref_height: 0.0,
        relative_height: 0.0,
    }
}
