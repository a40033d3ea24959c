use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Chip pose measured by the 2D pipeline.
///
/// Centers are in pixels of the 2D camera image, the angle in degrees, chip
/// dimensions in micrometres. A set is usable only when every field is finite;
/// the 2D pipeline publishes NaN for quantities it failed to measure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChipParams2D {
    pub pkg_center: Point2<f64>,
    pub chip_center: Point2<f64>,
    pub chip_angle_deg: f64,
    pub chip_length_um: f64,
    pub chip_width_um: f64,
}

impl ChipParams2D {
    pub fn is_valid(&self) -> bool {
        self.pkg_center.x.is_finite()
            && self.pkg_center.y.is_finite()
            && self.chip_center.x.is_finite()
            && self.chip_center.y.is_finite()
            && self.chip_angle_deg.is_finite()
            && self.chip_length_um.is_finite()
            && self.chip_width_um.is_finite()
    }
}

/// Fitted plane `z = a*x + b*y + c` over 3D-image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl PlaneFit {
    /// Horizontal plane at the given height (no slope terms).
    pub fn level(c: f64) -> Self {
        Self { a: 0.0, b: 0.0, c }
    }

    #[inline]
    pub fn height_at(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.c
    }
}

/// 3D line segment measured by an edge/reference line tool, metric units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line3 {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
}

impl Line3 {
    /// In-plane direction angle of `end - start`, radians.
    pub fn angle_xy(&self) -> f64 {
        (self.end.y - self.start.y).atan2(self.end.x - self.start.x)
    }

    /// Order the endpoints so the first is the one nearer `origin`.
    pub fn oriented_from(&self, origin: &Point3<f64>) -> (Point3<f64>, Point3<f64>) {
        if (self.start - origin).norm() <= (self.end - origin).norm() {
            (self.start, self.end)
        } else {
            (self.end, self.start)
        }
    }
}

/// Parameters extracted from the 3D service's typed tool results.
///
/// Two generations of tooling feed this struct. The legacy recipe publishes a
/// PKG center, a reference line and the two planes; newer recipes additionally
/// measure the chip's bottom/left edges and their intersection, which the
/// estimator prefers. Either subset may be present independently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChipParams3D {
    pub pkg_center: Option<Point2<f64>>,
    pub reference_line: Option<Line3>,
    pub chip_plane: Option<PlaneFit>,
    pub ref_plane: Option<PlaneFit>,
    pub bottom_edge: Option<Line3>,
    pub left_edge: Option<Line3>,
    pub intersection: Option<Point3<f64>>,
}

impl ChipParams3D {
    /// Legacy recipe complete: PKG center, reference line and both planes.
    pub fn is_valid_legacy(&self) -> bool {
        self.pkg_center.is_some()
            && self.reference_line.is_some()
            && self.chip_plane.is_some()
            && self.ref_plane.is_some()
    }

    /// Edge recipe complete: both edge lines, their intersection and both planes.
    pub fn has_edge_data(&self) -> bool {
        self.bottom_edge.is_some()
            && self.left_edge.is_some()
            && self.intersection.is_some()
            && self.chip_plane.is_some()
            && self.ref_plane.is_some()
    }

    /// Usable by at least one estimation strategy.
    pub fn is_usable(&self) -> bool {
        self.has_edge_data() || self.is_valid_legacy()
    }
}

/// Rotate a 2D vector by `angle_rad` counter-clockwise.
#[inline]
pub fn rotate2(v: Vector2<f64>, angle_rad: f64) -> Vector2<f64> {
    let (s, c) = angle_rad.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}
