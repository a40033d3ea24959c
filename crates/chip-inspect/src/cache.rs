//! Per-cycle measurement store.
//!
//! Each pipeline writes only its own sub-collection (the coordinator's mutex
//! serialises access); everything else reads. Ingestion also extracts the
//! chip-pose parameters both estimation strategies need, and re-runs the
//! estimator whenever a write may have completed the parameter pair.

use nalgebra::Point2;

use chip_inspect_core::{
    ChipCorner, ChipHeightEstimator, ChipParams2D, ChipParams3D, EstimateSkip, MeasurementItem,
};

use crate::collaborators::{LineRole, PlaneRole, ToolResult};

/// 2D items carrying chip-pose scalars for the estimator. Geometry-only
/// helpers: excluded from the merged operator view.
pub const HELPER_ITEM_NAMES: [&str; 7] = [
    "pkg_center_x",
    "pkg_center_y",
    "chip_center_x",
    "chip_center_y",
    "chip_angle",
    "chip_length",
    "chip_width",
];

/// Latest 2D, 3D and derived measurements for the running cycle.
#[derive(Debug, Default)]
pub struct MeasurementCache {
    two_d: Vec<MeasurementItem>,
    three_d: Vec<MeasurementItem>,
    combined: Vec<MeasurementItem>,
    params_2d: Option<ChipParams2D>,
    params_3d: ChipParams3D,
    corners: Option<[ChipCorner; 4]>,
}

impl MeasurementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the 2D collection, extract chip-pose parameters and retry
    /// corner estimation.
    pub fn set_cached_2d(&mut self, items: Vec<MeasurementItem>, estimator: &ChipHeightEstimator) {
        self.params_2d = extract_params_2d(&items);
        self.two_d = items;
        self.try_estimate(estimator);
    }

    /// Replace the 3D collection, flatten the typed tool results into named
    /// parameters and retry corner estimation.
    pub fn set_cached_3d(
        &mut self,
        items: Vec<MeasurementItem>,
        tools: &[ToolResult],
        estimator: &ChipHeightEstimator,
    ) {
        self.params_3d = extract_params_3d(tools);
        self.three_d = items;
        self.try_estimate(estimator);
    }

    pub fn set_combined(&mut self, items: Vec<MeasurementItem>) {
        self.combined = items;
    }

    /// Drop 2D state at cycle start so nothing carries over.
    pub fn clear_2d(&mut self) {
        self.two_d.clear();
        self.params_2d = None;
        self.corners = None;
        self.combined.clear();
    }

    /// Drop 3D state at cycle start so nothing carries over.
    pub fn clear_3d(&mut self) {
        self.three_d.clear();
        self.params_3d = ChipParams3D::default();
        self.corners = None;
        self.combined.clear();
    }

    pub fn corners(&self) -> Option<&[ChipCorner; 4]> {
        self.corners.as_ref()
    }

    pub fn params_2d(&self) -> Option<&ChipParams2D> {
        self.params_2d.as_ref()
    }

    pub fn params_3d(&self) -> &ChipParams3D {
        &self.params_3d
    }

    pub fn three_d_items(&self) -> &[MeasurementItem] {
        &self.three_d
    }

    pub fn combined_items(&self) -> &[MeasurementItem] {
        &self.combined
    }

    /// Deterministic read-only union for display and records: 2D items minus
    /// geometry helpers, then 3D items (when the cycle ran 3D), then combined
    /// items, with rows renumbered 1..N in that order.
    pub fn merged_view(&self, include_3d: bool) -> Vec<MeasurementItem> {
        let two_d = self
            .two_d
            .iter()
            .filter(|i| !HELPER_ITEM_NAMES.contains(&i.name.as_str()));
        let three_d = self.three_d.iter().filter(|_| include_3d);
        two_d
            .chain(three_d)
            .chain(self.combined.iter())
            .cloned()
            .enumerate()
            .map(|(idx, mut item)| {
                item.row = idx + 1;
                item
            })
            .collect()
    }

    fn try_estimate(&mut self, estimator: &ChipHeightEstimator) {
        let Some(params_2d) = self.params_2d else {
            self.corners = None;
            return;
        };
        match estimator.estimate(&params_2d, &self.params_3d) {
            Ok(corners) => self.corners = Some(corners),
            Err(skip) => {
                // partial results never survive a failed pass
                self.corners = None;
                match skip {
                    EstimateSkip::Degenerate(_) => {
                        log::warn!("chip height estimation skipped: {skip}");
                    }
                    _ => log::debug!("chip height estimation skipped: {skip}"),
                }
            }
        }
    }
}

fn item_value(items: &[MeasurementItem], name: &str) -> Option<f64> {
    items.iter().find(|i| i.name == name).map(|i| i.value)
}

/// Pull the chip-pose parameter set out of the well-known 2D helper items.
/// All seven must be present; validity (non-NaN) is judged separately.
fn extract_params_2d(items: &[MeasurementItem]) -> Option<ChipParams2D> {
    Some(ChipParams2D {
        pkg_center: Point2::new(
            item_value(items, "pkg_center_x")?,
            item_value(items, "pkg_center_y")?,
        ),
        chip_center: Point2::new(
            item_value(items, "chip_center_x")?,
            item_value(items, "chip_center_y")?,
        ),
        chip_angle_deg: item_value(items, "chip_angle")?,
        chip_length_um: item_value(items, "chip_length")?,
        chip_width_um: item_value(items, "chip_width")?,
    })
}

/// Flatten typed tool results into the named 3D parameter set. Later tools
/// win on duplicates, matching the service's execution order.
fn extract_params_3d(tools: &[ToolResult]) -> ChipParams3D {
    let mut params = ChipParams3D::default();
    for tool in tools {
        match *tool {
            ToolResult::Plane {
                role: PlaneRole::Chip,
                fit,
            } => params.chip_plane = Some(fit),
            ToolResult::Plane {
                role: PlaneRole::Reference,
                fit,
            } => params.ref_plane = Some(fit),
            ToolResult::Line {
                role: LineRole::Reference,
                line,
            } => params.reference_line = Some(line),
            ToolResult::Line {
                role: LineRole::BottomEdge,
                line,
            } => params.bottom_edge = Some(line),
            ToolResult::Line {
                role: LineRole::LeftEdge,
                line,
            } => params.left_edge = Some(line),
            ToolResult::Intersection { point } => {
                params.intersection = Some(point);
            }
            ToolResult::PatternMatch { center, .. } => params.pkg_center = Some(center),
            ToolResult::Height { .. } => {}
        }
    }
    params
}
