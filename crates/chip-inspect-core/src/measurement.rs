use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin of a measurement item within one inspection cycle.
///
/// The display tag is what operators see in defect descriptions; the 3D
/// compensated and combined tags follow the station's established labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementSource {
    /// 2D image-measurement pipeline.
    TwoD,
    /// Raw per-tool results from the 3D laser-profile service.
    ThreeD,
    /// 3D quantities re-evaluated against operator limits with compensation.
    ThreeDCompensated,
    /// Derived corner-height / pitch / roll measurements.
    Combined,
}

impl MeasurementSource {
    /// Operator-facing prefix used in defect descriptions.
    pub fn tag(self) -> &'static str {
        match self {
            MeasurementSource::TwoD => "2D",
            MeasurementSource::ThreeD => "3D",
            MeasurementSource::ThreeDCompensated => "3D补偿后",
            MeasurementSource::Combined => "综合项目",
        }
    }
}

impl fmt::Display for MeasurementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One named scalar measurement with its limit verdict.
///
/// Items are immutable once produced by their pipeline; the only field the
/// station touches afterwards is `row`, which the merged view reassigns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementItem {
    pub name: String,
    pub value: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub out_of_range: bool,
    pub source: MeasurementSource,
    /// Index of the producing tool, for 3D service items.
    #[serde(default)]
    pub tool_index: Option<usize>,
    /// 1-based display row in the merged view; 0 until assigned.
    #[serde(default)]
    pub row: usize,
}

impl MeasurementItem {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        lower_limit: f64,
        upper_limit: f64,
        out_of_range: bool,
        source: MeasurementSource,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            lower_limit,
            upper_limit,
            out_of_range,
            source,
            tool_index: None,
            row: 0,
        }
    }

    /// Build an item whose verdict follows directly from its limits.
    pub fn checked(
        name: impl Into<String>,
        value: f64,
        lower_limit: f64,
        upper_limit: f64,
        source: MeasurementSource,
    ) -> Self {
        let out_of_range = value < lower_limit || value > upper_limit;
        Self::new(name, value, lower_limit, upper_limit, out_of_range, source)
    }

    pub fn with_tool_index(mut self, tool_index: usize) -> Self {
        self.tool_index = Some(tool_index);
        self
    }
}
