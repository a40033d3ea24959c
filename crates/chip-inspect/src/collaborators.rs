//! Data contracts and trait seams for the station's external collaborators:
//! the 2D algorithm engine, the 3D measurement service, the IO/PLC gateway
//! and the configuration provider.
//!
//! The 3D contract is the explicit, versioned shape published by the service;
//! its typed tool results are flattened into named parameters at ingestion so
//! the geometry code never sees a vendor type.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use chip_inspect_core::{Line3, PlaneFit};

/// Which fitted plane a plane tool reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaneRole {
    Chip,
    Reference,
}

/// Which measured line a line tool reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineRole {
    Reference,
    BottomEdge,
    LeftEdge,
}

/// Typed result of one 3D service tool, resolved once at ingestion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResult {
    Plane { role: PlaneRole, fit: PlaneFit },
    Line { role: LineRole, line: Line3 },
    Intersection { point: Point3<f64> },
    PatternMatch { center: Point2<f64>, angle_deg: f64 },
    Height { value: f64 },
}

/// One named scalar item from the 3D service. Values arrive as strings and
/// are parsed locally; limits are optional in the service contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeDRawItem {
    pub name: String,
    pub value_string: String,
    pub is_out_of_range: bool,
    pub tool_index: usize,
    #[serde(default)]
    pub lower_limit: Option<f64>,
    #[serde(default)]
    pub upper_limit: Option<f64>,
}

impl ThreeDRawItem {
    /// Parse the service's string value; NaN when unparseable, so downstream
    /// checks fail closed rather than comparing garbage.
    pub fn parsed_value(&self) -> f64 {
        match self.value_string.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!(
                    "unparseable 3D value for {:?}: {:?}",
                    self.name,
                    self.value_string
                );
                f64::NAN
            }
        }
    }
}

/// Reply of `ExecuteLocalImages` for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreeDOutcome {
    pub success: bool,
    pub items: Vec<ThreeDRawItem>,
    #[serde(default)]
    pub tools: Vec<ToolResult>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Errors surfaced by the IO/PLC gateway.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("IO gateway write failed: {0}")]
    Write(String),
}

/// Factory IO output. Receives exactly one boolean per completed cycle.
///
/// Failures are logged by the coordinator and never retried: re-emitting a
/// stale pass/fail verdict is unsafe.
pub trait IoGateway: Send + Sync {
    fn set_detection_result(&self, is_ok: bool) -> Result<(), GatewayError>;
}

/// String key/value configuration source.
pub trait ConfigProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory provider, used by tests and commissioning scripts.
#[derive(Clone, Debug, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MapConfig {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }
}

impl ConfigProvider for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_item(value: &str) -> ThreeDRawItem {
        ThreeDRawItem {
            name: "G1".to_owned(),
            value_string: value.to_owned(),
            is_out_of_range: false,
            tool_index: 2,
            lower_limit: None,
            upper_limit: None,
        }
    }

    #[test]
    fn parses_trimmed_numeric_strings() {
        assert_eq!(raw_item(" 1.25 ").parsed_value(), 1.25);
        assert_eq!(raw_item("-0.5").parsed_value(), -0.5);
    }

    #[test]
    fn unparseable_value_becomes_nan() {
        assert!(raw_item("err#42").parsed_value().is_nan());
        assert!(raw_item("").parsed_value().is_nan());
    }

    #[test]
    fn tool_results_round_trip_through_json() {
        let tools = vec![
            ToolResult::Plane {
                role: PlaneRole::Chip,
                fit: PlaneFit {
                    a: 0.1,
                    b: -0.05,
                    c: 2.0,
                },
            },
            ToolResult::Intersection {
                point: Point3::new(10.0, 5.0, 2.75),
            },
        ];
        let json = serde_json::to_string(&tools).unwrap();
        let back: Vec<ToolResult> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tools);
    }
}
