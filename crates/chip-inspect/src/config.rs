//! Typed station parameters built from the flat configuration provider.
//!
//! Every lookup falls back to an explicit default; a value that fails to
//! parse is logged and treated as absent rather than aborting startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use chip_inspect_core::{
    CombinedConfig, CornerCheck, EstimatorConfig, LimitBand, DEFAULT_PIXEL_SIZE_MM,
};

use crate::collaborators::ConfigProvider;

/// Operator limit applied to one 3D quantity after compensation. Items with a
/// configured limit supersede the service's raw verdict for that quantity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompensatedLimit {
    pub item: String,
    pub compensation: f64,
    pub limits: LimitBand,
    pub enabled: bool,
}

/// All tunable parameters of the station core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationParams {
    pub chip_height: EstimatorConfig,
    pub combined: CombinedConfig,
    pub compensated: Vec<CompensatedLimit>,
    /// Advisory threshold for the "3D done, 2D still pending" monitor.
    pub pending_2d_threshold: Duration,
}

impl Default for StationParams {
    fn default() -> Self {
        Self {
            chip_height: EstimatorConfig::default(),
            combined: CombinedConfig::default(),
            compensated: Vec::new(),
            pending_2d_threshold: Duration::from_secs(5),
        }
    }
}

impl StationParams {
    /// Build parameters from a provider, falling back to defaults key by key.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        let defaults = Self::default();

        let chip_height = EstimatorConfig {
            enabled: param_bool(provider, "chip_height.enabled", true),
            pixel_size_mm: param_f64(
                provider,
                "chip_height.pixel_size_mm",
                DEFAULT_PIXEL_SIZE_MM,
            ),
        };

        let combined = CombinedConfig {
            base_height: param_f64(provider, "combined.base_height", 0.0),
            left_top: corner_check(provider, "lt"),
            right_top: corner_check(provider, "rt"),
            left_bottom: corner_check(provider, "lb"),
            right_bottom: corner_check(provider, "rb"),
            pitch: limit_band(provider, "combined.pitch"),
            roll: limit_band(provider, "combined.roll"),
        };

        let compensated = provider
            .get("comp3d.items")
            .map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|name| CompensatedLimit {
                        item: name.to_owned(),
                        compensation: param_f64(provider, &format!("comp3d.{name}.compensation"), 0.0),
                        limits: limit_band(provider, &format!("comp3d.{name}")),
                        enabled: param_bool(provider, &format!("comp3d.{name}.enabled"), true),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let pending_2d_threshold = Duration::from_secs_f64(
            param_f64(
                provider,
                "monitor.pending_2d_secs",
                defaults.pending_2d_threshold.as_secs_f64(),
            )
            .max(0.0),
        );

        Self {
            chip_height,
            combined,
            compensated,
            pending_2d_threshold,
        }
    }
}

fn corner_check(provider: &dyn ConfigProvider, corner: &str) -> CornerCheck {
    CornerCheck {
        compensation: param_f64(provider, &format!("combined.{corner}.compensation"), 0.0),
        limits: limit_band(provider, &format!("combined.{corner}")),
        ng_check: param_bool(provider, &format!("combined.{corner}.ng_check"), false),
    }
}

fn limit_band(provider: &dyn ConfigProvider, prefix: &str) -> LimitBand {
    LimitBand {
        lower: param_f64(provider, &format!("{prefix}.lower"), f64::NEG_INFINITY),
        upper: param_f64(provider, &format!("{prefix}.upper"), f64::INFINITY),
    }
}

/// Look up a float parameter, logging and falling back on parse failure.
pub fn param_f64(provider: &dyn ConfigProvider, key: &str, default: f64) -> f64 {
    match provider.get(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("config {key}={raw:?} is not a number, using {default}");
                default
            }
        },
        None => default,
    }
}

/// Look up a boolean parameter; accepts `true/false`, `1/0`, `on/off`.
pub fn param_bool(provider: &dyn ConfigProvider, key: &str, default: bool) -> bool {
    match provider.get(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => true,
            "false" | "0" | "off" | "no" => false,
            _ => {
                log::warn!("config {key}={raw:?} is not a boolean, using {default}");
                default
            }
        },
        None => default,
    }
}
