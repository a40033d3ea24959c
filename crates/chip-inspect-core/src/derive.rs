use serde::{Deserialize, Serialize};

use crate::corners::{corner_by_label, ChipCorner, CornerLabel};
use crate::measurement::{MeasurementItem, MeasurementSource};

/// Limit pair for a derived quantity; always enforced.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitBand {
    pub lower: f64,
    pub upper: f64,
}

impl LimitBand {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Per-corner check configuration for the combined measurements.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerCheck {
    /// Operator-configured additive offset applied before limit evaluation.
    pub compensation: f64,
    pub limits: LimitBand,
    /// When off, the corner is reported in-range regardless of value.
    pub ng_check: bool,
}

impl Default for CornerCheck {
    fn default() -> Self {
        Self {
            compensation: 0.0,
            limits: LimitBand {
                lower: f64::NEG_INFINITY,
                upper: f64::INFINITY,
            },
            ng_check: false,
        }
    }
}

/// Configuration for [`CombinedMeasurementDeriver`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedConfig {
    /// PKG base height subtracted from every corner's relative height.
    pub base_height: f64,
    pub left_top: CornerCheck,
    pub right_top: CornerCheck,
    pub left_bottom: CornerCheck,
    pub right_bottom: CornerCheck,
    pub pitch: LimitBand,
    pub roll: LimitBand,
}

impl Default for CombinedConfig {
    fn default() -> Self {
        let wide = LimitBand {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        };
        Self {
            base_height: 0.0,
            left_top: CornerCheck::default(),
            right_top: CornerCheck::default(),
            left_bottom: CornerCheck::default(),
            right_bottom: CornerCheck::default(),
            pitch: wide,
            roll: wide,
        }
    }
}

impl CombinedConfig {
    pub fn corner(&self, label: CornerLabel) -> &CornerCheck {
        match label {
            CornerLabel::LeftTop => &self.left_top,
            CornerLabel::RightTop => &self.right_top,
            CornerLabel::LeftBottom => &self.left_bottom,
            CornerLabel::RightBottom => &self.right_bottom,
        }
    }
}

/// Turns the four reconstructed corners into pass/fail measurements:
/// one adjusted height per corner plus chip pitch and roll.
#[derive(Clone, Debug, Default)]
pub struct CombinedMeasurementDeriver {
    config: CombinedConfig,
}

impl CombinedMeasurementDeriver {
    pub fn new(config: CombinedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CombinedConfig {
        &self.config
    }

    /// Derive the six combined items, or nothing if the corner set is not
    /// exactly the four labels.
    pub fn derive(&self, corners: &[ChipCorner]) -> Option<Vec<MeasurementItem>> {
        if corners.len() != 4 {
            return None;
        }
        let mut adjusted = [0.0_f64; 4];
        let mut items = Vec::with_capacity(6);
        for (slot, label) in adjusted.iter_mut().zip(CornerLabel::ALL) {
            let corner = corner_by_label(corners, label)?;
            let check = self.config.corner(label);
            let value = corner.relative_height - self.config.base_height + check.compensation;
            let out_of_range = check.ng_check && !check.limits.contains(value);
            *slot = value;
            items.push(MeasurementItem::new(
                format!("height_{label}"),
                value,
                check.limits.lower,
                check.limits.upper,
                out_of_range,
                MeasurementSource::Combined,
            ));
        }

        let [lt, rt, lb, _rb] = adjusted;
        let pitch = lt - rt;
        let roll = lt - lb;
        items.push(MeasurementItem::checked(
            "pitch",
            pitch,
            self.config.pitch.lower,
            self.config.pitch.upper,
            MeasurementSource::Combined,
        ));
        items.push(MeasurementItem::checked(
            "roll",
            roll,
            self.config.roll.lower,
            self.config.roll.upper,
            MeasurementSource::Combined,
        ));
        Some(items)
    }
}
