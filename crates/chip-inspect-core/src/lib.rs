//! Core types and computations for the chip inspection station.
//!
//! This crate is intentionally small and purely computational. It does *not*
//! talk to the 2D engine, the 3D service or the IO gateway; it only defines
//! the measurement data model, the chip-corner geometry and the final
//! judgement merge that the station crate orchestrates.

mod corners;
mod derive;
mod estimator;
mod judgement;
mod logger;
mod measurement;
mod params;

pub use corners::{corner_by_label, ChipCorner, CornerLabel};
pub use derive::{CombinedConfig, CombinedMeasurementDeriver, CornerCheck, LimitBand};
pub use estimator::{
    ChipHeightEstimator, EstimateSkip, EstimatorConfig, DEFAULT_PIXEL_SIZE_MM,
};
pub use judgement::{
    JudgementInput, JudgementResult, SourceBreakdown, TwoDVerdict, UnifiedJudgementEngine,
};
pub use measurement::{MeasurementItem, MeasurementSource};
pub use params::{rotate2, ChipParams2D, ChipParams3D, Line3, PlaneFit};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
