//! Inspection-station controller for semiconductor package quality control.
//!
//! Fuses the 2D image-measurement pipeline and the external 3D laser-profile
//! service into exactly one pass/fail decision per inspected unit, then
//! drives the factory IO gateway. The pure geometry and judgement code lives
//! in `chip-inspect-core`; this crate owns the per-cycle state, the
//! collaborator seams and the persistence of NG records.
//!
//! Typical wiring:
//!
//! ```
//! use std::sync::Arc;
//! use chip_inspect::{
//!     DetectionCycleCoordinator, GatewayError, IoGateway, MapConfig, StationParams, TwoDVerdict,
//! };
//!
//! struct Plc;
//! impl IoGateway for Plc {
//!     fn set_detection_result(&self, _is_ok: bool) -> Result<(), GatewayError> {
//!         Ok(())
//!     }
//! }
//!
//! let params = StationParams::from_provider(&MapConfig::new());
//! let station = DetectionCycleCoordinator::new(params, Arc::new(Plc));
//! let token = station.start_cycle(false);
//! let result = station
//!     .complete_2d(token, TwoDVerdict::ok(vec![]))
//!     .expect("live cycle")
//!     .expect("cycle complete");
//! assert!(result.is_ok);
//! ```

mod cache;
mod collaborators;
mod config;
mod coordinator;
mod monitor;
mod record;

pub use cache::{MeasurementCache, HELPER_ITEM_NAMES};
pub use collaborators::{
    ConfigProvider, GatewayError, IoGateway, LineRole, MapConfig, PlaneRole, ThreeDOutcome,
    ThreeDRawItem, ToolResult,
};
pub use config::{param_bool, param_f64, CompensatedLimit, StationParams};
pub use coordinator::{
    CycleError, CycleToken, DetectionCycleCoordinator, THREE_D_FAILURE_ITEM,
};
pub use monitor::{AlertSink, CycleProgress, LogAlertSink, PendingTwoDMonitor};
pub use record::{OutOfRangeEntry, OutOfRangeLog, OutOfRangeRecord, RecordError};

#[cfg(feature = "tracing")]
pub use chip_inspect_core::init_tracing;

pub use chip_inspect_core::{
    corner_by_label, init_with_level, ChipCorner, ChipHeightEstimator, ChipParams2D, ChipParams3D,
    CombinedConfig, CombinedMeasurementDeriver, CornerCheck, CornerLabel, EstimateSkip,
    EstimatorConfig, JudgementInput, JudgementResult, LimitBand, Line3, MeasurementItem,
    MeasurementSource, PlaneFit, SourceBreakdown, TwoDVerdict, UnifiedJudgementEngine,
};
