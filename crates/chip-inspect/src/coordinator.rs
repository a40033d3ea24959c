//! Per-cycle orchestration.
//!
//! The coordinator owns the only mutable state in the station: the active
//! cycle's completion flags and the measurement cache. A single mutex guards
//! both, so the "completion predicate holds" check and the judgement run are
//! atomic with respect to the two pipeline callbacks — near-simultaneous
//! completions can neither lose the trigger nor fire it twice.
//!
//! State machine: Idle → CycleRunning → (judgement + IO dispatch) → Idle.
//! `reset` forces Idle; a callback carrying a stale cycle token is discarded
//! with a warning and can never re-trigger judgement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};

#[cfg(feature = "tracing")]
use tracing::instrument;

use chip_inspect_core::{
    ChipHeightEstimator, CombinedMeasurementDeriver, JudgementInput, JudgementResult,
    MeasurementItem, MeasurementSource, TwoDVerdict, UnifiedJudgementEngine,
};

use crate::cache::MeasurementCache;
use crate::collaborators::{IoGateway, ThreeDOutcome};
use crate::config::{CompensatedLimit, StationParams};
use crate::monitor::CycleProgress;
use crate::record::{OutOfRangeEntry, OutOfRangeLog, OutOfRangeRecord};

/// Synthetic NG item recorded when the 3D service fails while 3D was
/// expected; the cycle then fails closed through the normal 3D source.
pub const THREE_D_FAILURE_ITEM: &str = "3d_service_failure";

/// Opaque handle identifying one inspection cycle. Collaborator callbacks
/// must present the token they were issued at cycle start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CycleToken {
    id: u64,
}

impl CycleToken {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Why a completion signal was discarded.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CycleError {
    #[error("no inspection cycle is running")]
    NotRunning,
    #[error("stale completion for cycle {got}, current cycle is {current}")]
    StaleCycle { got: u64, current: u64 },
    #[error("duplicate {pipeline} completion for the current cycle")]
    DuplicateCompletion { pipeline: &'static str },
}

#[derive(Debug)]
struct ActiveCycle {
    id: u64,
    expect_3d: bool,
    done_2d: bool,
    done_3d: bool,
    started: Instant,
    three_d_done_at: Option<Instant>,
    two_d: Option<TwoDVerdict>,
}

impl ActiveCycle {
    fn is_complete(&self) -> bool {
        self.done_2d && (!self.expect_3d || self.done_3d)
    }
}

#[derive(Debug, Default)]
struct Inner {
    cycle: Option<ActiveCycle>,
    cache: MeasurementCache,
    /// 3D inclusion for merged views after the cycle tore down.
    expect_3d_view: bool,
}

/// Orchestrates one judgement per inspection cycle; the only component that
/// may trigger the judgement engine or the IO gateway.
pub struct DetectionCycleCoordinator {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    gateway: Arc<dyn IoGateway>,
    estimator: ChipHeightEstimator,
    deriver: CombinedMeasurementDeriver,
    engine: UnifiedJudgementEngine,
    compensated: Vec<CompensatedLimit>,
    recorder: Option<OutOfRangeLog>,
}

impl DetectionCycleCoordinator {
    pub fn new(params: StationParams, gateway: Arc<dyn IoGateway>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(0),
            gateway,
            estimator: ChipHeightEstimator::new(params.chip_height),
            deriver: CombinedMeasurementDeriver::new(params.combined),
            engine: UnifiedJudgementEngine,
            compensated: params.compensated,
            recorder: None,
        }
    }

    /// Attach the per-lot out-of-range log.
    pub fn with_recorder(mut self, recorder: OutOfRangeLog) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Begin a new cycle, invalidating any still-running one. Both cache
    /// slices are cleared so nothing carries over between units.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn start_cycle(&self, expect_3d: bool) -> CycleToken {
        let mut inner = self.lock();
        // allocated under the lock: a racing start can never install an older
        // id after a newer token was handed out
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = &inner.cycle {
            log::warn!(
                "cycle {} abandoned by new trigger (2D done: {}, 3D done: {})",
                previous.id,
                previous.done_2d,
                previous.done_3d
            );
        }
        inner.cache.clear_2d();
        inner.cache.clear_3d();
        inner.expect_3d_view = expect_3d;
        inner.cycle = Some(ActiveCycle {
            id,
            expect_3d,
            done_2d: false,
            done_3d: false,
            started: Instant::now(),
            three_d_done_at: None,
            two_d: None,
        });
        log::info!("cycle {id} started (expect 3D: {expect_3d})");
        CycleToken { id }
    }

    /// Whether detection callbacks are currently meaningful. False outside a
    /// running cycle (e.g. configuration mode); callers discard the callback.
    pub fn should_process_detection(&self) -> bool {
        self.lock().cycle.is_some()
    }

    /// Ingest the 2D engine's verdict for the given cycle. Returns the final
    /// judgement when this completion satisfied the cycle's predicate.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, verdict), fields(cycle = token.id()))
    )]
    pub fn complete_2d(
        &self,
        token: CycleToken,
        verdict: TwoDVerdict,
    ) -> Result<Option<JudgementResult>, CycleError> {
        let mut inner = self.lock();
        let cycle = Self::current_cycle(&mut inner, token)?;
        if cycle.done_2d {
            log::warn!("duplicate 2D completion for cycle {}", token.id);
            return Err(CycleError::DuplicateCompletion { pipeline: "2D" });
        }
        cycle.done_2d = true;
        cycle.two_d = Some(verdict.clone());
        inner
            .cache
            .set_cached_2d(verdict.items, &self.estimator);
        let outcome = self.finish_if_complete(&mut inner);
        drop(inner);
        Ok(outcome.map(|o| self.dispatch(o)))
    }

    /// Ingest the 3D service's reply for the given cycle. A failed reply is
    /// still a completion: it fails closed as an NG 3D item.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, outcome), fields(cycle = token.id()))
    )]
    pub fn complete_3d(
        &self,
        token: CycleToken,
        outcome: ThreeDOutcome,
    ) -> Result<Option<JudgementResult>, CycleError> {
        let mut inner = self.lock();
        let cycle = Self::current_cycle(&mut inner, token)?;
        if cycle.done_3d {
            log::warn!("duplicate 3D completion for cycle {}", token.id);
            return Err(CycleError::DuplicateCompletion { pipeline: "3D" });
        }
        cycle.done_3d = true;
        cycle.three_d_done_at = Some(Instant::now());

        let mut items: Vec<MeasurementItem> = outcome
            .items
            .iter()
            .map(|raw| {
                MeasurementItem::new(
                    raw.name.clone(),
                    raw.parsed_value(),
                    raw.lower_limit.unwrap_or(f64::NEG_INFINITY),
                    raw.upper_limit.unwrap_or(f64::INFINITY),
                    raw.is_out_of_range,
                    MeasurementSource::ThreeD,
                )
                .with_tool_index(raw.tool_index)
            })
            .collect();
        if !outcome.success {
            log::error!(
                "3D service failed for cycle {}: {}",
                token.id,
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
            items.push(MeasurementItem::new(
                THREE_D_FAILURE_ITEM,
                0.0,
                0.0,
                0.0,
                true,
                MeasurementSource::ThreeD,
            ));
        }
        let tools = if outcome.success { outcome.tools } else { Vec::new() };
        inner.cache.set_cached_3d(items, &tools, &self.estimator);
        let finished = self.finish_if_complete(&mut inner);
        drop(inner);
        Ok(finished.map(|o| self.dispatch(o)))
    }

    /// Force Idle. In-flight hardware operations are not cancelled; their
    /// late callbacks are rejected by token comparison.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if let Some(cycle) = inner.cycle.take() {
            log::info!("cycle {} reset to idle", cycle.id);
        }
        inner.cache.clear_2d();
        inner.cache.clear_3d();
    }

    /// Merged operator view of the latest measurements.
    pub fn merged_view(&self) -> Vec<MeasurementItem> {
        let inner = self.lock();
        inner.cache.merged_view(inner.expect_3d_view)
    }

    /// Progress snapshot for the advisory monitor.
    pub fn progress(&self) -> Option<CycleProgress> {
        let inner = self.lock();
        inner.cycle.as_ref().map(|c| CycleProgress {
            cycle_id: c.id,
            done_2d: c.done_2d,
            done_3d: c.done_3d,
            since_3d_done: c.three_d_done_at.map(|at| at.elapsed()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicked holder leaves consistent state: recover the guard
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_cycle<'a>(
        inner: &'a mut Inner,
        token: CycleToken,
    ) -> Result<&'a mut ActiveCycle, CycleError> {
        match inner.cycle.as_mut() {
            None => {
                log::warn!("completion for cycle {} discarded: idle", token.id);
                Err(CycleError::NotRunning)
            }
            Some(cycle) if cycle.id != token.id => {
                log::warn!(
                    "stale completion for cycle {} discarded, current is {}",
                    token.id,
                    cycle.id
                );
                Err(CycleError::StaleCycle {
                    got: token.id,
                    current: cycle.id,
                })
            }
            Some(cycle) => Ok(cycle),
        }
    }

    /// Run derivation and judgement if the cycle's completion predicate now
    /// holds. Called with the state lock held, so the check and the run are
    /// one atomic step; recording and IO dispatch happen afterwards, outside
    /// the lock, so a slow collaborator never blocks the next cycle.
    fn finish_if_complete(&self, inner: &mut Inner) -> Option<CycleOutcome> {
        if !inner.cycle.as_ref().is_some_and(ActiveCycle::is_complete) {
            return None;
        }
        let cycle = inner.cycle.take()?;
        let elapsed = cycle.started.elapsed();

        if let Some(corners) = inner.cache.corners().copied() {
            match self.deriver.derive(&corners) {
                Some(items) => inner.cache.set_combined(items),
                None => log::warn!("combined derivation skipped: corner set incomplete"),
            }
        }

        let compensated = if cycle.expect_3d {
            compensated_items(inner.cache.three_d_items(), &self.compensated)
        } else {
            Vec::new()
        };
        // fails closed: a completion without a stored verdict judges as NG
        let two_d = cycle.two_d.unwrap_or_default();
        let result = self.engine.evaluate(&JudgementInput {
            two_d: &two_d,
            three_d_enabled: cycle.expect_3d,
            three_d_raw: inner.cache.three_d_items(),
            three_d_compensated: &compensated,
            combined: inner.cache.combined_items(),
        });

        log::info!(
            "cycle {} judged {} in {:.3}s{}",
            cycle.id,
            if result.is_ok { "OK" } else { "NG" },
            elapsed.as_secs_f64(),
            if result.is_ok {
                String::new()
            } else {
                format!(" ({})", result.description)
            }
        );

        let record = if !result.is_ok && self.recorder.is_some() {
            Some(ng_record(cycle.id, &result, inner, &compensated))
        } else {
            None
        };

        Some(CycleOutcome {
            cycle_id: cycle.id,
            result,
            record,
        })
    }

    /// Persist the NG record and drive the IO gateway. Runs without the state
    /// lock; both failure paths are logged and never retried.
    fn dispatch(&self, outcome: CycleOutcome) -> JudgementResult {
        if let (Some(recorder), Some(record)) = (&self.recorder, &outcome.record) {
            if let Err(err) = recorder.append(record) {
                log::error!("out-of-range record not persisted: {err}");
            }
        }
        if let Err(err) = self.gateway.set_detection_result(outcome.result.is_ok) {
            // no retry: re-emitting a stale verdict is unsafe
            log::error!(
                "IO gateway dispatch failed for cycle {}: {err}",
                outcome.cycle_id
            );
        }
        outcome.result
    }
}

/// Judged cycle awaiting recording and IO dispatch.
struct CycleOutcome {
    cycle_id: u64,
    result: JudgementResult,
    record: Option<OutOfRangeRecord>,
}

/// Re-evaluate configured 3D quantities with compensation and operator
/// limits. A NaN value (unparseable service string) always trips the limit.
fn compensated_items(
    three_d: &[MeasurementItem],
    limits: &[CompensatedLimit],
) -> Vec<MeasurementItem> {
    limits
        .iter()
        .filter(|l| l.enabled)
        .filter_map(|l| {
            let raw = three_d.iter().find(|i| i.name == l.item)?;
            let value = raw.value + l.compensation;
            Some(MeasurementItem::new(
                l.item.clone(),
                value,
                l.limits.lower,
                l.limits.upper,
                !l.limits.contains(value),
                MeasurementSource::ThreeDCompensated,
            ))
        })
        .collect()
}

fn ng_record(
    cycle_id: u64,
    result: &JudgementResult,
    inner: &Inner,
    compensated: &[MeasurementItem],
) -> OutOfRangeRecord {
    let items = inner
        .cache
        .merged_view(inner.expect_3d_view)
        .iter()
        .chain(compensated)
        .filter(|i| i.out_of_range)
        .map(OutOfRangeEntry::from)
        .collect();
    OutOfRangeRecord {
        image_number: cycle_id,
        defect_type: result.defect_type.clone(),
        detection_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GatewayError, ThreeDRawItem};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Weak};
    use std::thread;

    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<bool>>,
    }

    impl RecordingGateway {
        fn calls(&self) -> Vec<bool> {
            self.lock_calls().clone()
        }

        fn lock_calls(&self) -> MutexGuard<'_, Vec<bool>> {
            self.calls.lock().unwrap_or_else(|p| p.into_inner())
        }
    }

    impl IoGateway for RecordingGateway {
        fn set_detection_result(&self, is_ok: bool) -> Result<(), GatewayError> {
            self.lock_calls().push(is_ok);
            Ok(())
        }
    }

    fn coordinator() -> (DetectionCycleCoordinator, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let coordinator =
            DetectionCycleCoordinator::new(StationParams::default(), gateway.clone());
        (coordinator, gateway)
    }

    fn ok_2d() -> TwoDVerdict {
        TwoDVerdict::ok(vec![MeasurementItem::new(
            "width",
            1.0,
            0.5,
            1.5,
            false,
            MeasurementSource::TwoD,
        )])
    }

    fn ok_3d() -> ThreeDOutcome {
        ThreeDOutcome {
            success: true,
            items: vec![ThreeDRawItem {
                name: "G1".to_owned(),
                value_string: "0.2".to_owned(),
                is_out_of_range: false,
                tool_index: 1,
                lower_limit: Some(0.0),
                upper_limit: Some(0.5),
            }],
            tools: Vec::new(),
            error_message: None,
        }
    }

    #[test]
    fn judgement_fires_once_regardless_of_arrival_order() {
        for three_d_first in [false, true] {
            let (coordinator, gateway) = coordinator();
            let token = coordinator.start_cycle(true);

            let (first, second): (
                Result<Option<JudgementResult>, CycleError>,
                Result<Option<JudgementResult>, CycleError>,
            ) = if three_d_first {
                (
                    coordinator.complete_3d(token, ok_3d()),
                    coordinator.complete_2d(token, ok_2d()),
                )
            } else {
                (
                    coordinator.complete_2d(token, ok_2d()),
                    coordinator.complete_3d(token, ok_3d()),
                )
            };

            assert!(first.unwrap().is_none(), "first completion must not judge");
            let result = second.unwrap().expect("second completion judges");
            assert!(result.is_ok);
            assert_eq!(gateway.calls(), vec![true]);
            assert!(!coordinator.should_process_detection());
        }
    }

    #[test]
    fn cycle_without_3d_completes_on_2d_alone() {
        let (coordinator, gateway) = coordinator();
        let token = coordinator.start_cycle(false);
        let result = coordinator.complete_2d(token, ok_2d()).unwrap().unwrap();
        assert!(result.is_ok);
        assert_eq!(gateway.calls(), vec![true]);
    }

    #[test]
    fn reset_discards_late_completion() {
        let (coordinator, gateway) = coordinator();
        let token = coordinator.start_cycle(true);
        coordinator.reset();

        assert_eq!(
            coordinator.complete_2d(token, ok_2d()),
            Err(CycleError::NotRunning)
        );
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn stale_token_from_abandoned_cycle_is_rejected() {
        let (coordinator, gateway) = coordinator();
        let stale = coordinator.start_cycle(true);
        let current = coordinator.start_cycle(true);

        assert_eq!(
            coordinator.complete_2d(stale, ok_2d()),
            Err(CycleError::StaleCycle {
                got: stale.id(),
                current: current.id()
            })
        );
        assert!(gateway.calls().is_empty());

        // the live cycle still completes normally
        coordinator.complete_2d(current, ok_2d()).unwrap();
        let result = coordinator.complete_3d(current, ok_3d()).unwrap().unwrap();
        assert!(result.is_ok);
        assert_eq!(gateway.calls(), vec![true]);
    }

    #[test]
    fn duplicate_completion_cannot_retrigger() {
        let (coordinator, gateway) = coordinator();
        let token = coordinator.start_cycle(true);
        coordinator.complete_2d(token, ok_2d()).unwrap();
        assert_eq!(
            coordinator.complete_2d(token, ok_2d()),
            Err(CycleError::DuplicateCompletion { pipeline: "2D" })
        );
        coordinator.complete_3d(token, ok_3d()).unwrap();
        assert_eq!(gateway.calls(), vec![true]);
    }

    #[test]
    fn failed_3d_service_fails_closed() {
        let (coordinator, gateway) = coordinator();
        let token = coordinator.start_cycle(true);
        coordinator.complete_2d(token, ok_2d()).unwrap();
        let outcome = ThreeDOutcome {
            success: false,
            error_message: Some("laser head offline".to_owned()),
            ..ThreeDOutcome::default()
        };
        let result = coordinator.complete_3d(token, outcome).unwrap().unwrap();
        assert!(!result.is_ok);
        assert_eq!(result.defect_type, THREE_D_FAILURE_ITEM);
        assert_eq!(gateway.calls(), vec![false]);
    }

    #[test]
    fn compensated_limits_override_raw_3d_verdict() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut params = StationParams::default();
        params.compensated = vec![CompensatedLimit {
            item: "G1".to_owned(),
            compensation: 0.1,
            limits: chip_inspect_core::LimitBand {
                lower: 0.0,
                upper: 1.0,
            },
            enabled: true,
        }];
        let coordinator = DetectionCycleCoordinator::new(params, gateway.clone());

        let token = coordinator.start_cycle(true);
        coordinator.complete_2d(token, ok_2d()).unwrap();
        // raw item flagged NG by the service, but compensated value passes
        let outcome = ThreeDOutcome {
            success: true,
            items: vec![ThreeDRawItem {
                name: "G1".to_owned(),
                value_string: "0.6".to_owned(),
                is_out_of_range: true,
                tool_index: 1,
                lower_limit: Some(0.0),
                upper_limit: Some(0.5),
            }],
            tools: Vec::new(),
            error_message: None,
        };
        let result = coordinator.complete_3d(token, outcome).unwrap().unwrap();
        assert!(result.is_ok, "compensated pass supersedes the raw NG");
        assert_eq!(gateway.calls(), vec![true]);
    }

    #[test]
    fn racing_starts_leave_the_newest_token_live() {
        for _ in 0..32 {
            let (coordinator, gateway) = coordinator();
            let barrier = Barrier::new(2);
            let tokens = thread::scope(|s| {
                let a = s.spawn(|| {
                    barrier.wait();
                    coordinator.start_cycle(false)
                });
                let b = s.spawn(|| {
                    barrier.wait();
                    coordinator.start_cycle(false)
                });
                [a.join().unwrap(), b.join().unwrap()]
            });

            // whichever start was issued last must own the live cycle
            let newest = tokens.into_iter().max_by_key(CycleToken::id).unwrap();
            let result = coordinator.complete_2d(newest, ok_2d()).unwrap();
            assert!(result.is_some(), "latest issued token must be current");
            assert_eq!(gateway.calls(), vec![true]);
        }
    }

    struct ReentrantGateway {
        station: Mutex<Option<Weak<DetectionCycleCoordinator>>>,
        rows_seen: AtomicUsize,
    }

    impl IoGateway for ReentrantGateway {
        fn set_detection_result(&self, _is_ok: bool) -> Result<(), GatewayError> {
            let station = self.station.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(coordinator) = station.as_ref().and_then(Weak::upgrade) {
                self.rows_seen
                    .store(coordinator.merged_view().len(), Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn gateway_callback_reads_station_state_without_blocking() {
        let gateway = Arc::new(ReentrantGateway {
            station: Mutex::new(None),
            rows_seen: AtomicUsize::new(0),
        });
        let coordinator = Arc::new(DetectionCycleCoordinator::new(
            StationParams::default(),
            gateway.clone(),
        ));
        *gateway.station.lock().unwrap() = Some(Arc::downgrade(&coordinator));

        let token = coordinator.start_cycle(false);
        let result = coordinator.complete_2d(token, ok_2d()).unwrap().unwrap();
        assert!(result.is_ok);
        // the dispatch path runs unlocked, so the callback saw the cycle's item
        assert_eq!(gateway.rows_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_station_discards_detections() {
        let (coordinator, _gateway) = coordinator();
        assert!(!coordinator.should_process_detection());
        let token = coordinator.start_cycle(true);
        assert!(coordinator.should_process_detection());
        coordinator.complete_2d(token, ok_2d()).unwrap();
        assert!(coordinator.should_process_detection());
        coordinator.reset();
        assert!(!coordinator.should_process_detection());
    }
}
