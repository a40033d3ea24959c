use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use chip_inspect::{
    DetectionCycleCoordinator, GatewayError, IoGateway, MapConfig, MeasurementItem,
    MeasurementSource, OutOfRangeLog, PendingTwoDMonitor, PlaneRole, LineRole, Line3, PlaneFit,
    StationParams, ThreeDOutcome, ThreeDRawItem, ToolResult, TwoDVerdict, HELPER_ITEM_NAMES,
};
use nalgebra::Point3;

#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<bool>>,
}

impl RecordingGateway {
    fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

impl IoGateway for RecordingGateway {
    fn set_detection_result(&self, is_ok: bool) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(is_ok);
        Ok(())
    }
}

fn station(params: StationParams) -> (Arc<DetectionCycleCoordinator>, Arc<RecordingGateway>) {
    let _ = chip_inspect::init_with_level(log::LevelFilter::Debug);
    let gateway = Arc::new(RecordingGateway::default());
    let coordinator = Arc::new(DetectionCycleCoordinator::new(params, gateway.clone()));
    (coordinator, gateway)
}

fn two_d_item(name: &str, value: f64) -> MeasurementItem {
    MeasurementItem::checked(name, value, 0.0, 10_000.0, MeasurementSource::TwoD)
}

fn ok_two_d() -> TwoDVerdict {
    TwoDVerdict::ok(vec![two_d_item("width", 3.1), two_d_item("height", 2.2)])
}

fn two_d_with_pose() -> TwoDVerdict {
    let mut items = vec![two_d_item("width", 3.1), two_d_item("height", 2.2)];
    for (name, value) in [
        ("pkg_center_x", 1000.0),
        ("pkg_center_y", 1000.0),
        ("chip_center_x", 1100.0),
        ("chip_center_y", 900.0),
        ("chip_angle", 0.0),
        ("chip_length", 3000.0),
        ("chip_width", 2000.0),
    ] {
        items.push(two_d_item(name, value));
    }
    TwoDVerdict::ok(items)
}

fn raw_3d(name: &str, value: &str, out_of_range: bool) -> ThreeDRawItem {
    ThreeDRawItem {
        name: name.to_owned(),
        value_string: value.to_owned(),
        is_out_of_range: out_of_range,
        tool_index: 1,
        lower_limit: Some(0.0),
        upper_limit: Some(1.0),
    }
}

fn edge_tools() -> Vec<ToolResult> {
    vec![
        ToolResult::Plane {
            role: PlaneRole::Chip,
            fit: PlaneFit {
                a: 0.1,
                b: -0.05,
                c: 2.0,
            },
        },
        ToolResult::Plane {
            role: PlaneRole::Reference,
            fit: PlaneFit::level(2.0),
        },
        ToolResult::Line {
            role: LineRole::BottomEdge,
            line: Line3 {
                start: Point3::new(10.0, 5.0, 2.75),
                end: Point3::new(13.0, 5.0, 3.05),
            },
        },
        ToolResult::Line {
            role: LineRole::LeftEdge,
            line: Line3 {
                start: Point3::new(10.0, 5.0, 2.75),
                end: Point3::new(10.0, 7.0, 2.65),
            },
        },
        ToolResult::Intersection {
            point: Point3::new(10.0, 5.0, 2.75),
        },
    ]
}

#[test]
fn end_to_end_out_of_range_3d_item_fails_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(RecordingGateway::default());
    let coordinator = DetectionCycleCoordinator::new(StationParams::default(), gateway.clone())
        .with_recorder(OutOfRangeLog::for_lot(dir.path(), "LOTA"));

    let token = coordinator.start_cycle(true);
    assert!(coordinator
        .complete_2d(token, ok_two_d())
        .unwrap()
        .is_none());

    let outcome = ThreeDOutcome {
        success: true,
        items: vec![raw_3d("G1", "1.4", true)],
        tools: Vec::new(),
        error_message: None,
    };
    let result = coordinator.complete_3d(token, outcome).unwrap().unwrap();

    assert!(!result.is_ok);
    assert_eq!(result.defect_type, "G1");
    assert_eq!(result.description, "3D: G1");
    assert_eq!(gateway.calls(), vec![false]);

    // merged view: two 2D items then the 3D item, rows 1..=3 with no gaps
    let merged = coordinator.merged_view();
    assert_eq!(merged.len(), 3);
    for (idx, item) in merged.iter().enumerate() {
        assert_eq!(item.row, idx + 1);
    }
    assert_eq!(merged[2].name, "G1");

    // the NG cycle was appended to the lot record
    let records = OutOfRangeLog::for_lot(dir.path(), "LOTA").load().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].image_number, token.id());
    assert_eq!(records[0].defect_type, "G1");
    assert_eq!(records[0].items.len(), 1);
    assert_eq!(records[0].items[0].item_name, "G1");
    assert_eq!(records[0].items[0].value, 1.4);
}

#[test]
fn simultaneous_completions_judge_exactly_once() {
    for _ in 0..32 {
        let (coordinator, gateway) = station(StationParams::default());
        let token = coordinator.start_cycle(true);
        let barrier = Arc::new(Barrier::new(2));

        let c2 = coordinator.clone();
        let b2 = barrier.clone();
        let t2 = thread::spawn(move || {
            b2.wait();
            c2.complete_2d(token, ok_two_d()).unwrap()
        });
        let c3 = coordinator.clone();
        let b3 = barrier.clone();
        let t3 = thread::spawn(move || {
            b3.wait();
            c3.complete_3d(
                token,
                ThreeDOutcome {
                    success: true,
                    items: vec![raw_3d("G1", "0.2", false)],
                    tools: Vec::new(),
                    error_message: None,
                },
            )
            .unwrap()
        });

        let results = [t2.join().unwrap(), t3.join().unwrap()];
        let judged = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(judged, 1, "exactly one completion may trigger judgement");
        assert_eq!(gateway.calls(), vec![true]);
    }
}

#[test]
fn derived_tilt_failure_reaches_the_verdict() {
    // tight tilt bands; corner NG checks stay off
    let cfg = MapConfig::from([
        ("combined.pitch.lower", "-0.001"),
        ("combined.pitch.upper", "0.001"),
        ("combined.roll.lower", "-0.001"),
        ("combined.roll.upper", "0.001"),
    ]);
    let (coordinator, gateway) = station(StationParams::from_provider(&cfg));

    let token = coordinator.start_cycle(true);
    coordinator.complete_2d(token, two_d_with_pose()).unwrap();
    let outcome = ThreeDOutcome {
        success: true,
        items: Vec::new(),
        tools: edge_tools(),
        error_message: None,
    };
    let result = coordinator.complete_3d(token, outcome).unwrap().unwrap();

    // plane 0.1x-0.05y over the reconstructed corners: pitch 0.3, roll -0.1
    assert!(!result.is_ok);
    assert_eq!(result.defect_type, "pitch");
    assert_eq!(result.description, "综合项目: pitch; 综合项目: roll");
    assert_eq!(gateway.calls(), vec![false]);

    // pose helpers feed geometry only and never surface in the merged view
    let merged = coordinator.merged_view();
    assert!(merged
        .iter()
        .all(|i| !HELPER_ITEM_NAMES.contains(&i.name.as_str())));
    let pitch = merged.iter().find(|i| i.name == "pitch").unwrap();
    assert!((pitch.value - 0.3).abs() < 1e-6);
    assert_eq!(pitch.source, MeasurementSource::Combined);
}

#[test]
fn monitor_alerts_on_lagging_2d_without_touching_judgement() {
    let (coordinator, gateway) = station(StationParams::default());
    let monitor = PendingTwoDMonitor::new(Duration::ZERO);

    let token = coordinator.start_cycle(true);
    coordinator
        .complete_3d(
            token,
            ThreeDOutcome {
                success: true,
                items: vec![raw_3d("G1", "0.2", false)],
                tools: Vec::new(),
                error_message: None,
            },
        )
        .unwrap();

    assert!(monitor.check(coordinator.progress()), "2D is lagging");
    assert!(gateway.calls().is_empty(), "advisory only, no judgement");

    // the lagging completion still closes the cycle normally
    let result = coordinator.complete_2d(token, ok_two_d()).unwrap().unwrap();
    assert!(result.is_ok);
    assert_eq!(gateway.calls(), vec![true]);
    assert!(
        !monitor.check(coordinator.progress()),
        "idle station raises no alert"
    );
}
