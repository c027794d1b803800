// End-to-end survey scenarios through the public API
//
// Clock: ManualClock at 1000 ticks per second, so "t = 0.5" is tick 500.

use chokepoint::bottleneck::Bottleneck;
use chokepoint::clock::ManualClock;
use chokepoint::config::SurveyConfig;
use chokepoint::detector::Detector;
use chokepoint::distributor::CallContextDistributor;
use chokepoint::survey::{
    CallContextSurveyor, ProcessSurveyor, SurveyWindow, Surveyor, TimeWindowSurveyor,
};
use chokepoint::timer::ManualTimer;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn manual_detector() -> (Arc<ManualClock>, Arc<Detector>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let detector = Arc::new(Detector::with_clock(clock.clone()));
    (clock, detector)
}

/// Single access, process surveyor without filters
#[test]
fn test_scenario_a_process_survey() {
    let (clock, detector) = manual_detector();
    let surveyor = ProcessSurveyor::new(&detector, None, None, None).unwrap();
    let db = Arc::new(Bottleneck::new("db", 1));

    let guard = detector.enter_bottleneck(&db);
    clock.advance_ticks(5);
    guard.finish();

    let hottest = surveyor.most_utilized_bottleneck().unwrap();
    assert_eq!(hottest.access_count(), 1);
    assert_eq!(hottest.limit_used(), 5);

    let report = surveyor.report();
    assert_eq!(report.bottlenecks.len(), 1);
    assert!((report.bottlenecks[0].utilization - 1.0).abs() < 1e-9);
}

/// Same workload, bottleneck denied by pattern
#[test]
fn test_scenario_b_denied_process_survey() {
    let (clock, detector) = manual_detector();
    let surveyor = ProcessSurveyor::new(&detector, None, None, Some("^db$")).unwrap();
    let db = Arc::new(Bottleneck::new("db", 1));

    let guard = detector.enter_bottleneck(&db);
    clock.advance_ticks(5);
    guard.finish();

    assert!(surveyor.most_utilized_bottlenecks(10).is_empty());
    assert!(surveyor.most_utilized_bottleneck().is_err());
}

/// Access from t=0.5 to t=1.5 across one-second windows
#[test]
fn test_scenario_c_rotating_windows() {
    let (clock, detector) = manual_detector();
    let timer = ManualTimer::new();
    let completed: Arc<Mutex<Vec<Arc<SurveyWindow>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&completed);
    let _surveyor = TimeWindowSurveyor::new(
        &detector,
        Duration::from_secs(1),
        Box::new(timer.clone()),
        None,
        None,
        move |window| sink.lock().unwrap().push(window),
    )
    .unwrap();
    let db = Arc::new(Bottleneck::new("db", 1));

    clock.advance(Duration::from_millis(500));
    let guard = detector.enter_bottleneck(&db);
    clock.advance(Duration::from_millis(500));
    timer.fire();
    clock.advance(Duration::from_millis(500));
    let finished = guard.finish();
    clock.advance(Duration::from_millis(500));
    timer.fire();

    let windows = completed.lock().unwrap();
    assert_eq!(windows.len(), 2);

    let first = windows[0].survey().get("db").unwrap();
    let second = windows[1].survey().get("db").unwrap();
    assert!(first.limit_used() > 0);
    assert!(second.limit_used() > 0);
    assert_eq!(first.limit_used() + second.limit_used(), finished.limit_used());
    assert_eq!(first.access_count() + second.access_count(), 1);
    assert!(first.end().unwrap() <= second.start());

    assert_eq!(windows[0].report().window.unwrap().start, "1970-01-01T00:00:00.000Z");
    assert_eq!(windows[1].report().window.unwrap().end, "1970-01-01T00:00:02.000Z");
}

#[test]
fn test_surveyors_of_every_scope_share_one_detector() {
    let (clock, detector) = manual_detector();
    let context = Arc::new(CallContextDistributor::new(&detector));
    let process = ProcessSurveyor::new(&detector, Some("all"), None, None).unwrap();
    let chain = CallContextSurveyor::new(&context, Some("checkout"), None, None).unwrap();
    let db = Arc::new(Bottleneck::new("db", 2));
    let cache = Arc::new(Bottleneck::new("cache", 8));

    context.scope(|| {
        let guard = detector.enter_bottleneck(&db);
        clock.advance_ticks(10);
        drop(guard);
    });
    let guard = detector.enter_bottleneck(&cache);
    clock.advance_ticks(10);
    drop(guard);

    assert_eq!(process.survey().ids(), vec!["db", "cache"]);
    assert_eq!(chain.survey().ids(), vec!["db"]);
    assert_eq!(process.most_utilized_bottleneck().unwrap().id(), "db");
}

#[test]
fn test_window_surveyor_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("survey.toml");
    std::fs::write(&path, "window_size_ms = 100\ndeny = \"^cache$\"\n").unwrap();
    let config = SurveyConfig::from_file(&path).unwrap();

    let (clock, detector) = manual_detector();
    let completed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&completed);
    let surveyor = TimeWindowSurveyor::from_config(
        &detector,
        &config,
        Box::new(ManualTimer::new()),
        move |window: Arc<SurveyWindow>| sink.lock().unwrap().push(window.report()),
    )
    .unwrap();

    for id in ["db", "cache"] {
        let bottleneck = Arc::new(Bottleneck::new(id, 1));
        let guard = detector.enter_bottleneck(&bottleneck);
        clock.advance_ticks(20);
        drop(guard);
    }
    clock.advance_ticks(60);
    surveyor.rotate();

    let reports = completed.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].bottlenecks.len(), 1);
    assert_eq!(reports[0].bottlenecks[0].id, "db");
    assert_eq!(reports[0].window.as_ref().unwrap().size_ms, 100);
    assert!(reports[0].scope_name.ends_with("+100ms"));
}
