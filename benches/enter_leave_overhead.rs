//! Enter/leave hot path benchmark
//!
//! Measures what instrumented code pays per access: clock read, access id,
//! "entered" publish, "exited" publish and every subscribed surveyor's fold.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench enter_leave_overhead
//! ```

use chokepoint::bottleneck::Bottleneck;
use chokepoint::detector::Detector;
use chokepoint::distributor::CallContextDistributor;
use chokepoint::survey::{CallContextSurveyor, ProcessSurveyor, TimeWindowSurveyor};
use chokepoint::timer::ManualTimer;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

/// Benchmark: enter and leave with nobody listening
///
/// Baseline for the cost of the detector alone.
fn bench_enter_leave_unobserved(c: &mut Criterion) {
    let detector = Arc::new(Detector::new());
    let db = Arc::new(Bottleneck::new("db", 8));

    c.bench_function("enter_leave_unobserved", |b| {
        b.iter(|| {
            let guard = detector.enter_bottleneck(black_box(&db));
            black_box(guard.finish());
        });
    });
}

/// Benchmark: enter and leave with N process surveyors subscribed
fn bench_enter_leave_process_surveyors(c: &mut Criterion) {
    let mut group = c.benchmark_group("enter_leave_process_surveyors");

    for surveyors in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(surveyors),
            &surveyors,
            |b, &surveyors| {
                let detector = Arc::new(Detector::new());
                let db = Arc::new(Bottleneck::new("db", 8));
                let _subscribed: Vec<_> = (0..surveyors)
                    .map(|_| ProcessSurveyor::new(&detector, None, None, None).unwrap())
                    .collect();

                b.iter(|| {
                    let guard = detector.enter_bottleneck(black_box(&db));
                    black_box(guard.finish());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: enter and leave inside a call context with a surveyor
fn bench_enter_leave_call_context(c: &mut Criterion) {
    let detector = Arc::new(Detector::new());
    let context = Arc::new(CallContextDistributor::new(&detector));
    let _surveyor = CallContextSurveyor::new(&context, None, None, None).unwrap();
    let db = Arc::new(Bottleneck::new("db", 8));
    let _entered = context.enter();

    c.bench_function("enter_leave_call_context", |b| {
        b.iter(|| {
            let guard = detector.enter_bottleneck(black_box(&db));
            black_box(guard.finish());
        });
    });
}

/// Benchmark: enter and leave feeding a time-window surveyor
///
/// Includes the open-access registry insert and remove.
fn bench_enter_leave_time_window(c: &mut Criterion) {
    let detector = Arc::new(Detector::new());
    let _surveyor = TimeWindowSurveyor::new(
        &detector,
        Duration::from_secs(60),
        Box::new(ManualTimer::new()),
        None,
        None,
        |_| {},
    )
    .unwrap();
    let db = Arc::new(Bottleneck::new("db", 8));

    c.bench_function("enter_leave_time_window", |b| {
        b.iter(|| {
            let guard = detector.enter_bottleneck(black_box(&db));
            black_box(guard.finish());
        });
    });
}

criterion_group!(
    benches,
    bench_enter_leave_unobserved,
    bench_enter_leave_process_surveyors,
    bench_enter_leave_call_context,
    bench_enter_leave_time_window
);
criterion_main!(benches);
