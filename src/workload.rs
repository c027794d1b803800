//! Synthetic contended workload used by the demo binary and benchmarks

use crate::bottleneck::Bottleneck;
use crate::detector::Detector;
use crate::error::{Result, SurveyError};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A handful of resources with different capacities
pub fn default_bottlenecks() -> Vec<Arc<Bottleneck>> {
    vec![
        Arc::new(Bottleneck::new("db.primary", 4)),
        Arc::new(Bottleneck::new("db.replica", 8)),
        Arc::new(Bottleneck::new("cache", 16)),
        Arc::new(Bottleneck::new("payment-api", 2)),
    ]
}

/// Totals of one workload run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub threads: usize,
    pub accesses: u64,
}

/// Hammer `bottlenecks` from `threads` workers until `duration` elapses
///
/// Each access picks a random bottleneck, holds one or two units for up to
/// half a millisecond and leaves.
pub fn run(
    detector: &Arc<Detector>,
    bottlenecks: &[Arc<Bottleneck>],
    threads: usize,
    duration: Duration,
) -> Result<WorkloadSummary> {
    if threads == 0 {
        return Err(SurveyError::InvalidArgument(
            "workload needs at least one thread".to_string(),
        ));
    }
    if bottlenecks.is_empty() {
        return Err(SurveyError::InvalidArgument(
            "workload needs at least one bottleneck".to_string(),
        ));
    }

    let deadline = Instant::now() + duration;
    let accesses: u64 = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|worker| {
                let detector = Arc::clone(detector);
                thread::Builder::new()
                    .name(format!("worker-{}", worker))
                    .spawn_scoped(scope, move || worker_loop(&detector, bottlenecks, deadline))
            })
            .collect();

        workers
            .into_iter()
            .filter_map(|spawned| match spawned {
                Ok(handle) => handle.join().ok(),
                Err(err) => {
                    tracing::warn!("cannot spawn worker: {}", err);
                    None
                }
            })
            .sum()
    });

    tracing::debug!(threads, accesses, "workload finished");
    Ok(WorkloadSummary { threads, accesses })
}

fn worker_loop(detector: &Arc<Detector>, bottlenecks: &[Arc<Bottleneck>], deadline: Instant) -> u64 {
    let mut rng = rand::thread_rng();
    let mut accesses = 0;

    while Instant::now() < deadline {
        let bottleneck = &bottlenecks[rng.gen_range(0..bottlenecks.len())];
        let units = rng.gen_range(1..=bottleneck.limit().clamp(1, 2));
        let hold = Duration::from_micros(rng.gen_range(50..500));

        match detector.enter_bottleneck_with_units(bottleneck, units) {
            Ok(guard) => {
                thread::sleep(hold);
                drop(guard);
                accesses += 1;
            }
            Err(err) => tracing::warn!("skipping access: {}", err),
        }
    }
    accesses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::{ProcessSurveyor, Surveyor};

    #[test]
    fn test_rejects_zero_threads() {
        let detector = Arc::new(Detector::new());
        let result = run(&detector, &default_bottlenecks(), 0, Duration::from_millis(1));
        assert!(matches!(result, Err(SurveyError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_no_bottlenecks() {
        let detector = Arc::new(Detector::new());
        assert!(run(&detector, &[], 1, Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_every_access_is_surveyed() {
        let detector = Arc::new(Detector::new());
        let surveyor = ProcessSurveyor::new(&detector, Some("workload"), None, None).unwrap();

        let summary = run(&detector, &default_bottlenecks(), 3, Duration::from_millis(40)).unwrap();

        assert_eq!(summary.threads, 3);
        assert!(summary.accesses > 0);
        assert_eq!(surveyor.report().total_accesses(), summary.accesses);
    }
}
