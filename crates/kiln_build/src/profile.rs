//! Per-pipeline build timing and the session report.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Accumulated build time for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTiming {
    /// The pipeline's name.
    pub pipeline: &'static str,

    /// Number of timed builds.
    pub count: u64,

    /// Total wall time across those builds.
    pub total: Duration,
}

/// Collects per-pipeline build timings across worker threads.
#[derive(Default)]
pub(crate) struct Profiler {
    entries: Mutex<HashMap<&'static str, (u64, Duration)>>,
}

impl Profiler {
    pub(crate) fn add(&self, pipeline: &'static str, elapsed: Duration) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(pipeline).or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 += elapsed;
    }

    /// Snapshot sorted by descending total time.
    pub(crate) fn snapshot(&self) -> Vec<PipelineTiming> {
        let mut timings: Vec<PipelineTiming> = self
            .entries
            .lock()
            .iter()
            .map(|(&pipeline, &(count, total))| PipelineTiming {
                pipeline,
                count,
                total,
            })
            .collect();
        timings.sort_by(|a, b| b.total.cmp(&a.total));
        timings
    }

    pub(crate) fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// Outcome summary of one build session.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Nodes that are up to date, including those just built.
    pub succeeded: usize,

    /// Nodes rebuilt this session, cache hits included.
    pub built: usize,

    /// Nodes whose build failed.
    pub failed: usize,

    /// Dirty nodes served from the build cache.
    pub cache_hits: usize,

    /// Dirty nodes that had to run their pipeline.
    pub cache_misses: usize,

    /// Per-pipeline timings, slowest first.
    pub timings: Vec<PipelineTiming>,
}
