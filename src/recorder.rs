//! Latency recording and percentile analysis
//!
//! Completions arrive on arbitrary SUT threads, so the recorder shards its
//! pre-sized accumulators by query id and merges them once at the end of the
//! run. Percentiles use the rank formula `ceil(p * N) - 1` over a sorted
//! copy, matching the convention the rest of the harness family uses for
//! tail-latency reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::EffectiveSettings;
use crate::types::Scenario;

/// Number of independent accumulators; completions shard by query id.
const SHARDS: usize = 16;

// ============================================================================
// Recorder
// ============================================================================

/// Sharded accumulator of signed nanosecond latency samples.
pub struct LatencyRecorder {
    shards: Vec<Mutex<Vec<i64>>>,
    enabled: AtomicBool,
}

impl LatencyRecorder {
    /// Pre-size the accumulators for the expected sample volume.
    ///
    /// The reservation is capped; a run that outgrows it reallocates off the
    /// issue thread rather than failing.
    #[must_use]
    pub fn with_expected_samples(expected: u64) -> Self {
        const MAX_RESERVED_PER_SHARD: usize = 1 << 21;
        let per_shard = usize::try_from(expected / SHARDS as u64 + 1)
            .unwrap_or(MAX_RESERVED_PER_SHARD)
            .min(MAX_RESERVED_PER_SHARD);
        let shards = (0..SHARDS)
            .map(|_| Mutex::new(Vec::with_capacity(per_shard)))
            .collect();
        Self {
            shards,
            enabled: AtomicBool::new(false),
        }
    }

    /// Start accepting samples (entering `MEASURING`).
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop accepting samples.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Append one latency sample for `query_id`.
    ///
    /// Ignored while disabled; the issue engine gates recording to the
    /// `MEASURING` state by publishing the timed flag with each query, and
    /// the recorder's own gate covers the warmup tail.
    pub fn record(&self, query_id: u64, latency_ns: i64) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let shard = usize::try_from(query_id).unwrap_or(0) % SHARDS;
        let mut guard = self.shards[shard]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.push(latency_ns);
    }

    /// Number of samples recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                s.lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .len()
            })
            .sum()
    }

    /// Whether no samples have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge all shards into one vector, emptying the recorder.
    #[must_use]
    pub fn drain(&self) -> Vec<i64> {
        let mut merged = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let mut guard = shard
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            merged.append(&mut guard);
        }
        merged
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Rank of the `p`-th percentile in a sorted sample of size `n`.
///
/// `ceil(p * n) - 1`, clamped into the sample.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn percentile_index(p: f64, n: usize) -> usize {
    ((p * n as f64).ceil() as usize)
        .saturating_sub(1)
        .min(n.saturating_sub(1))
}

/// Latency distribution summary over one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStatistics {
    /// Number of samples.
    pub count: usize,
    /// Smallest latency.
    pub min_ns: i64,
    /// Largest latency.
    pub max_ns: i64,
    /// Arithmetic mean.
    pub mean_ns: f64,
    /// Median.
    pub p50_ns: i64,
    /// 90th percentile.
    pub p90_ns: i64,
    /// 95th percentile.
    pub p95_ns: i64,
    /// 99th percentile.
    pub p99_ns: i64,
    /// Latency at the scenario's target percentile.
    pub target_percentile_ns: i64,
    /// The percentile `target_percentile_ns` was taken at.
    pub target_percentile: f64,
}

impl LatencyStatistics {
    /// Summarize a latency sample at the given target percentile.
    ///
    /// Returns `None` for an empty sample; an empty measuring window has no
    /// percentile and the caller decides how to report it.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[i64], target_percentile: f64) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();
        let sum: i128 = sorted.iter().map(|&v| i128::from(v)).sum();
        Some(Self {
            count: n,
            min_ns: sorted[0],
            max_ns: sorted[n - 1],
            mean_ns: sum as f64 / n as f64,
            p50_ns: sorted[percentile_index(0.50, n)],
            p90_ns: sorted[percentile_index(0.90, n)],
            p95_ns: sorted[percentile_index(0.95, n)],
            p99_ns: sorted[percentile_index(0.99, n)],
            target_percentile_ns: sorted[percentile_index(target_percentile, n)],
            target_percentile,
        })
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// Pass/fail decision with the constraints that drove it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether every constraint held.
    pub pass: bool,
    /// Human-readable description of each violated constraint.
    pub failures: Vec<String>,
}

impl Verdict {
    fn passing() -> Self {
        Self {
            pass: true,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, reason: String) {
        self.pass = false;
        self.failures.push(reason);
    }
}

/// Inputs to the pass/fail decision gathered by the engine at `DONE`.
#[derive(Debug, Clone, Copy)]
pub struct RunMeasurements {
    /// Measured throughput in samples per second.
    pub qps: f64,
    /// Time spent in `MEASURING`.
    pub measured_duration: Duration,
    /// Queries issued while measuring.
    pub queries_issued: u64,
    /// Samples issued while measuring.
    pub samples_issued: u64,
}

/// Decide pass/fail for a completed run.
///
/// Latency-bound scenarios require the target-percentile latency to meet the
/// bound (`1 / target_qps` for SingleStream, which has no explicit latency
/// setting); throughput-bound scenarios require the measured QPS to reach
/// `target_qps`. All scenarios except Offline also require the minimum
/// duration and query/sample counts to have been met.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn evaluate_verdict(
    settings: &EffectiveSettings,
    stats: Option<&LatencyStatistics>,
    measurements: &RunMeasurements,
) -> Verdict {
    let mut verdict = Verdict::passing();

    let target_latency_ns: i64 = match settings.scenario {
        Scenario::SingleStream => (1e9 / settings.target_qps) as i64,
        _ => i64::try_from(settings.target_latency.as_nanos()).unwrap_or(i64::MAX),
    };

    match settings.scenario {
        Scenario::SingleStream | Scenario::MultiStream | Scenario::Server => match stats {
            Some(stats) => {
                if stats.target_percentile_ns > target_latency_ns {
                    verdict.fail(format!(
                        "observed {} percentile latency {} ns exceeds target {} ns",
                        settings.target_latency_percentile,
                        stats.target_percentile_ns,
                        target_latency_ns
                    ));
                }
            }
            None => verdict.fail("no latency samples recorded".to_string()),
        },
        Scenario::MultiStreamFree | Scenario::Offline => {
            if measurements.qps < settings.target_qps {
                verdict.fail(format!(
                    "observed QPS {} below target {}",
                    measurements.qps, settings.target_qps
                ));
            }
        }
    }

    // Offline issues its whole budget in one query; duration floors do not
    // apply once the query is out.
    if settings.scenario != Scenario::Offline {
        if measurements.measured_duration < settings.min_duration {
            verdict.fail(format!(
                "measured duration {} ms below minimum {} ms",
                measurements.measured_duration.as_millis(),
                settings.min_duration.as_millis()
            ));
        }
        if measurements.queries_issued < settings.min_query_count {
            verdict.fail(format!(
                "issued {} queries, minimum is {}",
                measurements.queries_issued, settings.min_query_count
            ));
        }
        if measurements.samples_issued < settings.min_sample_count {
            verdict.fail(format!(
                "issued {} samples, minimum is {}",
                measurements.samples_issued, settings.min_sample_count
            ));
        }
    }

    verdict
}
