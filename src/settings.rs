//! Requested and effective test settings
//!
//! [`RequestedSettings`] is the user-facing configuration surface: one knob
//! group per scenario plus run-wide overrides and seeds. The resolver derives
//! an immutable [`EffectiveSettings`] from it, the internal plan every other
//! component consumes.
//!
//! Error policy follows the two-tier design: a merely invalid value (for
//! example a negative target QPS) is reported through the detail sink and
//! replaced by its default so the run continues; an impossible combination
//! (mutually exclusive performance-issue flags, an out-of-range fixed sample
//! index) rejects construction outright.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CargarError, Result};
use crate::log::DetailSink;
use crate::qsl::QuerySampleLibrary;
use crate::types::{Mode, Scenario};

/// Slack factor applied when sizing the coalesced Offline query so the SUT
/// stays busy past the minimum duration.
const OFFLINE_SLACK: f64 = 1.1;

// ============================================================================
// RequestedSettings
// ============================================================================

/// User-facing test configuration.
///
/// Only the knob group matching `scenario` is consulted; the other groups are
/// carried so one config file can describe all four scenarios. A value of `0`
/// for `max_duration_ms` or `max_query_count` disables that bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedSettings {
    /// Traffic pattern to drive.
    pub scenario: Scenario,
    /// Purpose of the run.
    pub mode: Mode,

    /// SingleStream: expected per-query latency, used to derive the target
    /// rate (`target_qps = 1e9 / expected_latency_ns`).
    pub single_stream_expected_latency_ns: u64,
    /// SingleStream: percentile at which latency is judged.
    pub single_stream_target_latency_percentile: f64,

    /// MultiStream: query issue rate in queries per second.
    pub multi_stream_target_qps: f64,
    /// MultiStream: per-sample latency bound.
    pub multi_stream_target_latency_ns: u64,
    /// MultiStream: percentile at which latency is judged.
    pub multi_stream_target_latency_percentile: f64,
    /// MultiStream: samples carried by each query.
    pub multi_stream_samples_per_query: u64,
    /// MultiStream: bound on concurrently outstanding queries.
    pub multi_stream_max_async_queries: i64,

    /// Server: Poisson arrival rate in queries per second.
    pub server_target_qps: f64,
    /// Server: per-sample latency bound.
    pub server_target_latency_ns: u64,
    /// Server: percentile at which latency is judged.
    pub server_target_latency_percentile: f64,
    /// Server: merge queries whose scheduled time has already passed into the
    /// next issued batch instead of issuing them late one by one.
    pub server_coalesce_queries: bool,

    /// Offline: expected throughput used to size the single coalesced query.
    pub offline_expected_qps: f64,

    /// Minimum measuring time before the run may stop.
    pub min_duration_ms: u64,
    /// Hard stop on measuring time; `0` disables.
    pub max_duration_ms: u64,
    /// Minimum queries issued before the run may stop.
    pub min_query_count: u64,
    /// Hard stop on issued queries; `0` disables.
    pub max_query_count: u64,

    /// Seed of the library-shuffle RNG stream.
    pub qsl_rng_seed: u64,
    /// Seed of the per-query sample-selection RNG stream.
    pub sample_index_rng_seed: u64,
    /// Seed of the schedule-jitter RNG stream (Server arrivals).
    pub schedule_rng_seed: u64,
    /// Seed of the accuracy-log sampling RNG stream.
    pub accuracy_log_rng_seed: u64,
    /// Probability that a query's responses are copied into the detail log.
    pub accuracy_log_probability: f64,

    /// Diagnostic: issue every library sample exactly once across the run.
    pub performance_issue_unique: bool,
    /// Diagnostic: issue the same sample index in every query.
    pub performance_issue_same: bool,
    /// Sample index used when `performance_issue_same` is set.
    pub performance_issue_same_index: u64,

    /// Overrides the library's performance sample count when non-zero.
    pub performance_sample_count_override: u64,
}

impl Default for RequestedSettings {
    fn default() -> Self {
        Self {
            scenario: Scenario::SingleStream,
            mode: Mode::PerformanceOnly,
            single_stream_expected_latency_ns: 1_000_000,
            single_stream_target_latency_percentile: 0.9,
            multi_stream_target_qps: 10.0,
            multi_stream_target_latency_ns: 100_000_000,
            multi_stream_target_latency_percentile: 0.9,
            multi_stream_samples_per_query: 4,
            multi_stream_max_async_queries: 1,
            server_target_qps: 1.0,
            server_target_latency_ns: 100_000_000,
            server_target_latency_percentile: 0.99,
            server_coalesce_queries: false,
            offline_expected_qps: 1.0,
            min_duration_ms: 10_000,
            max_duration_ms: 0,
            min_query_count: 100,
            max_query_count: 0,
            qsl_rng_seed: 0,
            sample_index_rng_seed: 0,
            schedule_rng_seed: 0,
            accuracy_log_rng_seed: 0,
            accuracy_log_probability: 0.0,
            performance_issue_unique: false,
            performance_issue_same: false,
            performance_issue_same_index: 0,
            performance_sample_count_override: 0,
        }
    }
}

impl RequestedSettings {
    /// Write the `Requested Settings:` block to the detail sink.
    ///
    /// Only the knob group of the active scenario is listed, mirroring how
    /// the configuration is consumed.
    pub fn log_requested(&self, sink: &DetailSink) {
        sink.detail("");
        sink.detail("Requested Settings:");
        sink.detail(format!("Scenario : {}", self.scenario));
        sink.detail(format!("Test mode : {}", self.mode));
        match self.scenario {
            Scenario::SingleStream => {
                sink.detail(format!(
                    "single_stream_expected_latency_ns : {}",
                    self.single_stream_expected_latency_ns
                ));
                sink.detail(format!(
                    "single_stream_target_latency_percentile : {}",
                    self.single_stream_target_latency_percentile
                ));
            }
            Scenario::MultiStream | Scenario::MultiStreamFree => {
                sink.detail(format!(
                    "multi_stream_target_qps : {}",
                    self.multi_stream_target_qps
                ));
                sink.detail(format!(
                    "multi_stream_target_latency_ns : {}",
                    self.multi_stream_target_latency_ns
                ));
                sink.detail(format!(
                    "multi_stream_target_latency_percentile : {}",
                    self.multi_stream_target_latency_percentile
                ));
                sink.detail(format!(
                    "multi_stream_samples_per_query : {}",
                    self.multi_stream_samples_per_query
                ));
                sink.detail(format!(
                    "multi_stream_max_async_queries : {}",
                    self.multi_stream_max_async_queries
                ));
            }
            Scenario::Server => {
                sink.detail(format!("server_target_qps : {}", self.server_target_qps));
                sink.detail(format!(
                    "server_target_latency_ns : {}",
                    self.server_target_latency_ns
                ));
                sink.detail(format!(
                    "server_target_latency_percentile : {}",
                    self.server_target_latency_percentile
                ));
                sink.detail(format!(
                    "server_coalesce_queries : {}",
                    self.server_coalesce_queries
                ));
            }
            Scenario::Offline => {
                sink.detail(format!(
                    "offline_expected_qps : {}",
                    self.offline_expected_qps
                ));
            }
        }
        sink.detail(format!("min_duration_ms : {}", self.min_duration_ms));
        sink.detail(format!("max_duration_ms : {}", self.max_duration_ms));
        sink.detail(format!("min_query_count : {}", self.min_query_count));
        sink.detail(format!("max_query_count : {}", self.max_query_count));
        sink.detail(format!("qsl_rng_seed : {}", self.qsl_rng_seed));
        sink.detail(format!(
            "sample_index_rng_seed : {}",
            self.sample_index_rng_seed
        ));
        sink.detail(format!("schedule_rng_seed : {}", self.schedule_rng_seed));
        sink.detail(format!(
            "accuracy_log_rng_seed : {}",
            self.accuracy_log_rng_seed
        ));
        sink.detail(format!(
            "accuracy_log_probability : {}",
            self.accuracy_log_probability
        ));
        sink.detail(format!(
            "performance_issue_unique : {}",
            self.performance_issue_unique
        ));
        sink.detail(format!(
            "performance_issue_same : {}",
            self.performance_issue_same
        ));
        sink.detail(format!(
            "performance_issue_same_index : {}",
            self.performance_issue_same_index
        ));
        sink.detail(format!(
            "performance_sample_count_override : {}",
            self.performance_sample_count_override
        ));
        sink.detail("");
    }
}

// ============================================================================
// EffectiveSettings
// ============================================================================

/// The self-consistent internal plan derived from [`RequestedSettings`].
///
/// Immutable once constructed; shared read-only across every run thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    /// Traffic pattern to drive.
    pub scenario: Scenario,
    /// Purpose of the run.
    pub mode: Mode,
    /// Samples carried by each query (after Offline coalescing).
    pub samples_per_query: u64,
    /// Target issue rate in queries per second.
    pub target_qps: f64,
    /// Latency bound judged at `target_latency_percentile`; zero for Offline.
    pub target_latency: Duration,
    /// Percentile at which latency is judged.
    pub target_latency_percentile: f64,
    /// Bound on concurrently outstanding queries; `-1` means unbounded.
    pub max_async_queries: i64,
    /// Duration the Offline coalescing sized its query for; zeroed afterward.
    pub target_duration: Duration,
    /// Minimum measuring time before the run may stop.
    pub min_duration: Duration,
    /// Hard stop on measuring time; zero disables.
    pub max_duration: Duration,
    /// Minimum queries issued before the run may stop.
    pub min_query_count: u64,
    /// Hard stop on issued queries; zero disables.
    pub max_query_count: u64,
    /// Minimum samples the run must issue (`min_query_count * samples_per_query`).
    pub min_sample_count: u64,
    /// Seed of the library-shuffle RNG stream.
    pub qsl_rng_seed: u64,
    /// Seed of the per-query sample-selection RNG stream.
    pub sample_index_rng_seed: u64,
    /// Seed of the schedule-jitter RNG stream.
    pub schedule_rng_seed: u64,
    /// Seed of the accuracy-log sampling RNG stream.
    pub accuracy_log_rng_seed: u64,
    /// Probability that a query's responses are copied into the detail log.
    pub accuracy_log_probability: f64,
    /// Diagnostic: issue every library sample exactly once across the run.
    pub performance_issue_unique: bool,
    /// Diagnostic: issue the same sample index in every query.
    pub performance_issue_same: bool,
    /// Sample index used when `performance_issue_same` is set.
    pub performance_issue_same_index: u64,
    /// Size of the in-memory working set.
    pub performance_sample_count: u64,
    /// Server: merge already-due queries into the next issued batch.
    pub server_coalesce_queries: bool,
}

impl EffectiveSettings {
    /// Derive the effective plan from requested settings and the library.
    ///
    /// Invalid values recover to defaults with an error line on the detail
    /// sink; impossible combinations return [`CargarError::InvalidSettings`].
    ///
    /// # Errors
    ///
    /// Rejects mutually exclusive performance-issue flags and a fixed sample
    /// index outside the working set.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn resolve(
        requested: &RequestedSettings,
        qsl: &dyn QuerySampleLibrary,
        sink: &DetailSink,
    ) -> Result<Self> {
        let mut target_qps = 1.0_f64;
        let mut target_latency = Duration::ZERO;
        let mut target_latency_percentile = 0.9_f64;
        let mut max_async_queries = -1_i64;
        let mut samples_per_query = 1_u64;
        let mut target_duration = Duration::from_millis(requested.min_duration_ms);
        let mut min_query_count = requested.min_query_count;

        match requested.scenario {
            Scenario::SingleStream => {
                target_qps = 1e9 / requested.single_stream_expected_latency_ns as f64;
                max_async_queries = 1;
                target_latency_percentile = requested.single_stream_target_latency_percentile;
            }
            Scenario::MultiStream | Scenario::MultiStreamFree => {
                target_qps = requested.multi_stream_target_qps;
                target_latency = Duration::from_nanos(requested.multi_stream_target_latency_ns);
                max_async_queries = requested.multi_stream_max_async_queries;
                target_latency_percentile = requested.multi_stream_target_latency_percentile;
                samples_per_query = requested.multi_stream_samples_per_query;
            }
            Scenario::Server => {
                if requested.server_target_qps >= 0.0 {
                    target_qps = requested.server_target_qps;
                } else {
                    sink.error(format!(
                        "Invalid value for server_target_qps requested. : requested={}, using={target_qps}",
                        requested.server_target_qps
                    ));
                    tracing::warn!(
                        requested = requested.server_target_qps,
                        fallback = target_qps,
                        "invalid server_target_qps, using fallback"
                    );
                }
                target_latency = Duration::from_nanos(requested.server_target_latency_ns);
                max_async_queries = -1;
                target_latency_percentile = requested.server_target_latency_percentile;
            }
            Scenario::Offline => {
                if requested.offline_expected_qps >= 0.0 {
                    target_qps = requested.offline_expected_qps;
                } else {
                    sink.error(format!(
                        "Invalid value for offline_expected_qps requested. : requested={}, using={target_qps}",
                        requested.offline_expected_qps
                    ));
                    tracing::warn!(
                        requested = requested.offline_expected_qps,
                        fallback = target_qps,
                        "invalid offline_expected_qps, using fallback"
                    );
                }
                max_async_queries = -1;
            }
        }

        let performance_sample_count = if requested.performance_sample_count_override == 0 {
            qsl.performance_sample_count()
        } else {
            requested.performance_sample_count_override
        };
        if performance_sample_count == 0 {
            return Err(CargarError::InvalidSettings {
                field: "performance_sample_count",
                reason: "working set must hold at least one sample".to_string(),
            });
        }

        if requested.performance_issue_same && requested.performance_issue_unique {
            return Err(CargarError::InvalidSettings {
                field: "performance_issue_same",
                reason: "performance_issue_same and performance_issue_unique are mutually exclusive"
                    .to_string(),
            });
        }
        if requested.performance_issue_same_index >= performance_sample_count {
            return Err(CargarError::InvalidSettings {
                field: "performance_issue_same_index",
                reason: format!(
                    "index {} out of range for working set of {performance_sample_count} samples",
                    requested.performance_issue_same_index
                ),
            });
        }

        // Offline coalesces the whole run into one query. The slack factor
        // oversizes it so the SUT outlasts the minimum duration. Note the
        // max() compares min_query_count against a sample count; the
        // upstream-compatible behavior is kept on purpose.
        if requested.scenario == Scenario::Offline {
            let target_sample_count =
                (OFFLINE_SLACK * target_duration.as_secs_f64() * target_qps) as u64;
            samples_per_query =
                if requested.performance_issue_unique || requested.performance_issue_same {
                    performance_sample_count
                } else {
                    min_query_count.max(target_sample_count)
                };
            min_query_count = 1;
            target_duration = Duration::ZERO;
        }

        let min_sample_count = min_query_count * samples_per_query;

        Ok(Self {
            scenario: requested.scenario,
            mode: requested.mode,
            samples_per_query,
            target_qps,
            target_latency,
            target_latency_percentile,
            max_async_queries,
            target_duration,
            min_duration: Duration::from_millis(requested.min_duration_ms),
            max_duration: Duration::from_millis(requested.max_duration_ms),
            min_query_count,
            max_query_count: requested.max_query_count,
            min_sample_count,
            qsl_rng_seed: requested.qsl_rng_seed,
            sample_index_rng_seed: requested.sample_index_rng_seed,
            schedule_rng_seed: requested.schedule_rng_seed,
            accuracy_log_rng_seed: requested.accuracy_log_rng_seed,
            accuracy_log_probability: requested.accuracy_log_probability,
            performance_issue_unique: requested.performance_issue_unique,
            performance_issue_same: requested.performance_issue_same,
            performance_issue_same_index: requested.performance_issue_same_index,
            performance_sample_count,
            server_coalesce_queries: requested.server_coalesce_queries,
        })
    }

    /// Nanoseconds between scheduled issues at the target rate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn period_ns(&self) -> u64 {
        (1e9 / self.target_qps) as u64
    }

    /// Whether the number of outstanding queries is unbounded.
    #[must_use]
    pub fn unbounded_async(&self) -> bool {
        self.max_async_queries < 0
    }

    /// Write the `Effective Settings:` block to the detail sink.
    #[allow(clippy::cast_possible_truncation)]
    pub fn log_effective(&self, sink: &DetailSink) {
        sink.detail("");
        sink.detail("Effective Settings:");
        sink.detail(format!("Scenario : {}", self.scenario));
        sink.detail(format!("Test mode : {}", self.mode));
        for line in self.summary_lines() {
            sink.detail(line);
        }
        sink.detail(format!(
            "target_latency_percentile : {}",
            self.target_latency_percentile
        ));
        sink.detail(format!(
            "target_duration (ms): {}",
            self.target_duration.as_millis()
        ));
        sink.detail(format!("min_sample_count : {}", self.min_sample_count));
        sink.detail("");
    }

    /// The settings portion of the summary artifact, one `key : value` line
    /// per entry, in the canonical key order.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            format!("samples_per_query : {}", self.samples_per_query),
            format!("target_qps : {}", self.target_qps),
            format!("target_latency (ns): {}", self.target_latency.as_nanos()),
            format!("max_async_queries : {}", self.max_async_queries),
            format!("min_duration (ms): {}", self.min_duration.as_millis()),
            format!("max_duration (ms): {}", self.max_duration.as_millis()),
            format!("min_query_count : {}", self.min_query_count),
            format!("max_query_count : {}", self.max_query_count),
            format!("qsl_rng_seed : {}", self.qsl_rng_seed),
            format!("sample_index_rng_seed : {}", self.sample_index_rng_seed),
            format!("schedule_rng_seed : {}", self.schedule_rng_seed),
            format!("accuracy_log_rng_seed : {}", self.accuracy_log_rng_seed),
            format!("accuracy_log_probability : {}", self.accuracy_log_probability),
            format!("performance_issue_unique : {}", self.performance_issue_unique),
            format!("performance_issue_same : {}", self.performance_issue_same),
            format!(
                "performance_issue_same_index : {}",
                self.performance_issue_same_index
            ),
            format!(
                "performance_sample_count : {}",
                self.performance_sample_count
            ),
        ]
    }
}
