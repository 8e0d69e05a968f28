//! End-of-run result reporting
//!
//! The reporter runs only once the engine has left its timing paths: it
//! renders the summary artifact to the injected sink and carries the
//! machine-readable [`RunSummary`] back to the caller. The detail log
//! already holds the requested/effective settings blocks and the per-query
//! events emitted during the run.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::clock::wall_clock_unix_seconds;
use crate::engine::TestState;
use crate::error::{CargarError, Result};
use crate::recorder::{LatencyStatistics, RunMeasurements, Verdict};
use crate::settings::EffectiveSettings;
use crate::types::{Mode, Scenario};

/// Machine-readable record of a completed (or aborted) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// SUT display name.
    pub sut_name: String,
    /// Traffic pattern that was driven.
    pub scenario: Scenario,
    /// Purpose of the run.
    pub mode: Mode,
    /// Final engine state label (`DONE` or `ABORTED`).
    pub final_state: String,
    /// Whether the run met every service-level objective.
    pub pass: bool,
    /// Violated constraints, empty on a passing run.
    pub failures: Vec<String>,
    /// Latency distribution; `None` when no samples were recorded.
    pub statistics: Option<LatencyStatistics>,
    /// Measured throughput in samples per second.
    pub qps: f64,
    /// Time spent measuring, in milliseconds.
    pub measured_duration_ms: u64,
    /// Queries issued while measuring.
    pub queries_issued: u64,
    /// Samples issued while measuring.
    pub samples_issued: u64,
    /// Queries fully completed over the whole run.
    pub queries_completed: u64,
    /// Samples completed over the whole run.
    pub samples_completed: u64,
    /// MultiStream period boundaries skipped at the outstanding bound.
    pub dropped_frames: u64,
    /// Wall-clock seconds since the Unix epoch at reporting time.
    pub reported_at_unix_s: u64,
}

impl RunSummary {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sut_name: &str,
        settings: &EffectiveSettings,
        final_state: TestState,
        verdict: Verdict,
        statistics: Option<LatencyStatistics>,
        measurements: &RunMeasurements,
        queries_completed: u64,
        samples_completed: u64,
        dropped_frames: u64,
    ) -> Self {
        Self {
            sut_name: sut_name.to_string(),
            scenario: settings.scenario,
            mode: settings.mode,
            final_state: final_state.as_str().to_string(),
            pass: verdict.pass,
            failures: verdict.failures,
            statistics,
            qps: measurements.qps,
            measured_duration_ms: u64::try_from(measurements.measured_duration.as_millis())
                .unwrap_or(u64::MAX),
            queries_issued: measurements.queries_issued,
            samples_issued: measurements.samples_issued,
            queries_completed,
            samples_completed,
            dropped_frames,
            reported_at_unix_s: wall_clock_unix_seconds(),
        }
    }

    /// Render the summary artifact as `key : value` text.
    ///
    /// # Errors
    ///
    /// Propagates sink write failures as [`CargarError::LogOutput`].
    pub fn write_summary(
        &self,
        out: &mut (dyn Write + Send),
        settings: &EffectiveSettings,
    ) -> Result<()> {
        let mut write = |line: String| -> Result<()> {
            writeln!(out, "{line}").map_err(CargarError::from)
        };

        write("================================================".to_string())?;
        write("Load Generator Results Summary".to_string())?;
        write("================================================".to_string())?;
        write(format!("SUT name : {}", self.sut_name))?;
        write(format!("Scenario : {}", self.scenario))?;
        write(format!("Mode : {}", self.mode))?;
        write(format!("Final state : {}", self.final_state))?;
        write(format!(
            "Result is : {}",
            if self.pass { "VALID" } else { "INVALID" }
        ))?;
        for failure in &self.failures {
            write(format!("  * {failure}"))?;
        }
        write(format!("reported_at (unix s): {}", self.reported_at_unix_s))?;
        write(String::new())?;

        write(format!("qps : {}", self.qps))?;
        write(format!("measured_duration (ms): {}", self.measured_duration_ms))?;
        write(format!("queries_issued : {}", self.queries_issued))?;
        write(format!("samples_issued : {}", self.samples_issued))?;
        write(format!("queries_completed : {}", self.queries_completed))?;
        write(format!("samples_completed : {}", self.samples_completed))?;
        write(format!("dropped_frames : {}", self.dropped_frames))?;
        if let Some(stats) = &self.statistics {
            write(format!("latency_count : {}", stats.count))?;
            write(format!("min_latency (ns): {}", stats.min_ns))?;
            write(format!("max_latency (ns): {}", stats.max_ns))?;
            write(format!("mean_latency (ns): {}", stats.mean_ns))?;
            write(format!("50.00 percentile latency (ns): {}", stats.p50_ns))?;
            write(format!("90.00 percentile latency (ns): {}", stats.p90_ns))?;
            write(format!("95.00 percentile latency (ns): {}", stats.p95_ns))?;
            write(format!("99.00 percentile latency (ns): {}", stats.p99_ns))?;
            write(format!(
                "target percentile ({}) latency (ns): {}",
                stats.target_percentile, stats.target_percentile_ns
            ))?;
        }
        write(String::new())?;

        write("================================================".to_string())?;
        write("Test Parameters Used".to_string())?;
        write("================================================".to_string())?;
        for line in settings.summary_lines() {
            write(line)?;
        }
        Ok(())
    }
}
