//! System-under-test interface
//!
//! The SUT is the inference engine being benchmarked. The load generator
//! hands it queries and a completion handle; the SUT calls back with
//! responses from any thread, in any order. A query issued is a query
//! measured: the generator never retries and never cancels.

use crate::collector::CompletionHandle;
use crate::types::QuerySample;

/// The inference engine under load.
///
/// Implementations must be callable from the issue-scheduler thread while
/// completions run on their own threads; all three methods take `&self`.
pub trait SystemUnderTest: Send + Sync {
    /// Display name used in the summary header.
    fn name(&self) -> &str;

    /// Submit one query.
    ///
    /// Dispatch is synchronous: the call may return before, after, or during
    /// completion of the work. Every sample must eventually be completed
    /// exactly once through `completions`, echoing the sample's id. The
    /// samples slice is only valid for the duration of the call.
    fn issue_query(&self, samples: &[QuerySample], completions: &CompletionHandle);

    /// Hint that no further queries will be issued.
    ///
    /// Called once at drain entry so the SUT can flush any batching queues.
    fn flush_queries(&self);

    /// Receive the run's raw latency samples after the run completes.
    ///
    /// Called once in the `DONE` state with one signed nanosecond value per
    /// measured sample, in completion order.
    fn report_latency_results(&self, latencies_ns: &[i64]);
}
