//! Completion collection and dispatch
//!
//! SUT completion threads call [`CompletionHandle::complete`] with batches of
//! responses. The completion timestamp is captured on entry, before any
//! pairing work, so downstream processing never inflates latencies. Pairing
//! goes through the lock-free query ring; the only lock touched is the
//! condition-variable wakeup taken when a query fully retires.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::engine::RunContext;
use crate::types::QuerySampleResponse;

/// Largest response payload copied into one accuracy-log line.
///
/// Larger payloads are truncated with the original size recorded; accuracy
/// checking consumes the SUT's own output files, the log is for spot audits.
const ACCURACY_LOG_MAX_BYTES: usize = 4096;

/// Clonable handle the SUT uses to report completed samples.
///
/// Callable from any thread, any number of threads at once, with responses in
/// any order.
#[derive(Clone)]
pub struct CompletionHandle {
    ctx: Arc<RunContext>,
}

impl CompletionHandle {
    pub(crate) fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Report a batch of completed samples.
    ///
    /// One timestamp is taken for the whole batch on entry. Each response's
    /// latency is `t_complete - t_issue` of its query; per-sample records are
    /// emitted individually even when the whole query shares one completion.
    ///
    /// A response for an unknown or already-retired query is a fatal
    /// invariant violation and aborts the run.
    pub fn complete(&self, responses: &[QuerySampleResponse]) {
        let t_complete_ns = self.ctx.clock.now_ns();
        for response in responses {
            self.complete_one(response, t_complete_ns);
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_one(&self, response: &QuerySampleResponse, t_complete_ns: u64) {
        let query_id = response.id.query_id();
        let record = match self.ctx.ring.complete_sample(query_id) {
            Ok(record) => record,
            Err(err) => {
                self.ctx.fatal(err);
                return;
            }
        };

        let latency_ns = t_complete_ns.saturating_sub(record.issued_ns) as i64;
        if record.is_timed() {
            self.ctx.recorder.record(query_id, latency_ns);
        }

        self.ctx.samples_completed.fetch_add(1, Ordering::AcqRel);
        self.ctx
            .last_completion_ns
            .fetch_max(t_complete_ns, Ordering::AcqRel);

        if record.wants_accuracy_log() {
            self.log_accuracy(response, latency_ns);
        }

        if record.query_finished {
            self.ctx.queries_completed.fetch_add(1, Ordering::AcqRel);
            self.ctx.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.ctx.notify_all();
        }
    }

    /// Copy the response payload into the detail log as hex.
    fn log_accuracy(&self, response: &QuerySampleResponse, latency_ns: i64) {
        let payload = read_response_payload(response);
        let mut hex = String::with_capacity(payload.len() * 2);
        for byte in &payload {
            use std::fmt::Write as _;
            let _ = write!(hex, "{byte:02x}");
        }
        self.ctx.sink.detail(format!(
            "Accuracy sample: query={}, position={}, latency_ns={latency_ns}, size={}, data={hex}",
            response.id.query_id(),
            response.id.position(),
            response.size,
        ));
    }
}

/// Snapshot the response bytes the SUT handed us.
///
/// The SUT guarantees `data` points at `size` valid bytes for the duration of
/// the completion call; this is the documented contract of
/// [`crate::sut::SystemUnderTest::issue_query`]'s completion path. A null or
/// empty payload yields an empty snapshot.
fn read_response_payload(response: &QuerySampleResponse) -> Vec<u8> {
    if response.data == 0 || response.size == 0 {
        return Vec::new();
    }
    let len = response.size.min(ACCURACY_LOG_MAX_BYTES);
    // SAFETY: the SUT keeps the buffer valid until `complete` returns, and
    // `len` never exceeds the size it reported.
    let bytes = unsafe { std::slice::from_raw_parts(response.data as *const u8, len) };
    bytes.to_vec()
}
