//! Shared mocks for integration tests: a library stub and SUTs with
//! controllable completion behavior.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use cargar::{
    CompletionHandle, QuerySample, QuerySampleLibrary, QuerySampleResponse, SampleIndex,
    SystemUnderTest,
};

/// Library stub with a fixed working-set size; load/unload are no-ops.
pub struct MockLibrary {
    total: u64,
    performance: u64,
    pub loads: AtomicU64,
    pub unloads: AtomicU64,
}

impl MockLibrary {
    pub fn new(total: u64, performance: u64) -> Self {
        Self {
            total,
            performance,
            loads: AtomicU64::new(0),
            unloads: AtomicU64::new(0),
        }
    }
}

impl QuerySampleLibrary for MockLibrary {
    fn total_sample_count(&self) -> u64 {
        self.total
    }

    fn performance_sample_count(&self) -> u64 {
        self.performance
    }

    fn load_samples_to_ram(&self, samples: &[SampleIndex]) {
        self.loads.fetch_add(samples.len() as u64, Ordering::Relaxed);
    }

    fn unload_samples_from_ram(&self, samples: &[SampleIndex]) {
        self.unloads
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
    }
}

/// Busy-wait with a coarse sleep for the bulk of the interval so the
/// simulated latency is precise to well under a millisecond.
pub fn precise_wait(duration: Duration) {
    let start = Instant::now();
    if duration > Duration::from_micros(500) {
        std::thread::sleep(duration - Duration::from_micros(500));
    }
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// How a [`MockSut`] delivers completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStyle {
    /// Complete inside `issue_query`, after simulating the latency inline.
    Inline,
    /// Complete from a spawned thread after the simulated latency.
    Threaded,
}

/// SUT stub with a fixed per-query latency.
pub struct MockSut {
    latency: Duration,
    style: CompletionStyle,
    /// Sample indices of every measured query (warmup excluded), in issue
    /// order.
    pub issued_indices: Mutex<Vec<SampleIndex>>,
    pub queries_seen: AtomicU64,
    pub flush_calls: AtomicU64,
    pub reported_latencies: AtomicU64,
}

impl MockSut {
    pub fn new(latency: Duration, style: CompletionStyle) -> Self {
        Self {
            latency,
            style,
            issued_indices: Mutex::new(Vec::new()),
            queries_seen: AtomicU64::new(0),
            flush_calls: AtomicU64::new(0),
            reported_latencies: AtomicU64::new(0),
        }
    }
}

impl SystemUnderTest for MockSut {
    fn name(&self) -> &str {
        "mock-sut"
    }

    fn issue_query(&self, samples: &[QuerySample], completions: &CompletionHandle) {
        self.queries_seen.fetch_add(1, Ordering::Relaxed);
        // Query id 0 is the warmup query; keep it out of the ledger.
        if samples.first().is_some_and(|s| s.id.query_id() != 0) {
            let mut guard = self.issued_indices.lock().expect("lock");
            guard.extend(samples.iter().map(|s| s.index));
        }
        let responses: Vec<QuerySampleResponse> = samples
            .iter()
            .map(|s| QuerySampleResponse {
                id: s.id,
                data: 0,
                size: 0,
            })
            .collect();
        match self.style {
            CompletionStyle::Inline => {
                precise_wait(self.latency);
                completions.complete(&responses);
            }
            CompletionStyle::Threaded => {
                let latency = self.latency;
                let completions = completions.clone();
                std::thread::spawn(move || {
                    precise_wait(latency);
                    completions.complete(&responses);
                });
            }
        }
    }

    fn flush_queries(&self) {
        self.flush_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn report_latency_results(&self, latencies_ns: &[i64]) {
        self.reported_latencies
            .store(latencies_ns.len() as u64, Ordering::Relaxed);
    }
}
