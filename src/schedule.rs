//! Deterministic sample schedule generation
//!
//! The schedule is the sequence `(query_index -> (sample_indices,
//! scheduled_issue_time))`. It is fully determined by the effective settings
//! and the RNG seeds: three independently seeded `StdRng` streams cover
//! per-query sample selection, Server arrival jitter, and accuracy-log
//! sampling (the library shuffle lives in [`crate::qsl`]). Re-creating a
//! generator with the same inputs reproduces the sequence bit for bit, and
//! [`ScheduleGenerator::seek`] replays to any query index, which is what the
//! determinism tests lean on.
//!
//! Issue-time rules per scenario:
//! - SingleStream: not pre-scheduled; the next query issues on completion.
//! - MultiStream / MultiStreamFree: fixed period `1 / target_qps`.
//! - Server: Poisson arrivals, inter-arrival times exponential at rate
//!   `target_qps` via inverse-transform sampling.
//! - Offline: everything in one query at `t = 0`.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::settings::EffectiveSettings;
use crate::types::{Mode, SampleIndex, Scenario};

// ============================================================================
// Schedule entries
// ============================================================================

/// One planned query: which samples, and when to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Position of this query in the schedule.
    pub query_index: u64,
    /// Library sample indices the query carries, in issue order.
    pub sample_indices: Vec<SampleIndex>,
    /// Scheduled issue time in nanoseconds from measuring start; zero for
    /// scenarios that issue on completion or all at once.
    pub scheduled_ns: u64,
    /// Whether this query's responses go to the accuracy log.
    pub accuracy_log: bool,
}

// ============================================================================
// Generator
// ============================================================================

/// Deterministic, seekable producer of [`ScheduleEntry`] values.
///
/// Infinite for the steady-state scenarios; finite for Offline (one query),
/// `performance_issue_unique` (one pass over the working set), and accuracy
/// windows (one pass per window, advanced with [`ScheduleGenerator::set_window`]).
pub struct ScheduleGenerator {
    settings: EffectiveSettings,
    loaded: Arc<Vec<SampleIndex>>,
    /// Scratch positions for the partial Fisher-Yates draw; reused across
    /// queries so steady-state generation does not allocate.
    scratch: Vec<usize>,
    selection_rng: StdRng,
    arrival_rng: StdRng,
    accuracy_rng: StdRng,
    next_query: u64,
    /// Cumulative Poisson arrival offset in seconds (Server only).
    arrival_offset_s: f64,
    /// Next position of the sequential walk (accuracy mode).
    sequential_cursor: usize,
    /// Queries remaining in the current accuracy window; `None` outside
    /// accuracy mode.
    window_remaining: Option<u64>,
}

impl ScheduleGenerator {
    /// Build a generator over the given loaded working set.
    #[must_use]
    pub fn new(settings: &EffectiveSettings, loaded: Arc<Vec<SampleIndex>>) -> Self {
        let scratch: Vec<usize> = (0..loaded.len()).collect();
        let window_remaining = (settings.mode == Mode::AccuracyOnly)
            .then(|| Self::queries_for_window(settings, loaded.len()));
        Self {
            selection_rng: StdRng::seed_from_u64(settings.sample_index_rng_seed),
            arrival_rng: StdRng::seed_from_u64(settings.schedule_rng_seed),
            accuracy_rng: StdRng::seed_from_u64(settings.accuracy_log_rng_seed),
            settings: settings.clone(),
            loaded,
            scratch,
            next_query: 0,
            arrival_offset_s: 0.0,
            sequential_cursor: 0,
            window_remaining,
        }
    }

    /// Total queries the schedule holds, when finite.
    ///
    /// `None` for the steady-state scenarios, which produce entries until the
    /// engine stops pulling.
    #[must_use]
    pub fn finite_query_count(&self) -> Option<u64> {
        if self.settings.scenario == Scenario::Offline {
            return Some(1);
        }
        if self.settings.performance_issue_unique {
            let psc = self.settings.performance_sample_count;
            let spq = self.settings.samples_per_query.max(1);
            return Some(psc.div_ceil(spq));
        }
        self.window_remaining.map(|_| {
            Self::queries_for_window(&self.settings, self.loaded.len())
        })
    }

    /// Swap in a freshly loaded window (accuracy-mode rotation).
    ///
    /// Resets the sequential walk for the new window; the arrival and
    /// accuracy-log streams keep running so the full-run sequence stays
    /// deterministic.
    pub fn set_window(&mut self, loaded: Arc<Vec<SampleIndex>>) {
        self.scratch = (0..loaded.len()).collect();
        self.sequential_cursor = 0;
        if self.settings.mode == Mode::AccuracyOnly {
            self.window_remaining = Some(Self::queries_for_window(&self.settings, loaded.len()));
        }
        self.loaded = loaded;
    }

    /// Replay the generator to `query_index`, discarding earlier entries.
    ///
    /// All RNG streams are rewound to their seeds first, so seeking is
    /// equivalent to building a fresh generator and pulling `query_index`
    /// entries.
    pub fn seek(&mut self, query_index: u64) {
        *self = Self::new(&self.settings, Arc::clone(&self.loaded));
        for _ in 0..query_index {
            if self.next().is_none() {
                break;
            }
        }
    }

    /// Produce the next `count` entries eagerly.
    ///
    /// Steady-state scenarios pre-generate their horizon with this so the
    /// issue scheduler never touches the RNGs on the critical path.
    #[must_use]
    pub fn pregenerate(&mut self, count: u64) -> Vec<ScheduleEntry> {
        let mut entries = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            match self.next() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        entries
    }

    fn queries_for_window(settings: &EffectiveSettings, window_len: usize) -> u64 {
        (window_len as u64).div_ceil(settings.samples_per_query.max(1))
    }

    /// Samples for one query, honoring the performance-issue overrides.
    fn draw_samples(&mut self) -> Vec<SampleIndex> {
        let spq = usize::try_from(self.settings.samples_per_query.max(1)).unwrap_or(1);

        if self.settings.performance_issue_same {
            return vec![self.settings.performance_issue_same_index; spq];
        }
        if self.settings.performance_issue_unique {
            let psc = self.settings.performance_sample_count;
            let start = self.next_query * self.settings.samples_per_query.max(1);
            let end = (start + self.settings.samples_per_query.max(1)).min(psc);
            return (start..end).collect();
        }
        if self.settings.mode == Mode::AccuracyOnly {
            return self.draw_sequential(spq);
        }
        self.draw_uniform(spq)
    }

    /// Sequential walk over the loaded window; every loaded sample is issued
    /// exactly once per window.
    fn draw_sequential(&mut self, spq: usize) -> Vec<SampleIndex> {
        let len = self.loaded.len();
        let end = (self.sequential_cursor + spq).min(len);
        let samples = self.loaded[self.sequential_cursor..end].to_vec();
        self.sequential_cursor = end;
        samples
    }

    /// Uniform draw from the loaded set: without replacement within the query
    /// (partial Fisher-Yates over the scratch positions) as long as the query
    /// fits the working set, with replacement once it cannot.
    fn draw_uniform(&mut self, spq: usize) -> Vec<SampleIndex> {
        let len = self.loaded.len();
        if spq < len {
            for i in 0..spq {
                let j = self.selection_rng.gen_range(i..len);
                self.scratch.swap(i, j);
            }
            self.scratch[..spq].iter().map(|&p| self.loaded[p]).collect()
        } else if spq == len {
            for i in 0..len.saturating_sub(1) {
                let j = self.selection_rng.gen_range(i..len);
                self.scratch.swap(i, j);
            }
            self.scratch.iter().map(|&p| self.loaded[p]).collect()
        } else {
            // A coalesced query larger than the working set cannot avoid
            // repeats; fall back to independent uniform draws.
            (0..spq)
                .map(|_| self.loaded[self.selection_rng.gen_range(0..len)])
                .collect()
        }
    }

    /// Scheduled issue time for the query about to be produced.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn next_scheduled_ns(&mut self) -> u64 {
        match self.settings.scenario {
            Scenario::SingleStream | Scenario::Offline => 0,
            Scenario::MultiStream | Scenario::MultiStreamFree => {
                self.next_query.saturating_mul(self.settings.period_ns())
            }
            Scenario::Server => {
                let u: f64 = self.arrival_rng.gen::<f64>();
                self.arrival_offset_s += -(1.0 - u).ln() / self.settings.target_qps;
                (self.arrival_offset_s * 1e9) as u64
            }
        }
    }
}

impl Iterator for ScheduleGenerator {
    type Item = ScheduleEntry;

    fn next(&mut self) -> Option<ScheduleEntry> {
        if let Some(finite) = self.finite_query_count() {
            if self.settings.mode == Mode::AccuracyOnly {
                match self.window_remaining {
                    Some(0) | None => return None,
                    Some(ref mut remaining) => *remaining -= 1,
                }
            } else if self.next_query >= finite {
                return None;
            }
        }

        let query_index = self.next_query;
        let sample_indices = self.draw_samples();
        let scheduled_ns = self.next_scheduled_ns();
        let accuracy_log = self.settings.mode == Mode::AccuracyOnly
            || self.accuracy_rng.gen::<f64>() < self.settings.accuracy_log_probability;
        self.next_query += 1;

        Some(ScheduleEntry {
            query_index,
            sample_indices,
            scheduled_ns,
            accuracy_log,
        })
    }
}
