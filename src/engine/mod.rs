//! Issue engine: run state machine and per-scenario issue loops
//!
//! The engine owns the run lifecycle
//! `INIT -> WARMUP -> MEASURING -> DRAINING -> DONE` (with `ABORTED`
//! reachable from anywhere on a fatal error) and drives one of the four
//! scenario loops on the issue-scheduler thread. Everything the completion
//! path needs lives in [`RunContext`], shared between the scheduler and the
//! SUT's completion threads.

use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::clock::RunClock;
use crate::collector::CompletionHandle;
use crate::error::{CargarError, Result};
use crate::log::{AsyncLogger, DetailSink, LogOutputs};
use crate::qsl::{plan_windows, CacheController, QuerySampleLibrary};
use crate::recorder::{evaluate_verdict, LatencyRecorder, LatencyStatistics, RunMeasurements};
use crate::report::RunSummary;
use crate::ring::{QueryRing, FLAG_ACCURACY_LOG, FLAG_TIMED};
use crate::schedule::{ScheduleEntry, ScheduleGenerator};
use crate::settings::{EffectiveSettings, RequestedSettings};
use crate::sut::SystemUnderTest;
use crate::types::{Mode, QuerySample, ResponseId, Scenario, MAX_SAMPLES_PER_QUERY};

mod multi_stream;
mod offline;
mod server;
mod single_stream;

/// Batch size used when the pre-generated schedule runs dry mid-run.
const REFILL_BATCH: u64 = 256;

/// Grace window applied at drain when the scenario has no target latency to
/// scale from (Offline, and SingleStream's derived bound of zero).
const DRAIN_GRACE_FLOOR: Duration = Duration::from_secs(10);

/// Slice length for condition-variable waits that must also observe state
/// changes (abort, duration bounds).
const WAIT_SLICE: Duration = Duration::from_millis(20);

// ============================================================================
// Run state
// ============================================================================

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TestState {
    /// Settings resolved, working set loading.
    Init = 0,
    /// Initial load confirmed; warmup query in flight.
    Warmup = 1,
    /// Latencies are being recorded.
    Measuring = 2,
    /// Issuing stopped; waiting for outstanding queries.
    Draining = 3,
    /// Run finished cleanly.
    Done = 4,
    /// Fatal error or drain timeout.
    Aborted = 5,
}

impl TestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Warmup,
            2 => Self::Measuring,
            3 => Self::Draining,
            4 => Self::Done,
            _ => Self::Aborted,
        }
    }

    /// Display label used in detail-log state transitions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Warmup => "WARMUP",
            Self::Measuring => "MEASURING",
            Self::Draining => "DRAINING",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        }
    }
}

// ============================================================================
// RunContext
// ============================================================================

/// State shared between the issue scheduler and the completion threads.
///
/// Everything on the completion hot path is an atomic; the only lock is the
/// condition-variable pairing used at the engine's declared suspension
/// points.
pub struct RunContext {
    /// Immutable run plan.
    pub settings: EffectiveSettings,
    /// Monotonic run clock.
    pub clock: RunClock,
    /// In-flight query records.
    pub ring: QueryRing,
    /// Latency accumulator.
    pub recorder: LatencyRecorder,
    /// Asynchronous detail sink.
    pub sink: DetailSink,

    state: AtomicU8,
    /// Queries issued but not yet fully completed.
    pub outstanding: AtomicI64,
    /// Queries issued while measuring.
    pub queries_issued: AtomicU64,
    /// Samples issued while measuring.
    pub samples_issued: AtomicU64,
    /// Queries fully completed (any state).
    pub queries_completed: AtomicU64,
    /// Samples completed (any state).
    pub samples_completed: AtomicU64,
    /// MultiStream period boundaries skipped because the outstanding bound
    /// was hit.
    pub dropped_frames: AtomicU64,

    /// Monotonic timestamp of the first measured issue (`u64::MAX` until
    /// set).
    pub first_issue_ns: AtomicU64,
    /// Monotonic timestamp of the latest measured issue.
    pub last_issue_ns: AtomicU64,
    /// Monotonic timestamp of the latest completion.
    pub last_completion_ns: AtomicU64,
    /// Monotonic timestamp of measuring entry.
    pub measuring_start_ns: AtomicU64,

    fatal: Mutex<Option<CargarError>>,
    notify_lock: Mutex<()>,
    notify_cv: Condvar,
}

impl RunContext {
    fn new(settings: EffectiveSettings, sink: DetailSink, expected_samples: u64) -> Self {
        Self {
            ring: QueryRing::for_max_async(settings.max_async_queries),
            recorder: LatencyRecorder::with_expected_samples(expected_samples),
            settings,
            clock: RunClock::start(),
            sink,
            state: AtomicU8::new(TestState::Init as u8),
            outstanding: AtomicI64::new(0),
            queries_issued: AtomicU64::new(0),
            samples_issued: AtomicU64::new(0),
            queries_completed: AtomicU64::new(0),
            samples_completed: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            first_issue_ns: AtomicU64::new(u64::MAX),
            last_issue_ns: AtomicU64::new(0),
            last_completion_ns: AtomicU64::new(0),
            measuring_start_ns: AtomicU64::new(0),
            fatal: Mutex::new(None),
            notify_lock: Mutex::new(()),
            notify_cv: Condvar::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TestState {
        TestState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: TestState) {
        let prev = TestState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            tracing::debug!(from = prev.as_str(), to = next.as_str(), "state transition");
            self.sink
                .detail(format!("State transition: {} -> {}", prev.as_str(), next.as_str()));
        }
    }

    /// Record a fatal invariant violation and move to `ABORTED`.
    ///
    /// The first error wins; later ones are only logged.
    pub fn fatal(&self, err: CargarError) {
        tracing::error!(error = %err, "fatal error, aborting run");
        self.sink.error(err.to_string());
        {
            let mut guard = self
                .fatal
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(err);
            }
        }
        self.set_state(TestState::Aborted);
        self.notify_all();
    }

    /// The first fatal error recorded, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<CargarError> {
        self.fatal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Wake every thread blocked on the completion condition variable.
    pub fn notify_all(&self) {
        let _guard = self
            .notify_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.notify_cv.notify_all();
    }

    /// Block until fewer than `limit` queries are outstanding.
    ///
    /// Returns `false` if the run aborted or `timeout` elapsed first. This is
    /// one of the engine's declared suspension points.
    pub fn wait_outstanding_below(&self, limit: i64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| self.clock.elapsed() + t);
        let mut guard = self
            .notify_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if self.outstanding.load(Ordering::Acquire) < limit {
                return true;
            }
            if self.state() == TestState::Aborted {
                return false;
            }
            if let Some(deadline) = deadline {
                if self.clock.elapsed() >= deadline {
                    return false;
                }
            }
            let (next_guard, _) = self
                .notify_cv
                .wait_timeout(guard, WAIT_SLICE)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard = next_guard;
        }
    }

    /// Elapsed measuring time.
    #[must_use]
    pub fn measuring_elapsed(&self) -> Duration {
        let start = self.measuring_start_ns.load(Ordering::Acquire);
        Duration::from_nanos(self.clock.now_ns().saturating_sub(start))
    }

    /// Whether the hard duration bound has been hit.
    #[must_use]
    pub fn max_duration_reached(&self) -> bool {
        !self.settings.max_duration.is_zero() && self.measuring_elapsed() >= self.settings.max_duration
    }

    /// Whether the scheduler must stop issuing and move to `DRAINING`.
    ///
    /// Accuracy runs stop when the schedule is exhausted instead of on the
    /// minimum-duration condition, but still honor the hard bounds.
    #[must_use]
    pub fn should_stop_measuring(&self) -> bool {
        if self.state() == TestState::Aborted {
            return true;
        }
        let issued = self.queries_issued.load(Ordering::Acquire);
        if self.max_duration_reached() {
            return true;
        }
        if self.settings.max_query_count > 0 && issued >= self.settings.max_query_count {
            return true;
        }
        if self.settings.mode == Mode::AccuracyOnly {
            return false;
        }
        self.measuring_elapsed() >= self.settings.min_duration
            && issued >= self.settings.min_query_count
    }
}

// ============================================================================
// Schedule feed
// ============================================================================

/// Pre-generated view of the schedule consumed by the scenario loops.
///
/// The steady-state horizon is produced before `MEASURING` so the scheduler
/// does not run the RNGs on the critical path; a refill only happens in the
/// rare case where the run outlives the pre-generated horizon.
pub struct ScheduleFeed {
    generator: ScheduleGenerator,
    queue: VecDeque<ScheduleEntry>,
    exhausted: bool,
}

impl ScheduleFeed {
    fn new(mut generator: ScheduleGenerator, horizon: u64) -> Self {
        let entries = generator.pregenerate(horizon);
        let exhausted = (entries.len() as u64) < horizon;
        Self {
            generator,
            queue: entries.into(),
            exhausted,
        }
    }

    /// Next schedule entry, refilling from the generator when needed.
    pub fn next_entry(&mut self) -> Option<ScheduleEntry> {
        if self.queue.is_empty() && !self.exhausted {
            let batch = self.generator.pregenerate(REFILL_BATCH);
            self.exhausted = (batch.len() as u64) < REFILL_BATCH;
            self.queue.extend(batch);
        }
        self.queue.pop_front()
    }

    /// Scheduled time of the next entry without consuming it.
    #[must_use]
    pub fn peek_scheduled_ns(&self) -> Option<u64> {
        self.queue.front().map(|e| e.scheduled_ns)
    }

    /// Swap in a freshly rotated accuracy window and refill.
    fn rotate_window(&mut self, window: Arc<Vec<u64>>) {
        self.generator.set_window(window);
        self.exhausted = false;
        let batch = self.generator.pregenerate(REFILL_BATCH);
        self.exhausted = (batch.len() as u64) < REFILL_BATCH;
        self.queue.extend(batch);
    }
}

// ============================================================================
// Issuer
// ============================================================================

/// Shared issue path used by all four scenario loops.
pub struct Issuer<'a> {
    ctx: &'a Arc<RunContext>,
    sut: &'a dyn SystemUnderTest,
    completions: CompletionHandle,
    /// Reused per issue; sized for `samples_per_query` up front.
    sample_buf: Vec<QuerySample>,
}

impl<'a> Issuer<'a> {
    fn new(ctx: &'a Arc<RunContext>, sut: &'a dyn SystemUnderTest) -> Self {
        let capacity = usize::try_from(ctx.settings.samples_per_query).unwrap_or(1);
        Self {
            ctx,
            sut,
            completions: CompletionHandle::new(Arc::clone(ctx)),
            sample_buf: Vec::with_capacity(capacity),
        }
    }

    /// Publish, timestamp, and dispatch one query built from `entry`.
    ///
    /// `query_id` is `entry.query_index + 1`; id 0 is reserved for warmup.
    pub fn issue(&mut self, entry: &ScheduleEntry) -> Result<()> {
        self.issue_samples(
            entry.query_index + 1,
            entry.scheduled_ns,
            &entry.sample_indices,
            entry.accuracy_log,
        )
    }

    fn issue_samples(
        &mut self,
        query_id: u64,
        scheduled_ns: u64,
        sample_indices: &[u64],
        accuracy_log: bool,
    ) -> Result<()> {
        let measuring = self.ctx.state() == TestState::Measuring;
        let mut flags = 0u8;
        if measuring {
            flags |= FLAG_TIMED;
        }
        if accuracy_log {
            flags |= FLAG_ACCURACY_LOG;
        }

        self.sample_buf.clear();
        self.sample_buf.reserve(sample_indices.len());
        for (position, &index) in sample_indices.iter().enumerate() {
            self.sample_buf.push(QuerySample {
                id: ResponseId::new(query_id, position as u64),
                index,
            });
        }

        let issued_ns = self.ctx.clock.now_ns();
        self.ctx
            .ring
            .publish(query_id, scheduled_ns, issued_ns, sample_indices.len() as u64, flags)?;
        self.ctx.outstanding.fetch_add(1, Ordering::AcqRel);

        if measuring {
            self.ctx.queries_issued.fetch_add(1, Ordering::AcqRel);
            self.ctx
                .samples_issued
                .fetch_add(sample_indices.len() as u64, Ordering::AcqRel);
            let _ = self.ctx.first_issue_ns.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |current| (current == u64::MAX).then_some(issued_ns),
            );
            self.ctx.last_issue_ns.store(issued_ns, Ordering::Release);
            self.ctx.sink.detail(format!(
                "Issued query {query_id} : scheduled_ns={scheduled_ns}, issued_ns={issued_ns}, samples={}",
                sample_indices.len()
            ));
        }

        self.sut.issue_query(&self.sample_buf, &self.completions);
        Ok(())
    }

    /// Issue the untimed warmup query and wait for it to complete.
    fn warmup(&mut self, window: &[u64]) -> Result<()> {
        let count = if self.ctx.settings.scenario == Scenario::Offline {
            1
        } else {
            usize::try_from(self.ctx.settings.samples_per_query).unwrap_or(1)
        };
        let indices: Vec<u64> = (0..count)
            .map(|i| window[i % window.len().max(1)])
            .collect();
        self.issue_samples(0, 0, &indices, false)?;
        if !self
            .ctx
            .wait_outstanding_below(1, Some(DRAIN_GRACE_FLOOR))
        {
            return Err(CargarError::Aborted {
                reason: "warmup query did not complete".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Run orchestration
// ============================================================================

/// Horizon of schedule entries to pre-generate for a steady-state run.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn schedule_horizon(settings: &EffectiveSettings) -> u64 {
    if settings.scenario == Scenario::Offline {
        return 1;
    }
    if settings.max_query_count > 0 {
        return settings.max_query_count;
    }
    let duration_bound = if settings.max_duration.is_zero() {
        settings.min_duration
    } else {
        settings.max_duration
    };
    let rate_based = (settings.target_qps * duration_bound.as_secs_f64() * 1.2).ceil() as u64;
    rate_based.max(settings.min_query_count) + 64
}

/// Drain outstanding queries, honoring the grace window.
fn drain(ctx: &Arc<RunContext>, sut: &dyn SystemUnderTest) -> Result<()> {
    ctx.set_state(TestState::Draining);
    sut.flush_queries();

    let grace = if ctx.settings.target_latency.is_zero() {
        DRAIN_GRACE_FLOOR
    } else {
        ctx.settings.target_latency * 10
    };
    if ctx.wait_outstanding_below(1, Some(grace)) {
        return Ok(());
    }
    if let Some(fatal) = ctx.fatal_error() {
        return Err(fatal);
    }
    Err(CargarError::DrainTimeout {
        waited_ms: u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
        outstanding: ctx.outstanding.load(Ordering::Acquire),
    })
}

/// Execute a full benchmark run.
///
/// This is the crate entry point re-exported as [`crate::run_test`].
///
/// # Errors
///
/// Returns construction-time rejections from settings resolution and fatal
/// invariant violations observed during the run. A drain timeout is reported
/// in the returned summary (`aborted`, `pass == false`) rather than as an
/// error, so the partial results stay accessible.
#[allow(clippy::too_many_lines, clippy::cast_precision_loss)]
pub fn run_test(
    sut: &Arc<dyn SystemUnderTest>,
    qsl: &Arc<dyn QuerySampleLibrary>,
    requested: &RequestedSettings,
    outputs: LogOutputs,
) -> Result<RunSummary> {
    let LogOutputs {
        summary: mut summary_out,
        detail,
    } = outputs;
    let logger = AsyncLogger::spawn(detail);
    let sink = logger.sink();

    requested.log_requested(&sink);
    let settings = EffectiveSettings::resolve(requested, qsl.as_ref(), &sink)?;
    settings.log_effective(&sink);

    if settings.samples_per_query > MAX_SAMPLES_PER_QUERY {
        return Err(CargarError::QueryTooLarge {
            samples: settings.samples_per_query,
            max: MAX_SAMPLES_PER_QUERY,
        });
    }

    tracing::info!(
        scenario = settings.scenario.as_str(),
        mode = settings.mode.as_str(),
        sut = sut.name(),
        "starting run"
    );

    // Working-set plan and initial load.
    let windows = plan_windows(&settings, qsl.total_sample_count());
    let mut controller = CacheController::new(Arc::clone(qsl), windows);
    controller.load_initial();

    let horizon = schedule_horizon(&settings);
    let expected_samples = horizon.saturating_mul(settings.samples_per_query);
    let ctx = Arc::new(RunContext::new(settings.clone(), sink.clone(), expected_samples));
    let generator = ScheduleGenerator::new(&settings, controller.active_window());
    let mut feed = ScheduleFeed::new(generator, horizon);
    let mut issuer = Issuer::new(&ctx, sut.as_ref());

    // Warmup: one untimed query, skipped in accuracy mode.
    ctx.set_state(TestState::Warmup);
    if settings.mode != Mode::AccuracyOnly {
        let window = controller.active_window();
        issuer.warmup(&window)?;
    }

    // Measure.
    ctx.set_state(TestState::Measuring);
    ctx.recorder.enable();
    ctx.measuring_start_ns
        .store(ctx.clock.now_ns(), Ordering::Release);

    let issue_result = loop {
        let result = match settings.scenario {
            Scenario::SingleStream => single_stream::run_loop(&ctx, &mut feed, &mut issuer),
            Scenario::MultiStream | Scenario::MultiStreamFree => {
                multi_stream::run_loop(&ctx, &mut feed, &mut issuer)
            }
            Scenario::Server => server::run_loop(&ctx, &mut feed, &mut issuer),
            Scenario::Offline => offline::run_loop(&ctx, &mut feed, &mut issuer),
        };
        // Accuracy runs continue into the next working-set window until the
        // library is covered or a hard bound fires.
        if result.is_ok()
            && settings.mode == Mode::AccuracyOnly
            && controller.has_next_window()
            && !ctx.should_stop_measuring()
        {
            controller.begin_rotation();
            if let Some(window) = controller.finish_rotation() {
                feed.rotate_window(window);
                continue;
            }
        }
        break result;
    };
    let measured_duration = ctx.measuring_elapsed();
    ctx.recorder.disable();

    // Drain, then report.
    let drain_result = issue_result.and_then(|()| drain(&ctx, sut.as_ref()));
    let aborted = drain_result.is_err() || ctx.fatal_error().is_some();
    ctx.set_state(if aborted {
        TestState::Aborted
    } else {
        TestState::Done
    });

    let latencies = ctx.recorder.drain();
    sut.report_latency_results(&latencies);

    let stats = LatencyStatistics::from_samples(&latencies, settings.target_latency_percentile);
    let samples_issued = ctx.samples_issued.load(Ordering::Acquire);
    let first_issue_ns = ctx.first_issue_ns.load(Ordering::Acquire);
    let span_end_ns = if settings.scenario == Scenario::Offline {
        // One query issued at t = 0; throughput is judged over the
        // completion span instead of the degenerate issue span.
        ctx.last_completion_ns.load(Ordering::Acquire)
    } else {
        ctx.last_issue_ns.load(Ordering::Acquire)
    };
    let span_ns = span_end_ns.saturating_sub(first_issue_ns.min(span_end_ns));
    let qps = if span_ns == 0 {
        0.0
    } else {
        samples_issued as f64 * 1e9 / span_ns as f64
    };

    let measurements = RunMeasurements {
        qps,
        measured_duration,
        queries_issued: ctx.queries_issued.load(Ordering::Acquire),
        samples_issued,
    };
    let mut verdict = evaluate_verdict(&settings, stats.as_ref(), &measurements);
    if aborted {
        verdict.pass = false;
        if let Err(err) = &drain_result {
            verdict.failures.push(err.to_string());
        }
    }

    let run_summary = RunSummary::new(
        sut.name(),
        &settings,
        ctx.state(),
        verdict,
        stats,
        &measurements,
        ctx.queries_completed.load(Ordering::Acquire),
        ctx.samples_completed.load(Ordering::Acquire),
        ctx.dropped_frames.load(Ordering::Acquire),
    );
    run_summary.write_summary(&mut summary_out, &settings)?;
    summary_out.flush().map_err(CargarError::from)?;

    controller.shutdown(qsl.as_ref());
    logger.flush();
    logger.shutdown();

    // Invariant violations surface as errors; a drain timeout stays in the
    // summary so partial results remain accessible.
    match drain_result {
        Err(err @ CargarError::DrainTimeout { .. }) => {
            tracing::warn!(error = %err, "run aborted at drain");
            Ok(run_summary)
        }
        Err(err) => Err(err),
        Ok(()) => match ctx.fatal_error() {
            Some(fatal) => Err(fatal),
            None => Ok(run_summary),
        },
    }
}
