//! # Cargar
//!
//! Cargar (Spanish: *to load*) is a deterministic load-generation core for
//! benchmarking ML inference systems. It drives a system under test (SUT)
//! through four traffic patterns, measures per-sample latency on a monotonic
//! nanosecond clock, and reports whether the SUT met the scenario's
//! service-level objectives.
//!
//! ## Features
//!
//! - **Four scenarios**: SingleStream, MultiStream (plus its free-running
//!   variant), Server (Poisson arrivals), and Offline (one coalesced query)
//! - **Deterministic schedules**: sample selection, arrival jitter, and
//!   accuracy-log sampling each run off an independently seeded RNG stream,
//!   so a run is bit-reproducible from its settings and seeds
//! - **Lock-free completion path**: responses pair with issue records
//!   through a pre-allocated atomic ring, from any number of SUT threads
//! - **Audit-quality artifacts**: a `key : value` summary plus a
//!   line-oriented detail log carrying the requested and effective settings
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cargar::{run_test, LogOutputs, RequestedSettings, Scenario};
//!
//! let sut: Arc<dyn cargar::SystemUnderTest> = Arc::new(MySut::new());
//! let qsl: Arc<dyn cargar::QuerySampleLibrary> = Arc::new(MyLibrary::open()?);
//!
//! let requested = RequestedSettings {
//!     scenario: Scenario::Server,
//!     server_target_qps: 1000.0,
//!     ..RequestedSettings::default()
//! };
//!
//! let summary = run_test(&sut, &qsl, &requested, LogOutputs::discard())?;
//! assert!(summary.pass);
//! ```
//!
//! ## Architecture
//!
//! Settings resolve into an immutable effective plan; a seeded generator
//! produces the sample schedule; the cache controller keeps the library's
//! working set resident; the per-scenario issue loop runs on a single
//! scheduler thread; completions flow back through a lock-free ring into the
//! latency recorder; the reporter renders the verdict once the run is done.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod collector;
pub mod engine;
pub mod error;
pub mod log;
pub mod qsl;
pub mod recorder;
pub mod report;
pub mod ring;
pub mod schedule;
pub mod settings;
pub mod sut;
pub mod types;

// Re-exports for convenience
pub use collector::CompletionHandle;
pub use engine::{run_test, TestState};
pub use error::{CargarError, Result};
pub use log::{DetailSink, LogOutputs, SharedBuffer};
pub use qsl::QuerySampleLibrary;
pub use recorder::LatencyStatistics;
pub use report::RunSummary;
pub use settings::{EffectiveSettings, RequestedSettings};
pub use sut::SystemUnderTest;
pub use types::{Mode, QuerySample, QuerySampleResponse, ResponseId, SampleIndex, Scenario};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
