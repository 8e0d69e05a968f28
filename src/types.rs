//! Core identifier types shared across the load-generation pipeline
//!
//! These types are deliberately small and `Copy` where possible: they cross
//! the scheduler/SUT boundary on every issued query and must never force an
//! allocation on the critical path.

use serde::{Deserialize, Serialize};

/// Index of a sample inside the query sample library.
pub type SampleIndex = u64;

/// Monotonically increasing identifier of an issued query.
pub type QueryId = u64;

/// Number of low bits of a [`ResponseId`] reserved for the sample's position
/// within its query.
const POSITION_BITS: u32 = 24;

/// Mask selecting the position bits of a packed [`ResponseId`].
const POSITION_MASK: u64 = (1 << POSITION_BITS) - 1;

/// Largest number of samples a single query may carry.
///
/// Bounded by the position field of [`ResponseId`]. Offline coalescing is the
/// only path that approaches this (millions of samples in one query); the
/// schedule generator checks the bound before building the query.
pub const MAX_SAMPLES_PER_QUERY: u64 = POSITION_MASK + 1;

// ============================================================================
// ResponseId
// ============================================================================

/// Opaque 64-bit token identifying one sample of one in-flight query.
///
/// The token packs the query id (high 40 bits) and the sample's position
/// within the query (low 24 bits). Completion dispatch unpacks it to locate
/// the query's ring slot directly, without any map lookup on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseId(u64);

impl ResponseId {
    /// Pack a query id and an in-query position into a response token.
    ///
    /// Callers guarantee `position < MAX_SAMPLES_PER_QUERY` and
    /// `query_id < 2^40`; both hold by construction for any schedule the
    /// generator produces.
    #[must_use]
    pub fn new(query_id: QueryId, position: u64) -> Self {
        debug_assert!(position < MAX_SAMPLES_PER_QUERY);
        debug_assert!(query_id < (1 << (64 - POSITION_BITS)));
        Self((query_id << POSITION_BITS) | position)
    }

    /// Query id this sample belongs to.
    #[must_use]
    pub fn query_id(self) -> QueryId {
        self.0 >> POSITION_BITS
    }

    /// Position of this sample within its query.
    #[must_use]
    pub fn position(self) -> u64 {
        self.0 & POSITION_MASK
    }

    /// Raw packed value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild a token from its raw packed value.
    #[must_use]
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Query samples and responses
// ============================================================================

/// One input unit handed to the SUT as part of a query.
///
/// `index` addresses the backing data inside the query sample library; the
/// library owns the tensors, the load generator only routes indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySample {
    /// Completion-routing token; echoed back in [`QuerySampleResponse`].
    pub id: ResponseId,
    /// Library index of the sample's backing data.
    pub index: SampleIndex,
}

/// One response from the SUT for a previously issued [`QuerySample`].
///
/// `data`/`size` describe the SUT's output buffer. The buffer must stay valid
/// for the duration of the completion call; it is only dereferenced when the
/// query was selected for accuracy logging and never influences latency
/// accounting.
#[derive(Debug, Clone, Copy)]
pub struct QuerySampleResponse {
    /// Token from the issued [`QuerySample`].
    pub id: ResponseId,
    /// Address of the response payload (0 when the SUT has nothing to report).
    pub data: usize,
    /// Size of the response payload in bytes.
    pub size: usize,
}

// ============================================================================
// Scenario and mode
// ============================================================================

/// Traffic pattern driving query issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    /// One query at a time; the next issues when the previous completes.
    SingleStream,
    /// Fixed-period batched queries with a bounded number outstanding.
    MultiStream,
    /// Like `MultiStream` but the next query may issue as soon as the
    /// previous completes instead of waiting out the period.
    MultiStreamFree,
    /// Poisson arrivals at a target rate with unbounded outstanding queries.
    Server,
    /// The whole sample budget coalesced into a single query at `t = 0`.
    Offline,
}

impl Scenario {
    /// Canonical display label used in summary and detail logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleStream => "Single Stream",
            Self::MultiStream => "Multi Stream",
            Self::MultiStreamFree => "Multi Stream Free",
            Self::Server => "Server",
            Self::Offline => "Offline",
        }
    }

    /// Parse from a label as written in config files or logs.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '_', '-'], "").as_str() {
            "singlestream" => Some(Self::SingleStream),
            "multistream" => Some(Self::MultiStream),
            "multistreamfree" => Some(Self::MultiStreamFree),
            "server" => Some(Self::Server),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the run is for; shapes sample selection and response logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Official submission run.
    Submission,
    /// Walk every library sample once and log all responses; latencies are
    /// collected but the run is not a performance claim.
    AccuracyOnly,
    /// Performance measurement only.
    PerformanceOnly,
    /// Exploratory performance run used while searching for peak settings.
    FindPeakPerformance,
}

impl Mode {
    /// Canonical display label used in summary and detail logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "Submission",
            Self::AccuracyOnly => "Accuracy",
            Self::PerformanceOnly => "Performance",
            Self::FindPeakPerformance => "Find Peak Performance",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
