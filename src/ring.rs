//! Fixed-capacity ring of in-flight query records
//!
//! The completion path must pair responses with issue records without taking
//! a lock. Every field of an issue record is a scalar, so each slot is a
//! handful of atomics guarded by a sequence word: the scheduler stores the
//! record fields and then release-stores `query_id + 1` into the sequence
//! word; completion threads acquire-load the word to validate the slot, count
//! samples down, and the thread that retires the last sample release-stores
//! the word back to empty. Wraparound reuse of a slot therefore synchronizes
//! through the sequence word, and a stale or duplicate completion shows up as
//! a sequence mismatch instead of corrupting a fresh record.
//!
//! Slots are addressed by `query_id & (capacity - 1)`; capacity is a power of
//! two at least `max_async_queries` plus slack, so a full slot means the SUT
//! is holding more queries than the scenario allows.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::{CargarError, Result};
use crate::types::QueryId;

/// Sequence-word value of a free slot.
const SEQ_EMPTY: u64 = 0;

/// Slack added on top of `max_async_queries` when sizing the ring, covering
/// the window between a query's last completion and the scheduler observing
/// the freed slot.
const RING_SLACK: u64 = 64;

/// Ring capacity used when the scenario does not bound outstanding queries.
const UNBOUNDED_CAPACITY: usize = 1 << 16;

/// Record flag bit: the query was issued in `MEASURING` and its latencies
/// count toward percentiles.
pub const FLAG_TIMED: u8 = 1;
/// Record flag bit: the query's responses go to the accuracy log.
pub const FLAG_ACCURACY_LOG: u8 = 1 << 1;

struct Slot {
    /// `query_id + 1` while occupied, [`SEQ_EMPTY`] while free.
    seq: AtomicU64,
    issued_ns: AtomicU64,
    scheduled_ns: AtomicU64,
    samples_total: AtomicU64,
    samples_remaining: AtomicU64,
    flags: AtomicU8,
}

impl Slot {
    fn empty() -> Self {
        Self {
            seq: AtomicU64::new(SEQ_EMPTY),
            issued_ns: AtomicU64::new(0),
            scheduled_ns: AtomicU64::new(0),
            samples_total: AtomicU64::new(0),
            samples_remaining: AtomicU64::new(0),
            flags: AtomicU8::new(0),
        }
    }
}

/// Snapshot of an issue record taken while completing one sample.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRecord {
    /// Monotonic issue timestamp of the query.
    pub issued_ns: u64,
    /// Scheduled issue time of the query.
    pub scheduled_ns: u64,
    /// Samples the query carries.
    pub samples_total: u64,
    /// Record flags ([`FLAG_TIMED`], [`FLAG_ACCURACY_LOG`]).
    pub flags: u8,
    /// Whether this completion retired the query's last sample.
    pub query_finished: bool,
}

impl CompletionRecord {
    /// Whether the query's latencies count toward percentiles.
    #[must_use]
    pub fn is_timed(&self) -> bool {
        self.flags & FLAG_TIMED != 0
    }

    /// Whether the query's responses go to the accuracy log.
    #[must_use]
    pub fn wants_accuracy_log(&self) -> bool {
        self.flags & FLAG_ACCURACY_LOG != 0
    }
}

/// Pre-allocated arena of in-flight query records.
pub struct QueryRing {
    slots: Box<[Slot]>,
    mask: u64,
}

impl QueryRing {
    /// Size a ring for the scenario's outstanding-query bound.
    ///
    /// `max_async_queries < 0` (unbounded) gets the default large capacity.
    #[must_use]
    pub fn for_max_async(max_async_queries: i64) -> Self {
        let capacity = if max_async_queries < 0 {
            UNBOUNDED_CAPACITY
        } else {
            let wanted = (max_async_queries.unsigned_abs()).saturating_add(RING_SLACK);
            usize::try_from(wanted.next_power_of_two()).unwrap_or(UNBOUNDED_CAPACITY)
        };
        Self::with_capacity(capacity)
    }

    /// Build a ring with an explicit power-of-two capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        let slots: Vec<Slot> = (0..capacity).map(|_| Slot::empty()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, query_id: QueryId) -> &Slot {
        let index = usize::try_from(query_id & self.mask).unwrap_or(0);
        &self.slots[index]
    }

    /// Publish the issue record for `query_id`.
    ///
    /// Called only by the issue scheduler, which is the single writer; the
    /// record becomes visible to completion threads with the final
    /// release-store of the sequence word.
    ///
    /// # Errors
    ///
    /// [`CargarError::RingFull`] when the slot's previous occupant has not
    /// completed, meaning more queries are outstanding than the ring was
    /// sized for.
    pub fn publish(
        &self,
        query_id: QueryId,
        scheduled_ns: u64,
        issued_ns: u64,
        samples: u64,
        flags: u8,
    ) -> Result<()> {
        let slot = self.slot(query_id);
        let seq = slot.seq.load(Ordering::Acquire);
        if seq != SEQ_EMPTY {
            return Err(CargarError::RingFull {
                query_id,
                occupant: seq - 1,
            });
        }
        slot.issued_ns.store(issued_ns, Ordering::Relaxed);
        slot.scheduled_ns.store(scheduled_ns, Ordering::Relaxed);
        slot.samples_total.store(samples, Ordering::Relaxed);
        slot.samples_remaining.store(samples, Ordering::Relaxed);
        slot.flags.store(flags, Ordering::Relaxed);
        slot.seq.store(query_id + 1, Ordering::Release);
        Ok(())
    }

    /// Retire one sample of `query_id` and snapshot its record.
    ///
    /// Safe to call from any number of completion threads concurrently. The
    /// caller that receives `query_finished == true` is the unique owner of
    /// the query's retirement.
    ///
    /// # Errors
    ///
    /// [`CargarError::UnknownQuery`] when the slot does not hold `query_id`
    /// (never issued, already fully retired, or overwritten after
    /// wraparound); [`CargarError::DuplicateCompletion`] when more samples
    /// complete than the query carried.
    pub fn complete_sample(&self, query_id: QueryId) -> Result<CompletionRecord> {
        let slot = self.slot(query_id);
        if slot.seq.load(Ordering::Acquire) != query_id + 1 {
            return Err(CargarError::UnknownQuery { query_id });
        }

        let issued_ns = slot.issued_ns.load(Ordering::Relaxed);
        let scheduled_ns = slot.scheduled_ns.load(Ordering::Relaxed);
        let samples_total = slot.samples_total.load(Ordering::Relaxed);
        let flags = slot.flags.load(Ordering::Relaxed);

        // Count the sample down without ever underflowing past zero, so a
        // completion storm of duplicates stays an error rather than a wrap.
        let mut remaining = slot.samples_remaining.load(Ordering::Acquire);
        loop {
            if remaining == 0 {
                return Err(CargarError::DuplicateCompletion { query_id });
            }
            match slot.samples_remaining.compare_exchange_weak(
                remaining,
                remaining - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => remaining = current,
            }
        }

        let query_finished = remaining == 1;
        if query_finished {
            slot.seq.store(SEQ_EMPTY, Ordering::Release);
        }

        Ok(CompletionRecord {
            issued_ns,
            scheduled_ns,
            samples_total,
            flags,
            query_finished,
        })
    }

    /// Whether the slot for `query_id` currently holds it.
    #[must_use]
    pub fn holds(&self, query_id: QueryId) -> bool {
        self.slot(query_id).seq.load(Ordering::Acquire) == query_id + 1
    }
}
