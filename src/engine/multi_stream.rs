//! MultiStream and MultiStreamFree issue loops
//!
//! MultiStream issues one query per period boundary (`k / target_qps`). When
//! the outstanding bound would be exceeded the boundary's frame is dropped
//! and logged; real time is never blocked. MultiStreamFree instead issues at
//! `max(completion of the previous query, period boundary)`, waiting for an
//! outstanding slot rather than dropping.

use std::sync::atomic::Ordering;

use super::{Issuer, RunContext, ScheduleFeed, WAIT_SLICE};
use crate::error::Result;
use crate::types::Scenario;

pub(super) fn run_loop(
    ctx: &std::sync::Arc<RunContext>,
    feed: &mut ScheduleFeed,
    issuer: &mut Issuer<'_>,
) -> Result<()> {
    let free = ctx.settings.scenario == Scenario::MultiStreamFree;
    let max_async = ctx.settings.max_async_queries.max(1);
    let start_ns = ctx.measuring_start_ns.load(Ordering::Acquire);

    while !ctx.should_stop_measuring() {
        let Some(entry) = feed.next_entry() else { break };
        ctx.clock.sleep_until_ns(start_ns + entry.scheduled_ns);
        // A boundary that lands exactly on the stop condition is not issued.
        if ctx.should_stop_measuring() {
            break;
        }

        if free {
            let mut stop = false;
            while !ctx.wait_outstanding_below(max_async, Some(WAIT_SLICE)) {
                if ctx.should_stop_measuring() {
                    stop = true;
                    break;
                }
            }
            if stop {
                break;
            }
            issuer.issue(&entry)?;
        } else if ctx.outstanding.load(Ordering::Acquire) >= max_async {
            ctx.dropped_frames.fetch_add(1, Ordering::AcqRel);
            ctx.sink.detail(format!(
                "Dropped frame: query {} scheduled at {} ns, {} outstanding",
                entry.query_index + 1,
                entry.scheduled_ns,
                ctx.outstanding.load(Ordering::Acquire)
            ));
            tracing::warn!(
                query_index = entry.query_index,
                scheduled_ns = entry.scheduled_ns,
                "dropped frame at period boundary"
            );
        } else {
            issuer.issue(&entry)?;
        }
    }
    Ok(())
}
