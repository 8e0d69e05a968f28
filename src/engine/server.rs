//! Server issue loop
//!
//! Walks the pre-computed Poisson schedule, sleeping until each arrival.
//! With `server_coalesce_queries` set, any queries whose scheduled time has
//! already passed by the time the scheduler wakes are merged into the next
//! issued batch instead of going out late one by one.

use std::sync::atomic::Ordering;

use super::{Issuer, RunContext, ScheduleFeed};
use crate::error::Result;

pub(super) fn run_loop(
    ctx: &std::sync::Arc<RunContext>,
    feed: &mut ScheduleFeed,
    issuer: &mut Issuer<'_>,
) -> Result<()> {
    let coalesce = ctx.settings.server_coalesce_queries;
    let start_ns = ctx.measuring_start_ns.load(Ordering::Acquire);

    while !ctx.should_stop_measuring() {
        let Some(mut entry) = feed.next_entry() else { break };
        ctx.clock.sleep_until_ns(start_ns + entry.scheduled_ns);
        if ctx.should_stop_measuring() {
            break;
        }

        if coalesce {
            let now = ctx.clock.now_ns();
            while feed
                .peek_scheduled_ns()
                .is_some_and(|scheduled| start_ns + scheduled <= now)
            {
                let Some(due) = feed.next_entry() else { break };
                entry.sample_indices.extend(due.sample_indices);
                entry.accuracy_log |= due.accuracy_log;
            }
        }

        issuer.issue(&entry)?;
    }
    Ok(())
}
