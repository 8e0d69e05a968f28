//! SingleStream issue loop
//!
//! One query at a time: issue, cooperatively block on its completion, then
//! issue the next. The next query's issue time is whenever the previous one
//! completes, so nothing is pre-scheduled.

use super::{Issuer, RunContext, ScheduleFeed, TestState, WAIT_SLICE};
use crate::error::Result;

pub(super) fn run_loop(
    ctx: &std::sync::Arc<RunContext>,
    feed: &mut ScheduleFeed,
    issuer: &mut Issuer<'_>,
) -> Result<()> {
    while !ctx.should_stop_measuring() {
        let Some(entry) = feed.next_entry() else { break };
        issuer.issue(&entry)?;
        // Cooperative wait on the completion condition variable; bail out to
        // drain if the hard duration bound fires while the SUT holds the
        // query.
        loop {
            if ctx.wait_outstanding_below(1, Some(WAIT_SLICE)) {
                break;
            }
            if ctx.state() == TestState::Aborted || ctx.max_duration_reached() {
                return Ok(());
            }
        }
    }
    Ok(())
}
