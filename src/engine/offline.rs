//! Offline issue loop
//!
//! The whole sample budget goes out as one query at `t = 0`; the interesting
//! work happens in the completion pipeline and the drain.

use super::{Issuer, RunContext, ScheduleFeed};
use crate::error::Result;

pub(super) fn run_loop(
    ctx: &std::sync::Arc<RunContext>,
    feed: &mut ScheduleFeed,
    issuer: &mut Issuer<'_>,
) -> Result<()> {
    if ctx.should_stop_measuring() {
        return Ok(());
    }
    if let Some(entry) = feed.next_entry() {
        issuer.issue(&entry)?;
    }
    Ok(())
}
