//! Pure ordering and deduplication of update streams: merging what the hub
//! reports with what is already known locally, and filtering hub results that
//! are still in flight from this client.

mod channel;
mod interleave;
mod pending;
mod thread;

pub use pending::filter_pending_sync_results;

use crate::model::{SyncResult, UpdateReason};
use std::fmt;

/// Raised when the two update streams cannot be reconciled. Both variants
/// indicate a protocol bug on the sending side, never a transient condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    ConsistencyViolation { tx_count: u64, detail: String },
    MissingTimestamp { thread_id: u64, tx_count: u64 },
}

impl MergeError {
    fn divergent_reason(tx_count: u64, current: UpdateReason, next: UpdateReason) -> Self {
        MergeError::ConsistencyViolation {
            tx_count,
            detail: format!("reasons differ ({current} vs {next})"),
        }
    }

    fn divergent_signature(tx_count: u64, field: &str) -> Self {
        MergeError::ConsistencyViolation {
            tx_count,
            detail: format!("{field} differs"),
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::ConsistencyViolation { tx_count, detail } => write!(
                f,
                "two different channel updates share txCount {tx_count}: {detail}"
            ),
            MergeError::MissingTimestamp {
                thread_id,
                tx_count,
            } => write!(
                f,
                "thread {thread_id} update at txCount {tx_count} has no createdOn"
            ),
        }
    }
}

impl std::error::Error for MergeError {}

/// Merges `incoming` into `known`, producing a single deduplicated stream.
///
/// Channel updates come out ordered by `tx_count`, with at most one trailing
/// unsigned proposal. Thread updates come out ordered by `created_on` and are
/// interleaved with channel updates by timestamp; on a tie an `OpenThread`
/// channel update precedes the thread update it opened, anything else follows.
pub fn merge_sync_results(
    known: &[SyncResult],
    incoming: &[SyncResult],
) -> Result<Vec<SyncResult>, MergeError> {
    let mut channel_updates = Vec::new();
    let mut thread_updates = Vec::new();

    for result in known.iter().chain(incoming) {
        match result {
            SyncResult::Channel(update) => channel_updates.push(update.clone()),
            SyncResult::Thread(update) => thread_updates.push(update.clone()),
        }
    }

    let channel_updates = channel::sort_and_dedupe(channel_updates)?;
    let thread_updates = thread::sort_and_dedupe(thread_updates)?;
    Ok(interleave::interleave(channel_updates, thread_updates))
}
