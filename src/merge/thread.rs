use super::MergeError;
use crate::model::ThreadStateUpdate;

/// Orders thread updates by `created_on` and drops copies that share both a
/// timestamp and the sender's signature.
pub(super) fn sort_and_dedupe(
    mut updates: Vec<ThreadStateUpdate>,
) -> Result<Vec<ThreadStateUpdate>, MergeError> {
    if let Some(missing) = updates.iter().find(|update| update.created_on.is_none()) {
        return Err(MergeError::MissingTimestamp {
            thread_id: missing.state.thread_id,
            tx_count: missing.state.tx_count,
        });
    }

    updates.sort_by_key(|update| update.created_on);

    let mut deduped: Vec<ThreadStateUpdate> = Vec::with_capacity(updates.len());
    let mut group_start = 0;

    for next in updates {
        let same_time = deduped
            .last()
            .is_some_and(|current| current.created_on == next.created_on);
        if !same_time {
            group_start = deduped.len();
            deduped.push(next);
            continue;
        }

        let duplicate = deduped[group_start..]
            .iter()
            .any(|existing| existing.state.sig_a == next.state.sig_a);
        if !duplicate {
            deduped.push(next);
        }
    }

    Ok(deduped)
}
