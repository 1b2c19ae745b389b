use super::MergeError;
use crate::model::ChannelUpdate;

/// Orders channel updates by `tx_count` (unsigned proposal last) and collapses
/// duplicates, keeping a proposal followed by its countersigned copy.
pub(super) fn sort_and_dedupe(
    mut updates: Vec<ChannelUpdate>,
) -> Result<Vec<ChannelUpdate>, MergeError> {
    // Stable, so equal counts keep known-before-incoming order.
    updates.sort_by_key(|update| (update.tx_count.is_none(), update.tx_count));

    let mut deduped: Vec<ChannelUpdate> = Vec::with_capacity(updates.len());
    let mut group_start = 0;
    let mut seen_proposal = false;

    for next in updates {
        let Some(tx_count) = next.tx_count else {
            if !seen_proposal {
                seen_proposal = true;
                deduped.push(next);
            }
            continue;
        };

        let same_count = deduped
            .last()
            .is_some_and(|current| current.tx_count == Some(tx_count));
        if !same_count {
            group_start = deduped.len();
            deduped.push(next);
            continue;
        }

        for existing in &deduped[group_start..] {
            ensure_consistent(tx_count, existing, &next)?;
        }

        let keep = deduped
            .last()
            .is_some_and(|current| next.signatures().is_strict_superset_of(&current.signatures()));
        if keep {
            deduped.push(next);
        }
    }

    Ok(deduped)
}

fn ensure_consistent(
    tx_count: u64,
    current: &ChannelUpdate,
    next: &ChannelUpdate,
) -> Result<(), MergeError> {
    if current.reason != next.reason {
        return Err(MergeError::divergent_reason(
            tx_count,
            current.reason,
            next.reason,
        ));
    }

    let fields = [
        ("sigHub", &current.sig_hub, &next.sig_hub),
        ("sigUser", &current.sig_user, &next.sig_user),
    ];
    for (field, current_sig, next_sig) in fields {
        if let (Some(a), Some(b)) = (current_sig, next_sig) {
            if a != b {
                return Err(MergeError::divergent_signature(tx_count, field));
            }
        }
    }

    Ok(())
}
