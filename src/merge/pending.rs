use crate::model::{SignatureSet, SyncResult};
use std::collections::HashMap;

/// Identity of an update for in-flight comparison. Thread updates are keyed
/// per thread so they never shadow a channel update with the same counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PendingKey {
    Unsigned(i64),
    Tx(u64),
    Thread { thread_id: u64, tx_count: u64 },
}

fn key_for(result: &SyncResult) -> Option<PendingKey> {
    match result {
        SyncResult::Channel(update) => match update.tx_count {
            Some(tx_count) => Some(PendingKey::Tx(tx_count)),
            None => update.id.map(PendingKey::Unsigned),
        },
        SyncResult::Thread(update) => Some(PendingKey::Thread {
            thread_id: update.state.thread_id,
            tx_count: update.state.tx_count,
        }),
    }
}

fn signatures_of(result: &SyncResult) -> SignatureSet {
    match result {
        SyncResult::Channel(update) => update.signatures(),
        // Thread states carry a single sender signature.
        SyncResult::Thread(update) => SignatureSet {
            hub: false,
            user: update.state.sig_a.is_some(),
        },
    }
}

/// Drops hub results the client already holds an equal-or-better copy of in
/// `to_hub`, or that fall inside a queued invalidation's rollback range.
pub fn filter_pending_sync_results(
    from_hub: Vec<SyncResult>,
    to_hub: &[SyncResult],
) -> Vec<SyncResult> {
    let mut existing: HashMap<PendingKey, SignatureSet> = HashMap::new();

    for queued in to_hub {
        if let Some(key) = key_for(queued) {
            let sigs = signatures_of(queued);
            let entry = existing.entry(key).or_default();
            entry.hub |= sigs.hub;
            entry.user |= sigs.user;
        }

        let SyncResult::Channel(update) = queued else {
            continue;
        };
        match update.invalidation_args() {
            Ok(Some(args)) => {
                for tx_count in args.invalidated_range() {
                    existing.insert(PendingKey::Tx(tx_count), SignatureSet::full());
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    tx_count = ?update.tx_count,
                    "ignoring queued invalidation with unreadable args"
                );
            }
        }
    }

    from_hub
        .into_iter()
        .filter(|incoming| {
            let Some(key) = key_for(incoming) else {
                return true;
            };
            match existing.get(&key) {
                Some(local) => !local.covers(&signatures_of(incoming)),
                None => true,
            }
        })
        .collect()
}
