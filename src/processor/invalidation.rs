//! Rolls back a hub-signed state the user can no longer rely on.

use crate::model::{ChannelUpdate, InvalidationArgs, InvalidationReason, SyncResult};
use crate::runtime::protocol::Validator;
use crate::store::{Store, StoreAction};
use anyhow::{Context, Result};
use std::fmt;

/// Reasons an invalidation is refused before anything is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationError {
    /// Only states carrying a tx count and the hub signature can be voided.
    NotHubSigned,
    /// A pending proposal older than the channel head has already been
    /// superseded.
    SupersededProposal { tx_count: u64, tx_count_global: u64 },
    /// The user countersigned the state and the channel shows no pending
    /// operations, so the state is final.
    AlreadyFinal { tx_count: u64 },
}

impl fmt::Display for InvalidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationError::NotHubSigned => {
                f.write_str("cannot invalidate an update without tx count and hub signature")
            }
            InvalidationError::SupersededProposal {
                tx_count,
                tx_count_global,
            } => write!(
                f,
                "pending proposal at tx {tx_count} is behind channel tx {tx_count_global}"
            ),
            InvalidationError::AlreadyFinal { tx_count } => write!(
                f,
                "update at tx {tx_count} is countersigned and the channel has no pending operations"
            ),
        }
    }
}

impl std::error::Error for InvalidationError {}

/// Checks that `target` may be invalidated given the current store contents.
pub fn check_preconditions(
    store: &dyn Store,
    target: &ChannelUpdate,
) -> Result<u64, InvalidationError> {
    let tx_count = match (target.tx_count, &target.sig_hub) {
        (Some(tx_count), Some(_)) => tx_count,
        _ => return Err(InvalidationError::NotHubSigned),
    };

    let channel = store.state().persistent.channel;
    let first_update = channel.tx_count_global == 0 && tx_count == 1;
    if target.reason.is_propose_pending() && tx_count < channel.tx_count_global && !first_update {
        return Err(InvalidationError::SupersededProposal {
            tx_count,
            tx_count_global: channel.tx_count_global,
        });
    }

    if target.sig_user.is_some() && !channel.has_pending_ops() {
        return Err(InvalidationError::AlreadyFinal { tx_count });
    }

    Ok(tx_count)
}

/// Signs a rollback of `target` onto the latest valid state and queues it for
/// the hub. Returns the queued update.
///
/// Precondition failures surface as [`InvalidationError`] inside the returned
/// `anyhow::Error`; they are not retried.
pub async fn invalidate_update(
    store: &dyn Store,
    validator: &dyn Validator,
    target: &ChannelUpdate,
    reason: InvalidationReason,
    message: impl Into<String>,
) -> Result<ChannelUpdate> {
    let last_invalid_tx_count = check_preconditions(store, target).map_err(|err| {
        tracing::warn!(error = %err, reason = %target.reason, "refusing invalidation");
        err
    })?;

    let latest_valid = store.state().persistent.latest_valid_state;
    let args = InvalidationArgs {
        previous_valid_tx_count: latest_valid.tx_count_global,
        last_invalid_tx_count,
        reason,
        message: message.into(),
    };

    let rollback = validator
        .generate_invalidation(&latest_valid, &args)
        .context("failed to derive invalidation state")?;
    let signed = validator
        .sign_channel_state(rollback)
        .await
        .context("failed to sign invalidation state")?;

    let update = ChannelUpdate::invalidation(&args, &signed)?;
    store.dispatch(StoreAction::EnqueueUpdatesToSync(vec![SyncResult::Channel(
        update.clone(),
    )]));

    tracing::info!(
        previous_valid = args.previous_valid_tx_count,
        last_invalid = args.last_invalid_tx_count,
        tx_count = signed.tx_count_global,
        "queued channel invalidation"
    );

    Ok(update)
}
