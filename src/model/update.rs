use super::channel::{ChannelState, InvalidationArgs};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of channel transition carried by a [`ChannelUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateReason {
    Payment,
    Exchange,
    ProposePendingDeposit,
    ProposePendingWithdrawal,
    ConfirmPending,
    Invalidation,
    EmptyChannel,
    OpenThread,
    CloseThread,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateReason::Payment => "Payment",
            UpdateReason::Exchange => "Exchange",
            UpdateReason::ProposePendingDeposit => "ProposePendingDeposit",
            UpdateReason::ProposePendingWithdrawal => "ProposePendingWithdrawal",
            UpdateReason::ConfirmPending => "ConfirmPending",
            UpdateReason::Invalidation => "Invalidation",
            UpdateReason::EmptyChannel => "EmptyChannel",
            UpdateReason::OpenThread => "OpenThread",
            UpdateReason::CloseThread => "CloseThread",
        }
    }

    /// Whether the update proposes an on-chain deposit or withdrawal that only
    /// becomes final once the contract observes it.
    pub fn is_propose_pending(&self) -> bool {
        self.as_str().starts_with("ProposePending")
    }
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two channel signatures are present on an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignatureSet {
    pub hub: bool,
    pub user: bool,
}

impl SignatureSet {
    pub fn full() -> Self {
        Self {
            hub: true,
            user: true,
        }
    }

    /// True when every signature present in `other` is also present here.
    pub fn covers(&self, other: &SignatureSet) -> bool {
        (self.hub || !other.hub) && (self.user || !other.user)
    }

    pub fn is_strict_superset_of(&self, other: &SignatureSet) -> bool {
        self.covers(other) && self != other
    }
}

/// One channel ledger transition, either a local proposal (no `tx_count`)
/// or a hub-issued state carrying one or both signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub reason: UpdateReason,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_hub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
}

impl ChannelUpdate {
    pub fn new(reason: UpdateReason, args: Value) -> Self {
        Self {
            id: None,
            reason,
            args,
            tx_count: None,
            sig_hub: None,
            sig_user: None,
            created_on: None,
        }
    }

    /// Builds the update that submits a signed rollback state to the hub.
    pub fn invalidation(args: &InvalidationArgs, signed: &ChannelState) -> Result<Self> {
        let args = serde_json::to_value(args).context("failed to encode invalidation args")?;
        Ok(Self {
            tx_count: Some(signed.tx_count_global),
            sig_user: signed.sig_user.clone(),
            ..Self::new(UpdateReason::Invalidation, args)
        })
    }

    pub fn signatures(&self) -> SignatureSet {
        SignatureSet {
            hub: self.sig_hub.is_some(),
            user: self.sig_user.is_some(),
        }
    }

    /// Decodes the rollback range when this is an `Invalidation` update.
    pub fn invalidation_args(&self) -> Result<Option<InvalidationArgs>> {
        if self.reason != UpdateReason::Invalidation {
            return Ok(None);
        }
        let args = serde_json::from_value(self.args.clone())
            .context("malformed invalidation args")?;
        Ok(Some(args))
    }
}

/// Thread ledger snapshot. Only the fields the sync engine orders and keys on
/// are typed; the remainder travels untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadState {
    pub thread_id: u64,
    pub tx_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_a: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub state: ThreadState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
}

/// Transport envelope for a channel or thread update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "update", rename_all = "lowercase")]
pub enum SyncResult {
    Channel(ChannelUpdate),
    Thread(ThreadStateUpdate),
}

impl SyncResult {
    pub fn created_on(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncResult::Channel(update) => update.created_on,
            SyncResult::Thread(update) => update.created_on,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelUpdate> {
        match self {
            SyncResult::Channel(update) => Some(update),
            SyncResult::Thread(_) => None,
        }
    }

    pub fn as_thread(&self) -> Option<&ThreadStateUpdate> {
        match self {
            SyncResult::Channel(_) => None,
            SyncResult::Thread(update) => Some(update),
        }
    }
}

impl From<ChannelUpdate> for SyncResult {
    fn from(update: ChannelUpdate) -> Self {
        SyncResult::Channel(update)
    }
}

impl From<ThreadStateUpdate> for SyncResult {
    fn from(update: ThreadStateUpdate) -> Self {
        SyncResult::Thread(update)
    }
}
