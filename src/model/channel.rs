use super::update::SyncResult;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel status reported by the hub on every sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelStatus {
    #[default]
    Open,
    ChannelDispute,
    ChainsawError,
    ThreadDispute,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Open => "CS_OPEN",
            ChannelStatus::ChannelDispute => "CS_CHANNEL_DISPUTE",
            ChannelStatus::ChainsawError => "CS_CHAINSAW_ERROR",
            ChannelStatus::ThreadDispute => "CS_THREAD_DISPUTE",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status code outside the closed set above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannelStatus(pub String);

impl fmt::Display for UnknownChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unreachable channel status {:?}", self.0)
    }
}

impl std::error::Error for UnknownChannelStatus {}

impl FromStr for ChannelStatus {
    type Err = UnknownChannelStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CS_OPEN" => Ok(ChannelStatus::Open),
            "CS_CHANNEL_DISPUTE" => Ok(ChannelStatus::ChannelDispute),
            "CS_CHAINSAW_ERROR" => Ok(ChannelStatus::ChainsawError),
            "CS_THREAD_DISPUTE" => Ok(ChannelStatus::ThreadDispute),
            other => Err(UnknownChannelStatus(other.to_owned())),
        }
    }
}

impl TryFrom<String> for ChannelStatus {
    type Error = UnknownChannelStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelStatus> for String {
    fn from(status: ChannelStatus) -> Self {
        status.as_str().to_owned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub wei_hub: U256,
    pub wei_user: U256,
    pub token_hub: U256,
    pub token_user: U256,
}

/// Deposits and withdrawals proposed off-chain and awaiting the contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperations {
    pub deposit_wei_hub: U256,
    pub deposit_wei_user: U256,
    pub deposit_token_hub: U256,
    pub deposit_token_user: U256,
    pub withdrawal_wei_hub: U256,
    pub withdrawal_wei_user: U256,
    pub withdrawal_token_hub: U256,
    pub withdrawal_token_user: U256,
}

impl PendingOperations {
    pub fn is_empty(&self) -> bool {
        [
            &self.deposit_wei_hub,
            &self.deposit_wei_user,
            &self.deposit_token_hub,
            &self.deposit_token_user,
            &self.withdrawal_wei_hub,
            &self.withdrawal_wei_user,
            &self.withdrawal_token_hub,
            &self.withdrawal_token_user,
        ]
        .iter()
        .all(|amount| amount.is_zero())
    }
}

/// Channel ledger snapshot as signed by the hub and the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub contract_address: String,
    pub user: String,
    pub recipient: String,
    pub balances: Balances,
    pub pending: PendingOperations,
    pub tx_count_global: u64,
    pub tx_count_chain: u64,
    pub thread_root: String,
    pub thread_count: u64,
    /// Unix seconds after which a pending on-chain operation expires.
    /// `Some(0)` means the state carries no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_hub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_user: Option<String>,
}

impl ChannelState {
    pub fn has_pending_ops(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    #[serde(rename = "CU_INVALID_TIMEOUT")]
    Timeout,
    #[serde(rename = "CU_INVALID_REJECTED")]
    Rejected,
    #[serde(rename = "CU_INVALID_ERROR")]
    Error,
}

/// Rollback range carried by an `Invalidation` update: every state in
/// `(previous_valid_tx_count, last_invalid_tx_count]` is void.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationArgs {
    pub previous_valid_tx_count: u64,
    pub last_invalid_tx_count: u64,
    pub reason: InvalidationReason,
    #[serde(default)]
    pub message: String,
}

impl InvalidationArgs {
    pub fn invalidated_range(&self) -> std::ops::RangeInclusive<u64> {
        self.previous_valid_tx_count.saturating_add(1)..=self.last_invalid_tx_count
    }
}

/// Updates created locally and not yet acknowledged by the hub, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncControllerState {
    pub updates_to_sync: Vec<SyncResult>,
}
