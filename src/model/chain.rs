use serde::{Deserialize, Serialize};
use std::fmt;

/// Header fields of a chain block needed for timeout detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Number(number) => write!(f, "{number:#x}"),
        }
    }
}

/// Decoded `DidUpdateChannel` emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub name: String,
    pub block_number: u64,
    pub user: String,
    pub tx_count_global: u64,
    pub tx_count_chain: u64,
}
