//! Decoding of raw Ethereum JSON-RPC payloads: hex quantities, block headers
//! and `DidUpdateChannel` logs.

use crate::model::{Block, ContractEvent};
use crate::runtime::protocol::DID_UPDATE_CHANNEL;
use alloy_primitives::{keccak256, U256};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// Canonical signature of the channel manager's update event. The user address
/// is the only indexed parameter.
pub const DID_UPDATE_CHANNEL_SIGNATURE: &str = "DidUpdateChannel(address,uint256,uint256[2],uint256[2],uint256[4],uint256[4],uint256[2],bytes32,uint256)";

const WORD_BYTES: usize = 32;
const TX_COUNT_GLOBAL_WORD: usize = 13;
const TX_COUNT_CHAIN_WORD: usize = 14;
const DID_UPDATE_CHANNEL_WORDS: usize = 17;

/// Parses a JSON-RPC quantity such as `"0x1b4"`.
pub fn parse_quantity(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("quantity {value:?} is missing the 0x prefix"))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid quantity {value:?}"))
}

/// `topic0` of every `DidUpdateChannel` log.
pub fn did_update_channel_topic() -> String {
    format!("0x{}", hex::encode(keccak256(DID_UPDATE_CHANNEL_SIGNATURE)))
}

/// Left-pads an address into a 32-byte topic for log filtering.
pub fn address_topic(address: &str) -> Result<String> {
    let bytes = decode_hex(address).context("invalid address")?;
    if bytes.len() != 20 {
        bail!("address {address} must be 20 bytes, got {}", bytes.len());
    }
    Ok(format!("0x{:0>64}", hex::encode(bytes)))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).with_context(|| format!("invalid hex string {value:?}"))
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawBlock {
    number: String,
    timestamp: String,
    #[serde(default)]
    hash: Option<String>,
}

impl RawBlock {
    pub(crate) fn into_block(self) -> Result<Block> {
        Ok(Block {
            number: parse_quantity(&self.number).context("invalid block number")?,
            timestamp: parse_quantity(&self.timestamp).context("invalid block timestamp")?,
            hash: self.hash.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawLog {
    pub(crate) topics: Vec<String>,
    pub(crate) data: String,
    pub(crate) block_number: Option<String>,
    #[serde(default)]
    pub(crate) removed: bool,
}

/// Decodes a `DidUpdateChannel` log into the fields the timeout check needs.
pub(crate) fn decode_did_update_channel(log: &RawLog) -> Result<ContractEvent> {
    let topic0 = log
        .topics
        .first()
        .ok_or_else(|| anyhow!("log has no topics"))?;
    if !topic0.eq_ignore_ascii_case(&did_update_channel_topic()) {
        bail!("log topic {topic0} is not {DID_UPDATE_CHANNEL}");
    }

    let user_topic = log
        .topics
        .get(1)
        .ok_or_else(|| anyhow!("{DID_UPDATE_CHANNEL} log is missing the user topic"))?;
    let user_bytes = decode_hex(user_topic)?;
    if user_bytes.len() != WORD_BYTES {
        bail!("user topic must be 32 bytes, got {}", user_bytes.len());
    }
    let user = format!("0x{}", hex::encode(&user_bytes[WORD_BYTES - 20..]));

    let data = decode_hex(&log.data).context("invalid log data")?;
    if data.len() < DID_UPDATE_CHANNEL_WORDS * WORD_BYTES {
        bail!(
            "{DID_UPDATE_CHANNEL} data has {} bytes, expected {}",
            data.len(),
            DID_UPDATE_CHANNEL_WORDS * WORD_BYTES
        );
    }

    let block_number = log
        .block_number
        .as_deref()
        .ok_or_else(|| anyhow!("log is still pending"))
        .and_then(parse_quantity)?;

    Ok(ContractEvent {
        name: DID_UPDATE_CHANNEL.to_owned(),
        block_number,
        user,
        tx_count_global: word_as_u64(&data, TX_COUNT_GLOBAL_WORD)?,
        tx_count_chain: word_as_u64(&data, TX_COUNT_CHAIN_WORD)?,
    })
}

fn word_as_u64(data: &[u8], index: usize) -> Result<u64> {
    let word = &data[index * WORD_BYTES..(index + 1) * WORD_BYTES];
    let value = U256::from_be_slice(word);
    u64::try_from(value).map_err(|_| anyhow!("word {index} value {value} does not fit in u64"))
}
