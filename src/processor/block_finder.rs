//! Locates a block whose timestamp falls just after a given deadline.

use crate::model::{Block, BlockTag};
use crate::runtime::protocol::ChainProvider;
use anyhow::{Context, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSearchError {
    /// The step shrank to its floor, or a jump hit the chain bounds, before a
    /// block inside the window was found.
    SearchExhausted {
        timeout: u64,
        last_block: u64,
        step: i64,
    },
}

impl fmt::Display for BlockSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSearchError::SearchExhausted {
                timeout,
                last_block,
                step,
            } => write!(
                f,
                "no block found near timeout {timeout} (stopped at block {last_block} with step {step})"
            ),
        }
    }
}

impl std::error::Error for BlockSearchError {}

/// Returns the chain head when it is still earlier than `timeout + delta`,
/// otherwise a block whose timestamp lies in `[timeout, timeout + delta)`.
///
/// The search walks backward from the head in steps of at most `max_step`
/// blocks; overshooting below `timeout` halves the step and turns forward.
pub async fn find_block_nearest_timeout(
    chain: &dyn ChainProvider,
    timeout: u64,
    delta: u64,
    max_step: u64,
) -> Result<Block> {
    let head = chain
        .get_block(BlockTag::Latest)
        .await
        .context("failed to fetch chain head")?;
    let upper = timeout.saturating_add(delta);

    if head.timestamp < upper {
        return Ok(head);
    }

    let head_number = head.number;
    let mut step = -(head_number.min(max_step) as i64);
    let mut block = head;
    let mut probes = 0usize;

    loop {
        let exhausted = BlockSearchError::SearchExhausted {
            timeout,
            last_block: block.number,
            step,
        };
        if step.unsigned_abs() <= 2 {
            return Err(exhausted.into());
        }

        let target = (block.number as i64 + step).clamp(0, head_number as i64) as u64;
        if target == block.number {
            return Err(exhausted.into());
        }

        block = chain
            .get_block(BlockTag::Number(target))
            .await
            .with_context(|| format!("failed to fetch block {target}"))?;
        probes += 1;

        if block.timestamp >= timeout && block.timestamp < upper {
            tracing::debug!(
                timeout,
                block = block.number,
                block_timestamp = block.timestamp,
                probes,
                "located block near timeout"
            );
            return Ok(block);
        }

        step = if block.timestamp < timeout {
            step.abs() / 2
        } else {
            -step.abs()
        };
    }
}
