use crate::model::{ChannelUpdate, SyncResult, ThreadStateUpdate, UpdateReason};
use std::cmp::Ordering;

/// Two-cursor merge of already sorted channel and thread lists.
pub(super) fn interleave(
    channel_updates: Vec<ChannelUpdate>,
    thread_updates: Vec<ThreadStateUpdate>,
) -> Vec<SyncResult> {
    let mut merged = Vec::with_capacity(channel_updates.len() + thread_updates.len());
    let mut channel = channel_updates.into_iter().peekable();
    let mut threads = thread_updates.into_iter().peekable();

    loop {
        let take_channel = match (channel.peek(), threads.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(next_channel), Some(next_thread)) => channel_first(next_channel, next_thread),
        };

        let next = if take_channel {
            channel.next().map(SyncResult::Channel)
        } else {
            threads.next().map(SyncResult::Thread)
        };
        merged.extend(next);
    }

    merged
}

fn channel_first(channel: &ChannelUpdate, thread: &ThreadStateUpdate) -> bool {
    // The unsigned proposal is always last, whatever its timestamp.
    if channel.tx_count.is_none() {
        return false;
    }

    // A signed update without a timestamp keeps its tx_count position.
    let (Some(channel_time), Some(thread_time)) = (channel.created_on, thread.created_on) else {
        return true;
    };

    match channel_time.cmp(&thread_time) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => channel.reason == UpdateReason::OpenThread,
    }
}
