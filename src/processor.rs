//! Sync processing: the polling scheduler, the hub sync controller, block
//! search, and channel invalidation.

pub mod block_finder;
pub mod controller;
pub mod invalidation;
pub mod poller;
