//! Interaction tracking: event schema, batching queue, delivery.

pub mod batcher;
pub mod collector;
pub mod events;
