//! Output side of the pipeline: durable topic publication and the hot
//! stats KV (spec §4.7).

pub mod stats;
pub mod topic;

pub use stats::HotStats;
pub use topic::{publish_record, DurableLog, InMemoryDurableLog, PublishError, Topic};
