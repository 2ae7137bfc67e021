//! The flow/window engine: flow identity, per-window aggregation, streaming
//! statistics, and feature extraction (spec §3, §4.3).

pub mod aggregate;
pub mod features;
pub mod key;
pub mod moments;
pub mod processor;
pub mod store;
pub mod window;

pub use aggregate::FlowAggregate;
pub use features::{compute_feature_vector, FeatureVector};
pub use key::FlowKey;
pub use processor::{ClosedWindow, ProcessorCounters, SessionTracker, StreamProcessor, WatermarkTable};
pub use store::FlowStateStore;
pub use window::{assign_windows, WindowDescriptor, WindowKind, Watermark};
