pub mod metrics;

pub use metrics::{evaluate, ConfusionMatrix, MulticlassMetrics};
