// Observability: metrics recording and push gateway export

pub mod metrics;

pub use self::metrics::{init, push_all_metrics};
