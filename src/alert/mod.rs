pub mod evaluator;
pub mod messages;
pub mod model;

pub use evaluator::{AlertEvaluator, DispatchCounts, PassReport, ZoneOutcome, is_sent_today};
pub use model::{AlertKind, AlertRecord, dedup_key};
