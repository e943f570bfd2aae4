//! Hourly electricity spot-price ingestion with per-subscriber price alerts.
//!
//! Prices are pulled per zone from an external source into a [`store::PriceStore`],
//! summarised by [`price::PriceAnalytics`] and evaluated against subscriber
//! thresholds by [`alert::AlertEvaluator`], which records each alert once per
//! market day before handing it to a [`notify::Notifier`]. The
//! [`scheduler::Scheduler`] drives it all on fixed cadences.

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod price;
pub mod query;
pub mod retention;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod subscriber;

pub use error::ValidationError;
