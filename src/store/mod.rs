//! Persistence contracts for prices, subscribers and the alert log.
//!
//! The pipeline only talks to these traits. Two backends exist: [`memory`] for
//! single-process deployments and tests, and [`dynamodb`] behind the `dynamodb`
//! feature.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::alert::{AlertKind, AlertRecord};
use crate::price::{PricePoint, Zone};
use crate::subscriber::Subscriber;

pub mod memory;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub use memory::{InMemoryAlertLog, InMemoryPriceStore, InMemorySubscriberDirectory};

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Conflict error: {0}")]
    ConflictError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Outcome of writing a batch of price points
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Newly stored points
    pub inserted: usize,
    /// Points already present for their (zone, hour)
    pub skipped: usize,
    /// Points whose write failed
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.failed
    }
}

/// Hourly price storage keyed by (zone, hour)
#[async_trait::async_trait]
pub trait PriceStore: Send + Sync {
    /// Store a point unless one already exists for its (zone, hour).
    /// Returns `true` when the point was newly stored.
    async fn put(&self, point: PricePoint) -> Result<bool, StoreError>;

    /// Points of a zone with `from <= hour < to`, ascending by hour
    async fn query(
        &self,
        zone: Zone,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError>;

    /// Delete every point older than `cutoff`, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Write each point independently; failures are counted, never propagated
    async fn put_batch(&self, points: Vec<PricePoint>) -> BatchReport {
        let mut report = BatchReport::default();
        for point in points {
            let key = point.key();
            match self.put(point).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    log::warn!("Failed to store price point {} {}: {}", key.0, key.1, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn exists(
        &self,
        zone: Zone,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(!self.query(zone, from, to).await?.is_empty())
    }
}

/// Subscriber records keyed by id, unique by contact address
#[async_trait::async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Insert a new subscriber; `ConflictError` if the address is taken
    async fn insert(&self, subscriber: Subscriber) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Subscriber>, StoreError>;
    async fn find_by_address(&self, address: &str) -> Result<Option<Subscriber>, StoreError>;
    /// Replace an existing subscriber record
    async fn update(&self, subscriber: Subscriber) -> Result<(), StoreError>;
    /// Returns `false` when no subscriber had this id
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn list(&self) -> Result<Vec<Subscriber>, StoreError>;
    /// Subscribers in a zone with alerts enabled
    async fn list_enabled_in_zone(&self, zone: Zone) -> Result<Vec<Subscriber>, StoreError>;

    /// Enabled subscribers whose threshold lies strictly above the price
    async fn for_low_price(
        &self,
        zone: Zone,
        current_price: Decimal,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let mut subscribers = self.list_enabled_in_zone(zone).await?;
        subscribers.retain(|s| s.wants_low_price_alert(current_price));
        Ok(subscribers)
    }

    /// Enabled subscribers whose threshold lies strictly below the price
    async fn for_high_price(
        &self,
        zone: Zone,
        current_price: Decimal,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let mut subscribers = self.list_enabled_in_zone(zone).await?;
        subscribers.retain(|s| s.wants_high_price_alert(current_price));
        Ok(subscribers)
    }

    async fn count_by_zone(&self) -> Result<BTreeMap<Zone, usize>, StoreError> {
        let mut counts = BTreeMap::new();
        for subscriber in self.list().await? {
            *counts.entry(subscriber.zone).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Append-only log of issued alerts, unique per (subscriber, kind, day)
#[async_trait::async_trait]
pub trait AlertLog: Send + Sync {
    /// Append a record for the given market day. Returns `false` without
    /// writing when the subscriber already has a record of that kind that day.
    async fn append(&self, record: AlertRecord, day: NaiveDate) -> Result<bool, StoreError>;

    async fn has_sent_on(
        &self,
        subscriber_id: Uuid,
        kind: AlertKind,
        day: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// All records of a subscriber, newest first
    async fn list_for_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<AlertRecord>, StoreError>;

    /// Records of a subscriber triggered in `[from, to)`, newest first
    async fn list_for_subscriber_between(
        &self,
        subscriber_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let mut records = self.list_for_subscriber(subscriber_id).await?;
        records.retain(|r| r.triggered_at >= from && r.triggered_at < to);
        Ok(records)
    }

    async fn delete_for_subscriber(&self, subscriber_id: Uuid) -> Result<usize, StoreError>;

    /// Delete records triggered before `cutoff`
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
