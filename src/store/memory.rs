use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AlertLog, PriceStore, StoreError, SubscriberDirectory};
use crate::alert::{AlertKind, AlertRecord};
use crate::price::{PricePoint, Zone};
use crate::subscriber::{Subscriber, normalize_address};

/// Price store held in process memory, ordered by (zone, hour)
#[derive(Debug, Default)]
pub struct InMemoryPriceStore {
    points: RwLock<BTreeMap<(Zone, DateTime<Utc>), PricePoint>>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn put(&self, point: PricePoint) -> Result<bool, StoreError> {
        let mut points = self.points.write().await;
        let key = point.key();
        if points.contains_key(&key) {
            return Ok(false);
        }
        points.insert(key, point);
        Ok(true)
    }

    async fn query(
        &self,
        zone: Zone,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let points = self.points.read().await;
        Ok(points
            .range((zone, from)..(zone, to))
            .map(|(_, point)| point.clone())
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut points = self.points.write().await;
        let before = points.len();
        points.retain(|(_, hour), _| *hour >= cutoff);
        Ok(before - points.len())
    }
}

/// Subscriber directory held in process memory
#[derive(Debug, Default)]
pub struct InMemorySubscriberDirectory {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl InMemorySubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SubscriberDirectory for InMemorySubscriberDirectory {
    async fn insert(&self, subscriber: Subscriber) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.write().await;
        let address = normalize_address(&subscriber.contact_address);
        if subscribers
            .values()
            .any(|existing| existing.contact_address == address)
        {
            return Err(StoreError::ConflictError(format!(
                "Address already registered: {address}"
            )));
        }
        if subscribers.contains_key(&subscriber.id) {
            return Err(StoreError::ConflictError(format!(
                "Subscriber already exists: {}",
                subscriber.id
            )));
        }
        subscribers.insert(subscriber.id, subscriber);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscriber>, StoreError> {
        Ok(self.subscribers.read().await.get(&id).cloned())
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Subscriber>, StoreError> {
        let address = normalize_address(address);
        Ok(self
            .subscribers
            .read()
            .await
            .values()
            .find(|s| s.contact_address == address)
            .cloned())
    }

    async fn update(&self, subscriber: Subscriber) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.write().await;
        if !subscribers.contains_key(&subscriber.id) {
            return Err(StoreError::Unknown(format!(
                "Subscriber not found: {}",
                subscriber.id
            )));
        }
        subscribers.insert(subscriber.id, subscriber);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.subscribers.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<Subscriber>, StoreError> {
        let mut all: Vec<Subscriber> = self.subscribers.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    async fn list_enabled_in_zone(&self, zone: Zone) -> Result<Vec<Subscriber>, StoreError> {
        let mut matching: Vec<Subscriber> = self
            .subscribers
            .read()
            .await
            .values()
            .filter(|s| s.zone == zone && s.alert_enabled)
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }
}

/// Alert log held in process memory, keyed by (subscriber, kind, day)
#[derive(Debug, Default)]
pub struct InMemoryAlertLog {
    records: RwLock<HashMap<(Uuid, AlertKind, NaiveDate), AlertRecord>>,
}

impl InMemoryAlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AlertLog for InMemoryAlertLog {
    async fn append(&self, record: AlertRecord, day: NaiveDate) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let key = (record.subscriber_id, record.kind, day);
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record);
        Ok(true)
    }

    async fn has_sent_on(
        &self,
        subscriber_id: Uuid,
        kind: AlertKind,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .contains_key(&(subscriber_id, kind, day)))
    }

    async fn list_for_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let mut records: Vec<AlertRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(records)
    }

    async fn delete_for_subscriber(&self, subscriber_id: Uuid) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(id, _, _), _| *id != subscriber_id);
        Ok(before - records.len())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.triggered_at >= cutoff);
        Ok(before - records.len())
    }
}
