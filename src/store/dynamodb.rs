use super::{AlertLog, PriceStore, StoreError, SubscriberDirectory};
use crate::alert::{AlertKind, AlertRecord, dedup_key};
use crate::price::{PricePoint, Zone};
use crate::subscriber::{Subscriber, normalize_address};
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    error::SdkError,
    types::{AttributeValue, Delete, Put, TransactWriteItem},
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

type Item = HashMap<String, AttributeValue>;

/// Filter expression for a full-table scan
struct ScanFilter<'a> {
    expression: &'a str,
    names: Vec<(&'a str, &'a str)>,
    values: Vec<(&'a str, AttributeValue)>,
}

/// Table names derived from a common prefix
#[derive(Debug, Clone)]
pub struct DynamoTables {
    prefix: String,
}

impl DynamoTables {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Get table name with prefix
    fn table_name(&self, base_name: &str) -> String {
        format!("{}_{}", self.prefix, base_name)
    }

    pub fn prices(&self) -> String {
        self.table_name("prices")
    }

    pub fn subscribers(&self) -> String {
        self.table_name("subscribers")
    }

    pub fn alerts(&self) -> String {
        self.table_name("alerts")
    }

    /// One guard item per registered address
    pub fn addresses(&self) -> String {
        self.table_name("addresses")
    }
}

/// Build a client from the ambient AWS configuration
pub async fn connect() -> DynamoClient {
    let config = aws_config::defaults(aws_config::BehaviorVersion::v2025_01_17())
        .load()
        .await;
    DynamoClient::new(&config)
}

fn sdk_error<E: std::fmt::Debug, R: std::fmt::Debug>(
    context: &str,
    e: SdkError<E, R>,
) -> StoreError {
    log::error!("{context}: {:?}", e);
    match e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            StoreError::ConnectionError(format!("{context}: {:?}", e))
        }
        other => StoreError::Unknown(format!("DynamoDB error: {:?}", other)),
    }
}

/// Hour key, fixed-width UTC so lexical and chronological order agree
fn hour_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Key condition over one zone's hours in a half-open window `[from, to)`.
/// Both bounds live in the key condition; DynamoDB rejects key attributes in a
/// query filter.
struct PriceRange {
    names: HashMap<String, String>,
    values: Item,
}

impl PriceRange {
    const CONDITION: &'static str = "#z = :zone AND #h BETWEEN :from AND :last";

    /// `None` for an empty window
    fn new(zone: Zone, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        if from >= to {
            return None;
        }
        let last = to - chrono::Duration::seconds(1);

        let names = HashMap::from([
            ("#z".to_string(), "zone".to_string()),
            ("#h".to_string(), "hour".to_string()),
        ]);
        let values = HashMap::from([
            (":zone".to_string(), AttributeValue::S(zone.code().to_string())),
            (":from".to_string(), AttributeValue::S(hour_key(from))),
            (":last".to_string(), AttributeValue::S(hour_key(last))),
        ]);
        Some(Self { names, values })
    }
}

fn get_s<'a>(item: &'a Item, name: &str) -> Result<&'a String, StoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| StoreError::SerializationError(format!("Missing {name}")))
}

fn get_time(item: &Item, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = get_s(item, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::SerializationError(format!("Invalid {name}")))
}

fn get_decimal(item: &Item, name: &str) -> Result<Option<Decimal>, StoreError> {
    match item.get(name).and_then(|v| v.as_n().ok()) {
        Some(n) => Decimal::from_str(n)
            .map(Some)
            .map_err(|_| StoreError::SerializationError(format!("Invalid {name}"))),
        None => Ok(None),
    }
}

fn get_uuid(item: &Item, name: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(get_s(item, name)?)
        .map_err(|_| StoreError::SerializationError(format!("Invalid {name}")))
}

/// Convert PricePoint to DynamoDB item
pub fn price_to_item(point: &PricePoint) -> Item {
    let mut item = HashMap::new();

    item.insert("zone".to_string(), AttributeValue::S(point.zone.code().to_string()));
    item.insert("hour".to_string(), AttributeValue::S(hour_key(point.timestamp_hour)));
    item.insert("price_local".to_string(), AttributeValue::N(point.price_local.to_string()));
    item.insert(
        "price_reference".to_string(),
        AttributeValue::N(point.price_reference.to_string()),
    );

    if let Some(rate) = point.exchange_rate {
        item.insert("exchange_rate".to_string(), AttributeValue::N(rate.to_string()));
    }

    item
}

/// Convert DynamoDB item to PricePoint
pub fn item_to_price(item: &Item) -> Result<PricePoint, StoreError> {
    let zone = Zone::from_str(get_s(item, "zone")?)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    let hour = get_time(item, "hour")?;
    let price_local = get_decimal(item, "price_local")?
        .ok_or_else(|| StoreError::SerializationError("Missing price_local".to_string()))?;
    let price_reference = get_decimal(item, "price_reference")?
        .ok_or_else(|| StoreError::SerializationError("Missing price_reference".to_string()))?;

    let mut point = PricePoint::new(zone, hour, price_local, price_reference);
    point.exchange_rate = get_decimal(item, "exchange_rate")?;
    Ok(point)
}

/// Convert Subscriber to DynamoDB item
pub fn subscriber_to_item(subscriber: &Subscriber) -> Item {
    let mut item = HashMap::new();

    item.insert("subscriber_id".to_string(), AttributeValue::S(subscriber.id.to_string()));
    item.insert(
        "contact_address".to_string(),
        AttributeValue::S(subscriber.contact_address.clone()),
    );
    item.insert("zone".to_string(), AttributeValue::S(subscriber.zone.code().to_string()));
    item.insert("alert_enabled".to_string(), AttributeValue::Bool(subscriber.alert_enabled));
    item.insert("created_at".to_string(), AttributeValue::S(subscriber.created_at.to_rfc3339()));
    item.insert("updated_at".to_string(), AttributeValue::S(subscriber.updated_at.to_rfc3339()));

    if let Some(threshold) = subscriber.alert_threshold {
        item.insert("alert_threshold".to_string(), AttributeValue::N(threshold.to_string()));
    }

    item
}

/// Convert DynamoDB item to Subscriber
pub fn item_to_subscriber(item: &Item) -> Result<Subscriber, StoreError> {
    let zone = Zone::from_str(get_s(item, "zone")?)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    let alert_enabled = item
        .get("alert_enabled")
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(true);

    Ok(Subscriber {
        id: get_uuid(item, "subscriber_id")?,
        contact_address: get_s(item, "contact_address")?.clone(),
        zone,
        alert_threshold: get_decimal(item, "alert_threshold")?,
        alert_enabled,
        created_at: get_time(item, "created_at")?,
        updated_at: get_time(item, "updated_at")?,
    })
}

/// Guard item claiming a contact address for one subscriber
pub fn address_guard_item(subscriber: &Subscriber) -> Item {
    let mut item = HashMap::new();
    item.insert(
        "contact_address".to_string(),
        AttributeValue::S(subscriber.contact_address.clone()),
    );
    item.insert("subscriber_id".to_string(), AttributeValue::S(subscriber.id.to_string()));
    item
}

fn build_error(e: aws_sdk_dynamodb::error::BuildError) -> StoreError {
    StoreError::SerializationError(format!("Invalid transaction item: {e}"))
}

/// Subscriber record and address guard, both conditional on not existing yet.
/// Written in one transaction so an address can never be claimed twice.
pub fn registration_writes(
    tables: &DynamoTables,
    subscriber: &Subscriber,
) -> Result<Vec<TransactWriteItem>, StoreError> {
    let record = Put::builder()
        .table_name(tables.subscribers())
        .set_item(Some(subscriber_to_item(subscriber)))
        .condition_expression("attribute_not_exists(subscriber_id)")
        .build()
        .map_err(build_error)?;
    let guard = Put::builder()
        .table_name(tables.addresses())
        .set_item(Some(address_guard_item(subscriber)))
        .condition_expression("attribute_not_exists(contact_address)")
        .build()
        .map_err(build_error)?;

    Ok(vec![
        TransactWriteItem::builder().put(record).build(),
        TransactWriteItem::builder().put(guard).build(),
    ])
}

/// Deletes of the subscriber record and the guard it owns
pub fn removal_writes(
    tables: &DynamoTables,
    subscriber: &Subscriber,
) -> Result<Vec<TransactWriteItem>, StoreError> {
    let sid = AttributeValue::S(subscriber.id.to_string());
    let record = Delete::builder()
        .table_name(tables.subscribers())
        .key("subscriber_id", sid.clone())
        .condition_expression("attribute_exists(subscriber_id)")
        .build()
        .map_err(build_error)?;
    let guard = Delete::builder()
        .table_name(tables.addresses())
        .key("contact_address", AttributeValue::S(subscriber.contact_address.clone()))
        .condition_expression("subscriber_id = :sid")
        .expression_attribute_values(":sid", sid)
        .build()
        .map_err(build_error)?;

    Ok(vec![
        TransactWriteItem::builder().delete(record).build(),
        TransactWriteItem::builder().delete(guard).build(),
    ])
}

/// Convert AlertRecord to DynamoDB item under its per-day key
pub fn alert_to_item(record: &AlertRecord, day: NaiveDate) -> Item {
    let mut item = HashMap::new();

    item.insert("subscriber_id".to_string(), AttributeValue::S(record.subscriber_id.to_string()));
    item.insert("dedup_key".to_string(), AttributeValue::S(dedup_key(record.kind, day)));
    item.insert("alert_id".to_string(), AttributeValue::S(record.id.to_string()));
    item.insert("kind".to_string(), AttributeValue::S(record.kind.as_str().to_string()));
    item.insert("message".to_string(), AttributeValue::S(record.message.clone()));
    item.insert(
        "triggered_at".to_string(),
        AttributeValue::S(hour_key_precise(record.triggered_at)),
    );

    if let Some(price) = record.price_at_trigger {
        item.insert("price_at_trigger".to_string(), AttributeValue::N(price.to_string()));
    }

    item
}

fn hour_key_precise(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert DynamoDB item to AlertRecord
pub fn item_to_alert(item: &Item) -> Result<AlertRecord, StoreError> {
    let kind = AlertKind::from_str(get_s(item, "kind")?)
        .map_err(StoreError::SerializationError)?;

    Ok(AlertRecord {
        id: get_uuid(item, "alert_id")?,
        subscriber_id: get_uuid(item, "subscriber_id")?,
        kind,
        message: get_s(item, "message")?.clone(),
        price_at_trigger: get_decimal(item, "price_at_trigger")?,
        triggered_at: get_time(item, "triggered_at")?,
    })
}

/// DynamoDB implementation of the store traits
///
/// Tables:
/// - `<prefix>_prices`: pk `zone`, sk `hour`
/// - `<prefix>_subscribers`: pk `subscriber_id`
/// - `<prefix>_addresses`: pk `contact_address`, guard item pointing at `subscriber_id`
/// - `<prefix>_alerts`: pk `subscriber_id`, sk `dedup_key` (`KIND#YYYY-MM-DD`)
#[derive(Clone)]
pub struct DynamoDbStore {
    client: DynamoClient,
    tables: DynamoTables,
}

impl DynamoDbStore {
    pub fn new(client: DynamoClient, tables: DynamoTables) -> Self {
        Self { client, tables }
    }

    async fn scan_all(
        &self,
        table_name: &str,
        filter: Option<ScanFilter<'_>>,
    ) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(table_name)
                .set_exclusive_start_key(start_key.take());

            if let Some(filter) = &filter {
                request = request.filter_expression(filter.expression);
                for (alias, name) in &filter.names {
                    request = request.expression_attribute_names(*alias, *name);
                }
                for (placeholder, value) in &filter.values {
                    request = request.expression_attribute_values(*placeholder, value.clone());
                }
            }

            let output = request
                .send()
                .await
                .map_err(|e| sdk_error("Failed to scan table", e))?;

            if let Some(page) = output.items {
                items.extend(page);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn query_alerts(&self, subscriber_id: Uuid) -> Result<Vec<Item>, StoreError> {
        let table_name = self.tables.alerts();
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&table_name)
                .key_condition_expression("subscriber_id = :sid")
                .expression_attribute_values(":sid", AttributeValue::S(subscriber_id.to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| sdk_error("Failed to query alerts", e))?;

            if let Some(page) = output.items {
                items.extend(page);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn delete_alert_item(&self, subscriber_id: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(self.tables.alerts())
            .key("subscriber_id", AttributeValue::S(subscriber_id.to_string()))
            .key("dedup_key", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| sdk_error("Failed to delete alert", e))?;
        Ok(())
    }

    /// Simple health check by listing tables
    pub async fn health_check(&self) -> Result<(), StoreError> {
        match self.client.list_tables().send().await {
            Ok(_) => {
                log::debug!("DynamoDB health check passed");
                Ok(())
            }
            Err(e) => {
                log::error!("DynamoDB health check failed: {:?}", e);
                Err(StoreError::ConnectionError(format!("Health check failed: {:?}", e)))
            }
        }
    }
}

#[async_trait::async_trait]
impl PriceStore for DynamoDbStore {
    async fn put(&self, point: PricePoint) -> Result<bool, StoreError> {
        let item = price_to_item(&point);

        let result = self
            .client
            .put_item()
            .table_name(self.tables.prices())
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#h)")
            .expression_attribute_names("#h", "hour")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err))
                if err.err().is_conditional_check_failed_exception() =>
            {
                log::debug!("Price for {} {} already stored", point.zone, point.timestamp_hour);
                Ok(false)
            }
            Err(e) => Err(sdk_error("Failed to store price point", e)),
        }
    }

    async fn query(
        &self,
        zone: Zone,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let Some(range) = PriceRange::new(zone, from, to) else {
            return Ok(Vec::new());
        };

        let table_name = self.tables.prices();
        let mut points = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(&table_name)
                .key_condition_expression(PriceRange::CONDITION)
                .set_expression_attribute_names(Some(range.names.clone()))
                .set_expression_attribute_values(Some(range.values.clone()))
                .scan_index_forward(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| sdk_error("Failed to query prices", e))?;

            for item in output.items.unwrap_or_default() {
                match item_to_price(&item) {
                    Ok(point) => points.push(point),
                    Err(e) => log::warn!("Failed to parse price item: {:?}", e),
                }
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(points)
    }

    async fn exists(
        &self,
        zone: Zone,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(range) = PriceRange::new(zone, from, to) else {
            return Ok(false);
        };

        let output = self
            .client
            .query()
            .table_name(self.tables.prices())
            .key_condition_expression(PriceRange::CONDITION)
            .set_expression_attribute_names(Some(range.names))
            .set_expression_attribute_values(Some(range.values))
            .limit(1)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to check prices", e))?;

        Ok(output.count() > 0)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let table_name = self.tables.prices();
        let stale = self
            .scan_all(
                &table_name,
                Some(ScanFilter {
                    expression: "#h < :cutoff",
                    names: vec![("#h", "hour")],
                    values: vec![(":cutoff", AttributeValue::S(hour_key(cutoff)))],
                }),
            )
            .await?;

        let mut removed = 0;
        for item in stale {
            let (Some(zone), Some(hour)) = (item.get("zone"), item.get("hour")) else {
                continue;
            };
            let result = self
                .client
                .delete_item()
                .table_name(&table_name)
                .key("zone", zone.clone())
                .key("hour", hour.clone())
                .send()
                .await;
            match result {
                Ok(_) => removed += 1,
                Err(e) => log::warn!("Failed to delete stale price item: {:?}", e),
            }
        }

        Ok(removed)
    }
}

#[async_trait::async_trait]
impl SubscriberDirectory for DynamoDbStore {
    async fn insert(&self, subscriber: Subscriber) -> Result<(), StoreError> {
        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(registration_writes(&self.tables, &subscriber)?))
            .send()
            .await;

        match result {
            Ok(_) => {
                log::info!("Created subscriber {} in {}", subscriber.id, subscriber.zone);
                Ok(())
            }
            Err(SdkError::ServiceError(err)) if err.err().is_transaction_canceled_exception() => {
                Err(StoreError::ConflictError(format!(
                    "Address already registered: {}",
                    subscriber.contact_address
                )))
            }
            Err(e) => Err(sdk_error("Failed to create subscriber", e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscriber>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(self.tables.subscribers())
            .key("subscriber_id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|e| sdk_error("Failed to get subscriber", e))?;

        output.item.as_ref().map(item_to_subscriber).transpose()
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Subscriber>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(self.tables.addresses())
            .key("contact_address", AttributeValue::S(normalize_address(address)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| sdk_error("Failed to look up subscriber by address", e))?;

        match output.item {
            Some(guard) => self.get(get_uuid(&guard, "subscriber_id")?).await,
            None => Ok(None),
        }
    }

    async fn update(&self, subscriber: Subscriber) -> Result<(), StoreError> {
        let item = subscriber_to_item(&subscriber);

        let result = self
            .client
            .put_item()
            .table_name(self.tables.subscribers())
            .set_item(Some(item))
            .condition_expression("attribute_exists(subscriber_id) AND contact_address = :address")
            .expression_attribute_values(
                ":address",
                AttributeValue::S(subscriber.contact_address.clone()),
            )
            .send()
            .await;

        match result {
            Ok(_) => {
                log::info!("Updated subscriber {}", subscriber.id);
                Ok(())
            }
            Err(SdkError::ServiceError(err))
                if err.err().is_conditional_check_failed_exception() =>
            {
                Err(StoreError::Unknown(format!(
                    "Subscriber not found or address changed: {}",
                    subscriber.id
                )))
            }
            Err(e) => Err(sdk_error("Failed to update subscriber", e)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let Some(subscriber) = self.get(id).await? else {
            return Ok(false);
        };

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(removal_writes(&self.tables, &subscriber)?))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err)) if err.err().is_transaction_canceled_exception() => {
                log::debug!("Subscriber {} was removed concurrently", id);
                Ok(false)
            }
            Err(e) => Err(sdk_error("Failed to delete subscriber", e)),
        }
    }

    async fn list(&self) -> Result<Vec<Subscriber>, StoreError> {
        let items = self.scan_all(&self.tables.subscribers(), None).await?;
        let mut subscribers = Vec::new();
        for item in items {
            match item_to_subscriber(&item) {
                Ok(subscriber) => subscribers.push(subscriber),
                Err(e) => log::warn!("Failed to parse subscriber: {:?}", e),
            }
        }
        subscribers.sort_by_key(|s| s.created_at);
        Ok(subscribers)
    }

    async fn list_enabled_in_zone(&self, zone: Zone) -> Result<Vec<Subscriber>, StoreError> {
        let items = self
            .scan_all(
                &self.tables.subscribers(),
                Some(ScanFilter {
                    expression: "#z = :zone AND alert_enabled = :enabled",
                    names: vec![("#z", "zone")],
                    values: vec![
                        (":zone", AttributeValue::S(zone.code().to_string())),
                        (":enabled", AttributeValue::Bool(true)),
                    ],
                }),
            )
            .await?;

        let mut subscribers = Vec::new();
        for item in items {
            match item_to_subscriber(&item) {
                Ok(subscriber) => subscribers.push(subscriber),
                Err(e) => log::warn!("Failed to parse subscriber: {:?}", e),
            }
        }
        subscribers.sort_by_key(|s| s.created_at);
        Ok(subscribers)
    }
}

#[async_trait::async_trait]
impl AlertLog for DynamoDbStore {
    async fn append(&self, record: AlertRecord, day: NaiveDate) -> Result<bool, StoreError> {
        let item = alert_to_item(&record, day);

        let result = self
            .client
            .put_item()
            .table_name(self.tables.alerts())
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(dedup_key)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err))
                if err.err().is_conditional_check_failed_exception() =>
            {
                Ok(false)
            }
            Err(e) => Err(sdk_error("Failed to append alert", e)),
        }
    }

    async fn has_sent_on(
        &self,
        subscriber_id: Uuid,
        kind: AlertKind,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(self.tables.alerts())
            .key("subscriber_id", AttributeValue::S(subscriber_id.to_string()))
            .key("dedup_key", AttributeValue::S(dedup_key(kind, day)))
            .send()
            .await
            .map_err(|e| sdk_error("Failed to check alert log", e))?;

        Ok(output.item.is_some())
    }

    async fn list_for_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let mut records = Vec::new();
        for item in self.query_alerts(subscriber_id).await? {
            match item_to_alert(&item) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Failed to parse alert record: {:?}", e),
            }
        }
        records.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(records)
    }

    async fn delete_for_subscriber(&self, subscriber_id: Uuid) -> Result<usize, StoreError> {
        let sid = subscriber_id.to_string();
        let mut removed = 0;
        for item in self.query_alerts(subscriber_id).await? {
            if let Ok(key) = get_s(&item, "dedup_key") {
                self.delete_alert_item(&sid, key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let items = self
            .scan_all(
                &self.tables.alerts(),
                Some(ScanFilter {
                    expression: "triggered_at < :cutoff",
                    names: Vec::new(),
                    values: vec![(":cutoff", AttributeValue::S(hour_key_precise(cutoff)))],
                }),
            )
            .await?;

        let mut removed = 0;
        for item in items {
            let (Ok(sid), Ok(key)) = (get_s(&item, "subscriber_id"), get_s(&item, "dedup_key"))
            else {
                continue;
            };
            match self.delete_alert_item(sid, key).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to delete stale alert: {:?}", e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_generation() {
        let tables = DynamoTables::new("spotprice");
        assert_eq!(tables.prices(), "spotprice_prices");
        assert_eq!(tables.subscribers(), "spotprice_subscribers");
        assert_eq!(tables.alerts(), "spotprice_alerts");
        assert_eq!(tables.addresses(), "spotprice_addresses");
    }

    #[test]
    fn test_price_item_conversion() {
        let hour = DateTime::parse_from_rfc3339("2025-12-21T07:00:00+01:00")
            .unwrap()
            .with_timezone(&Utc);
        let point =
            PricePoint::new(Zone::NO5, hour, "1.23".parse().unwrap(), "0.1087".parse().unwrap())
                .with_exchange_rate("11.33".parse().unwrap());

        let item = price_to_item(&point);
        assert_eq!(get_s(&item, "hour").unwrap(), "2025-12-21T06:00:00Z");

        let converted_back = item_to_price(&item).unwrap();
        assert_eq!(converted_back, point);
    }

    #[test]
    fn test_subscriber_item_conversion() {
        let subscriber = Subscriber::new(
            "kari@example.no",
            Zone::NO3,
            Some("0.95".parse().unwrap()),
            true,
            Utc::now(),
        );

        let item = subscriber_to_item(&subscriber);
        assert!(item.contains_key("alert_threshold"));

        let converted_back = item_to_subscriber(&item).unwrap();
        assert_eq!(converted_back.id, subscriber.id);
        assert_eq!(converted_back.zone, Zone::NO3);
        assert_eq!(converted_back.alert_threshold, subscriber.alert_threshold);
    }

    #[test]
    fn test_alert_item_uses_day_key() {
        let record = AlertRecord::new(
            Uuid::new_v4(),
            AlertKind::CheapestHours,
            "cheap hours".to_string(),
            None,
            Utc::now(),
        );
        let day = NaiveDate::from_ymd_opt(2025, 12, 21).unwrap();

        let item = alert_to_item(&record, day);
        assert_eq!(get_s(&item, "dedup_key").unwrap(), "CHEAPEST_HOURS#2025-12-21");
        assert!(!item.contains_key("price_at_trigger"));

        let converted_back = item_to_alert(&item).unwrap();
        assert_eq!(converted_back.id, record.id);
        assert_eq!(converted_back.kind, AlertKind::CheapestHours);
    }

    #[test]
    fn test_price_range_bounds_are_key_conditions() {
        let from = DateTime::parse_from_rfc3339("2025-12-20T23:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = DateTime::parse_from_rfc3339("2025-12-21T23:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let range = PriceRange::new(Zone::NO2, from, to).unwrap();
        assert!(PriceRange::CONDITION.contains("#h BETWEEN :from AND :last"));
        assert_eq!(range.names.get("#h").map(String::as_str), Some("hour"));

        let bound = |name: &str| range.values.get(name).and_then(|v| v.as_s().ok()).cloned();
        assert_eq!(bound(":zone").as_deref(), Some("NO2"));
        assert_eq!(bound(":from").as_deref(), Some("2025-12-20T23:00:00Z"));
        assert_eq!(bound(":last").as_deref(), Some("2025-12-21T22:59:59Z"));
        assert!(!range.values.contains_key(":to"));

        // last hour of the window is inside, the next day's first hour is not
        let last = bound(":last").unwrap();
        assert!(hour_key(to - chrono::Duration::hours(1)) <= last);
        assert!(hour_key(to) > last);

        assert!(PriceRange::new(Zone::NO2, to, to).is_none());
        assert!(PriceRange::new(Zone::NO2, to, from).is_none());
    }

    #[test]
    fn test_registration_claims_address_atomically() {
        let tables = DynamoTables::new("spotprice");
        let subscriber = Subscriber::new("Kari@Example.no", Zone::NO1, None, true, Utc::now());

        let writes = registration_writes(&tables, &subscriber).unwrap();
        assert_eq!(writes.len(), 2);

        let record = writes[0].put().unwrap();
        assert_eq!(record.table_name(), "spotprice_subscribers");
        assert_eq!(record.condition_expression(), Some("attribute_not_exists(subscriber_id)"));

        let guard = writes[1].put().unwrap();
        assert_eq!(guard.table_name(), "spotprice_addresses");
        assert_eq!(guard.condition_expression(), Some("attribute_not_exists(contact_address)"));
        assert_eq!(get_s(guard.item(), "contact_address").unwrap(), "kari@example.no");
        assert_eq!(get_uuid(guard.item(), "subscriber_id").unwrap(), subscriber.id);
    }

    #[test]
    fn test_removal_releases_only_own_address_guard() {
        let tables = DynamoTables::new("spotprice");
        let subscriber = Subscriber::new("kari@example.no", Zone::NO1, None, true, Utc::now());

        let writes = removal_writes(&tables, &subscriber).unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].delete().unwrap().table_name(), "spotprice_subscribers");

        let guard = writes[1].delete().unwrap();
        assert_eq!(guard.table_name(), "spotprice_addresses");
        assert_eq!(get_s(guard.key(), "contact_address").unwrap(), "kari@example.no");
        assert_eq!(guard.condition_expression(), Some("subscriber_id = :sid"));
    }

    #[test]
    fn test_malformed_item_is_rejected() {
        let mut item = HashMap::new();
        item.insert("zone".to_string(), AttributeValue::S("XX9".to_string()));
        assert!(matches!(item_to_price(&item), Err(StoreError::SerializationError(_))));
    }
}
