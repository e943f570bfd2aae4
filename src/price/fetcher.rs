use chrono::{DateTime, NaiveDate, Utc};
use futures_util::{StreamExt, stream};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::source::{PriceSource, SourceError};
use super::{PricePoint, Zone};
use crate::clock::{Clock, MarketCalendar};
use crate::store::{BatchReport, PriceStore, StoreError};

const LOCAL_PRICE_FIELDS: [&str; 2] = ["price_in_local_currency", "NOK_per_kWh"];
const REFERENCE_PRICE_FIELDS: [&str; 2] = ["price_in_reference_currency", "EUR_per_kWh"];
const EXCHANGE_RATE_FIELDS: [&str; 2] = ["exchange_rate", "EXR"];
const INTERVAL_START_FIELDS: [&str; 2] = ["interval_start", "time_start"];

/// Fetch failures, scoped to one (zone, date)
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transient fetch failure for {zone} on {date}: {reason}")]
    Transient {
        zone: Zone,
        date: NaiveDate,
        reason: String,
    },

    #[error("Malformed payload for {zone} on {date}: {reason}")]
    Malformed {
        zone: Zone,
        date: NaiveDate,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a successful fetch of one (zone, date)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Source has nothing for that day yet
    NotPublished,
    Stored {
        /// Entries that parsed into price points
        parsed: usize,
        /// Entries skipped because of a bad price or timestamp
        rejected: usize,
        report: BatchReport,
    },
}

/// Per-zone result of a fan-out fetch
#[derive(Debug)]
pub struct ZoneFetchReport {
    pub zone: Zone,
    pub date: NaiveDate,
    pub result: Result<FetchOutcome, FetchError>,
}

impl ZoneFetchReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Points parsed out of one payload
#[derive(Debug, Clone, Default)]
pub struct ParsedDay {
    pub points: Vec<PricePoint>,
    pub rejected: usize,
}

fn field<'a>(entry: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| entry.get(*name)).filter(|v| !v.is_null())
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_entry(zone: Zone, entry: &Value) -> Result<PricePoint, String> {
    let price_local = field(entry, &LOCAL_PRICE_FIELDS)
        .and_then(decimal_value)
        .ok_or("missing or invalid local price")?;
    let price_reference = field(entry, &REFERENCE_PRICE_FIELDS)
        .and_then(decimal_value)
        .ok_or("missing or invalid reference price")?;
    let start = field(entry, &INTERVAL_START_FIELDS)
        .and_then(timestamp_value)
        .ok_or("missing or invalid interval start")?;

    let point = PricePoint::new(zone, start, price_local, price_reference);
    Ok(match field(entry, &EXCHANGE_RATE_FIELDS).and_then(decimal_value) {
        Some(rate) => point.with_exchange_rate(rate),
        None => point,
    })
}

/// Parse a day payload. Only a non-array document is an error; bad entries are
/// skipped and counted.
pub fn parse_price_entries(
    zone: Zone,
    date: NaiveDate,
    body: &str,
) -> Result<ParsedDay, FetchError> {
    let malformed = |reason: String| FetchError::Malformed { zone, date, reason };

    let document: Value = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
    let entries = document
        .as_array()
        .ok_or_else(|| malformed("expected a JSON array".to_string()))?;

    let mut parsed = ParsedDay::default();
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(zone, entry) {
            Ok(point) => parsed.points.push(point),
            Err(reason) => {
                log::warn!("⚠️ Skipping {} entry #{} for {}: {}", zone, index, date, reason);
                parsed.rejected += 1;
            }
        }
    }
    Ok(parsed)
}

/// Pulls day payloads from a [`PriceSource`] into a [`PriceStore`]
pub struct PriceFetcher {
    source: Arc<dyn PriceSource>,
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
    concurrency: usize,
    timeout: Duration,
}

impl PriceFetcher {
    pub fn new(
        source: Arc<dyn PriceSource>,
        store: Arc<dyn PriceStore>,
        clock: Arc<dyn Clock>,
        calendar: MarketCalendar,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            calendar,
            concurrency: Zone::ALL.len(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn fetch_zone_date(
        &self,
        zone: Zone,
        date: NaiveDate,
    ) -> Result<FetchOutcome, FetchError> {
        let transient = |reason: String| FetchError::Transient { zone, date, reason };

        let request = self.source.fetch_day(zone, date);
        let body = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(transient(e.to_string())),
            Err(_) => return Err(transient(SourceError::Timeout(self.timeout).to_string())),
        };

        let Some(body) = body.filter(|b| !b.trim().is_empty()) else {
            log::info!("🕐 Prices for {} on {} not published yet", zone, date);
            return Ok(FetchOutcome::NotPublished);
        };

        let ParsedDay { points, rejected } = parse_price_entries(zone, date, &body)?;
        if points.is_empty() && rejected == 0 {
            log::info!("🕐 Empty price list for {} on {}", zone, date);
            return Ok(FetchOutcome::NotPublished);
        }

        let parsed = points.len();
        let report = self.store.put_batch(points).await;
        if report.total() > 0 && report.failed == report.total() {
            return Err(FetchError::Store(StoreError::Unknown(format!(
                "all {} writes failed for {} on {}",
                report.failed, zone, date
            ))));
        }

        log::info!(
            "💾 {} {}: {} new, {} already stored, {} failed, {} rejected",
            zone,
            date,
            report.inserted,
            report.skipped,
            report.failed,
            rejected
        );

        Ok(FetchOutcome::Stored {
            parsed,
            rejected,
            report,
        })
    }

    /// Fetch every zone for a date. One report per zone, ordered by zone.
    pub async fn fetch_all_zones(&self, date: NaiveDate) -> Vec<ZoneFetchReport> {
        self.fetch_zones(&Zone::ALL, date).await
    }

    async fn fetch_zones(&self, zones: &[Zone], date: NaiveDate) -> Vec<ZoneFetchReport> {
        log::info!(
            "📡 Fetching prices for {} zone(s) on {} from {}",
            zones.len(),
            date,
            self.source.name()
        );

        let mut reports: Vec<ZoneFetchReport> = stream::iter(zones.iter().copied())
            .map(|zone| async move {
                let result = self.fetch_zone_date(zone, date).await;
                if let Err(e) = &result {
                    log::error!("❌ Price fetch failed: {}", e);
                }
                ZoneFetchReport { zone, date, result }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        reports.sort_by_key(|r| r.zone);
        reports
    }

    pub async fn fetch_today(&self) -> Vec<ZoneFetchReport> {
        self.fetch_all_zones(self.calendar.today(self.clock.as_ref())).await
    }

    pub async fn fetch_tomorrow(&self) -> Vec<ZoneFetchReport> {
        self.fetch_all_zones(self.calendar.tomorrow(self.clock.as_ref())).await
    }

    /// Fetch today's prices for one zone, or for all when `zone` is `None`
    pub async fn manual_fetch(&self, zone: Option<Zone>) -> Vec<ZoneFetchReport> {
        let today = self.calendar.today(self.clock.as_ref());
        match zone {
            Some(zone) => self.fetch_zones(&[zone], today).await,
            None => self.fetch_all_zones(today).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::InMemoryPriceStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned payloads per zone
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub bodies: HashMap<Zone, Result<Option<String>, String>>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch_day(
            &self,
            zone: Zone,
            _date: NaiveDate,
        ) -> Result<Option<String>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.bodies.get(&zone) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(e)) => Err(SourceError::NetworkError(e.clone())),
                None => Ok(None),
            }
        }
    }

    struct SlowSource;

    #[async_trait]
    impl PriceSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch_day(
            &self,
            _zone: Zone,
            _date: NaiveDate,
        ) -> Result<Option<String>, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    /// Payload of 24 hours starting at local midnight on 2025-12-21 (+01:00)
    pub(crate) fn day_payload(prices: &[&str]) -> String {
        let entries: Vec<String> = prices
            .iter()
            .enumerate()
            .map(|(hour, price)| {
                format!(
                    r#"{{"NOK_per_kWh": {price}, "EUR_per_kWh": 0.1, "EXR": 11.5,
                        "time_start": "2025-12-21T{hour:02}:00:00+01:00",
                        "time_end": "2025-12-21T{hour:02}:59:59+01:00"}}"#
                )
            })
            .collect();
        format!("[{}]", entries.join(","))
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 21).unwrap()
    }

    fn fetcher(source: Arc<dyn PriceSource>, store: Arc<InMemoryPriceStore>) -> PriceFetcher {
        let clock = Arc::new(FixedClock::new(
            DateTime::parse_from_rfc3339("2025-12-21T10:15:00Z").unwrap().with_timezone(&Utc),
        ));
        let calendar = MarketCalendar::from_offset_hours(1).unwrap();
        PriceFetcher::new(source, store, clock, calendar)
    }

    #[test]
    fn test_parse_accepts_both_field_spellings() {
        let body = r#"[
            {"price_in_local_currency": "1.2345", "price_in_reference_currency": 0.10789,
             "exchange_rate": 11.44, "interval_start": "2025-12-21T00:00:00+01:00",
             "interval_end": "2025-12-21T01:00:00+01:00"},
            {"NOK_per_kWh": 0.85, "EUR_per_kWh": 0.075, "EXR": 11.33,
             "time_start": "2025-12-21T01:00:00+01:00", "time_end": "2025-12-21T02:00:00+01:00"}
        ]"#;

        let parsed = parse_price_entries(Zone::NO1, date(), body).unwrap();
        assert_eq!(parsed.rejected, 0);
        assert_eq!(parsed.points.len(), 2);

        let first = &parsed.points[0];
        assert_eq!(first.price_local, "1.23".parse::<Decimal>().unwrap());
        assert_eq!(first.price_reference, "0.1079".parse::<Decimal>().unwrap());
        assert_eq!(first.timestamp_hour.to_rfc3339(), "2025-12-20T23:00:00+00:00");
        assert_eq!(first.exchange_rate, Some("11.44".parse().unwrap()));
    }

    #[test]
    fn test_parse_skips_bad_entries() {
        let body = r#"[
            {"NOK_per_kWh": "abc", "EUR_per_kWh": 0.07, "time_start": "2025-12-21T00:00:00+01:00"},
            {"NOK_per_kWh": 0.5, "EUR_per_kWh": 0.04, "time_start": "yesterday"},
            {"NOK_per_kWh": 0.5, "EUR_per_kWh": 0.04},
            {"NOK_per_kWh": -0.02, "EUR_per_kWh": -0.002, "time_start": "2025-12-21T03:00:00+01:00"}
        ]"#;

        let parsed = parse_price_entries(Zone::NO2, date(), body).unwrap();
        assert_eq!(parsed.rejected, 3);
        assert_eq!(parsed.points.len(), 1);
        assert!(parsed.points[0].price_local.is_sign_negative());
    }

    #[test]
    fn test_parse_rejects_non_array_document() {
        let err = parse_price_entries(Zone::NO3, date(), r#"{"error": "oops"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { zone: Zone::NO3, .. }));

        let err = parse_price_entries(Zone::NO3, date(), "<html>").unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let mut source = FakeSource::default();
        source.bodies.insert(Zone::NO1, Ok(Some(day_payload(&["1.0"; 24]))));
        let store = Arc::new(InMemoryPriceStore::new());
        let fetcher = fetcher(Arc::new(source), store.clone());

        let first = fetcher.fetch_zone_date(Zone::NO1, date()).await.unwrap();
        let second = fetcher.fetch_zone_date(Zone::NO1, date()).await.unwrap();

        match (first, second) {
            (FetchOutcome::Stored { report: a, .. }, FetchOutcome::Stored { report: b, .. }) => {
                assert_eq!(a.inserted, 24);
                assert_eq!(b.inserted, 0);
                assert_eq!(b.skipped, 24);
            }
            other => panic!("unexpected outcomes: {:?}", other),
        }
        assert_eq!(store.len().await, 24);
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_published() {
        let mut source = FakeSource::default();
        source.bodies.insert(Zone::NO4, Ok(Some("[]".to_string())));
        source.bodies.insert(Zone::NO5, Ok(Some("   ".to_string())));
        let fetcher = fetcher(Arc::new(source), Arc::new(InMemoryPriceStore::new()));

        for zone in [Zone::NO4, Zone::NO5, Zone::NO1] {
            let outcome = fetcher.fetch_zone_date(zone, date()).await.unwrap();
            assert_eq!(outcome, FetchOutcome::NotPublished);
        }
    }

    #[tokio::test]
    async fn test_malformed_zone_does_not_block_others() {
        let mut source = FakeSource::default();
        for zone in Zone::ALL {
            source.bodies.insert(zone, Ok(Some(day_payload(&["0.5", "0.6", "0.7"]))));
        }
        source.bodies.insert(Zone::NO3, Ok(Some("{not json".to_string())));
        let store = Arc::new(InMemoryPriceStore::new());
        let fetcher = fetcher(Arc::new(source), store.clone()).with_concurrency(2);

        let reports = fetcher.fetch_all_zones(date()).await;

        assert_eq!(reports.len(), 5);
        assert_eq!(reports.iter().map(|r| r.zone).collect::<Vec<_>>(), Zone::ALL.to_vec());
        for report in &reports {
            if report.zone == Zone::NO3 {
                assert!(matches!(report.result, Err(FetchError::Malformed { .. })));
            } else {
                assert!(report.is_success(), "{} should succeed", report.zone);
            }
        }
        assert_eq!(store.len().await, 12);
    }

    #[tokio::test]
    async fn test_network_failure_is_transient() {
        let mut source = FakeSource::default();
        source.bodies.insert(Zone::NO2, Err("connection reset".to_string()));
        let fetcher = fetcher(Arc::new(source), Arc::new(InMemoryPriceStore::new()));

        let err = fetcher.fetch_zone_date(Zone::NO2, date()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient { zone: Zone::NO2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let fetcher = fetcher(Arc::new(SlowSource), Arc::new(InMemoryPriceStore::new()))
            .with_timeout(Duration::from_secs(5));

        let err = fetcher.fetch_zone_date(Zone::NO1, date()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }));
    }

    #[tokio::test]
    async fn test_manual_fetch_single_zone() {
        let source = Arc::new(FakeSource::default());
        let fetcher = fetcher(source.clone(), Arc::new(InMemoryPriceStore::new()));

        let reports = fetcher.manual_fetch(Some(Zone::NO5)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].zone, Zone::NO5);
        assert_eq!(reports[0].date, date());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let reports = fetcher.manual_fetch(None).await;
        assert_eq!(reports.len(), 5);
    }
}
