use chrono::NaiveDate;
use futures_util::{StreamExt, stream};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::messages::{self, RenderedAlert};
use super::{AlertKind, AlertRecord};
use crate::clock::{Clock, MarketCalendar};
use crate::notify::Notifier;
use crate::price::{PriceAnalytics, Zone};
use crate::store::{AlertLog, StoreError, SubscriberDirectory};
use crate::subscriber::Subscriber;

/// Number of hours listed in cheapest-hours and summary alerts
pub const CHEAPEST_HOURS_COUNT: usize = 3;

/// Whether `subscriber_id` already has a `kind` alert on the current market day
pub async fn is_sent_today(
    log: &dyn AlertLog,
    clock: &dyn Clock,
    calendar: &MarketCalendar,
    subscriber_id: Uuid,
    kind: AlertKind,
) -> Result<bool, StoreError> {
    log.has_sent_on(subscriber_id, kind, calendar.today(clock)).await
}

/// What happened to one subscriber in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Sent,
    AlreadySent,
    DeliveryFailed,
    StoreFailed,
}

/// Tally of one zone's dispatches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub recipients: usize,
    pub sent: usize,
    pub already_sent: usize,
    /// Recorded, but the notifier failed
    pub delivery_failed: usize,
    /// Not recorded because the alert log failed
    pub store_failed: usize,
}

impl DispatchCounts {
    fn add(&mut self, dispatch: Dispatch) {
        self.recipients += 1;
        match dispatch {
            Dispatch::Sent => self.sent += 1,
            Dispatch::AlreadySent => self.already_sent += 1,
            Dispatch::DeliveryFailed => self.delivery_failed += 1,
            Dispatch::StoreFailed => self.store_failed += 1,
        }
    }

    /// Alerts recorded in this pass, delivered or not
    pub fn recorded(&self) -> usize {
        self.sent + self.delivery_failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneOutcome {
    Evaluated(DispatchCounts),
    /// No prices stored for the zone, nothing to evaluate
    NoData,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub kind: AlertKind,
    pub day: NaiveDate,
    pub zones: Vec<(Zone, ZoneOutcome)>,
}

impl PassReport {
    pub fn outcome(&self, zone: Zone) -> Option<&ZoneOutcome> {
        self.zones.iter().find(|(z, _)| *z == zone).map(|(_, o)| o)
    }

    pub fn totals(&self) -> DispatchCounts {
        let mut totals = DispatchCounts::default();
        for (_, outcome) in &self.zones {
            if let ZoneOutcome::Evaluated(counts) = outcome {
                totals.recipients += counts.recipients;
                totals.sent += counts.sent;
                totals.already_sent += counts.already_sent;
                totals.delivery_failed += counts.delivery_failed;
                totals.store_failed += counts.store_failed;
            }
        }
        totals
    }

    pub fn failed_zones(&self) -> Vec<Zone> {
        self.zones
            .iter()
            .filter(|(_, o)| matches!(o, ZoneOutcome::Failed(_)))
            .map(|(z, _)| *z)
            .collect()
    }
}

/// Content and audience of one zone's alert
struct ZoneAlert {
    rendered: RenderedAlert,
    price: Option<Decimal>,
    recipients: Vec<Subscriber>,
}

/// Decides who gets which alert and dispatches them, at most once per
/// (subscriber, kind, market day)
pub struct AlertEvaluator {
    analytics: PriceAnalytics,
    subscribers: Arc<dyn SubscriberDirectory>,
    log: Arc<dyn AlertLog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
    send_concurrency: usize,
    notify_timeout: Duration,
}

impl AlertEvaluator {
    pub fn new(
        analytics: PriceAnalytics,
        subscribers: Arc<dyn SubscriberDirectory>,
        log: Arc<dyn AlertLog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let calendar = analytics.calendar();
        Self {
            analytics,
            subscribers,
            log,
            notifier,
            clock,
            calendar,
            send_concurrency: 8,
            notify_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_send_concurrency(mut self, concurrency: usize) -> Self {
        self.send_concurrency = concurrency.max(1);
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub async fn low_price_pass(&self) -> PassReport {
        self.run_pass(AlertKind::PriceLow).await
    }

    pub async fn high_price_pass(&self) -> PassReport {
        self.run_pass(AlertKind::PriceHigh).await
    }

    pub async fn cheapest_hours_pass(&self) -> PassReport {
        self.run_pass(AlertKind::CheapestHours).await
    }

    pub async fn daily_summary_pass(&self) -> PassReport {
        self.run_pass(AlertKind::DailySummary).await
    }

    /// All alerts of a subscriber, newest first
    pub async fn alerts_for_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        self.log.list_for_subscriber(subscriber_id).await
    }

    pub async fn todays_alerts_for_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<AlertRecord>, StoreError> {
        let (start, end) = self.calendar.day_bounds(self.calendar.today(self.clock.as_ref()));
        self.log.list_for_subscriber_between(subscriber_id, start, end).await
    }

    async fn run_pass(&self, kind: AlertKind) -> PassReport {
        let day = self.calendar.today(self.clock.as_ref());
        log::info!("🔔 Running {} pass for {}", kind.display_name(), day);

        let mut zones = Vec::with_capacity(Zone::ALL.len());
        for zone in Zone::ALL {
            let outcome = match self.prepare(zone, kind).await {
                Ok(Some(alert)) => {
                    ZoneOutcome::Evaluated(self.dispatch_all(kind, day, alert).await)
                }
                Ok(None) => {
                    log::debug!("No price data for {}, skipping {} pass", zone, kind);
                    ZoneOutcome::NoData
                }
                Err(e) => {
                    log::error!("❌ {} pass failed for {}: {}", kind.display_name(), zone, e);
                    ZoneOutcome::Failed(e.to_string())
                }
            };
            zones.push((zone, outcome));
        }

        let report = PassReport { kind, day, zones };
        let totals = report.totals();
        log::info!(
            "✅ {} pass done: {} sent, {} already sent, {} delivery failures, {} store failures",
            kind.display_name(),
            totals.sent,
            totals.already_sent,
            totals.delivery_failed,
            totals.store_failed
        );
        report
    }

    /// Message and recipients for a zone, `None` when the zone has no data
    async fn prepare(&self, zone: Zone, kind: AlertKind) -> Result<Option<ZoneAlert>, StoreError> {
        let alert = match kind {
            AlertKind::PriceLow => {
                let Some(current) = self.analytics.current_price(zone).await? else {
                    return Ok(None);
                };
                ZoneAlert {
                    rendered: messages::low_price(&current, &self.calendar),
                    price: Some(current.price_local),
                    recipients: self.subscribers.for_low_price(zone, current.price_local).await?,
                }
            }
            AlertKind::PriceHigh => {
                let Some(current) = self.analytics.current_price(zone).await? else {
                    return Ok(None);
                };
                ZoneAlert {
                    rendered: messages::high_price(&current, &self.calendar),
                    price: Some(current.price_local),
                    recipients: self.subscribers.for_high_price(zone, current.price_local).await?,
                }
            }
            AlertKind::CheapestHours => {
                let cheapest = self.analytics.cheapest_n(zone, CHEAPEST_HOURS_COUNT).await?;
                if cheapest.is_empty() {
                    return Ok(None);
                }
                ZoneAlert {
                    rendered: messages::cheapest_hours(zone, &cheapest, &self.calendar),
                    price: None,
                    recipients: self.subscribers.list_enabled_in_zone(zone).await?,
                }
            }
            AlertKind::DailySummary => {
                let Some(stats) = self.analytics.statistics(zone).await? else {
                    return Ok(None);
                };
                let cheapest = self.analytics.cheapest_n(zone, CHEAPEST_HOURS_COUNT).await?;
                ZoneAlert {
                    rendered: messages::daily_summary(&stats, &cheapest, &self.calendar),
                    price: None,
                    recipients: self.subscribers.list_enabled_in_zone(zone).await?,
                }
            }
        };
        Ok(Some(alert))
    }

    async fn dispatch_all(
        &self,
        kind: AlertKind,
        day: NaiveDate,
        alert: ZoneAlert,
    ) -> DispatchCounts {
        let ZoneAlert {
            rendered,
            price,
            recipients,
        } = alert;

        let results: Vec<Dispatch> = stream::iter(recipients)
            .map(|subscriber| {
                let rendered = &rendered;
                async move { self.dispatch(&subscriber, kind, day, rendered, price).await }
            })
            .buffer_unordered(self.send_concurrency)
            .collect()
            .await;

        let mut counts = DispatchCounts::default();
        for result in results {
            counts.add(result);
        }
        counts
    }

    /// Guard, record, then deliver
    async fn dispatch(
        &self,
        subscriber: &Subscriber,
        kind: AlertKind,
        day: NaiveDate,
        rendered: &RenderedAlert,
        price: Option<Decimal>,
    ) -> Dispatch {
        match self.log.has_sent_on(subscriber.id, kind, day).await {
            Ok(true) => {
                log::debug!(
                    "Subscriber {} already has a {} alert for {}",
                    subscriber.id,
                    kind,
                    day
                );
                return Dispatch::AlreadySent;
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("❌ Alert log lookup failed for {}: {}", subscriber.id, e);
                return Dispatch::StoreFailed;
            }
        }

        let record = AlertRecord::new(
            subscriber.id,
            kind,
            rendered.summary.clone(),
            price,
            self.clock.now(),
        );
        match self.log.append(record, day).await {
            Ok(true) => {}
            Ok(false) => return Dispatch::AlreadySent,
            Err(e) => {
                log::error!("❌ Failed to record {} alert for {}: {}", kind, subscriber.id, e);
                return Dispatch::StoreFailed;
            }
        }

        let delivery = self
            .notifier
            .send(&subscriber.contact_address, &rendered.subject, &rendered.body);
        match tokio::time::timeout(self.notify_timeout, delivery).await {
            Ok(Ok(())) => {
                log::info!(
                    "📨 {} alert sent to {}",
                    kind.display_name(),
                    subscriber.contact_address
                );
                Dispatch::Sent
            }
            Ok(Err(e)) => {
                log::warn!(
                    "⚠️ {} alert to {} not delivered: {}",
                    kind,
                    subscriber.contact_address,
                    e
                );
                Dispatch::DeliveryFailed
            }
            Err(_) => {
                log::warn!(
                    "⚠️ {} alert to {} timed out after {:?}",
                    kind,
                    subscriber.contact_address,
                    self.notify_timeout
                );
                Dispatch::DeliveryFailed
            }
        }
    }
}
