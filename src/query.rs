//! Read and trigger operations exposed to an outer API layer.

use chrono::NaiveDate;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::alert::{AlertEvaluator, AlertRecord};
use crate::error::ValidationError;
use crate::price::{
    DailyStatistics, PriceAnalytics, PriceFetcher, PricePoint, Zone, ZoneFetchReport,
};

pub const MAX_CHEAPEST_HOURS: usize = 24;

/// Whether prices are stored for today and tomorrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataStatus {
    pub zone: Zone,
    pub has_today: bool,
    pub has_tomorrow: bool,
}

pub fn parse_zone(zone: &str) -> Result<Zone, ValidationError> {
    Ok(Zone::from_str(zone)?)
}

pub struct QueryService {
    analytics: PriceAnalytics,
    fetcher: Arc<PriceFetcher>,
    evaluator: Arc<AlertEvaluator>,
}

impl QueryService {
    pub fn new(
        analytics: PriceAnalytics,
        fetcher: Arc<PriceFetcher>,
        evaluator: Arc<AlertEvaluator>,
    ) -> Self {
        Self {
            analytics,
            fetcher,
            evaluator,
        }
    }

    pub async fn get_current_price(
        &self,
        zone: &str,
    ) -> Result<Option<PricePoint>, ValidationError> {
        Ok(self.analytics.current_price(parse_zone(zone)?).await?)
    }

    pub async fn get_todays_prices(
        &self,
        zone: &str,
    ) -> Result<Vec<PricePoint>, ValidationError> {
        Ok(self.analytics.todays_series(parse_zone(zone)?).await?)
    }

    pub async fn get_tomorrows_prices(
        &self,
        zone: &str,
    ) -> Result<Vec<PricePoint>, ValidationError> {
        Ok(self.analytics.tomorrows_series(parse_zone(zone)?).await?)
    }

    pub async fn get_prices_for_date(
        &self,
        zone: &str,
        date: NaiveDate,
    ) -> Result<Vec<PricePoint>, ValidationError> {
        Ok(self.analytics.series_for_date(parse_zone(zone)?, date).await?)
    }

    /// `limit` must be within `1..=24`
    pub async fn get_cheapest_hours(
        &self,
        zone: &str,
        limit: usize,
    ) -> Result<Vec<PricePoint>, ValidationError> {
        let zone = parse_zone(zone)?;
        if limit == 0 || limit > MAX_CHEAPEST_HOURS {
            return Err(ValidationError::InvalidLimit {
                given: limit,
                max: MAX_CHEAPEST_HOURS,
            });
        }
        Ok(self.analytics.cheapest_n(zone, limit).await?)
    }

    pub async fn get_statistics(
        &self,
        zone: &str,
    ) -> Result<Option<DailyStatistics>, ValidationError> {
        Ok(self.analytics.statistics(parse_zone(zone)?).await?)
    }

    pub async fn get_data_status(&self, zone: &str) -> Result<DataStatus, ValidationError> {
        let zone = parse_zone(zone)?;
        Ok(DataStatus {
            zone,
            has_today: self.analytics.has_data_for_today(zone).await?,
            has_tomorrow: self.analytics.has_data_for_tomorrow(zone).await?,
        })
    }

    /// Fetch today's prices now, for one zone or all when `zone` is `None`
    pub async fn trigger_manual_fetch(
        &self,
        zone: Option<&str>,
    ) -> Result<Vec<ZoneFetchReport>, ValidationError> {
        let zone = zone.map(parse_zone).transpose()?;
        let target = zone.map_or("all zones".to_string(), |z| z.to_string());
        log::info!("🔄 Manual fetch requested for {}", target);
        Ok(self.fetcher.manual_fetch(zone).await)
    }

    pub async fn get_alerts_for_subscriber(
        &self,
        id: Uuid,
    ) -> Result<Vec<AlertRecord>, ValidationError> {
        Ok(self.evaluator.alerts_for_subscriber(id).await?)
    }

    pub async fn get_todays_alerts_for_subscriber(
        &self,
        id: Uuid,
    ) -> Result<Vec<AlertRecord>, ValidationError> {
        Ok(self.evaluator.todays_alerts_for_subscriber(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, MarketCalendar};
    use crate::notify::LogNotifier;
    use crate::price::fetcher::tests::{FakeSource, day_payload};
    use crate::store::{InMemoryAlertLog, InMemoryPriceStore, InMemorySubscriberDirectory};
    use chrono::{TimeZone, Utc};

    fn service(source: FakeSource) -> QueryService {
        let prices = Arc::new(InMemoryPriceStore::new());
        let now = Utc.with_ymd_and_hms(2025, 12, 21, 9, 30, 0).unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let calendar = MarketCalendar::from_offset_hours(1).unwrap();
        let analytics = PriceAnalytics::new(prices.clone(), clock.clone(), calendar);
        let source = Arc::new(source);
        let fetcher = Arc::new(PriceFetcher::new(source, prices, clock.clone(), calendar));
        let evaluator = Arc::new(AlertEvaluator::new(
            analytics.clone(),
            Arc::new(InMemorySubscriberDirectory::new()),
            Arc::new(InMemoryAlertLog::new()),
            Arc::new(LogNotifier),
            clock,
        ));
        QueryService::new(analytics, fetcher, evaluator)
    }

    #[tokio::test]
    async fn test_invalid_zone_and_limit_are_rejected() {
        let query = service(FakeSource::default());

        assert!(matches!(
            query.get_current_price("SE3").await,
            Err(ValidationError::UnknownZone(_))
        ));
        assert!(matches!(
            query.get_cheapest_hours("NO1", 0).await,
            Err(ValidationError::InvalidLimit { given: 0, .. })
        ));
        assert!(matches!(
            query.get_cheapest_hours("NO1", 25).await,
            Err(ValidationError::InvalidLimit { given: 25, .. })
        ));
        assert!(matches!(
            query.trigger_manual_fetch(Some("nowhere")).await,
            Err(ValidationError::UnknownZone(_))
        ));
    }

    #[tokio::test]
    async fn test_absence_is_explicit() {
        let query = service(FakeSource::default());

        assert!(query.get_current_price("no1").await.unwrap().is_none());
        assert!(query.get_todays_prices("NO1").await.unwrap().is_empty());
        assert!(query.get_statistics("NO1").await.unwrap().is_none());
        assert_eq!(
            query.get_data_status("NO1").await.unwrap(),
            DataStatus {
                zone: Zone::NO1,
                has_today: false,
                has_tomorrow: false,
            }
        );
        assert!(query.get_alerts_for_subscriber(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_fetch_fills_todays_prices() {
        let mut source = FakeSource::default();
        source.bodies.insert(Zone::NO2, Ok(Some(day_payload(&["0.30", "0.10", "0.20"]))));
        let query = service(source);

        let reports = query.trigger_manual_fetch(Some("NO2")).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_success());

        assert_eq!(query.get_todays_prices("NO2").await.unwrap().len(), 3);
        let cheapest = query.get_cheapest_hours("NO2", 2).await.unwrap();
        assert_eq!(cheapest[0].price_local, "0.10".parse::<rust_decimal::Decimal>().unwrap());
        assert!(query.get_data_status("NO2").await.unwrap().has_today);

        let date = NaiveDate::from_ymd_opt(2025, 12, 21).unwrap();
        assert_eq!(query.get_prices_for_date("NO2", date).await.unwrap().len(), 3);
        assert!(query.get_tomorrows_prices("NO2").await.unwrap().is_empty());
    }
}
