use chrono::{Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;

use super::{PricePoint, Zone};
use crate::clock::{Clock, MarketCalendar, truncate_to_hour};
use crate::store::{PriceStore, StoreError};

/// Aggregates over one zone's market day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStatistics {
    pub zone: Zone,
    pub date: NaiveDate,
    pub average: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    /// Number of hours the aggregates were computed from
    pub hours: usize,
}

impl DailyStatistics {
    /// `None` for an empty series
    pub fn from_series(zone: Zone, date: NaiveDate, series: &[PricePoint]) -> Option<Self> {
        Some(Self {
            zone,
            date,
            average: average_of(series)?,
            min: series.iter().map(|p| p.price_local).min()?,
            max: series.iter().map(|p| p.price_local).max()?,
            hours: series.len(),
        })
    }
}

/// Mean local price, 2 decimals rounded half away from zero
pub fn average_of(series: &[PricePoint]) -> Option<Decimal> {
    if series.is_empty() {
        return None;
    }
    let sum: Decimal = series.iter().map(|p| p.price_local).sum();
    let average = sum / Decimal::from(series.len());
    Some(average.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// The `n` cheapest points, ascending by price, earlier hour first on ties
pub fn cheapest_of(series: &[PricePoint], n: usize) -> Vec<PricePoint> {
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| {
        a.price_local
            .cmp(&b.price_local)
            .then(a.timestamp_hour.cmp(&b.timestamp_hour))
    });
    sorted.truncate(n);
    sorted
}

/// Read-only price queries relative to the injected clock
#[derive(Clone)]
pub struct PriceAnalytics {
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    calendar: MarketCalendar,
}

impl PriceAnalytics {
    pub fn new(
        store: Arc<dyn PriceStore>,
        clock: Arc<dyn Clock>,
        calendar: MarketCalendar,
    ) -> Self {
        Self {
            store,
            clock,
            calendar,
        }
    }

    pub fn calendar(&self) -> MarketCalendar {
        self.calendar
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }

    pub fn tomorrow(&self) -> NaiveDate {
        self.calendar.tomorrow(self.clock.as_ref())
    }

    /// Price of the hour containing "now"
    pub async fn current_price(&self, zone: Zone) -> Result<Option<PricePoint>, StoreError> {
        let hour = truncate_to_hour(self.clock.now());
        let mut points = self.store.query(zone, hour, hour + Duration::hours(1)).await?;
        Ok(points.pop())
    }

    pub async fn series_for_date(
        &self,
        zone: Zone,
        date: NaiveDate,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let (start, end) = self.calendar.day_bounds(date);
        self.store.query(zone, start, end).await
    }

    pub async fn todays_series(&self, zone: Zone) -> Result<Vec<PricePoint>, StoreError> {
        self.series_for_date(zone, self.today()).await
    }

    pub async fn tomorrows_series(&self, zone: Zone) -> Result<Vec<PricePoint>, StoreError> {
        self.series_for_date(zone, self.tomorrow()).await
    }

    pub async fn cheapest_n(&self, zone: Zone, n: usize) -> Result<Vec<PricePoint>, StoreError> {
        self.cheapest_n_for_date(zone, self.today(), n).await
    }

    pub async fn cheapest_n_for_date(
        &self,
        zone: Zone,
        date: NaiveDate,
        n: usize,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let series = self.series_for_date(zone, date).await?;
        Ok(cheapest_of(&series, n))
    }

    pub async fn average(&self, zone: Zone) -> Result<Option<Decimal>, StoreError> {
        Ok(average_of(&self.todays_series(zone).await?))
    }

    pub async fn min(&self, zone: Zone) -> Result<Option<Decimal>, StoreError> {
        Ok(self.todays_series(zone).await?.iter().map(|p| p.price_local).min())
    }

    pub async fn max(&self, zone: Zone) -> Result<Option<Decimal>, StoreError> {
        Ok(self.todays_series(zone).await?.iter().map(|p| p.price_local).max())
    }

    /// Today's aggregates; `None` when nothing is stored for today
    pub async fn statistics(&self, zone: Zone) -> Result<Option<DailyStatistics>, StoreError> {
        let date = self.today();
        let series = self.series_for_date(zone, date).await?;
        Ok(DailyStatistics::from_series(zone, date, &series))
    }

    pub async fn has_data_for_today(&self, zone: Zone) -> Result<bool, StoreError> {
        let (start, end) = self.calendar.day_bounds(self.today());
        self.store.exists(zone, start, end).await
    }

    pub async fn has_data_for_tomorrow(&self, zone: Zone) -> Result<bool, StoreError> {
        let (start, end) = self.calendar.day_bounds(self.tomorrow());
        self.store.exists(zone, start, end).await
    }

    /// `false` when there is no average to compare against
    pub async fn is_above_average(&self, zone: Zone, price: Decimal) -> Result<bool, StoreError> {
        Ok(self.average(zone).await?.is_some_and(|avg| price > avg))
    }

    pub async fn is_below_average(&self, zone: Zone, price: Decimal) -> Result<bool, StoreError> {
        Ok(self.average(zone).await?.is_some_and(|avg| price < avg))
    }
}
