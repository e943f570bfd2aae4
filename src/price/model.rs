use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::truncate_to_hour;

/// Electricity pricing area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    NO1,
    NO2,
    NO3,
    NO4,
    NO5,
}

impl Zone {
    pub const ALL: [Zone; 5] = [Zone::NO1, Zone::NO2, Zone::NO3, Zone::NO4, Zone::NO5];

    pub fn code(&self) -> &'static str {
        match self {
            Zone::NO1 => "NO1",
            Zone::NO2 => "NO2",
            Zone::NO3 => "NO3",
            Zone::NO4 => "NO4",
            Zone::NO5 => "NO5",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Zone::NO1 => "Oslo / East Norway",
            Zone::NO2 => "Kristiansand / South Norway",
            Zone::NO3 => "Trondheim / Central Norway",
            Zone::NO4 => "Tromsø / North Norway",
            Zone::NO5 => "Bergen / West Norway",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown price zone: {0}. Valid values: NO1, NO2, NO3, NO4, NO5")]
pub struct UnknownZone(pub String);

impl FromStr for Zone {
    type Err = UnknownZone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NO1" => Ok(Zone::NO1),
            "NO2" => Ok(Zone::NO2),
            "NO3" => Ok(Zone::NO3),
            "NO4" => Ok(Zone::NO4),
            "NO5" => Ok(Zone::NO5),
            _ => Err(UnknownZone(s.to_string())),
        }
    }
}

/// One hour's spot price for one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub zone: Zone,
    /// Start of the hour, UTC
    pub timestamp_hour: DateTime<Utc>,
    /// Price per kWh in local currency, 2 decimals
    pub price_local: Decimal,
    /// Price per kWh in reference currency, 4 decimals
    pub price_reference: Decimal,
    /// Exchange rate published with the price, when present
    pub exchange_rate: Option<Decimal>,
}

impl PricePoint {
    /// Create a point, normalizing the timestamp to the hour and the prices to
    /// their stored precision
    pub fn new(
        zone: Zone,
        timestamp: DateTime<Utc>,
        price_local: Decimal,
        price_reference: Decimal,
    ) -> Self {
        Self {
            zone,
            timestamp_hour: truncate_to_hour(timestamp),
            price_local: price_local
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            price_reference: price_reference
                .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero),
            exchange_rate: None,
        }
    }

    pub fn with_exchange_rate(mut self, rate: Decimal) -> Self {
        self.exchange_rate = Some(rate);
        self
    }

    /// Store key: (zone, hour)
    pub fn key(&self) -> (Zone, DateTime<Utc>) {
        (self.zone, self.timestamp_hour)
    }

    pub fn is_above(&self, threshold: Decimal) -> bool {
        self.price_local > threshold
    }

    pub fn is_below(&self, threshold: Decimal) -> bool {
        self.price_local < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_parsing() {
        assert_eq!("no3".parse::<Zone>().unwrap(), Zone::NO3);
        assert_eq!(" NO5 ".parse::<Zone>().unwrap(), Zone::NO5);

        let err = "SE3".parse::<Zone>().unwrap_err();
        assert!(err.to_string().contains("SE3"));
    }

    #[test]
    fn test_price_point_normalization() {
        let ts = DateTime::parse_from_rfc3339("2025-12-21T10:17:45+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let point = PricePoint::new(
            Zone::NO1,
            ts,
            "0.8567".parse().unwrap(),
            "0.075612".parse().unwrap(),
        );

        assert_eq!(point.timestamp_hour.to_rfc3339(), "2025-12-21T10:00:00+00:00");
        assert_eq!(point.price_local, "0.86".parse::<Decimal>().unwrap());
        assert_eq!(point.price_reference, "0.0756".parse::<Decimal>().unwrap());
        assert!(point.is_above("0.50".parse().unwrap()));
        assert!(!point.is_below("0.86".parse().unwrap()));
    }
}
