use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of alerts a subscriber can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    PriceLow,
    PriceHigh,
    DailySummary,
    CheapestHours,
}

impl AlertKind {
    pub const ALL: [AlertKind; 4] = [
        AlertKind::PriceLow,
        AlertKind::PriceHigh,
        AlertKind::DailySummary,
        AlertKind::CheapestHours,
    ];

    /// Wire name, also used in store keys
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PriceLow => "PRICE_LOW",
            AlertKind::PriceHigh => "PRICE_HIGH",
            AlertKind::DailySummary => "DAILY_SUMMARY",
            AlertKind::CheapestHours => "CHEAPEST_HOURS",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AlertKind::PriceLow => "Low price",
            AlertKind::PriceHigh => "High price",
            AlertKind::DailySummary => "Daily summary",
            AlertKind::CheapestHours => "Cheapest hours",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        AlertKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "Invalid alert kind: {s}. \
                     Valid values: PRICE_LOW, PRICE_HIGH, DAILY_SUMMARY, CHEAPEST_HOURS"
                )
            })
    }
}

/// Immutable log entry marking that an alert was issued to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    /// Lookup reference only, the subscriber may since have been deleted
    pub subscriber_id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub price_at_trigger: Option<Decimal>,
    pub triggered_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn new(
        subscriber_id: Uuid,
        kind: AlertKind,
        message: String,
        price_at_trigger: Option<Decimal>,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriber_id,
            kind,
            message,
            price_at_trigger,
            triggered_at,
        }
    }

    /// One-line rendering for listings
    pub fn formatted(&self) -> String {
        match self.price_at_trigger {
            Some(price) => {
                format!("[{}] {} ({price:.2}/kWh)", self.kind.display_name(), self.message)
            }
            None => format!("[{}] {}", self.kind.display_name(), self.message),
        }
    }
}

/// Key under which a (subscriber, kind, day) alert is unique
pub fn dedup_key(kind: AlertKind, day: NaiveDate) -> String {
    format!("{}#{}", kind.as_str(), day.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_kind_round_trip_names() {
        assert_eq!("price_low".parse::<AlertKind>().unwrap(), AlertKind::PriceLow);
        assert_eq!(AlertKind::CheapestHours.to_string(), "CHEAPEST_HOURS");
        assert!("SOMETHING".parse::<AlertKind>().is_err());
    }

    #[test]
    fn test_alert_kind_serde_name() {
        let json = serde_json::to_string(&AlertKind::DailySummary).unwrap();
        assert_eq!(json, "\"DAILY_SUMMARY\"");
    }

    #[test]
    fn test_formatted_record() {
        let record = AlertRecord::new(
            Uuid::new_v4(),
            AlertKind::PriceLow,
            "Cheap power now".to_string(),
            Some("0.4".parse().unwrap()),
            Utc::now(),
        );
        assert_eq!(record.formatted(), "[Low price] Cheap power now (0.40/kWh)");
    }

    #[test]
    fn test_dedup_key() {
        let day = NaiveDate::from_ymd_opt(2025, 12, 21).unwrap();
        assert_eq!(dedup_key(AlertKind::PriceHigh, day), "PRICE_HIGH#2025-12-21");
    }
}
