use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::price::Zone;

/// A registered recipient of price alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    /// Email address, stored lowercase
    pub contact_address: String,
    pub zone: Zone,
    /// Price in local currency per kWh the alerts are compared against
    pub alert_threshold: Option<Decimal>,
    pub alert_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(
        contact_address: &str,
        zone: Zone,
        alert_threshold: Option<Decimal>,
        alert_enabled: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_address: normalize_address(contact_address),
            zone,
            alert_threshold,
            alert_enabled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the subscriber's timestamp
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Threshold above the current price: the price has dropped below it
    pub fn wants_low_price_alert(&self, current_price: Decimal) -> bool {
        self.alert_enabled
            && self
                .alert_threshold
                .is_some_and(|threshold| threshold > current_price)
    }

    /// Threshold below the current price: the price has risen above it
    pub fn wants_high_price_alert(&self, current_price: Decimal) -> bool {
        self.alert_enabled
            && self
                .alert_threshold
                .is_some_and(|threshold| threshold < current_price)
    }
}

pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9+_.-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .unwrap_or_else(|e| panic!("invalid address pattern: {e}"))
    })
}

/// Email-shape check for contact addresses
pub fn is_valid_address(address: &str) -> bool {
    let address = address.trim();
    !address.is_empty() && address_pattern().is_match(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(threshold: Option<&str>, enabled: bool) -> Subscriber {
        Subscriber::new(
            "Kari@Example.no",
            Zone::NO1,
            threshold.map(|t| t.parse().unwrap()),
            enabled,
            Utc::now(),
        )
    }

    #[test]
    fn test_address_is_normalized() {
        let s = subscriber(None, true);
        assert_eq!(s.contact_address, "kari@example.no");
        assert_eq!(s.created_at, s.updated_at);
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("ola.nordmann@example.no"));
        assert!(is_valid_address("first+tag@sub.domain.com"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("no-at-sign.example.no"));
        assert!(!is_valid_address("user@nodot"));
        assert!(!is_valid_address("user@example.n"));
    }

    #[test]
    fn test_threshold_comparisons_are_strict() {
        let s = subscriber(Some("1.50"), true);
        assert!(s.wants_low_price_alert("1.20".parse().unwrap()));
        assert!(!s.wants_high_price_alert("1.20".parse().unwrap()));
        assert!(s.wants_high_price_alert("1.80".parse().unwrap()));

        let equal: Decimal = "1.50".parse().unwrap();
        assert!(!s.wants_low_price_alert(equal));
        assert!(!s.wants_high_price_alert(equal));
    }

    #[test]
    fn test_disabled_or_missing_threshold_never_matches() {
        let disabled = subscriber(Some("1.50"), false);
        assert!(!disabled.wants_low_price_alert("0.10".parse().unwrap()));

        let no_threshold = subscriber(None, true);
        assert!(!no_threshold.wants_low_price_alert("0.10".parse().unwrap()));
        assert!(!no_threshold.wants_high_price_alert("9.99".parse().unwrap()));
    }
}
