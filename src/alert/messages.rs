//! Text of the messages sent to subscribers.
//!
//! Each alert has a one-line `summary`, stored in the alert log, and a longer
//! `body` for delivery.

use crate::clock::MarketCalendar;
use crate::price::{DailyStatistics, PricePoint, Zone};

const SIGNATURE: &str = "Regards,\nSpot Price Alerts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAlert {
    pub subject: String,
    pub summary: String,
    pub body: String,
}

fn hour_lines(cheapest: &[PricePoint], calendar: &MarketCalendar) -> String {
    cheapest
        .iter()
        .enumerate()
        .map(|(i, point)| {
            format!(
                "{}. {} - {:.2} /kWh\n",
                i + 1,
                calendar.local_hour_label(point.timestamp_hour),
                point.price_local
            )
        })
        .collect()
}

pub fn low_price(point: &PricePoint, calendar: &MarketCalendar) -> RenderedAlert {
    let summary = format!(
        "⚡ Low power price now! Only {:.2} /kWh in {}. A good time for energy-hungry chores.",
        point.price_local,
        point.zone.description()
    );
    let body = format!(
        "Hi!\n\nGood news, the power price is low right now. 💚\n\n\
         📍 Zone: {}\n💰 Price: {:.2} /kWh\n⏰ Hour: {}\n\n\
         A good time to run the washing machine, the dishwasher or charge the car.\n\n{}",
        point.zone,
        point.price_local,
        calendar.local_hour_label(point.timestamp_hour),
        SIGNATURE
    );

    RenderedAlert {
        subject: format!("⚡ Low power price now! {:.2} /kWh", point.price_local),
        summary,
        body,
    }
}

pub fn high_price(point: &PricePoint, calendar: &MarketCalendar) -> RenderedAlert {
    let summary = format!(
        "⚠️ High power price now! {:.2} /kWh in {}. Postpone energy-hungry chores if you can.",
        point.price_local,
        point.zone.description()
    );
    let body = format!(
        "Hi!\n\nHeads up, the power price is high right now. ⚠️\n\n\
         📍 Zone: {}\n💰 Price: {:.2} /kWh\n⏰ Hour: {}\n\n\
         Consider waiting with laundry, the dishwasher and car charging \
         until the price drops.\n\n{}",
        point.zone,
        point.price_local,
        calendar.local_hour_label(point.timestamp_hour),
        SIGNATURE
    );

    RenderedAlert {
        subject: format!("⚠️ High power price now! {:.2} /kWh", point.price_local),
        summary,
        body,
    }
}

pub fn cheapest_hours(
    zone: Zone,
    cheapest: &[PricePoint],
    calendar: &MarketCalendar,
) -> RenderedAlert {
    let lines = hour_lines(cheapest, calendar);
    let summary = format!(
        "💡 The {} cheapest hours today in {}:\n{}",
        cheapest.len(),
        zone.description(),
        lines
    );
    let body = format!(
        "Hi!\n\nThese are the {} cheapest hours today in {}:\n\n{}\n\
         Plan your energy-hungry chores for these hours to save money! 💰\n\n{}",
        cheapest.len(),
        zone,
        lines,
        SIGNATURE
    );

    RenderedAlert {
        subject: "💡 Today's cheapest hours".to_string(),
        summary,
        body,
    }
}

pub fn daily_summary(
    stats: &DailyStatistics,
    cheapest: &[PricePoint],
    calendar: &MarketCalendar,
) -> RenderedAlert {
    let summary = format!(
        "📊 Today's power prices in {}:\nAverage: {:.2} /kWh\n\
         Lowest: {:.2} /kWh\nHighest: {:.2} /kWh",
        stats.zone.description(),
        stats.average,
        stats.min,
        stats.max
    );
    let body = format!(
        "Hi!\n\nHere is today's power price summary for {}:\n\n\
         📈 Average: {:.2} /kWh\n📉 Lowest: {:.2} /kWh\n📊 Highest: {:.2} /kWh\n\n\
         💡 The cheapest hours were:\n{}\nWe will be back with tomorrow's prices! ⚡\n\n{}",
        stats.zone,
        stats.average,
        stats.min,
        stats.max,
        hour_lines(cheapest, calendar),
        SIGNATURE
    );

    RenderedAlert {
        subject: "📊 Daily power price summary".to_string(),
        summary,
        body,
    }
}

/// Sent once on registration
pub fn welcome(zone: Zone) -> (String, String) {
    let subject = "⚡ Welcome to Spot Price Alerts!".to_string();
    let body = format!(
        "Hi!\n\nThanks for signing up for power price alerts! 🎉\n\n\
         You are registered for zone {} ({}).\n\n\
         We will let you know when:\n\
         ✅ the price is low (below your threshold)\n\
         ⚠️ the price is high (above your threshold)\n\
         💡 today's cheapest hours are known\n\
         📊 the day is summed up\n\n\
         You can update your preferences or stop the alerts at any time.\n\n{}",
        zone,
        zone.description(),
        SIGNATURE
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn calendar() -> MarketCalendar {
        MarketCalendar::from_offset_hours(1).unwrap()
    }

    fn point(hour_utc: u32, price: &str) -> PricePoint {
        PricePoint::new(
            Zone::NO1,
            Utc.with_ymd_and_hms(2025, 12, 21, hour_utc, 0, 0).unwrap(),
            price.parse().unwrap(),
            "0.1".parse().unwrap(),
        )
    }

    #[test]
    fn test_low_price_uses_local_hour_and_two_decimals() {
        let alert = low_price(&point(6, "0.4"), &calendar());
        assert_eq!(alert.subject, "⚡ Low power price now! 0.40 /kWh");
        assert!(alert.summary.contains("Oslo / East Norway"));
        assert!(alert.body.contains("⏰ Hour: 07:00"));
    }

    #[test]
    fn test_cheapest_hours_lists_in_given_order() {
        let cheapest = vec![point(2, "0.10"), point(0, "0.20"), point(3, "0.25")];
        let alert = cheapest_hours(Zone::NO1, &cheapest, &calendar());
        let expected = "1. 03:00 - 0.10 /kWh\n2. 01:00 - 0.20 /kWh\n3. 04:00 - 0.25 /kWh";
        assert!(alert.summary.contains(expected));
    }

    #[test]
    fn test_daily_summary_contains_aggregates() {
        let stats = DailyStatistics {
            zone: Zone::NO5,
            date: NaiveDate::from_ymd_opt(2025, 12, 21).unwrap(),
            average: "0.85".parse().unwrap(),
            min: "0.5".parse().unwrap(),
            max: "1.2".parse().unwrap(),
            hours: 24,
        };
        let alert = daily_summary(&stats, &[], &calendar());
        assert!(alert.summary.contains("Average: 0.85 /kWh"));
        assert!(alert.summary.contains("Lowest: 0.50 /kWh"));
        assert!(alert.body.contains("Highest: 1.20 /kWh"));
    }

    #[test]
    fn test_welcome_names_zone() {
        let (subject, body) = welcome(Zone::NO4);
        assert!(subject.contains("Welcome"));
        assert!(body.contains("NO4 (Tromsø / North Norway)"));
    }
}
