use chrono::NaiveTime;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::clock::MarketCalendar;
use crate::price::source::{DEFAULT_BASE_URL, SourceConfig};
use crate::retention::RetentionPolicy;
use crate::scheduler::ScheduleConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Where notifications go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierConfig {
    /// Delivery disabled, messages are logged
    Log,
    HttpRelay { url: String, from: String },
}

/// Runtime configuration read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub calendar: MarketCalendar,
    pub fetch_concurrency: usize,
    pub send_concurrency: usize,
    pub notify_timeout: Duration,
    pub job_deadline: Duration,
    pub schedule: ScheduleConfig,
    pub retention: RetentionPolicy,
    /// DynamoDB table prefix; in-memory storage when unset
    pub table_prefix: Option<String>,
    pub notifier: NotifierConfig,
    /// Fetch today's and tomorrow's prices once at startup
    pub fetch_on_startup: bool,
}

impl AppConfig {
    /// Read the process environment (after `.env` has been loaded)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let offset_hours: i32 = parse_or(&get, "MARKET_UTC_OFFSET_HOURS", 1)?;
        let calendar =
            MarketCalendar::from_offset_hours(offset_hours).ok_or_else(|| ConfigError::Invalid {
                name: "MARKET_UTC_OFFSET_HOURS",
                value: offset_hours.to_string(),
                reason: "offset must be between -23 and 23 hours".to_string(),
            })?;

        let hourly_minute: u32 = parse_or(&get, "HOURLY_FETCH_MINUTE", 5)?;
        if hourly_minute > 59 {
            return Err(ConfigError::Invalid {
                name: "HOURLY_FETCH_MINUTE",
                value: hourly_minute.to_string(),
                reason: "minute must be between 0 and 59".to_string(),
            });
        }

        let defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            hourly_minute,
            tomorrow_fetch: time_or(&get, "TOMORROW_FETCH_TIME", defaults.tomorrow_fetch)?,
            cheapest_hours: time_or(&get, "CHEAPEST_HOURS_TIME", defaults.cheapest_hours)?,
            daily_summary: time_or(&get, "DAILY_SUMMARY_TIME", defaults.daily_summary)?,
            retention: time_or(&get, "RETENTION_TIME", defaults.retention)?,
        };

        let retention_defaults = RetentionPolicy::default();
        let retention = RetentionPolicy {
            price_days: parse_or(&get, "PRICE_RETENTION_DAYS", retention_defaults.price_days)?,
            alert_days: parse_or(&get, "ALERT_RETENTION_DAYS", retention_defaults.alert_days)?,
        };

        let notifier = match get("NOTIFIER_URL") {
            Some(url) => NotifierConfig::HttpRelay {
                url,
                from: get("NOTIFY_FROM").unwrap_or_else(|| "alerts@localhost".to_string()),
            },
            None => NotifierConfig::Log,
        };

        Ok(Self {
            source: SourceConfig {
                base_url: get("PRICE_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 5)?),
            },
            calendar,
            fetch_concurrency: parse_or::<usize>(&get, "FETCH_CONCURRENCY", 5)?.max(1),
            send_concurrency: parse_or::<usize>(&get, "SEND_CONCURRENCY", 8)?.max(1),
            notify_timeout: Duration::from_secs(parse_or(&get, "NOTIFY_TIMEOUT_SECS", 5)?),
            job_deadline: Duration::from_secs(parse_or(&get, "JOB_DEADLINE_SECS", 600)?),
            schedule,
            retention,
            table_prefix: get("DYNAMODB_TABLE_PREFIX"),
            notifier,
            fetch_on_startup: parse_or(&get, "FETCH_ON_STARTUP", true)?,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn time_or(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: NaiveTime,
) -> Result<NaiveTime, ConfigError> {
    match get(name) {
        Some(value) => NaiveTime::parse_from_str(&value, "%H:%M").map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.source.timeout, Duration::from_secs(5));
        assert_eq!(config.calendar.offset().local_minus_utc(), 3600);
        assert_eq!(config.schedule, ScheduleConfig::default());
        assert_eq!(config.retention, RetentionPolicy::default());
        assert_eq!(config.notifier, NotifierConfig::Log);
        assert!(config.table_prefix.is_none());
        assert!(config.fetch_on_startup);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("MARKET_UTC_OFFSET_HOURS", "2"),
            ("DAILY_SUMMARY_TIME", "19:15"),
            ("SEND_CONCURRENCY", "0"),
            ("DYNAMODB_TABLE_PREFIX", "spotprice"),
            ("NOTIFIER_URL", "http://relay.local/send"),
            ("NOTIFY_FROM", "alerts@example.no"),
            ("PRICE_API_BASE_URL", " "),
        ])
        .unwrap();

        assert_eq!(config.calendar.offset().local_minus_utc(), 7200);
        assert_eq!(config.schedule.daily_summary, NaiveTime::from_hms_opt(19, 15, 0).unwrap());
        assert_eq!(config.send_concurrency, 1);
        assert_eq!(config.table_prefix.as_deref(), Some("spotprice"));
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            config.notifier,
            NotifierConfig::HttpRelay {
                url: "http://relay.local/send".to_string(),
                from: "alerts@example.no".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = config(&[("FETCH_CONCURRENCY", "many")]).unwrap_err();
        assert!(err.to_string().contains("FETCH_CONCURRENCY"));

        assert!(config(&[("DAILY_SUMMARY_TIME", "25:00")]).is_err());
        assert!(config(&[("HOURLY_FETCH_MINUTE", "60")]).is_err());
        assert!(config(&[("MARKET_UTC_OFFSET_HOURS", "30")]).is_err());
    }
}
