use std::sync::Arc;

use crate::alert::AlertEvaluator;
use crate::clock::Clock;
use crate::config::{AppConfig, NotifierConfig};
use crate::notify::{HttpRelayNotifier, LogNotifier, Notifier, NotifyError};
use crate::price::{HvaKosterStrommenSource, PriceAnalytics, PriceFetcher, PriceSource, SourceError};
use crate::query::QueryService;
use crate::retention::RetentionSweeper;
use crate::scheduler::{Pipeline, Scheduler};
use crate::store::{
    AlertLog, InMemoryAlertLog, InMemoryPriceStore, InMemorySubscriberDirectory, PriceStore,
    StoreError, SubscriberDirectory,
};
use crate::subscriber::SubscriberService;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Price source setup failed: {0}")]
    Source(#[from] SourceError),

    #[error("Notifier setup failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("Store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    FeatureDisabled(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    DynamoDb,
    InMemory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::DynamoDb => write!(f, "DYNAMODB (Production)"),
            StorageMode::InMemory => write!(f, "IN-MEMORY (Development)"),
        }
    }
}

pub fn detect_storage_mode(config: &AppConfig) -> StorageMode {
    if config.table_prefix.is_some() {
        StorageMode::DynamoDb
    } else {
        StorageMode::InMemory
    }
}

/// The three stores the pipeline works against
#[derive(Clone)]
pub struct Stores {
    pub prices: Arc<dyn PriceStore>,
    pub subscribers: Arc<dyn SubscriberDirectory>,
    pub alerts: Arc<dyn AlertLog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            prices: Arc::new(InMemoryPriceStore::new()),
            subscribers: Arc::new(InMemorySubscriberDirectory::new()),
            alerts: Arc::new(InMemoryAlertLog::new()),
        }
    }

    #[cfg(feature = "dynamodb")]
    pub async fn dynamodb(prefix: &str) -> Result<Self, RuntimeError> {
        use crate::store::dynamodb::{DynamoDbStore, DynamoTables, connect};

        let store = Arc::new(DynamoDbStore::new(connect().await, DynamoTables::new(prefix)));
        store.health_check().await?;
        log::info!("🗄️ Using DynamoDB tables with prefix {}", prefix);
        Ok(Self {
            prices: store.clone(),
            subscribers: store.clone(),
            alerts: store,
        })
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, RuntimeError> {
        match (detect_storage_mode(config), config.table_prefix.as_deref()) {
            #[cfg(feature = "dynamodb")]
            (StorageMode::DynamoDb, Some(prefix)) => Self::dynamodb(prefix).await,
            #[cfg(not(feature = "dynamodb"))]
            (StorageMode::DynamoDb, Some(_)) => Err(RuntimeError::FeatureDisabled(
                "DYNAMODB_TABLE_PREFIX is set but the dynamodb feature is not enabled",
            )),
            _ => Ok(Self::in_memory()),
        }
    }
}

pub fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>, RuntimeError> {
    Ok(match &config.notifier {
        NotifierConfig::Log => Arc::new(LogNotifier),
        NotifierConfig::HttpRelay { url, from } => {
            log::info!("✉️ Delivering notifications through {}", url);
            Arc::new(HttpRelayNotifier::new(url.clone(), from.clone(), config.notify_timeout)?)
        }
    })
}

/// Fully wired application
pub struct App {
    pub fetcher: Arc<PriceFetcher>,
    pub evaluator: Arc<AlertEvaluator>,
    pub subscribers: Arc<SubscriberService>,
    pub query: QueryService,
    pub scheduler: Scheduler,
}

impl App {
    pub fn assemble(
        config: &AppConfig,
        stores: Stores,
        source: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let analytics = PriceAnalytics::new(stores.prices.clone(), clock.clone(), config.calendar);

        let fetcher = Arc::new(
            PriceFetcher::new(source, stores.prices.clone(), clock.clone(), config.calendar)
                .with_concurrency(config.fetch_concurrency)
                .with_timeout(config.source.timeout),
        );

        let evaluator = Arc::new(
            AlertEvaluator::new(
                analytics.clone(),
                stores.subscribers.clone(),
                stores.alerts.clone(),
                notifier.clone(),
                clock.clone(),
            )
            .with_send_concurrency(config.send_concurrency)
            .with_notify_timeout(config.notify_timeout),
        );

        let subscribers = Arc::new(
            SubscriberService::new(
                stores.subscribers.clone(),
                stores.alerts.clone(),
                notifier,
                clock.clone(),
            )
            .with_notify_timeout(config.notify_timeout),
        );

        let sweeper = Arc::new(RetentionSweeper::new(
            stores.prices,
            stores.alerts,
            clock.clone(),
            config.retention,
        ));

        let pipeline = Arc::new(Pipeline {
            fetcher: fetcher.clone(),
            evaluator: evaluator.clone(),
            sweeper,
        });
        let scheduler = Scheduler::new(
            pipeline,
            clock,
            config.calendar,
            config.schedule,
            config.job_deadline,
        );

        Self {
            query: QueryService::new(analytics, fetcher.clone(), evaluator.clone()),
            fetcher,
            evaluator,
            subscribers,
            scheduler,
        }
    }

    /// Wire the production source, notifier and configured stores
    pub async fn from_config(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuntimeError> {
        let mode = detect_storage_mode(config);
        log::info!("🚀 Storage detection: {mode}");

        let stores = Stores::from_config(config).await?;
        let source: Arc<dyn PriceSource> =
            Arc::new(HvaKosterStrommenSource::new(config.source.clone())?);
        let notifier = build_notifier(config)?;
        Ok(Self::assemble(config, stores, source, notifier, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_storage_mode_detection() {
        assert_eq!(detect_storage_mode(&config(&[])), StorageMode::InMemory);
        assert_eq!(
            detect_storage_mode(&config(&[("DYNAMODB_TABLE_PREFIX", "spotprice")])),
            StorageMode::DynamoDb
        );
        assert_eq!(StorageMode::InMemory.to_string(), "IN-MEMORY (Development)");
    }

    #[tokio::test]
    async fn test_in_memory_stores_from_default_config() {
        let stores = Stores::from_config(&config(&[])).await.unwrap();
        assert!(stores.subscribers.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_notifier_selection() {
        assert!(build_notifier(&config(&[])).is_ok());
        assert!(build_notifier(&config(&[("NOTIFIER_URL", "http://relay.local/send")])).is_ok());
    }
}
