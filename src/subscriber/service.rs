use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{Subscriber, is_valid_address, normalize_address};
use crate::alert::messages;
use crate::clock::Clock;
use crate::error::ValidationError;
use crate::notify::Notifier;
use crate::price::Zone;
use crate::store::{AlertLog, StoreError, SubscriberDirectory};

/// Registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscriber {
    pub contact_address: String,
    pub zone: Zone,
    #[serde(default)]
    pub alert_threshold: Option<Decimal>,
    #[serde(default = "default_enabled")]
    pub alert_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceUpdate {
    pub zone: Option<Zone>,
    pub alert_threshold: Option<Decimal>,
    pub alert_enabled: Option<bool>,
}

/// Registration and preference management for subscribers
pub struct SubscriberService {
    directory: Arc<dyn SubscriberDirectory>,
    alerts: Arc<dyn AlertLog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    notify_timeout: Duration,
}

impl SubscriberService {
    pub fn new(
        directory: Arc<dyn SubscriberDirectory>,
        alerts: Arc<dyn AlertLog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            alerts,
            notifier,
            clock,
            notify_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub async fn register(&self, request: NewSubscriber) -> Result<Subscriber, ValidationError> {
        log::info!("👤 Registering subscriber {}", request.contact_address);

        if !is_valid_address(&request.contact_address) {
            return Err(ValidationError::InvalidAddress(request.contact_address));
        }

        let address = normalize_address(&request.contact_address);
        if self.directory.find_by_address(&address).await?.is_some() {
            return Err(ValidationError::AddressTaken(address));
        }

        let subscriber = Subscriber::new(
            &address,
            request.zone,
            request.alert_threshold,
            request.alert_enabled,
            self.clock.now(),
        );

        match self.directory.insert(subscriber.clone()).await {
            Ok(()) => {}
            Err(StoreError::ConflictError(_)) => return Err(ValidationError::AddressTaken(address)),
            Err(e) => return Err(e.into()),
        }
        log::info!("✅ Subscriber {} registered in {}", subscriber.id, subscriber.zone);

        let (subject, body) = messages::welcome(subscriber.zone);
        let delivery = self.notifier.send(&subscriber.contact_address, &subject, &body);
        match tokio::time::timeout(self.notify_timeout, delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!(
                    "⚠️ Welcome message to {} not delivered: {}",
                    subscriber.contact_address,
                    e
                );
            }
            Err(_) => {
                log::warn!(
                    "⚠️ Welcome message to {} timed out after {:?}",
                    subscriber.contact_address,
                    self.notify_timeout
                );
            }
        }

        Ok(subscriber)
    }

    async fn require(&self, id: Uuid) -> Result<Subscriber, ValidationError> {
        self.directory
            .get(id)
            .await?
            .ok_or(ValidationError::SubscriberNotFound(id))
    }

    pub async fn update_preferences(
        &self,
        id: Uuid,
        update: PreferenceUpdate,
    ) -> Result<Subscriber, ValidationError> {
        log::info!("Updating preferences for subscriber {}", id);
        let mut subscriber = self.require(id).await?;

        if let Some(zone) = update.zone {
            subscriber.zone = zone;
        }
        if let Some(threshold) = update.alert_threshold {
            subscriber.alert_threshold = Some(threshold);
        }
        if let Some(enabled) = update.alert_enabled {
            subscriber.alert_enabled = enabled;
        }
        subscriber.touch(self.clock.now());

        self.directory.update(subscriber.clone()).await?;
        Ok(subscriber)
    }

    pub async fn enable_alerts(&self, id: Uuid) -> Result<Subscriber, ValidationError> {
        self.update_preferences(
            id,
            PreferenceUpdate {
                alert_enabled: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn disable_alerts(&self, id: Uuid) -> Result<Subscriber, ValidationError> {
        self.update_preferences(
            id,
            PreferenceUpdate {
                alert_enabled: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Subscriber>, ValidationError> {
        Ok(self.directory.get(id).await?)
    }

    pub async fn get_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Subscriber>, ValidationError> {
        Ok(self.directory.find_by_address(address).await?)
    }

    pub async fn list(&self) -> Result<Vec<Subscriber>, ValidationError> {
        Ok(self.directory.list().await?)
    }

    pub async fn list_in_zone(&self, zone: Zone) -> Result<Vec<Subscriber>, ValidationError> {
        let mut subscribers = self.directory.list().await?;
        subscribers.retain(|s| s.zone == zone);
        Ok(subscribers)
    }

    pub async fn count(&self) -> Result<usize, ValidationError> {
        Ok(self.directory.list().await?.len())
    }

    pub async fn count_by_zone(&self) -> Result<BTreeMap<Zone, usize>, ValidationError> {
        Ok(self.directory.count_by_zone().await?)
    }

    /// Remove a subscriber and its alert history
    pub async fn delete(&self, id: Uuid) -> Result<(), ValidationError> {
        if !self.directory.delete(id).await? {
            return Err(ValidationError::SubscriberNotFound(id));
        }
        let removed = self.alerts.delete_for_subscriber(id).await?;
        log::info!("🗑️ Subscriber {} deleted with {} alert record(s)", id, removed);
        Ok(())
    }
}
