use chrono::Duration;
use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{AlertLog, PriceStore, StoreError};

/// How long stored data is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub price_days: i64,
    pub alert_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            price_days: 30,
            alert_days: 90,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub prices_removed: usize,
    pub alerts_removed: usize,
}

/// Deletes price points and alert records older than the policy allows
pub struct RetentionSweeper {
    prices: Arc<dyn PriceStore>,
    alerts: Arc<dyn AlertLog>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(
        prices: Arc<dyn PriceStore>,
        alerts: Arc<dyn AlertLog>,
        clock: Arc<dyn Clock>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            prices,
            alerts,
            clock,
            policy,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let prices_removed = self
            .prices
            .purge_before(now - Duration::days(self.policy.price_days))
            .await?;
        let alerts_removed = self
            .alerts
            .purge_before(now - Duration::days(self.policy.alert_days))
            .await?;

        log::info!(
            "🧹 Retention sweep removed {} price point(s) and {} alert record(s)",
            prices_removed,
            alerts_removed
        );
        Ok(SweepReport {
            prices_removed,
            alerts_removed,
        })
    }
}
