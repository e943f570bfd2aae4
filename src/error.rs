use uuid::Uuid;

use crate::price::UnknownZone;
use crate::store::StoreError;

/// Rejected caller input, or a store failure while handling it
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid contact address: {0}")]
    InvalidAddress(String),

    #[error("Contact address already registered: {0}")]
    AddressTaken(String),

    #[error(transparent)]
    UnknownZone(#[from] UnknownZone),

    #[error("Subscriber not found: {0}")]
    SubscriberNotFound(Uuid),

    #[error("Invalid limit {given}, must be between 1 and {max}")]
    InvalidLimit { given: usize, max: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
