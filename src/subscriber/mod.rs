pub mod model;
pub mod service;

pub use model::{Subscriber, is_valid_address, normalize_address};
pub use service::{NewSubscriber, PreferenceUpdate, SubscriberService};
