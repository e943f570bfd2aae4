pub mod analytics;
pub mod fetcher;
pub mod model;
pub mod source;

pub use analytics::{DailyStatistics, PriceAnalytics};
pub use fetcher::{FetchError, FetchOutcome, PriceFetcher, ZoneFetchReport};
pub use model::{PricePoint, UnknownZone, Zone};
pub use source::{HvaKosterStrommenSource, PriceSource, SourceConfig, SourceError};
