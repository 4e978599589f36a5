pub mod batch_quote;
pub mod dto;
pub mod http;
pub mod null;
pub mod primary;
pub mod secondary;
pub mod stats;
pub mod tertiary;
pub mod traits;

pub use batch_quote::BatchQuoteClient;
pub use null::DisabledSource;
pub use primary::PrimaryClient;
pub use secondary::SecondaryClient;
pub use stats::{ClientStats, ClientStatsSnapshot};
pub use tertiary::TertiaryClient;
pub use traits::{
    BatchEodSource, BatchQuoteSource, CompanySource, DividendSource, HoldingsSource, ListingSource, PriceSource,
    SplitSource, SymbolPage,
};
