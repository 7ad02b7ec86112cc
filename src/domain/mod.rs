// src/domain/mod.rs

pub mod listing;
pub mod market_report;
pub mod merge;
pub mod normalize;
pub mod valuation;

pub use listing::{LatLong, Listing};
pub use market_report::{Bucket, MarketReport, MarketStatisticsEngine, Statistic};
pub use merge::{merge, MergePolicy, Precedence};
pub use valuation::{BucketFallback, DecoratedProperty, ValuationDecorator, ValuationRates};
