pub mod catalog;
pub mod client;
pub mod retry;

pub use catalog::{FileUrlTemplate, ResolutionTier};
pub use client::{
    default_tour_fetcher, AssetStatus, AssetTransport, FetchError, FetchReport, FetchedAsset,
    HttpAssetTransport, TourFetcher,
};
pub use retry::{retry_with_policy, RetryExhausted, RetryPolicy};
