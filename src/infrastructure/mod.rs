//! Infrastructure layer - HTTP clients for the external collaborators

pub mod aggregator;
pub mod http;
pub mod mirror_node;
pub mod price_api;
pub mod wallet;

pub use aggregator::AggregatorClient;
pub use http::JsonClient;
pub use mirror_node::MirrorNodeClient;
pub use price_api::PriceApiClient;
pub use wallet::StaticWallet;
