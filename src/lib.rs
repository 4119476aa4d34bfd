//! swapfront - client-side data layer for a DEX front end
//!
//! Fingerprinted query cache, per-key request throttle, balance and
//! association resolution, and wallet network validation.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;

pub use application::{Collaborators, DataService};
pub use domain::cache::{CacheKey, QueryCache, QueryOptions, QueryResult};
pub use domain::throttle::RequestThrottle;
pub use shared::config::AppConfig;
pub use shared::errors::ApiError;
