//! Domain layer - caching, throttling and the typed views over each collaborator

pub mod balance;
pub mod cache;
pub mod ledger;
pub mod network;
pub mod policy;
pub mod price;
pub mod swap;
pub mod throttle;
