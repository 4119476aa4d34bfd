//! Network domain - wallet network identity versus the expected network

mod validator;

pub use validator::NetworkValidator;

use async_trait::async_trait;
use serde::Serialize;

use crate::shared::errors::ConnectorError;
use crate::shared::types::NetworkId;

/// Wallet connection as seen by the data layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkConnector: Send + Sync {
    /// Network the wallet reports, or `None` while disconnected.
    async fn network(&self) -> Result<Option<NetworkId>, ConnectorError>;
}

/// Validator state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NetworkState {
    Disconnected,
    Checking,
    /// `connected` is `None` when the check failed and resolved open
    Matched { connected: Option<NetworkId> },
    Mismatched { connected: NetworkId },
}

/// What callers render: expected, connected and the mismatch flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkMismatchState {
    pub expected: NetworkId,
    pub connected: Option<NetworkId>,
    pub mismatch: bool,
    /// The check failed and resolved through the fail-open policy
    pub check_failed: bool,
}

impl NetworkMismatchState {
    pub fn from_state(expected: &NetworkId, state: &NetworkState) -> Self {
        let (connected, mismatch) = match state {
            NetworkState::Disconnected | NetworkState::Checking => (None, false),
            NetworkState::Matched { connected } => (connected.clone(), false),
            NetworkState::Mismatched { connected } => (Some(connected.clone()), true),
        };
        Self {
            expected: expected.clone(),
            connected,
            mismatch,
            check_failed: matches!(state, NetworkState::Matched { connected: None }),
        }
    }
}
