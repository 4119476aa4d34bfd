//! Detects when the wallet is connected to a different network than expected

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{NetworkConnector, NetworkMismatchState, NetworkState};
use crate::domain::policy::{FailPolicy, NETWORK_CHECK_FAILURE_POLICY};
use crate::shared::types::NetworkId;

/// `Disconnected -> Checking -> {Matched, Mismatched}`; disconnect returns to
/// `Disconnected`, a network change re-enters `Checking`.
///
/// Every transition bumps `generation`; a check only publishes its result while
/// its generation is still the latest, so overlapping checks resolve to the newest.
pub struct NetworkValidator {
    expected: NetworkId,
    connector: Arc<dyn NetworkConnector>,
    policy: FailPolicy,
    state: watch::Sender<NetworkState>,
    generation: AtomicU64,
}

impl NetworkValidator {
    pub fn new(expected: NetworkId, connector: Arc<dyn NetworkConnector>) -> Self {
        let (state, _) = watch::channel(NetworkState::Disconnected);
        Self {
            expected,
            connector,
            policy: NETWORK_CHECK_FAILURE_POLICY,
            state,
            generation: AtomicU64::new(0),
        }
    }

    pub fn expected(&self) -> &NetworkId {
        &self.expected
    }

    pub fn state(&self) -> NetworkState {
        self.state.borrow().clone()
    }

    /// Receives every state transition.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    pub fn mismatch_state(&self) -> NetworkMismatchState {
        NetworkMismatchState::from_state(&self.expected, &self.state.borrow())
    }

    /// Moves to `next` and returns the generation that owns it.
    fn transition(&self, next: NetworkState) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = next;
        });
        generation
    }

    pub async fn on_connect(&self) -> NetworkMismatchState {
        let generation = self.transition(NetworkState::Checking);
        self.check(generation).await
    }

    pub fn on_disconnect(&self) -> NetworkMismatchState {
        self.transition(NetworkState::Disconnected);
        debug!("wallet disconnected");
        self.mismatch_state()
    }

    /// Re-checks after the wallet reports a network switch; ignored while disconnected.
    pub async fn on_network_changed(&self) -> NetworkMismatchState {
        let mut generation = None;
        self.state.send_if_modified(|state| match state {
            NetworkState::Disconnected => false,
            _ => {
                generation = Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
                *state = NetworkState::Checking;
                true
            }
        });
        match generation {
            Some(generation) => self.check(generation).await,
            None => self.mismatch_state(),
        }
    }

    async fn check(&self, generation: u64) -> NetworkMismatchState {
        let resolved = match self.connector.network().await {
            Ok(Some(connected)) if connected == self.expected => NetworkState::Matched {
                connected: Some(connected),
            },
            Ok(Some(connected)) => {
                info!("wallet is on {} but {} is expected", connected, self.expected);
                NetworkState::Mismatched { connected }
            }
            Ok(None) => NetworkState::Disconnected,
            Err(err) if self.policy.permits() => {
                warn!("network check failed: {}; treating as matched", err);
                NetworkState::Matched { connected: None }
            }
            Err(err) => {
                warn!("network check failed: {}", err);
                NetworkState::Mismatched {
                    connected: NetworkId::new("unknown"),
                }
            }
        };

        // A newer check or a disconnect supersedes this result.
        let applied = self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) == generation {
                *state = resolved;
                true
            } else {
                false
            }
        });
        if !applied {
            debug!("dropping superseded network check #{}", generation);
        }
        self.mismatch_state()
    }
}
