//! Wallet connector for hosts that learn the wallet network out of band

use async_trait::async_trait;
use std::sync::RwLock;

use crate::domain::network::NetworkConnector;
use crate::shared::errors::ConnectorError;
use crate::shared::types::NetworkId;

/// Reports whatever network the host last set; `None` means disconnected.
#[derive(Debug, Default)]
pub struct StaticWallet {
    network: RwLock<Option<NetworkId>>,
}

impl StaticWallet {
    pub fn new(network: Option<NetworkId>) -> Self {
        Self {
            network: RwLock::new(network),
        }
    }

    pub fn set_network(&self, network: Option<NetworkId>) {
        *self.network.write().unwrap_or_else(|e| e.into_inner()) = network;
    }
}

#[async_trait]
impl NetworkConnector for StaticWallet {
    async fn network(&self) -> Result<Option<NetworkId>, ConnectorError> {
        Ok(self.network.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
