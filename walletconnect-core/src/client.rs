//! Wiring of the core services.

use std::sync::Arc;

use tracing::info;

use crate::config::CoreConfig;
use crate::crypto::KeyManagementService;
use crate::envelope::Serializer;
use crate::history::RpcHistory;
use crate::pairing::PairingEngine;
use crate::relay::{NetworkingInteractor, RelayClient, RelaySocket};
use crate::secure_storage::SecureKeyStorage;
use crate::storage::KeyValueStorage;
use crate::Result;

/// Everything an application protocol needs from the core, built once per
/// process and shared by the sign and auth engines.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Core {
    config: CoreConfig,
    kms: KeyManagementService,
    storage: Arc<dyn KeyValueStorage>,
    history: Arc<RpcHistory>,
    interactor: NetworkingInteractor,
    pairing: PairingEngine,
}

impl Core {
    /// Build the core over injected collaborators. Nothing connects until
    /// [`start`](Self::start).
    pub fn new(
        config: CoreConfig,
        socket: Arc<dyn RelaySocket>,
        keychain: Arc<dyn SecureKeyStorage>,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        let kms = KeyManagementService::new(keychain);
        let history = Arc::new(RpcHistory::new(storage.clone()));
        let relay = RelayClient::new(socket, config.ack_timeout(), config.event_channel_capacity);
        let interactor = NetworkingInteractor::new(
            relay,
            Serializer::new(kms.clone()),
            history.clone(),
            config.event_channel_capacity,
        );
        let pairing = PairingEngine::new(
            config.clone(),
            interactor.clone(),
            kms.clone(),
            storage.clone(),
        );
        Self {
            config,
            kms,
            storage,
            history,
            interactor,
            pairing,
        }
    }

    /// Connect the relay, start dispatching and restore pairings.
    pub async fn start(&self) -> Result<()> {
        self.interactor.start()?;
        self.interactor.relay().connect().await?;
        self.pairing.start().await?;
        info!(name = %self.config.metadata.name, "core started");
        Ok(())
    }

    /// Disconnect from the relay. Stored state is kept.
    pub async fn shutdown(&self) -> Result<()> {
        self.interactor.relay().disconnect().await?;
        Ok(())
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn kms(&self) -> &KeyManagementService {
        &self.kms
    }

    /// Storage shared with the engines built on top of the core.
    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    pub fn history(&self) -> &Arc<RpcHistory> {
        &self.history
    }

    pub fn interactor(&self) -> &NetworkingInteractor {
        &self.interactor
    }

    pub fn pairing(&self) -> &PairingEngine {
        &self.pairing
    }
}
