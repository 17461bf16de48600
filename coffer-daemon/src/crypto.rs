//! Crypto helper surface.
//!
//! The crypto API keeps its key-entry bookkeeping in the same catalogue as
//! the secrets data so the two stay atomic. Key material itself is stored as
//! an ordinary collection secret: the store/fetch/delete calls enqueue
//! regular requests flagged as crypto-originated, and their completions are
//! delivered as [`CryptoSignal`]s rather than client replies.

use std::sync::Arc;

use coffer_core::{Error, KeyIdentifier, PluginRegistry, Result, UserInteractionMode};
use tokio::sync::mpsc::UnboundedSender;

use crate::catalogue::Catalogue;
use crate::request::{CryptoHelperKind, DaemonEvent, RequestInput, RequestOrigin};

pub use crate::request::CryptoSignal;

pub struct CryptoHelper {
    events: UnboundedSender<DaemonEvent>,
    catalogue: Arc<Catalogue>,
    registry: Arc<PluginRegistry>,
}

impl CryptoHelper {
    pub(crate) fn new(
        events: UnboundedSender<DaemonEvent>,
        catalogue: Arc<Catalogue>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            events,
            catalogue,
            registry,
        }
    }

    // The bookkeeping calls are synchronous catalogue reads and writes.

    pub fn storage_plugin_names(&self) -> Vec<String> {
        self.registry.storage_plugin_names()
    }

    pub fn key_entry_identifiers(&self) -> Result<Vec<KeyIdentifier>> {
        self.catalogue.key_entry_identifiers()
    }

    /// The `(crypto_plugin, storage_plugin)` pair recorded for a key.
    pub fn key_entry(&self, identifier: &KeyIdentifier) -> Result<Option<(String, String)>> {
        self.catalogue.key_entry(identifier)
    }

    pub fn add_key_entry(
        &self,
        identifier: &KeyIdentifier,
        crypto_plugin: &str,
        storage_plugin: &str,
    ) -> Result<()> {
        self.catalogue
            .add_key_entry(identifier, crypto_plugin, storage_plugin)
    }

    pub fn remove_key_entry(&self, identifier: &KeyIdentifier) -> Result<()> {
        self.catalogue.remove_key_entry(identifier)
    }

    // The key material calls are asynchronous: they enqueue a secrets
    // request and complete through the crypto signal stream.

    /// Store serialised key material as the collection secret named by the
    /// identifier. Completion arrives as a `StoreKeyCompleted` signal.
    pub fn store_key(
        &self,
        caller_pid: u32,
        crypto_request_id: u64,
        identifier: &KeyIdentifier,
        serialised_key: Vec<u8>,
    ) -> Result<()> {
        self.enqueue(
            caller_pid,
            crypto_request_id,
            CryptoHelperKind::StoreKey,
            RequestInput::SetCollectionSecret {
                collection_name: identifier.collection_name.clone(),
                secret_name: identifier.key_name.clone(),
                value: serialised_key,
                interaction_mode: UserInteractionMode::Prevent,
                ui_service_address: String::new(),
            },
        )
    }

    /// Fetch previously stored key material. Completion arrives as a
    /// `StoredKeyCompleted` signal carrying the serialised key.
    pub fn stored_key(
        &self,
        caller_pid: u32,
        crypto_request_id: u64,
        identifier: &KeyIdentifier,
    ) -> Result<()> {
        self.enqueue(
            caller_pid,
            crypto_request_id,
            CryptoHelperKind::StoredKey,
            RequestInput::GetCollectionSecret {
                collection_name: identifier.collection_name.clone(),
                secret_name: identifier.key_name.clone(),
                interaction_mode: UserInteractionMode::Prevent,
                ui_service_address: String::new(),
            },
        )
    }

    /// Delete stored key material. Completion arrives as a
    /// `DeleteStoredKeyCompleted` signal.
    pub fn delete_stored_key(
        &self,
        caller_pid: u32,
        crypto_request_id: u64,
        identifier: &KeyIdentifier,
    ) -> Result<()> {
        self.enqueue(
            caller_pid,
            crypto_request_id,
            CryptoHelperKind::DeleteStoredKey,
            RequestInput::DeleteCollectionSecret {
                collection_name: identifier.collection_name.clone(),
                secret_name: identifier.key_name.clone(),
                interaction_mode: UserInteractionMode::Prevent,
                ui_service_address: String::new(),
            },
        )
    }

    fn enqueue(
        &self,
        caller_pid: u32,
        crypto_request_id: u64,
        kind: CryptoHelperKind,
        input: RequestInput,
    ) -> Result<()> {
        self.events
            .send(DaemonEvent::Request {
                caller_pid,
                input,
                origin: RequestOrigin::Crypto {
                    crypto_request_id,
                    kind,
                },
            })
            .map_err(|_| Error::Daemon("secrets daemon is not running".into()))
    }
}
