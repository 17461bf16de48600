//! Per-request state machine: every API verb, the authentication
//! continuations, and the relock timers.
//!
//! Mutations touching both the catalogue and a plugin follow a fixed
//! discipline: for inserts the catalogue commits first and is compensated if
//! the plugin fails; for deletes the plugin goes first and the catalogue row
//! follows. Either way only the catalogue can be "ahead", which is
//! recoverable, whereas a plugin ahead of the catalogue would leak storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use coffer_core::{
    hashed_secret_name, AccessControlMode, AuthenticationContext, AuthenticationOutcome,
    AuthenticationSink, AuthenticationType, EncryptedStoragePlugin, Error, PluginRegistry, Result,
    SecretKey, UnlockSemantic, UserInteractionMode, WireResult, DEFAULT_AUTHENTICATION_PLUGIN,
    RESERVED_COLLECTION_NAME,
};
use coffer_core::types::{require_collection_name, require_secret_name};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::catalogue::{Catalogue, CollectionRow, SecretRow};
use crate::keycache::{KeyCache, RelockTimer};
use crate::permissions::CallerPermissions;
use crate::queue::HandlerProgress;
use crate::request::{CompletedRequest, DaemonEvent, RequestInput, ResponseBody};

/// Progress of a verb that may suspend on authentication.
enum Flow<T> {
    Completed(T),
    Suspended,
}

/// Saved arguments for a request suspended on an authentication flow.
struct PendingRequest {
    caller_pid: u32,
    continuation: Continuation,
}

enum Continuation {
    CreateCustomLockCollection {
        collection_name: String,
        storage_plugin: String,
        encryption_plugin: String,
        authentication_plugin: String,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
    },
    SetCollectionSecret {
        collection_name: String,
        secret_name: String,
        value: Vec<u8>,
    },
    SetStandaloneCustomLockSecret {
        storage_plugin: String,
        encryption_plugin: String,
        authentication_plugin: String,
        secret_name: String,
        value: Vec<u8>,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
    },
    GetCollectionSecret {
        collection_name: String,
        secret_name: String,
    },
    GetStandaloneSecret {
        secret_name: String,
    },
    DeleteCollectionSecret {
        collection_name: String,
        secret_name: String,
    },
}

pub struct RequestProcessor {
    catalogue: Arc<Catalogue>,
    registry: Arc<PluginRegistry>,
    permissions: Arc<dyn CallerPermissions>,
    cache: KeyCache,
    pending: HashMap<u64, PendingRequest>,
    device_lock_key: SecretKey,
    auth_sink: AuthenticationSink,
    events: UnboundedSender<DaemonEvent>,
}

impl RequestProcessor {
    pub fn new(
        catalogue: Arc<Catalogue>,
        registry: Arc<PluginRegistry>,
        permissions: Arc<dyn CallerPermissions>,
        device_lock_key: SecretKey,
        auth_sink: AuthenticationSink,
        events: UnboundedSender<DaemonEvent>,
    ) -> Self {
        Self {
            catalogue,
            registry,
            permissions,
            cache: KeyCache::new(),
            pending: HashMap::new(),
            device_lock_key,
            auth_sink,
            events,
        }
    }

    /// Entry point for the queue's dispatch pass.
    pub fn handle(
        &mut self,
        request_id: u64,
        caller_pid: u32,
        input: &RequestInput,
    ) -> HandlerProgress {
        debug!(
            verb = input.verb_name(),
            caller_pid, request_id, "handling request"
        );
        match input {
            RequestInput::GetPluginInfo => HandlerProgress::Complete(CompletedRequest::new(
                WireResult::succeeded(),
                ResponseBody::PluginInfo(self.registry.info_report()),
            )),
            RequestInput::CreateDeviceLockCollection {
                collection_name,
                storage_plugin,
                encryption_plugin,
                unlock_semantic,
                access_control_mode,
            } => complete_unit(self.create_device_lock_collection(
                caller_pid,
                collection_name,
                storage_plugin,
                encryption_plugin,
                *unlock_semantic,
                *access_control_mode,
            )),
            RequestInput::CreateCustomLockCollection {
                collection_name,
                storage_plugin,
                encryption_plugin,
                authentication_plugin,
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
                interaction_mode,
                ui_service_address,
            } => flow_unit(self.create_custom_lock_collection(
                caller_pid,
                request_id,
                collection_name,
                storage_plugin,
                encryption_plugin,
                authentication_plugin,
                *unlock_semantic,
                *custom_lock_timeout_ms,
                *access_control_mode,
                *interaction_mode,
                ui_service_address,
            )),
            RequestInput::DeleteCollection {
                collection_name, ..
            } => complete_unit(self.delete_collection(caller_pid, collection_name)),
            RequestInput::SetCollectionSecret {
                collection_name,
                secret_name,
                value,
                interaction_mode,
                ui_service_address,
            } => flow_unit(self.set_collection_secret(
                caller_pid,
                request_id,
                collection_name,
                secret_name,
                value,
                *interaction_mode,
                ui_service_address,
            )),
            RequestInput::SetStandaloneDeviceLockSecret {
                storage_plugin,
                encryption_plugin,
                secret_name,
                value,
                unlock_semantic,
                access_control_mode,
                ..
            } => complete_unit(self.set_standalone_device_lock_secret(
                caller_pid,
                storage_plugin,
                encryption_plugin,
                secret_name,
                value,
                *unlock_semantic,
                *access_control_mode,
            )),
            RequestInput::SetStandaloneCustomLockSecret {
                storage_plugin,
                encryption_plugin,
                authentication_plugin,
                secret_name,
                value,
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
                interaction_mode,
                ui_service_address,
            } => flow_unit(self.set_standalone_custom_lock_secret(
                caller_pid,
                request_id,
                storage_plugin,
                encryption_plugin,
                authentication_plugin,
                secret_name,
                value,
                *unlock_semantic,
                *custom_lock_timeout_ms,
                *access_control_mode,
                *interaction_mode,
                ui_service_address,
            )),
            RequestInput::GetCollectionSecret {
                collection_name,
                secret_name,
                interaction_mode,
                ui_service_address,
            } => flow_secret(self.get_collection_secret(
                caller_pid,
                request_id,
                collection_name,
                secret_name,
                *interaction_mode,
                ui_service_address,
            )),
            RequestInput::GetStandaloneSecret {
                secret_name,
                interaction_mode,
                ui_service_address,
            } => flow_secret(self.get_standalone_secret(
                caller_pid,
                request_id,
                secret_name,
                *interaction_mode,
                ui_service_address,
            )),
            RequestInput::DeleteCollectionSecret {
                collection_name,
                secret_name,
                interaction_mode,
                ui_service_address,
            } => flow_unit(self.delete_collection_secret(
                caller_pid,
                request_id,
                collection_name,
                secret_name,
                *interaction_mode,
                ui_service_address,
            )),
            RequestInput::DeleteStandaloneSecret { secret_name, .. } => {
                complete_unit(self.delete_standalone_secret(caller_pid, secret_name))
            }
        }
    }

    // ---- collection verbs -------------------------------------------------

    fn create_device_lock_collection(
        &mut self,
        caller_pid: u32,
        collection_name: &str,
        storage_plugin: &str,
        encryption_plugin: &str,
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
    ) -> Result<()> {
        require_collection_name(collection_name)?;
        if !unlock_semantic.is_device_lock() {
            return Err(Error::OperationNotSupported(
                "a device lock collection requires a device lock unlock semantic".into(),
            ));
        }
        self.require_plugin_pair(storage_plugin, encryption_plugin)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        self.catalogue.insert_collection(&CollectionRow {
            collection_name: collection_name.to_string(),
            application_id,
            uses_device_lock_key: true,
            storage_plugin: storage_plugin.to_string(),
            encryption_plugin: encryption_plugin.to_string(),
            authentication_plugin: DEFAULT_AUTHENTICATION_PLUGIN.to_string(),
            unlock_semantic,
            custom_lock_timeout_ms: 0,
            access_control_mode,
        })?;

        let plugin_result = if storage_plugin == encryption_plugin {
            let plugin = self.encrypted_storage_plugin(storage_plugin)?;
            plugin.create_collection(collection_name, &self.device_lock_key)
        } else {
            let plugin = self.storage_plugin(storage_plugin)?;
            let result = plugin.create_collection(collection_name);
            if result.is_ok() {
                self.cache
                    .insert_collection_key(collection_name, self.device_lock_key.clone());
            }
            result
        };

        if let Err(plugin_err) = plugin_result {
            self.compensate_collection_row(collection_name, &plugin_err)?;
            return Err(plugin_err);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_custom_lock_collection(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        collection_name: &str,
        storage_plugin: &str,
        encryption_plugin: &str,
        authentication_plugin: &str,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<Flow<()>> {
        require_collection_name(collection_name)?;
        if !unlock_semantic.is_custom_lock() {
            return Err(Error::OperationNotSupported(
                "a custom lock collection requires a custom lock unlock semantic".into(),
            ));
        }
        self.require_plugin_pair(storage_plugin, encryption_plugin)?;
        self.require_interactive_flow(authentication_plugin, interaction_mode, ui_service_address)?;

        if self.catalogue.collection_exists(collection_name)? {
            return Err(Error::CollectionAlreadyExists(collection_name.to_string()));
        }

        self.begin_authentication_flow(
            caller_pid,
            request_id,
            authentication_plugin,
            collection_name,
            "",
            ui_service_address,
            Continuation::CreateCustomLockCollection {
                collection_name: collection_name.to_string(),
                storage_plugin: storage_plugin.to_string(),
                encryption_plugin: encryption_plugin.to_string(),
                authentication_plugin: authentication_plugin.to_string(),
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
            },
        )?;
        Ok(Flow::Suspended)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_custom_lock_collection_with_key(
        &mut self,
        caller_pid: u32,
        collection_name: &str,
        storage_plugin: &str,
        encryption_plugin: &str,
        authentication_plugin: &str,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        key: &SecretKey,
    ) -> Result<()> {
        let application_id = self.permissions.effective_application_id(caller_pid);

        // Another client may have claimed the name during the
        // authentication wait; insert_collection re-checks transactionally.
        self.catalogue.insert_collection(&CollectionRow {
            collection_name: collection_name.to_string(),
            application_id,
            uses_device_lock_key: false,
            storage_plugin: storage_plugin.to_string(),
            encryption_plugin: encryption_plugin.to_string(),
            authentication_plugin: authentication_plugin.to_string(),
            unlock_semantic,
            custom_lock_timeout_ms,
            access_control_mode,
        })?;

        let plugin_result = if storage_plugin == encryption_plugin {
            let plugin = self.encrypted_storage_plugin(storage_plugin)?;
            plugin.create_collection(collection_name, key)
        } else {
            let plugin = self.storage_plugin(storage_plugin)?;
            let result = plugin.create_collection(collection_name);
            if result.is_ok() {
                self.cache.insert_collection_key(collection_name, key.clone());
            }
            result
        };

        if let Err(plugin_err) = plugin_result {
            self.compensate_collection_row(collection_name, &plugin_err)?;
            return Err(plugin_err);
        }
        Ok(())
    }

    fn delete_collection(&mut self, _caller_pid: u32, collection_name: &str) -> Result<()> {
        require_collection_name(collection_name)?;

        let Some(row) = self.catalogue.collection(collection_name)? else {
            // No such collection; deleting it already succeeded.
            return Ok(());
        };

        // Deletes run plugin-first: a row for storage that is already gone
        // is recoverable, the reverse leaks plugin storage.
        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            plugin.remove_collection(collection_name)?;
        } else {
            let plugin = self.storage_plugin(&row.storage_plugin)?;
            plugin.remove_collection(collection_name)?;
        }

        self.cache.evict_collection(collection_name);
        self.catalogue.delete_collection(collection_name)?;
        Ok(())
    }

    // ---- collection secrets ----------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn set_collection_secret(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        collection_name: &str,
        secret_name: &str,
        value: &[u8],
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<Flow<()>> {
        require_secret_name(secret_name)?;
        require_collection_name(collection_name)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let row = self
            .catalogue
            .collection(collection_name)?
            .ok_or_else(|| Error::InvalidCollection("nonexistent collection name given".into()))?;

        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "collection {collection_name} is owned by a different application"
            )));
        }
        self.require_plugin_pair(&row.storage_plugin, &row.encryption_plugin)?;

        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            if !plugin.is_locked(collection_name)? {
                return Ok(Flow::Completed(self.set_collection_secret_with_key(
                    caller_pid,
                    collection_name,
                    secret_name,
                    value,
                    &SecretKey::empty(),
                )?));
            }
        } else if let Some(key) = self.cache.collection_key(collection_name).cloned() {
            return Ok(Flow::Completed(self.set_collection_secret_with_key(
                caller_pid,
                collection_name,
                secret_name,
                value,
                &key,
            )?));
        }

        if row.uses_device_lock_key {
            return Err(Error::CollectionIsLocked(format!(
                "collection {collection_name}"
            )));
        }

        self.require_interactive_flow(
            &row.authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;
        self.begin_authentication_flow(
            caller_pid,
            request_id,
            &row.authentication_plugin,
            collection_name,
            secret_name,
            ui_service_address,
            Continuation::SetCollectionSecret {
                collection_name: collection_name.to_string(),
                secret_name: secret_name.to_string(),
                value: value.to_vec(),
            },
        )?;
        Ok(Flow::Suspended)
    }

    fn set_collection_secret_with_key(
        &mut self,
        caller_pid: u32,
        collection_name: &str,
        secret_name: &str,
        value: &[u8],
        key: &SecretKey,
    ) -> Result<()> {
        let application_id = self.permissions.effective_application_id(caller_pid);

        // Re-validate: the collection may have been deleted or replaced
        // while the authentication flow was in progress.
        let row = self
            .catalogue
            .collection(collection_name)?
            .ok_or_else(|| Error::InvalidCollection("nonexistent collection name given".into()))?;
        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "collection {collection_name} is owned by a different application"
            )));
        }

        let hashed = hashed_secret_name(collection_name, secret_name);
        let already_exists = self.catalogue.secret_exists(collection_name, &hashed)?;
        if !already_exists {
            self.catalogue.insert_secret(&SecretRow {
                collection_name: collection_name.to_string(),
                hashed_secret_name: hashed.clone(),
                application_id: row.application_id.clone(),
                uses_device_lock_key: row.uses_device_lock_key,
                storage_plugin: row.storage_plugin.clone(),
                encryption_plugin: row.encryption_plugin.clone(),
                authentication_plugin: row.authentication_plugin.clone(),
                unlock_semantic: row.unlock_semantic,
                custom_lock_timeout_ms: row.custom_lock_timeout_ms,
                access_control_mode: row.access_control_mode,
            })?;
        }

        let plugin_result = if row.storage_plugin == row.encryption_plugin {
            self.encrypted_storage_plugin(&row.storage_plugin)
                .and_then(|plugin| {
                    self.unlock_sealed_collection(&plugin, collection_name, key)?;
                    plugin.set_secret(collection_name, &hashed, value)
                })
        } else {
            if self.cache.collection_key(collection_name).is_none() {
                self.cache
                    .insert_collection_key(collection_name, key.clone());
            }
            let cached = self
                .cache
                .collection_key(collection_name)
                .cloned()
                .unwrap_or_else(SecretKey::empty);
            self.encryption_plugin(&row.encryption_plugin)
                .and_then(|encryption| encryption.encrypt_secret(value, &cached))
                .and_then(|encrypted| {
                    let storage = self.storage_plugin(&row.storage_plugin)?;
                    storage.set_secret(collection_name, &hashed, &encrypted)
                })
        };

        if let Err(plugin_err) = plugin_result {
            if !already_exists {
                self.compensate_secret_row(collection_name, &hashed, &plugin_err)?;
            }
            return Err(plugin_err);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn get_collection_secret(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        collection_name: &str,
        secret_name: &str,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<Flow<Vec<u8>>> {
        require_secret_name(secret_name)?;
        require_collection_name(collection_name)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let row = self
            .catalogue
            .collection(collection_name)?
            .ok_or_else(|| Error::InvalidCollection("nonexistent collection name given".into()))?;

        self.require_plugin_pair(&row.storage_plugin, &row.encryption_plugin)?;
        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "collection {collection_name} is owned by a different application"
            )));
        }
        self.require_interactive_capability(
            &row.authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;

        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            if !plugin.is_locked(collection_name)? {
                return Ok(Flow::Completed(self.get_collection_secret_with_key(
                    caller_pid,
                    collection_name,
                    secret_name,
                    &SecretKey::empty(),
                )?));
            }
        } else if let Some(key) = self.cache.collection_key(collection_name).cloned() {
            return Ok(Flow::Completed(self.get_collection_secret_with_key(
                caller_pid,
                collection_name,
                secret_name,
                &key,
            )?));
        }

        if row.uses_device_lock_key {
            return Err(Error::CollectionIsLocked(format!(
                "collection {collection_name}"
            )));
        }

        self.require_interactive_flow(
            &row.authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;
        self.begin_authentication_flow(
            caller_pid,
            request_id,
            &row.authentication_plugin,
            collection_name,
            secret_name,
            ui_service_address,
            Continuation::GetCollectionSecret {
                collection_name: collection_name.to_string(),
                secret_name: secret_name.to_string(),
            },
        )?;
        Ok(Flow::Suspended)
    }

    fn get_collection_secret_with_key(
        &mut self,
        caller_pid: u32,
        collection_name: &str,
        secret_name: &str,
        key: &SecretKey,
    ) -> Result<Vec<u8>> {
        let application_id = self.permissions.effective_application_id(caller_pid);
        let row = self
            .catalogue
            .collection(collection_name)?
            .ok_or_else(|| Error::InvalidCollection("nonexistent collection name given".into()))?;
        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "collection {collection_name} is owned by a different application"
            )));
        }

        if row.unlock_semantic == UnlockSemantic::CustomLockTimeoutRelock {
            self.arm_collection_relock(collection_name, row.custom_lock_timeout_ms);
        }

        let hashed = hashed_secret_name(collection_name, secret_name);
        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            self.unlock_sealed_collection(&plugin, collection_name, key)?;
            plugin.secret(collection_name, &hashed)
        } else {
            if self.cache.collection_key(collection_name).is_none() {
                self.cache
                    .insert_collection_key(collection_name, key.clone());
            }
            let cached = self
                .cache
                .collection_key(collection_name)
                .cloned()
                .unwrap_or_else(SecretKey::empty);
            let storage = self.storage_plugin(&row.storage_plugin)?;
            let encrypted = storage.secret(collection_name, &hashed)?;
            let encryption = self.encryption_plugin(&row.encryption_plugin)?;
            encryption.decrypt_secret(&encrypted, &cached)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn delete_collection_secret(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        collection_name: &str,
        secret_name: &str,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<Flow<()>> {
        require_secret_name(secret_name)?;
        require_collection_name(collection_name)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let row = self
            .catalogue
            .collection(collection_name)?
            .ok_or_else(|| Error::InvalidCollection("nonexistent collection name given".into()))?;

        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "collection {collection_name} is owned by a different application"
            )));
        }
        self.require_plugin_pair(&row.storage_plugin, &row.encryption_plugin)?;

        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            if !plugin.is_locked(collection_name)? {
                return Ok(Flow::Completed(self.delete_collection_secret_with_key(
                    caller_pid,
                    collection_name,
                    secret_name,
                    &SecretKey::empty(),
                )?));
            }
        } else if let Some(key) = self.cache.collection_key(collection_name).cloned() {
            return Ok(Flow::Completed(self.delete_collection_secret_with_key(
                caller_pid,
                collection_name,
                secret_name,
                &key,
            )?));
        }

        if row.uses_device_lock_key {
            return Err(Error::CollectionIsLocked(format!(
                "collection {collection_name}"
            )));
        }

        self.require_interactive_flow(
            &row.authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;
        self.begin_authentication_flow(
            caller_pid,
            request_id,
            &row.authentication_plugin,
            collection_name,
            secret_name,
            ui_service_address,
            Continuation::DeleteCollectionSecret {
                collection_name: collection_name.to_string(),
                secret_name: secret_name.to_string(),
            },
        )?;
        Ok(Flow::Suspended)
    }

    fn delete_collection_secret_with_key(
        &mut self,
        caller_pid: u32,
        collection_name: &str,
        secret_name: &str,
        key: &SecretKey,
    ) -> Result<()> {
        let application_id = self.permissions.effective_application_id(caller_pid);
        let row = self
            .catalogue
            .collection(collection_name)?
            .ok_or_else(|| Error::InvalidCollection("nonexistent collection name given".into()))?;

        // A device-lock collection only ever unlocks with the device lock
        // key. An empty key means the collection was already unlocked.
        if row.uses_device_lock_key && !key.is_empty() && *key != self.device_lock_key {
            return Err(Error::IncorrectAuthenticationKey(
                "incorrect device lock key provided".to_string(),
            ));
        }
        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "collection {collection_name} is owned by a different application"
            )));
        }

        let hashed = hashed_secret_name(collection_name, secret_name);
        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            self.unlock_sealed_collection(&plugin, collection_name, key)?;
            plugin.remove_secret(collection_name, &hashed)?;
        } else {
            if self.cache.collection_key(collection_name).is_none() {
                self.cache
                    .insert_collection_key(collection_name, key.clone());
            }
            let storage = self.storage_plugin(&row.storage_plugin)?;
            storage.remove_secret(collection_name, &hashed)?;
        }

        self.catalogue.delete_secret(collection_name, &hashed)?;
        Ok(())
    }

    // ---- standalone secrets ----------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn set_standalone_device_lock_secret(
        &mut self,
        caller_pid: u32,
        storage_plugin: &str,
        encryption_plugin: &str,
        secret_name: &str,
        value: &[u8],
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
    ) -> Result<()> {
        require_secret_name(secret_name)?;
        if !unlock_semantic.is_device_lock() {
            return Err(Error::OperationNotSupported(
                "a device lock secret requires a device lock unlock semantic".into(),
            ));
        }
        self.require_plugin_pair(storage_plugin, encryption_plugin)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let hashed = hashed_secret_name(RESERVED_COLLECTION_NAME, secret_name);
        let existing = self.catalogue.secret(RESERVED_COLLECTION_NAME, &hashed)?;

        if let Some(existing) = &existing {
            self.require_owner_only(&existing.access_control_mode)?;
            if existing.application_id != application_id {
                return Err(Error::Permissions(format!(
                    "secret {secret_name} is owned by a different application"
                )));
            }
            if !existing.uses_device_lock_key {
                return Err(Error::OperationNotSupported(format!(
                    "secret {secret_name} already exists and is not a device lock protected secret"
                )));
            }
            if !existing
                .storage_plugin
                .eq_ignore_ascii_case(storage_plugin)
            {
                return Err(Error::OperationNotSupported(format!(
                    "secret {secret_name} already exists and is not stored via plugin {storage_plugin}"
                )));
            }
        }

        let row = SecretRow {
            collection_name: RESERVED_COLLECTION_NAME.to_string(),
            hashed_secret_name: hashed.clone(),
            application_id,
            uses_device_lock_key: true,
            storage_plugin: storage_plugin.to_string(),
            encryption_plugin: encryption_plugin.to_string(),
            authentication_plugin: DEFAULT_AUTHENTICATION_PLUGIN.to_string(),
            unlock_semantic,
            custom_lock_timeout_ms: 0,
            access_control_mode,
        };
        let device_lock_key = self.device_lock_key.clone();
        self.write_standalone_secret(row, existing.is_some(), value, &device_lock_key)
    }

    #[allow(clippy::too_many_arguments)]
    fn set_standalone_custom_lock_secret(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        storage_plugin: &str,
        encryption_plugin: &str,
        authentication_plugin: &str,
        secret_name: &str,
        value: &[u8],
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<Flow<()>> {
        require_secret_name(secret_name)?;
        if !unlock_semantic.is_custom_lock() {
            return Err(Error::OperationNotSupported(
                "a custom lock secret requires a custom lock unlock semantic".into(),
            ));
        }
        self.require_plugin_pair(storage_plugin, encryption_plugin)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let hashed = hashed_secret_name(RESERVED_COLLECTION_NAME, secret_name);
        if let Some(existing) = self.catalogue.secret(RESERVED_COLLECTION_NAME, &hashed)? {
            self.require_owner_only(&existing.access_control_mode)?;
            if existing.application_id != application_id {
                return Err(Error::Permissions(format!(
                    "secret {secret_name} is owned by a different application"
                )));
            }
            if existing.uses_device_lock_key {
                return Err(Error::OperationNotSupported(format!(
                    "secret {secret_name} already exists and is a device lock protected secret"
                )));
            }
            if !existing
                .storage_plugin
                .eq_ignore_ascii_case(storage_plugin)
            {
                return Err(Error::OperationNotSupported(format!(
                    "secret {secret_name} already exists and is not stored via plugin {storage_plugin}"
                )));
            }
        }
        self.require_interactive_flow(authentication_plugin, interaction_mode, ui_service_address)?;

        self.begin_authentication_flow(
            caller_pid,
            request_id,
            authentication_plugin,
            "",
            secret_name,
            ui_service_address,
            Continuation::SetStandaloneCustomLockSecret {
                storage_plugin: storage_plugin.to_string(),
                encryption_plugin: encryption_plugin.to_string(),
                authentication_plugin: authentication_plugin.to_string(),
                secret_name: secret_name.to_string(),
                value: value.to_vec(),
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
            },
        )?;
        Ok(Flow::Suspended)
    }

    #[allow(clippy::too_many_arguments)]
    fn set_standalone_custom_lock_secret_with_key(
        &mut self,
        caller_pid: u32,
        storage_plugin: &str,
        encryption_plugin: &str,
        authentication_plugin: &str,
        secret_name: &str,
        value: &[u8],
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        key: &SecretKey,
    ) -> Result<()> {
        let application_id = self.permissions.effective_application_id(caller_pid);
        let hashed = hashed_secret_name(RESERVED_COLLECTION_NAME, secret_name);

        // Re-validate: another application may have claimed the name during
        // the authentication wait.
        let existing = self.catalogue.secret(RESERVED_COLLECTION_NAME, &hashed)?;
        if let Some(existing) = &existing {
            self.require_owner_only(&existing.access_control_mode)?;
            if existing.application_id != application_id {
                return Err(Error::Permissions(format!(
                    "secret {secret_name} is owned by a different application"
                )));
            }
            if existing.uses_device_lock_key {
                return Err(Error::OperationNotSupported(format!(
                    "secret {secret_name} already exists and is a device lock protected secret"
                )));
            }
            if !existing
                .storage_plugin
                .eq_ignore_ascii_case(storage_plugin)
            {
                return Err(Error::OperationNotSupported(format!(
                    "secret {secret_name} already exists and is not stored via plugin {storage_plugin}"
                )));
            }
        }

        let row = SecretRow {
            collection_name: RESERVED_COLLECTION_NAME.to_string(),
            hashed_secret_name: hashed.clone(),
            application_id,
            uses_device_lock_key: false,
            storage_plugin: storage_plugin.to_string(),
            encryption_plugin: encryption_plugin.to_string(),
            authentication_plugin: authentication_plugin.to_string(),
            unlock_semantic,
            custom_lock_timeout_ms,
            access_control_mode,
        };
        self.write_standalone_secret(row, existing.is_some(), value, key)
    }

    /// Shared tail of both standalone set paths: upsert the catalogue row,
    /// invoke the plugin, compensate a fresh row on plugin failure.
    fn write_standalone_secret(
        &mut self,
        row: SecretRow,
        already_exists: bool,
        value: &[u8],
        key: &SecretKey,
    ) -> Result<()> {
        if already_exists {
            self.catalogue.update_secret(&row)?;
        } else {
            self.catalogue.insert_secret(&row)?;
        }

        let hashed = row.hashed_secret_name.clone();
        let plugin_result = if row.storage_plugin == row.encryption_plugin {
            self.encrypted_storage_plugin(&row.storage_plugin)
                .and_then(|plugin| {
                    plugin.set_standalone_secret(RESERVED_COLLECTION_NAME, &hashed, value, key)
                })
        } else {
            self.encryption_plugin(&row.encryption_plugin)
                .and_then(|encryption| encryption.encrypt_secret(value, key))
                .and_then(|encrypted| {
                    let storage = self.storage_plugin(&row.storage_plugin)?;
                    storage.set_secret(RESERVED_COLLECTION_NAME, &hashed, &encrypted)
                })
        };

        match plugin_result {
            Ok(()) => {
                self.cache.insert_standalone_key(hashed, key.clone());
                Ok(())
            }
            Err(plugin_err) => {
                if !already_exists {
                    self.compensate_secret_row(RESERVED_COLLECTION_NAME, &hashed, &plugin_err)?;
                }
                Err(plugin_err)
            }
        }
    }

    fn get_standalone_secret(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        secret_name: &str,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<Flow<Vec<u8>>> {
        require_secret_name(secret_name)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let hashed = hashed_secret_name(RESERVED_COLLECTION_NAME, secret_name);
        let row = self
            .catalogue
            .secret(RESERVED_COLLECTION_NAME, &hashed)?
            .ok_or_else(|| Error::InvalidSecret("nonexistent secret name given".into()))?;

        self.require_plugin_pair(&row.storage_plugin, &row.encryption_plugin)?;
        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "secret {secret_name} is owned by a different application"
            )));
        }
        self.require_interactive_capability(
            &row.authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;

        if let Some(key) = self.cache.standalone_key(&hashed).cloned() {
            return Ok(Flow::Completed(
                self.get_standalone_secret_with_key(secret_name, &key)?,
            ));
        }

        if row.uses_device_lock_key {
            return Err(Error::CollectionIsLocked(format!("secret {secret_name}")));
        }

        self.require_interactive_flow(
            &row.authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;
        self.begin_authentication_flow(
            caller_pid,
            request_id,
            &row.authentication_plugin,
            "",
            secret_name,
            ui_service_address,
            Continuation::GetStandaloneSecret {
                secret_name: secret_name.to_string(),
            },
        )?;
        Ok(Flow::Suspended)
    }

    fn get_standalone_secret_with_key(
        &mut self,
        secret_name: &str,
        key: &SecretKey,
    ) -> Result<Vec<u8>> {
        let hashed = hashed_secret_name(RESERVED_COLLECTION_NAME, secret_name);
        let row = self
            .catalogue
            .secret(RESERVED_COLLECTION_NAME, &hashed)?
            .ok_or_else(|| Error::InvalidSecret("nonexistent secret name given".into()))?;

        if row.unlock_semantic == UnlockSemantic::CustomLockTimeoutRelock {
            self.arm_standalone_relock(&hashed, row.custom_lock_timeout_ms);
        }

        let value = if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            plugin.access_secret(RESERVED_COLLECTION_NAME, &hashed, key)?
        } else {
            let storage = self.storage_plugin(&row.storage_plugin)?;
            let encrypted = storage.secret(RESERVED_COLLECTION_NAME, &hashed)?;
            let encryption = self.encryption_plugin(&row.encryption_plugin)?;
            encryption.decrypt_secret(&encrypted, key)?
        };

        if self.cache.standalone_key(&hashed).is_none() {
            self.cache.insert_standalone_key(hashed, key.clone());
        }
        Ok(value)
    }

    fn delete_standalone_secret(&mut self, caller_pid: u32, secret_name: &str) -> Result<()> {
        require_secret_name(secret_name)?;

        let application_id = self.permissions.effective_application_id(caller_pid);
        let hashed = hashed_secret_name(RESERVED_COLLECTION_NAME, secret_name);
        let Some(row) = self.catalogue.secret(RESERVED_COLLECTION_NAME, &hashed)? else {
            // Nothing to delete.
            return Ok(());
        };

        self.require_owner_only(&row.access_control_mode)?;
        if row.application_id != application_id {
            return Err(Error::Permissions(format!(
                "secret {secret_name} is owned by a different application"
            )));
        }
        self.require_plugin_pair(&row.storage_plugin, &row.encryption_plugin)?;

        if row.storage_plugin == row.encryption_plugin {
            let plugin = self.encrypted_storage_plugin(&row.storage_plugin)?;
            let was_locked = plugin.is_locked(RESERVED_COLLECTION_NAME)?;
            if was_locked && row.uses_device_lock_key {
                plugin.set_encryption_key(RESERVED_COLLECTION_NAME, &self.device_lock_key)?;
            }
            let result = plugin.remove_secret(RESERVED_COLLECTION_NAME, &hashed);
            if was_locked {
                // relock after delete-access
                let _ = plugin.set_encryption_key(RESERVED_COLLECTION_NAME, &SecretKey::empty());
            }
            result?;
        } else {
            let storage = self.storage_plugin(&row.storage_plugin)?;
            storage.remove_secret(RESERVED_COLLECTION_NAME, &hashed)?;
        }

        self.cache.evict_standalone(&hashed);
        self.catalogue.delete_secret(RESERVED_COLLECTION_NAME, &hashed)?;
        Ok(())
    }

    // ---- authentication continuations ------------------------------------

    /// Resume the request waiting on this authentication outcome. Returns
    /// the final reply for the queue to deliver.
    pub fn authentication_completed(
        &mut self,
        outcome: AuthenticationOutcome,
    ) -> (u64, CompletedRequest) {
        let request_id = outcome.request_id;
        let completed = match outcome.outcome {
            Err(err) => {
                self.pending.remove(&request_id);
                CompletedRequest::result_only(WireResult::failed(&err))
            }
            Ok(key) => match self.pending.remove(&request_id) {
                None => {
                    warn!(request_id, "authentication completed for unknown request");
                    CompletedRequest::result_only(WireResult::failed(&Error::Unknown(
                        "failed to finish unknown pending request".into(),
                    )))
                }
                Some(pending) => self.resume(pending, &key),
            },
        };
        (request_id, completed)
    }

    fn resume(&mut self, pending: PendingRequest, key: &SecretKey) -> CompletedRequest {
        let caller_pid = pending.caller_pid;
        match pending.continuation {
            Continuation::CreateCustomLockCollection {
                collection_name,
                storage_plugin,
                encryption_plugin,
                authentication_plugin,
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
            } => CompletedRequest::result_only(
                self.create_custom_lock_collection_with_key(
                    caller_pid,
                    &collection_name,
                    &storage_plugin,
                    &encryption_plugin,
                    &authentication_plugin,
                    unlock_semantic,
                    custom_lock_timeout_ms,
                    access_control_mode,
                    key,
                )
                .into(),
            ),
            Continuation::SetCollectionSecret {
                collection_name,
                secret_name,
                value,
            } => CompletedRequest::result_only(
                self.set_collection_secret_with_key(
                    caller_pid,
                    &collection_name,
                    &secret_name,
                    &value,
                    key,
                )
                .into(),
            ),
            Continuation::SetStandaloneCustomLockSecret {
                storage_plugin,
                encryption_plugin,
                authentication_plugin,
                secret_name,
                value,
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
            } => CompletedRequest::result_only(
                self.set_standalone_custom_lock_secret_with_key(
                    caller_pid,
                    &storage_plugin,
                    &encryption_plugin,
                    &authentication_plugin,
                    &secret_name,
                    &value,
                    unlock_semantic,
                    custom_lock_timeout_ms,
                    access_control_mode,
                    key,
                )
                .into(),
            ),
            Continuation::GetCollectionSecret {
                collection_name,
                secret_name,
            } => {
                match self.get_collection_secret_with_key(
                    caller_pid,
                    &collection_name,
                    &secret_name,
                    key,
                ) {
                    Ok(value) => CompletedRequest::new(
                        WireResult::succeeded(),
                        ResponseBody::Secret(value),
                    ),
                    Err(err) => CompletedRequest::result_only(WireResult::failed(&err)),
                }
            }
            Continuation::GetStandaloneSecret { secret_name } => {
                match self.get_standalone_secret_with_key(&secret_name, key) {
                    Ok(value) => CompletedRequest::new(
                        WireResult::succeeded(),
                        ResponseBody::Secret(value),
                    ),
                    Err(err) => CompletedRequest::result_only(WireResult::failed(&err)),
                }
            }
            Continuation::DeleteCollectionSecret {
                collection_name,
                secret_name,
            } => CompletedRequest::result_only(
                self.delete_collection_secret_with_key(
                    caller_pid,
                    &collection_name,
                    &secret_name,
                    key,
                )
                .into(),
            ),
        }
    }

    // ---- relock timers ----------------------------------------------------

    pub fn relock_collection(&mut self, collection_name: &str) {
        debug!(collection_name, "relocking collection after unlock timeout");
        self.cache.evict_collection(collection_name);
    }

    pub fn relock_standalone_secret(&mut self, hashed_secret_name: &str) {
        debug!("relocking standalone secret after unlock timeout");
        self.cache.evict_standalone(hashed_secret_name);
    }

    fn arm_collection_relock(&mut self, collection_name: &str, timeout_ms: u64) {
        if self.cache.has_collection_timer(collection_name) {
            return;
        }
        let events = self.events.clone();
        let name = collection_name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = events.send(DaemonEvent::RelockCollection {
                collection_name: name,
            });
        });
        self.cache
            .arm_collection_timer(collection_name, RelockTimer::new(handle));
    }

    fn arm_standalone_relock(&mut self, hashed_secret_name: &str, timeout_ms: u64) {
        if self.cache.has_standalone_timer(hashed_secret_name) {
            return;
        }
        let events = self.events.clone();
        let hashed = hashed_secret_name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = events.send(DaemonEvent::RelockStandaloneSecret {
                hashed_secret_name: hashed,
            });
        });
        self.cache
            .arm_standalone_timer(hashed_secret_name, RelockTimer::new(handle));
    }

    // ---- shared validation and plugin access ------------------------------

    fn require_plugin_pair(&self, storage_plugin: &str, encryption_plugin: &str) -> Result<()> {
        if storage_plugin == encryption_plugin {
            if !self.registry.has_encrypted_storage_plugin(storage_plugin) {
                return Err(Error::InvalidExtensionPlugin {
                    kind: "encrypted storage",
                    name: storage_plugin.to_string(),
                });
            }
        } else {
            if storage_plugin.is_empty() || !self.registry.has_storage_plugin(storage_plugin) {
                return Err(Error::InvalidExtensionPlugin {
                    kind: "storage",
                    name: storage_plugin.to_string(),
                });
            }
            if encryption_plugin.is_empty()
                || !self.registry.has_encryption_plugin(encryption_plugin)
            {
                return Err(Error::InvalidExtensionPlugin {
                    kind: "encryption",
                    name: encryption_plugin.to_string(),
                });
            }
        }
        Ok(())
    }

    fn require_owner_only(&self, mode: &AccessControlMode) -> Result<()> {
        if *mode != AccessControlMode::OwnerOnly {
            return Err(Error::OperationNotSupported(
                "access control requests are not currently supported".into(),
            ));
        }
        Ok(())
    }

    /// Checks that the named authentication plugin can serve this caller's
    /// interaction mode at all.
    fn require_interactive_capability(
        &self,
        authentication_plugin: &str,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<()> {
        let plugin = self
            .registry
            .authentication_plugin(authentication_plugin)
            .ok_or_else(|| Error::InvalidExtensionPlugin {
                kind: "authentication",
                name: authentication_plugin.to_string(),
            })?;
        if plugin.authentication_type() == AuthenticationType::ApplicationSpecific
            && (interaction_mode != UserInteractionMode::InProcess || ui_service_address.is_empty())
        {
            return Err(Error::OperationRequiresInProcessUserInteraction(
                authentication_plugin.to_string(),
            ));
        }
        Ok(())
    }

    /// As the capability check above, but for verbs that will definitely
    /// launch a flow: user interaction must not be prevented either.
    fn require_interactive_flow(
        &self,
        authentication_plugin: &str,
        interaction_mode: UserInteractionMode,
        ui_service_address: &str,
    ) -> Result<()> {
        self.require_interactive_capability(
            authentication_plugin,
            interaction_mode,
            ui_service_address,
        )?;
        if interaction_mode == UserInteractionMode::Prevent {
            return Err(Error::OperationRequiresUserInteraction(
                authentication_plugin.to_string(),
            ));
        }
        Ok(())
    }

    /// Launch the authentication flow and save the continuation. Interaction
    /// mode checks happen at the call sites, before this point.
    #[allow(clippy::too_many_arguments)]
    fn begin_authentication_flow(
        &mut self,
        caller_pid: u32,
        request_id: u64,
        authentication_plugin: &str,
        collection_name: &str,
        secret_name: &str,
        ui_service_address: &str,
        continuation: Continuation,
    ) -> Result<()> {
        let plugin = self
            .registry
            .authentication_plugin(authentication_plugin)
            .cloned()
            .ok_or_else(|| Error::InvalidExtensionPlugin {
                kind: "authentication",
                name: authentication_plugin.to_string(),
            })?;

        let context = AuthenticationContext {
            caller_pid,
            request_id,
            application_id: self.permissions.effective_application_id(caller_pid),
            collection_name: collection_name.to_string(),
            secret_name: secret_name.to_string(),
            ui_service_address: ui_service_address.to_string(),
        };
        plugin.begin_authentication(context, self.auth_sink.clone())?;

        self.pending.insert(
            request_id,
            PendingRequest {
                caller_pid,
                continuation,
            },
        );
        Ok(())
    }

    fn storage_plugin(&self, name: &str) -> Result<Arc<dyn coffer_core::StoragePlugin>> {
        self.registry
            .storage_plugin(name)
            .cloned()
            .ok_or_else(|| Error::InvalidExtensionPlugin {
                kind: "storage",
                name: name.to_string(),
            })
    }

    fn encryption_plugin(&self, name: &str) -> Result<Arc<dyn coffer_core::EncryptionPlugin>> {
        self.registry
            .encryption_plugin(name)
            .cloned()
            .ok_or_else(|| Error::InvalidExtensionPlugin {
                kind: "encryption",
                name: name.to_string(),
            })
    }

    fn encrypted_storage_plugin(&self, name: &str) -> Result<Arc<dyn EncryptedStoragePlugin>> {
        self.registry
            .encrypted_storage_plugin(name)
            .cloned()
            .ok_or_else(|| Error::InvalidExtensionPlugin {
                kind: "encrypted storage",
                name: name.to_string(),
            })
    }

    /// Drive an encrypted-storage collection to the unlocked state with the
    /// supplied key, clearing the key again on any failure.
    fn unlock_sealed_collection(
        &self,
        plugin: &Arc<dyn EncryptedStoragePlugin>,
        collection_name: &str,
        key: &SecretKey,
    ) -> Result<()> {
        let mut locked = plugin.is_locked(collection_name)?;
        if locked {
            if plugin.set_encryption_key(collection_name, key).is_err() {
                let _ = plugin.set_encryption_key(collection_name, &SecretKey::empty());
                return Err(Error::PluginDecryption(format!(
                    "unable to decrypt collection {collection_name} with the entered authentication key"
                )));
            }
            locked = match plugin.is_locked(collection_name) {
                Ok(locked) => locked,
                Err(_) => {
                    let _ = plugin.set_encryption_key(collection_name, &SecretKey::empty());
                    return Err(Error::PluginDecryption(format!(
                        "unable to check lock state of collection {collection_name} after setting the entered authentication key"
                    )));
                }
            };
        }
        if locked {
            // Still locked after applying the key: the key was wrong.
            let _ = plugin.set_encryption_key(collection_name, &SecretKey::empty());
            return Err(Error::IncorrectAuthenticationKey(format!(
                "the authentication key entered for collection {collection_name} was incorrect"
            )));
        }
        Ok(())
    }

    // ---- compensation ------------------------------------------------------

    /// Remove a catalogue collection row recorded ahead of a failed plugin
    /// create. A failed compensation leaves the row dirty for a later
    /// reconciliation pass; the database error takes precedence in the reply.
    fn compensate_collection_row(&self, collection_name: &str, plugin_err: &Error) -> Result<()> {
        self.catalogue
            .delete_collection(collection_name)
            .map_err(|db_err| {
                warn!(
                    collection_name,
                    %db_err,
                    %plugin_err,
                    "catalogue collection row left dirty after failed plugin operation"
                );
                db_err
            })
    }

    fn compensate_secret_row(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        plugin_err: &Error,
    ) -> Result<()> {
        self.catalogue
            .delete_secret(collection_name, hashed_secret_name)
            .map_err(|db_err| {
                warn!(
                    collection_name,
                    %db_err,
                    %plugin_err,
                    "catalogue secret row left dirty after failed plugin operation"
                );
                db_err
            })
    }
}

fn complete_unit(result: Result<()>) -> HandlerProgress {
    HandlerProgress::Complete(CompletedRequest::result_only(result.into()))
}

fn flow_unit(flow: Result<Flow<()>>) -> HandlerProgress {
    match flow {
        Ok(Flow::Suspended) => HandlerProgress::Pending,
        Ok(Flow::Completed(())) => complete_unit(Ok(())),
        Err(err) => complete_unit(Err(err)),
    }
}

fn flow_secret(flow: Result<Flow<Vec<u8>>>) -> HandlerProgress {
    match flow {
        Ok(Flow::Suspended) => HandlerProgress::Pending,
        Ok(Flow::Completed(value)) => HandlerProgress::Complete(CompletedRequest::new(
            WireResult::succeeded(),
            ResponseBody::Secret(value),
        )),
        Err(err) => {
            HandlerProgress::Complete(CompletedRequest::result_only(WireResult::failed(&err)))
        }
    }
}
