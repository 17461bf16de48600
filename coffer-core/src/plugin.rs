use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{PluginInfo, PluginInfoReport, SecretKey};

/// Base contract every extension plugin fulfils.
pub trait Plugin: Send + Sync {
    /// Stable plugin name used by clients and the catalogue.
    fn name(&self) -> &str;

    /// Test plugins only load when the daemon runs in autotest mode, and
    /// production plugins only load when it does not.
    fn is_test(&self) -> bool {
        false
    }
}

/// Which secrets a re-encryption pass covers.
pub enum ReencryptTarget<'a> {
    Collection(&'a str),
    StandaloneSecrets(&'a [String]),
}

/// Plain storage backend. Values arrive already encrypted.
pub trait StoragePlugin: Plugin {
    fn create_collection(&self, collection_name: &str) -> Result<()>;
    fn remove_collection(&self, collection_name: &str) -> Result<()>;
    fn set_secret(&self, collection_name: &str, hashed_secret_name: &str, value: &[u8])
        -> Result<()>;
    fn secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<Vec<u8>>;
    fn remove_secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<()>;

    /// Re-encrypt stored values under a new key, e.g. on key rotation.
    fn reencrypt_secrets(
        &self,
        target: ReencryptTarget<'_>,
        old_key: &SecretKey,
        new_key: &SecretKey,
        encryption: &dyn EncryptionPlugin,
    ) -> Result<()>;
}

/// Pure cipher backend used alongside a [`StoragePlugin`].
pub trait EncryptionPlugin: Plugin {
    fn encrypt_secret(&self, plaintext: &[u8], key: &SecretKey) -> Result<Vec<u8>>;
    fn decrypt_secret(&self, ciphertext: &[u8], key: &SecretKey) -> Result<Vec<u8>>;
}

/// Backend that stores and encrypts internally, holding its own per-collection
/// keys. Deliberately a separate trait from [`StoragePlugin`]: the method sets
/// differ and the daemon treats the two kinds through different code paths.
pub trait EncryptedStoragePlugin: Plugin {
    fn create_collection(&self, collection_name: &str, key: &SecretKey) -> Result<()>;
    fn remove_collection(&self, collection_name: &str) -> Result<()>;

    /// Whether the collection currently lacks a usable encryption key.
    fn is_locked(&self, collection_name: &str) -> Result<bool>;

    /// Apply (or, with an empty key, discard) the collection's encryption
    /// key. Applying a wrong key leaves the collection locked.
    fn set_encryption_key(&self, collection_name: &str, key: &SecretKey) -> Result<()>;

    fn set_secret(&self, collection_name: &str, hashed_secret_name: &str, value: &[u8])
        -> Result<()>;
    fn secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<Vec<u8>>;
    fn remove_secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<()>;

    /// Store a standalone secret under its own key, without touching the
    /// collection lock state.
    fn set_standalone_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        value: &[u8],
        key: &SecretKey,
    ) -> Result<()>;

    /// One-shot read of a standalone secret with the supplied key.
    fn access_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        key: &SecretKey,
    ) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    /// The plugin drives an in-process UI owned by the calling application.
    ApplicationSpecific,
    /// The system provides the authentication UI.
    SystemMediated,
}

/// Everything an authentication plugin needs to identify a flow.
#[derive(Debug, Clone)]
pub struct AuthenticationContext {
    pub caller_pid: u32,
    pub request_id: u64,
    pub application_id: String,
    pub collection_name: String,
    pub secret_name: String,
    pub ui_service_address: String,
}

/// Completion of an authentication flow, delivered asynchronously.
#[derive(Debug)]
pub struct AuthenticationOutcome {
    pub request_id: u64,
    pub outcome: Result<SecretKey>,
}

/// Channel on which authentication plugins deliver their outcomes back to
/// the daemon's dispatcher.
#[derive(Clone)]
pub struct AuthenticationSink {
    tx: mpsc::UnboundedSender<AuthenticationOutcome>,
}

impl AuthenticationSink {
    pub fn new(tx: mpsc::UnboundedSender<AuthenticationOutcome>) -> Self {
        Self { tx }
    }

    pub fn complete(&self, request_id: u64, outcome: Result<SecretKey>) {
        if self
            .tx
            .send(AuthenticationOutcome { request_id, outcome })
            .is_err()
        {
            warn!(request_id, "authentication outcome dropped: daemon gone");
        }
    }
}

/// Interactive key source.
pub trait AuthenticationPlugin: Plugin {
    fn authentication_type(&self) -> AuthenticationType;

    /// Begin an authentication flow. `Ok(())` means the flow is underway and
    /// the outcome will arrive on `sink`; `Err` means it could not start.
    fn begin_authentication(
        &self,
        context: AuthenticationContext,
        sink: AuthenticationSink,
    ) -> Result<()>;
}

/// A discovered plugin, tagged by capability.
#[derive(Clone)]
pub enum PluginHandle {
    Storage(Arc<dyn StoragePlugin>),
    Encryption(Arc<dyn EncryptionPlugin>),
    EncryptedStorage(Arc<dyn EncryptedStoragePlugin>),
    Authentication(Arc<dyn AuthenticationPlugin>),
}

impl PluginHandle {
    fn name(&self) -> &str {
        match self {
            Self::Storage(p) => p.name(),
            Self::Encryption(p) => p.name(),
            Self::EncryptedStorage(p) => p.name(),
            Self::Authentication(p) => p.name(),
        }
    }

    fn is_test(&self) -> bool {
        match self {
            Self::Storage(p) => p.is_test(),
            Self::Encryption(p) => p.is_test(),
            Self::EncryptedStorage(p) => p.is_test(),
            Self::Authentication(p) => p.is_test(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Encryption(_) => "encryption",
            Self::EncryptedStorage(_) => "encrypted storage",
            Self::Authentication(_) => "authentication",
        }
    }
}

/// Loaded plugins, one table per capability.
#[derive(Default)]
pub struct PluginRegistry {
    storage: BTreeMap<String, Arc<dyn StoragePlugin>>,
    encryption: BTreeMap<String, Arc<dyn EncryptionPlugin>>,
    encrypted_storage: BTreeMap<String, Arc<dyn EncryptedStoragePlugin>>,
    authentication: BTreeMap<String, Arc<dyn AuthenticationPlugin>>,
}

impl PluginRegistry {
    /// Categorise discovered plugins, skipping those with an empty name, a
    /// name already claimed within the same capability, or an `is_test` flag
    /// that does not match the daemon's mode.
    pub fn load(plugins: impl IntoIterator<Item = PluginHandle>, autotest_mode: bool) -> Self {
        let mut registry = Self::default();
        for plugin in plugins {
            let name = plugin.name().to_string();
            let kind = plugin.kind();
            if plugin.is_test() != autotest_mode {
                debug!(%name, kind, "ignoring plugin due to mode");
                continue;
            }
            if name.is_empty() || registry.contains(&plugin, &name) {
                debug!(%name, kind, "ignoring plugin with empty or duplicate name");
                continue;
            }
            debug!(%name, kind, "loaded plugin");
            match plugin {
                PluginHandle::Storage(p) => {
                    registry.storage.insert(name, p);
                }
                PluginHandle::Encryption(p) => {
                    registry.encryption.insert(name, p);
                }
                PluginHandle::EncryptedStorage(p) => {
                    registry.encrypted_storage.insert(name, p);
                }
                PluginHandle::Authentication(p) => {
                    registry.authentication.insert(name, p);
                }
            }
        }
        registry
    }

    fn contains(&self, plugin: &PluginHandle, name: &str) -> bool {
        match plugin {
            PluginHandle::Storage(_) => self.storage.contains_key(name),
            PluginHandle::Encryption(_) => self.encryption.contains_key(name),
            PluginHandle::EncryptedStorage(_) => self.encrypted_storage.contains_key(name),
            PluginHandle::Authentication(_) => self.authentication.contains_key(name),
        }
    }

    pub fn storage_plugin(&self, name: &str) -> Option<&Arc<dyn StoragePlugin>> {
        self.storage.get(name)
    }

    pub fn encryption_plugin(&self, name: &str) -> Option<&Arc<dyn EncryptionPlugin>> {
        self.encryption.get(name)
    }

    pub fn encrypted_storage_plugin(&self, name: &str) -> Option<&Arc<dyn EncryptedStoragePlugin>> {
        self.encrypted_storage.get(name)
    }

    pub fn authentication_plugin(&self, name: &str) -> Option<&Arc<dyn AuthenticationPlugin>> {
        self.authentication.get(name)
    }

    pub fn has_storage_plugin(&self, name: &str) -> bool {
        self.storage.contains_key(name)
    }

    pub fn has_encryption_plugin(&self, name: &str) -> bool {
        self.encryption.contains_key(name)
    }

    pub fn has_encrypted_storage_plugin(&self, name: &str) -> bool {
        self.encrypted_storage.contains_key(name)
    }

    pub fn has_authentication_plugin(&self, name: &str) -> bool {
        self.authentication.contains_key(name)
    }

    pub fn storage_plugin_names(&self) -> Vec<String> {
        self.storage.keys().cloned().collect()
    }

    /// Snapshot of all loaded plugins for `GetPluginInfo`.
    pub fn info_report(&self) -> PluginInfoReport {
        fn infos<P: Plugin + ?Sized>(map: &BTreeMap<String, Arc<P>>) -> Vec<PluginInfo> {
            map.values()
                .map(|p| PluginInfo {
                    name: p.name().to_string(),
                    is_test: p.is_test(),
                })
                .collect()
        }

        PluginInfoReport {
            storage_plugins: infos(&self.storage),
            encryption_plugins: infos(&self.encryption),
            encrypted_storage_plugins: infos(&self.encrypted_storage),
            authentication_plugins: infos(&self.authentication),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct DummyEncryption {
        name: &'static str,
        test: bool,
    }

    impl Plugin for DummyEncryption {
        fn name(&self) -> &str {
            self.name
        }

        fn is_test(&self) -> bool {
            self.test
        }
    }

    impl EncryptionPlugin for DummyEncryption {
        fn encrypt_secret(&self, plaintext: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
            Ok(plaintext.to_vec())
        }

        fn decrypt_secret(&self, ciphertext: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
            Ok(ciphertext.to_vec())
        }
    }

    struct DummyStorage {
        name: &'static str,
    }

    impl Plugin for DummyStorage {
        fn name(&self) -> &str {
            self.name
        }

        fn is_test(&self) -> bool {
            true
        }
    }

    impl StoragePlugin for DummyStorage {
        fn create_collection(&self, _collection_name: &str) -> Result<()> {
            Ok(())
        }

        fn remove_collection(&self, _collection_name: &str) -> Result<()> {
            Ok(())
        }

        fn set_secret(&self, _c: &str, _h: &str, _value: &[u8]) -> Result<()> {
            Ok(())
        }

        fn secret(&self, _c: &str, hashed: &str) -> Result<Vec<u8>> {
            Err(Error::InvalidSecret(hashed.to_string()))
        }

        fn remove_secret(&self, _c: &str, _h: &str) -> Result<()> {
            Ok(())
        }

        fn reencrypt_secrets(
            &self,
            _target: ReencryptTarget<'_>,
            _old_key: &SecretKey,
            _new_key: &SecretKey,
            _encryption: &dyn EncryptionPlugin,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn enc(name: &'static str, test: bool) -> PluginHandle {
        PluginHandle::Encryption(Arc::new(DummyEncryption { name, test }))
    }

    #[test]
    fn load_skips_mode_mismatch() {
        let registry = PluginRegistry::load([enc("prod", false), enc("test", true)], true);
        assert!(registry.has_encryption_plugin("test"));
        assert!(!registry.has_encryption_plugin("prod"));
    }

    #[test]
    fn load_skips_empty_and_duplicate_names() {
        let registry =
            PluginRegistry::load([enc("", true), enc("dup", true), enc("dup", true)], true);
        let report = registry.info_report();
        assert_eq!(report.encryption_plugins.len(), 1);
        assert_eq!(report.encryption_plugins[0].name, "dup");
    }

    #[test]
    fn same_name_allowed_across_capabilities() {
        let registry = PluginRegistry::load(
            [
                enc("shared", true),
                PluginHandle::Storage(Arc::new(DummyStorage { name: "shared" })),
            ],
            true,
        );
        assert!(registry.has_encryption_plugin("shared"));
        assert!(registry.has_storage_plugin("shared"));
    }

    #[test]
    fn info_report_is_name_ordered() {
        let registry = PluginRegistry::load([enc("zeta", true), enc("alpha", true)], true);
        let names: Vec<_> = registry
            .info_report()
            .encryption_plugins
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
