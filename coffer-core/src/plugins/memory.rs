use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::plugin::{EncryptionPlugin, Plugin, ReencryptTarget, StoragePlugin};
use crate::types::{SecretKey, RESERVED_COLLECTION_NAME};

/// In-memory storage plugin used by the autotest mode and unit tests.
pub struct MemoryStoragePlugin {
    name: String,
    collections: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStoragePlugin {
    pub const NAME: &'static str = "storage.memory";

    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Vec<u8>>>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStoragePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for MemoryStoragePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_test(&self) -> bool {
        true
    }
}

impl StoragePlugin for MemoryStoragePlugin {
    fn create_collection(&self, collection_name: &str) -> Result<()> {
        let mut collections = self.lock();
        if collections.contains_key(collection_name) {
            return Err(Error::CollectionAlreadyExists(collection_name.to_string()));
        }
        collections.insert(collection_name.to_string(), HashMap::new());
        Ok(())
    }

    fn remove_collection(&self, collection_name: &str) -> Result<()> {
        self.lock().remove(collection_name);
        Ok(())
    }

    fn set_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        value: &[u8],
    ) -> Result<()> {
        let mut collections = self.lock();
        // The standalone namespace exists implicitly.
        let entries = if collection_name == RESERVED_COLLECTION_NAME {
            collections.entry(collection_name.to_string()).or_default()
        } else {
            collections
                .get_mut(collection_name)
                .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?
        };
        entries.insert(hashed_secret_name.to_string(), value.to_vec());
        Ok(())
    }

    fn secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<Vec<u8>> {
        self.lock()
            .get(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?
            .get(hashed_secret_name)
            .cloned()
            .ok_or_else(|| Error::InvalidSecret("no such secret in storage".into()))
    }

    fn remove_secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<()> {
        if let Some(entries) = self.lock().get_mut(collection_name) {
            entries.remove(hashed_secret_name);
        }
        Ok(())
    }

    fn reencrypt_secrets(
        &self,
        target: ReencryptTarget<'_>,
        old_key: &SecretKey,
        new_key: &SecretKey,
        encryption: &dyn EncryptionPlugin,
    ) -> Result<()> {
        let mut collections = self.lock();
        match target {
            ReencryptTarget::Collection(collection_name) => {
                let entries = collections
                    .get_mut(collection_name)
                    .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;
                for value in entries.values_mut() {
                    let plaintext = encryption.decrypt_secret(value, old_key)?;
                    *value = encryption.encrypt_secret(&plaintext, new_key)?;
                }
            }
            ReencryptTarget::StandaloneSecrets(hashed_names) => {
                if let Some(entries) = collections.get_mut(RESERVED_COLLECTION_NAME) {
                    for hashed in hashed_names {
                        if let Some(value) = entries.get_mut(hashed) {
                            let plaintext = encryption.decrypt_secret(value, old_key)?;
                            *value = encryption.encrypt_secret(&plaintext, new_key)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::cipher::AesCbcEncryptionPlugin;

    #[test]
    fn collection_lifecycle() {
        let plugin = MemoryStoragePlugin::new();
        plugin.create_collection("kv").unwrap();
        assert!(matches!(
            plugin.create_collection("kv"),
            Err(Error::CollectionAlreadyExists(_))
        ));

        plugin.set_secret("kv", "abc", b"value").unwrap();
        assert_eq!(plugin.secret("kv", "abc").unwrap(), b"value");

        plugin.remove_secret("kv", "abc").unwrap();
        assert!(matches!(
            plugin.secret("kv", "abc"),
            Err(Error::InvalidSecret(_))
        ));

        plugin.remove_collection("kv").unwrap();
        assert!(matches!(
            plugin.secret("kv", "abc"),
            Err(Error::InvalidCollection(_))
        ));
    }

    #[test]
    fn standalone_namespace_is_implicit() {
        let plugin = MemoryStoragePlugin::new();
        plugin
            .set_secret(RESERVED_COLLECTION_NAME, "hash", b"v")
            .unwrap();
        assert_eq!(plugin.secret(RESERVED_COLLECTION_NAME, "hash").unwrap(), b"v");
    }

    #[test]
    fn reencrypt_collection_under_new_key() {
        let plugin = MemoryStoragePlugin::new();
        let cipher = AesCbcEncryptionPlugin::test();
        let old_key = SecretKey::from(b"old".as_slice());
        let new_key = SecretKey::from(b"new".as_slice());

        plugin.create_collection("kv").unwrap();
        let stored = cipher.encrypt_secret(b"payload", &old_key).unwrap();
        plugin.set_secret("kv", "h", &stored).unwrap();

        plugin
            .reencrypt_secrets(ReencryptTarget::Collection("kv"), &old_key, &new_key, &cipher)
            .unwrap();

        let fetched = plugin.secret("kv", "h").unwrap();
        assert_eq!(cipher.decrypt_secret(&fetched, &new_key).unwrap(), b"payload");
    }
}
