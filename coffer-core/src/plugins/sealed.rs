use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::plugin::{EncryptedStoragePlugin, Plugin};
use crate::plugins::cipher::{decrypt_value, encrypt_value};
use crate::types::{SecretKey, RESERVED_COLLECTION_NAME};

// Known plaintext sealed under the collection key at creation time; applying
// a candidate key later is verified against it.
const SENTINEL: &[u8] = b"coffer.sealed.sentinel.v1";

struct SealedCollection {
    key: Option<SecretKey>,
    sentinel: Option<Vec<u8>>,
    secrets: HashMap<String, Vec<u8>>,
}

impl SealedCollection {
    fn unlocked_key(&self) -> Option<&SecretKey> {
        self.key.as_ref()
    }
}

/// In-memory encrypted-storage plugin.
///
/// Holds its own per-collection keys: a collection is unlocked while a
/// verified key is held, and every value is stored sealed under that key.
/// Standalone secrets are sealed individually under per-secret keys inside
/// the implicit reserved collection, which carries no sentinel.
pub struct SealedMemoryStoragePlugin {
    name: String,
    collections: Mutex<HashMap<String, SealedCollection>>,
}

impl SealedMemoryStoragePlugin {
    pub const NAME: &'static str = "storage.sealed";

    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SealedCollection>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_standalone(collections: &mut HashMap<String, SealedCollection>) {
        collections
            .entry(RESERVED_COLLECTION_NAME.to_string())
            .or_insert_with(|| SealedCollection {
                key: None,
                sentinel: None,
                secrets: HashMap::new(),
            });
    }
}

impl Default for SealedMemoryStoragePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SealedMemoryStoragePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_test(&self) -> bool {
        true
    }
}

impl EncryptedStoragePlugin for SealedMemoryStoragePlugin {
    fn create_collection(&self, collection_name: &str, key: &SecretKey) -> Result<()> {
        let mut collections = self.lock();
        if collections.contains_key(collection_name) {
            return Err(Error::CollectionAlreadyExists(collection_name.to_string()));
        }
        collections.insert(
            collection_name.to_string(),
            SealedCollection {
                key: Some(key.clone()),
                sentinel: Some(encrypt_value(SENTINEL, key)),
                secrets: HashMap::new(),
            },
        );
        Ok(())
    }

    fn remove_collection(&self, collection_name: &str) -> Result<()> {
        self.lock().remove(collection_name);
        Ok(())
    }

    fn is_locked(&self, collection_name: &str) -> Result<bool> {
        let mut collections = self.lock();
        if collection_name == RESERVED_COLLECTION_NAME {
            Self::ensure_standalone(&mut collections);
        }
        let collection = collections
            .get(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;
        Ok(collection.key.is_none())
    }

    fn set_encryption_key(&self, collection_name: &str, key: &SecretKey) -> Result<()> {
        let mut collections = self.lock();
        if collection_name == RESERVED_COLLECTION_NAME {
            Self::ensure_standalone(&mut collections);
        }
        let collection = collections
            .get_mut(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;

        if key.is_empty() {
            collection.key = None;
            return Ok(());
        }

        let verified = match &collection.sentinel {
            Some(sentinel) => decrypt_value(sentinel, key)
                .map(|plain| plain == SENTINEL)
                .unwrap_or(false),
            // The reserved collection has no key of its own.
            None => true,
        };
        collection.key = verified.then(|| key.clone());
        Ok(())
    }

    fn set_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        value: &[u8],
    ) -> Result<()> {
        let mut collections = self.lock();
        let collection = collections
            .get_mut(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;
        let key = collection
            .unlocked_key()
            .ok_or_else(|| Error::CollectionIsLocked(format!("collection {collection_name}")))?;
        let sealed = encrypt_value(value, key);
        collection
            .secrets
            .insert(hashed_secret_name.to_string(), sealed);
        Ok(())
    }

    fn secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<Vec<u8>> {
        let collections = self.lock();
        let collection = collections
            .get(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;
        let key = collection
            .unlocked_key()
            .ok_or_else(|| Error::CollectionIsLocked(format!("collection {collection_name}")))?;
        let sealed = collection
            .secrets
            .get(hashed_secret_name)
            .ok_or_else(|| Error::InvalidSecret("no such secret in storage".into()))?;
        decrypt_value(sealed, key)
    }

    fn remove_secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<()> {
        let mut collections = self.lock();
        // Removal needs no decryption, so it works on a locked collection.
        if let Some(collection) = collections.get_mut(collection_name) {
            collection.secrets.remove(hashed_secret_name);
        }
        Ok(())
    }

    fn set_standalone_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        value: &[u8],
        key: &SecretKey,
    ) -> Result<()> {
        let mut collections = self.lock();
        Self::ensure_standalone(&mut collections);
        let collection = collections
            .get_mut(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;
        collection
            .secrets
            .insert(hashed_secret_name.to_string(), encrypt_value(value, key));
        Ok(())
    }

    fn access_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        key: &SecretKey,
    ) -> Result<Vec<u8>> {
        let collections = self.lock();
        let collection = collections
            .get(collection_name)
            .ok_or_else(|| Error::InvalidCollection(collection_name.to_string()))?;
        let sealed = collection
            .secrets
            .get(hashed_secret_name)
            .ok_or_else(|| Error::InvalidSecret("no such secret in storage".into()))?;
        decrypt_value(sealed, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> SecretKey {
        SecretKey::from(bytes)
    }

    #[test]
    fn created_collections_start_unlocked() {
        let plugin = SealedMemoryStoragePlugin::new();
        plugin.create_collection("kv", &key(b"k1")).unwrap();
        assert!(!plugin.is_locked("kv").unwrap());

        plugin.set_secret("kv", "h", b"value").unwrap();
        assert_eq!(plugin.secret("kv", "h").unwrap(), b"value");
    }

    #[test]
    fn wrong_key_leaves_collection_locked() {
        let plugin = SealedMemoryStoragePlugin::new();
        plugin.create_collection("kv", &key(b"k1")).unwrap();

        plugin.set_encryption_key("kv", &SecretKey::empty()).unwrap();
        assert!(plugin.is_locked("kv").unwrap());
        assert!(matches!(
            plugin.secret("kv", "h"),
            Err(Error::CollectionIsLocked(_))
        ));

        plugin.set_encryption_key("kv", &key(b"wrong")).unwrap();
        assert!(plugin.is_locked("kv").unwrap());

        plugin.set_encryption_key("kv", &key(b"k1")).unwrap();
        assert!(!plugin.is_locked("kv").unwrap());
    }

    #[test]
    fn standalone_secrets_are_individually_sealed() {
        let plugin = SealedMemoryStoragePlugin::new();
        plugin
            .set_standalone_secret(RESERVED_COLLECTION_NAME, "h1", b"one", &key(b"a"))
            .unwrap();
        plugin
            .set_standalone_secret(RESERVED_COLLECTION_NAME, "h2", b"two", &key(b"b"))
            .unwrap();

        assert_eq!(
            plugin
                .access_secret(RESERVED_COLLECTION_NAME, "h1", &key(b"a"))
                .unwrap(),
            b"one"
        );
        match plugin.access_secret(RESERVED_COLLECTION_NAME, "h2", &key(b"a")) {
            Ok(decrypted) => assert_ne!(decrypted, b"two"),
            Err(err) => assert!(matches!(err, Error::PluginDecryption(_))),
        }
    }

    #[test]
    fn removal_works_while_locked() {
        let plugin = SealedMemoryStoragePlugin::new();
        plugin.create_collection("kv", &key(b"k1")).unwrap();
        plugin.set_secret("kv", "h", b"value").unwrap();
        plugin.set_encryption_key("kv", &SecretKey::empty()).unwrap();

        plugin.remove_secret("kv", "h").unwrap();
        plugin.set_encryption_key("kv", &key(b"k1")).unwrap();
        assert!(matches!(
            plugin.secret("kv", "h"),
            Err(Error::InvalidSecret(_))
        ));
    }
}
