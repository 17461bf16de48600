use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::plugin::{EncryptionPlugin, Plugin, ReencryptTarget, StoragePlugin};
use crate::types::{SecretKey, RESERVED_COLLECTION_NAME};

/// Filesystem-backed storage plugin: one directory per collection, one file
/// per hashed secret name.
///
/// Hashed names are base64 and may contain `/`, so each one is normalised
/// before being used as a file name.
pub struct FileStoragePlugin {
    name: String,
    test: bool,
    root: PathBuf,
}

impl FileStoragePlugin {
    pub const NAME: &'static str = "storage.file";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: Self::NAME.to_string(),
            test: false,
            root: root.into(),
        }
    }

    pub fn test(root: impl Into<PathBuf>) -> Self {
        Self {
            name: Self::NAME.to_string(),
            test: true,
            root: root.into(),
        }
    }

    fn collection_dir(&self, collection_name: &str) -> PathBuf {
        self.root.join(normalise_segment(collection_name))
    }

    fn secret_path(&self, collection_name: &str, hashed_secret_name: &str) -> PathBuf {
        self.collection_dir(collection_name)
            .join(normalise_segment(hashed_secret_name))
    }

    fn write_value(&self, path: &Path, value: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path).map_err(|err| Error::Plugin(err.to_string()))?;
        file.write_all(value)
            .and_then(|_| file.sync_all())
            .map_err(|err| Error::Plugin(err.to_string()))
    }
}

impl Plugin for FileStoragePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_test(&self) -> bool {
        self.test
    }
}

impl StoragePlugin for FileStoragePlugin {
    fn create_collection(&self, collection_name: &str) -> Result<()> {
        let dir = self.collection_dir(collection_name);
        if dir.exists() {
            return Err(Error::CollectionAlreadyExists(collection_name.to_string()));
        }
        fs::create_dir_all(&dir).map_err(|err| Error::Plugin(err.to_string()))
    }

    fn remove_collection(&self, collection_name: &str) -> Result<()> {
        match fs::remove_dir_all(self.collection_dir(collection_name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Plugin(err.to_string())),
        }
    }

    fn set_secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
        value: &[u8],
    ) -> Result<()> {
        let dir = self.collection_dir(collection_name);
        if !dir.exists() {
            if collection_name != RESERVED_COLLECTION_NAME {
                return Err(Error::InvalidCollection(collection_name.to_string()));
            }
            fs::create_dir_all(&dir).map_err(|err| Error::Plugin(err.to_string()))?;
        }
        self.write_value(&self.secret_path(collection_name, hashed_secret_name), value)
    }

    fn secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<Vec<u8>> {
        match fs::read(self.secret_path(collection_name, hashed_secret_name)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::InvalidSecret("no such secret in storage".into()))
            }
            Err(err) => Err(Error::Plugin(err.to_string())),
        }
    }

    fn remove_secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<()> {
        match fs::remove_file(self.secret_path(collection_name, hashed_secret_name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Plugin(err.to_string())),
        }
    }

    fn reencrypt_secrets(
        &self,
        target: ReencryptTarget<'_>,
        old_key: &SecretKey,
        new_key: &SecretKey,
        encryption: &dyn EncryptionPlugin,
    ) -> Result<()> {
        match target {
            ReencryptTarget::Collection(collection_name) => {
                let dir = self.collection_dir(collection_name);
                if !dir.exists() {
                    return Err(Error::InvalidCollection(collection_name.to_string()));
                }
                for entry in fs::read_dir(&dir).map_err(|err| Error::Plugin(err.to_string()))? {
                    let entry = entry.map_err(|err| Error::Plugin(err.to_string()))?;
                    let value =
                        fs::read(entry.path()).map_err(|err| Error::Plugin(err.to_string()))?;
                    let plaintext = encryption.decrypt_secret(&value, old_key)?;
                    let reencrypted = encryption.encrypt_secret(&plaintext, new_key)?;
                    self.write_value(&entry.path(), &reencrypted)?;
                }
                Ok(())
            }
            ReencryptTarget::StandaloneSecrets(hashed_names) => {
                for hashed in hashed_names {
                    let path = self.secret_path(RESERVED_COLLECTION_NAME, hashed);
                    let value = match fs::read(&path) {
                        Ok(bytes) => bytes,
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(err) => return Err(Error::Plugin(err.to_string())),
                    };
                    let plaintext = encryption.decrypt_secret(&value, old_key)?;
                    let reencrypted = encryption.encrypt_secret(&plaintext, new_key)?;
                    self.write_value(&path, &reencrypted)?;
                }
                Ok(())
            }
        }
    }
}

fn normalise_segment(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_get_remove_round_trip() {
        let dir = tempdir().unwrap();
        let plugin = FileStoragePlugin::test(dir.path());

        plugin.create_collection("kv").unwrap();
        plugin.set_secret("kv", "aGFzaA==", b"payload").unwrap();
        assert_eq!(plugin.secret("kv", "aGFzaA==").unwrap(), b"payload");

        plugin.remove_secret("kv", "aGFzaA==").unwrap();
        assert!(matches!(
            plugin.secret("kv", "aGFzaA=="),
            Err(Error::InvalidSecret(_))
        ));
    }

    #[test]
    fn missing_collection_rejects_writes() {
        let dir = tempdir().unwrap();
        let plugin = FileStoragePlugin::test(dir.path());
        assert!(matches!(
            plugin.set_secret("nope", "h", b"v"),
            Err(Error::InvalidCollection(_))
        ));
    }

    #[test]
    fn remove_collection_is_idempotent() {
        let dir = tempdir().unwrap();
        let plugin = FileStoragePlugin::test(dir.path());
        plugin.create_collection("kv").unwrap();
        plugin.remove_collection("kv").unwrap();
        plugin.remove_collection("kv").unwrap();
    }
}
