//! The master catalogue: authoritative metadata for collections, secrets and
//! key entries. Plugin storage can only ever lag behind this database, never
//! run ahead of it.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use coffer_core::{
    AccessControlMode, Error, KeyIdentifier, Result, UnlockSemantic, RESERVED_COLLECTION_NAME,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    collection_name        TEXT PRIMARY KEY COLLATE NOCASE,
    application_id         TEXT NOT NULL,
    uses_device_lock_key   INTEGER NOT NULL,
    storage_plugin         TEXT NOT NULL,
    encryption_plugin      TEXT NOT NULL,
    authentication_plugin  TEXT NOT NULL,
    unlock_semantic        INTEGER NOT NULL,
    custom_lock_timeout_ms INTEGER NOT NULL,
    access_control_mode    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS secrets (
    collection_name        TEXT NOT NULL COLLATE NOCASE,
    hashed_secret_name     TEXT NOT NULL,
    application_id         TEXT NOT NULL,
    uses_device_lock_key   INTEGER NOT NULL,
    storage_plugin         TEXT NOT NULL,
    encryption_plugin      TEXT NOT NULL,
    authentication_plugin  TEXT NOT NULL,
    unlock_semantic        INTEGER NOT NULL,
    custom_lock_timeout_ms INTEGER NOT NULL,
    access_control_mode    INTEGER NOT NULL,
    PRIMARY KEY (collection_name, hashed_secret_name),
    FOREIGN KEY (collection_name) REFERENCES collections (collection_name)
);

CREATE TABLE IF NOT EXISTS key_entries (
    collection_name TEXT NOT NULL,
    key_name        TEXT NOT NULL,
    crypto_plugin   TEXT NOT NULL,
    storage_plugin  TEXT NOT NULL,
    PRIMARY KEY (collection_name, key_name)
);
"#;

/// One row of the `collections` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRow {
    pub collection_name: String,
    pub application_id: String,
    pub uses_device_lock_key: bool,
    pub storage_plugin: String,
    pub encryption_plugin: String,
    pub authentication_plugin: String,
    pub unlock_semantic: UnlockSemantic,
    pub custom_lock_timeout_ms: u64,
    pub access_control_mode: AccessControlMode,
}

/// One row of the `secrets` table. Secret names are stored hashed; the
/// plaintext name never reaches disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRow {
    pub collection_name: String,
    pub hashed_secret_name: String,
    pub application_id: String,
    pub uses_device_lock_key: bool,
    pub storage_plugin: String,
    pub encryption_plugin: String,
    pub authentication_plugin: String,
    pub unlock_semantic: UnlockSemantic,
    pub custom_lock_timeout_ms: u64,
    pub access_control_mode: AccessControlMode,
}

struct Store {
    conn: Connection,
    depth: u32,
}

/// Scope guard for one catalogue transaction.
///
/// Opened at depth 0 only; drop without commit rolls the transaction back,
/// and the depth must be balanced when the owning call returns.
struct TransactionScope<'a> {
    store: &'a mut Store,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    fn begin(store: &'a mut Store) -> Result<Self> {
        debug_assert_eq!(store.depth, 0, "transaction scope opened while one is active");
        store
            .conn
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(|err| Error::DatabaseTransaction(err.to_string()))?;
        store.depth += 1;
        Ok(Self {
            store,
            finished: false,
        })
    }

    fn conn(&self) -> &Connection {
        &self.store.conn
    }

    fn commit(mut self) -> Result<()> {
        self.store
            .conn
            .execute_batch("COMMIT;")
            .map_err(|err| Error::DatabaseTransaction(err.to_string()))?;
        self.store.depth -= 1;
        self.finished = true;
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.store.conn.execute_batch("ROLLBACK;");
            self.store.depth -= 1;
        }
        debug_assert_eq!(self.store.depth, 0, "unbalanced transaction depth");
    }
}

/// Handle to the catalogue database.
///
/// The access mutex is held for the duration of each query or transaction;
/// plugin callbacks may reach the catalogue from outside the dispatcher task.
pub struct Catalogue {
    store: Mutex<Store>,
}

impl Catalogue {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(query_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(query_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(query_err)?;
        conn.execute_batch(SCHEMA).map_err(query_err)?;

        let catalogue = Self {
            store: Mutex::new(Store { conn, depth: 0 }),
        };
        catalogue.seed_reserved_collection()?;
        Ok(catalogue)
    }

    /// Insert the notional standalone collection so per-secret rows always
    /// have a parent satisfying the foreign key.
    fn seed_reserved_collection(&self) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO collections (
                    collection_name, application_id, uses_device_lock_key,
                    storage_plugin, encryption_plugin, authentication_plugin,
                    unlock_semantic, custom_lock_timeout_ms, access_control_mode
                 ) VALUES (?1, ?1, 0, ?1, ?1, ?1, 0, 0, 0)",
                params![RESERVED_COLLECTION_NAME],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut store = self.lock();
        let scope = TransactionScope::begin(&mut store)?;
        let value = f(scope.conn())?;
        scope.commit()?;
        Ok(value)
    }

    pub fn collection(&self, collection_name: &str) -> Result<Option<CollectionRow>> {
        let store = self.lock();
        store
            .conn
            .query_row(
                "SELECT collection_name, application_id, uses_device_lock_key,
                        storage_plugin, encryption_plugin, authentication_plugin,
                        unlock_semantic, custom_lock_timeout_ms, access_control_mode
                 FROM collections WHERE collection_name = ?1",
                params![collection_name],
                collection_from_row,
            )
            .optional()
            .map_err(query_err)?
            .transpose()
    }

    pub fn collection_exists(&self, collection_name: &str) -> Result<bool> {
        let store = self.lock();
        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM collections WHERE collection_name = ?1",
                params![collection_name],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count > 0)
    }

    /// Record a new collection. The existence check and the insert share one
    /// transaction so a racing insert cannot slip between them.
    pub fn insert_collection(&self, row: &CollectionRow) -> Result<()> {
        self.transaction(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM collections WHERE collection_name = ?1",
                    params![row.collection_name],
                    |r| r.get(0),
                )
                .map_err(query_err)?;
            if count > 0 {
                return Err(Error::CollectionAlreadyExists(row.collection_name.clone()));
            }
            conn.execute(
                "INSERT INTO collections (
                    collection_name, application_id, uses_device_lock_key,
                    storage_plugin, encryption_plugin, authentication_plugin,
                    unlock_semantic, custom_lock_timeout_ms, access_control_mode
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.collection_name,
                    row.application_id,
                    row.uses_device_lock_key,
                    row.storage_plugin,
                    row.encryption_plugin,
                    row.authentication_plugin,
                    row.unlock_semantic.as_code(),
                    row.custom_lock_timeout_ms as i64,
                    row.access_control_mode.as_code(),
                ],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    pub fn delete_collection(&self, collection_name: &str) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "DELETE FROM secrets WHERE collection_name = ?1",
                params![collection_name],
            )
            .map_err(query_err)?;
            conn.execute(
                "DELETE FROM collections WHERE collection_name = ?1",
                params![collection_name],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    pub fn secret(
        &self,
        collection_name: &str,
        hashed_secret_name: &str,
    ) -> Result<Option<SecretRow>> {
        let store = self.lock();
        store
            .conn
            .query_row(
                "SELECT collection_name, hashed_secret_name, application_id,
                        uses_device_lock_key, storage_plugin, encryption_plugin,
                        authentication_plugin, unlock_semantic,
                        custom_lock_timeout_ms, access_control_mode
                 FROM secrets WHERE collection_name = ?1 AND hashed_secret_name = ?2",
                params![collection_name, hashed_secret_name],
                secret_from_row,
            )
            .optional()
            .map_err(query_err)?
            .transpose()
    }

    pub fn secret_exists(&self, collection_name: &str, hashed_secret_name: &str) -> Result<bool> {
        let store = self.lock();
        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM secrets
                 WHERE collection_name = ?1 AND hashed_secret_name = ?2",
                params![collection_name, hashed_secret_name],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count > 0)
    }

    pub fn insert_secret(&self, row: &SecretRow) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO secrets (
                    collection_name, hashed_secret_name, application_id,
                    uses_device_lock_key, storage_plugin, encryption_plugin,
                    authentication_plugin, unlock_semantic,
                    custom_lock_timeout_ms, access_control_mode
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.collection_name,
                    row.hashed_secret_name,
                    row.application_id,
                    row.uses_device_lock_key,
                    row.storage_plugin,
                    row.encryption_plugin,
                    row.authentication_plugin,
                    row.unlock_semantic.as_code(),
                    row.custom_lock_timeout_ms as i64,
                    row.access_control_mode.as_code(),
                ],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    pub fn update_secret(&self, row: &SecretRow) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "UPDATE secrets SET
                    application_id = ?3,
                    uses_device_lock_key = ?4,
                    storage_plugin = ?5,
                    encryption_plugin = ?6,
                    authentication_plugin = ?7,
                    unlock_semantic = ?8,
                    custom_lock_timeout_ms = ?9,
                    access_control_mode = ?10
                 WHERE collection_name = ?1 AND hashed_secret_name = ?2",
                params![
                    row.collection_name,
                    row.hashed_secret_name,
                    row.application_id,
                    row.uses_device_lock_key,
                    row.storage_plugin,
                    row.encryption_plugin,
                    row.authentication_plugin,
                    row.unlock_semantic.as_code(),
                    row.custom_lock_timeout_ms as i64,
                    row.access_control_mode.as_code(),
                ],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    pub fn delete_secret(&self, collection_name: &str, hashed_secret_name: &str) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "DELETE FROM secrets
                 WHERE collection_name = ?1 AND hashed_secret_name = ?2",
                params![collection_name, hashed_secret_name],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    pub fn key_entry_identifiers(&self) -> Result<Vec<KeyIdentifier>> {
        let store = self.lock();
        let mut stmt = store
            .conn
            .prepare("SELECT key_name, collection_name FROM key_entries")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(KeyIdentifier {
                    key_name: row.get(0)?,
                    collection_name: row.get(1)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(query_err)
    }

    /// Plugin pair recorded for a key entry, if any.
    pub fn key_entry(&self, identifier: &KeyIdentifier) -> Result<Option<(String, String)>> {
        let store = self.lock();
        store
            .conn
            .query_row(
                "SELECT crypto_plugin, storage_plugin FROM key_entries
                 WHERE key_name = ?1 AND collection_name = ?2",
                params![identifier.key_name, identifier.collection_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(query_err)
    }

    pub fn add_key_entry(
        &self,
        identifier: &KeyIdentifier,
        crypto_plugin: &str,
        storage_plugin: &str,
    ) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO key_entries (collection_name, key_name, crypto_plugin, storage_plugin)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    identifier.collection_name,
                    identifier.key_name,
                    crypto_plugin,
                    storage_plugin
                ],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }

    pub fn remove_key_entry(&self, identifier: &KeyIdentifier) -> Result<()> {
        self.transaction(|conn| {
            conn.execute(
                "DELETE FROM key_entries WHERE collection_name = ?1 AND key_name = ?2",
                params![identifier.collection_name, identifier.key_name],
            )
            .map_err(query_err)?;
            Ok(())
        })
    }
}

fn query_err(err: rusqlite::Error) -> Error {
    Error::DatabaseQuery(err.to_string())
}

fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<Result<CollectionRow>> {
    let unlock_code: i64 = row.get(6)?;
    let access_code: i64 = row.get(8)?;
    let timeout: i64 = row.get(7)?;
    Ok((|| {
        Ok(CollectionRow {
            collection_name: row.get(0).map_err(query_err)?,
            application_id: row.get(1).map_err(query_err)?,
            uses_device_lock_key: row.get(2).map_err(query_err)?,
            storage_plugin: row.get(3).map_err(query_err)?,
            encryption_plugin: row.get(4).map_err(query_err)?,
            authentication_plugin: row.get(5).map_err(query_err)?,
            unlock_semantic: UnlockSemantic::from_code(unlock_code)?,
            custom_lock_timeout_ms: timeout.max(0) as u64,
            access_control_mode: AccessControlMode::from_code(access_code)?,
        })
    })())
}

fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<Result<SecretRow>> {
    let unlock_code: i64 = row.get(7)?;
    let access_code: i64 = row.get(9)?;
    let timeout: i64 = row.get(8)?;
    Ok((|| {
        Ok(SecretRow {
            collection_name: row.get(0).map_err(query_err)?,
            hashed_secret_name: row.get(1).map_err(query_err)?,
            application_id: row.get(2).map_err(query_err)?,
            uses_device_lock_key: row.get(3).map_err(query_err)?,
            storage_plugin: row.get(4).map_err(query_err)?,
            encryption_plugin: row.get(5).map_err(query_err)?,
            authentication_plugin: row.get(6).map_err(query_err)?,
            unlock_semantic: UnlockSemantic::from_code(unlock_code)?,
            custom_lock_timeout_ms: timeout.max(0) as u64,
            access_control_mode: AccessControlMode::from_code(access_code)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_collection(name: &str) -> CollectionRow {
        CollectionRow {
            collection_name: name.to_string(),
            application_id: "app-1".to_string(),
            uses_device_lock_key: true,
            storage_plugin: "storage.memory".to_string(),
            encryption_plugin: "encryption.aes256cbc".to_string(),
            authentication_plugin: "auth.devicelock".to_string(),
            unlock_semantic: UnlockSemantic::DeviceLockKeepUnlocked,
            custom_lock_timeout_ms: 0,
            access_control_mode: AccessControlMode::OwnerOnly,
        }
    }

    #[test]
    fn reserved_collection_is_seeded() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        assert!(catalogue.collection_exists(RESERVED_COLLECTION_NAME).unwrap());
    }

    #[test]
    fn collection_round_trip_and_duplicate_rejection() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let row = sample_collection("kv");
        catalogue.insert_collection(&row).unwrap();

        let fetched = catalogue.collection("kv").unwrap().unwrap();
        assert_eq!(fetched, row);

        assert!(matches!(
            catalogue.insert_collection(&row),
            Err(Error::CollectionAlreadyExists(_))
        ));

        catalogue.delete_collection("kv").unwrap();
        assert!(catalogue.collection("kv").unwrap().is_none());
    }

    #[test]
    fn collection_lookup_is_case_insensitive() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue.insert_collection(&sample_collection("Accounts")).unwrap();
        assert!(catalogue.collection_exists("accounts").unwrap());
        assert!(matches!(
            catalogue.insert_collection(&sample_collection("ACCOUNTS")),
            Err(Error::CollectionAlreadyExists(_))
        ));
    }

    #[test]
    fn secret_rows_update_in_place() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue.insert_collection(&sample_collection("kv")).unwrap();

        let mut secret = SecretRow {
            collection_name: "kv".to_string(),
            hashed_secret_name: "aGFzaA==".to_string(),
            application_id: "app-1".to_string(),
            uses_device_lock_key: false,
            storage_plugin: "storage.memory".to_string(),
            encryption_plugin: "encryption.aes256cbc".to_string(),
            authentication_plugin: "auth.test".to_string(),
            unlock_semantic: UnlockSemantic::CustomLockKeepUnlocked,
            custom_lock_timeout_ms: 0,
            access_control_mode: AccessControlMode::OwnerOnly,
        };
        catalogue.insert_secret(&secret).unwrap();
        assert!(catalogue.secret_exists("kv", "aGFzaA==").unwrap());

        secret.unlock_semantic = UnlockSemantic::CustomLockTimeoutRelock;
        secret.custom_lock_timeout_ms = 500;
        catalogue.update_secret(&secret).unwrap();
        let fetched = catalogue.secret("kv", "aGFzaA==").unwrap().unwrap();
        assert_eq!(fetched.custom_lock_timeout_ms, 500);
        assert_eq!(
            fetched.unlock_semantic,
            UnlockSemantic::CustomLockTimeoutRelock
        );

        catalogue.delete_secret("kv", "aGFzaA==").unwrap();
        assert!(catalogue.secret("kv", "aGFzaA==").unwrap().is_none());
    }

    #[test]
    fn key_entry_bookkeeping() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let id = KeyIdentifier::new("kv", "signing");
        assert!(catalogue.key_entry(&id).unwrap().is_none());

        catalogue
            .add_key_entry(&id, "crypto.openssl", "storage.memory")
            .unwrap();
        let (crypto, storage) = catalogue.key_entry(&id).unwrap().unwrap();
        assert_eq!(crypto, "crypto.openssl");
        assert_eq!(storage, "storage.memory");

        let identifiers = catalogue.key_entry_identifiers().unwrap();
        assert_eq!(identifiers, vec![id.clone()]);

        catalogue.remove_key_entry(&id).unwrap();
        assert!(catalogue.key_entry_identifiers().unwrap().is_empty());
    }
}
