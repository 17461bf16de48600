use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// The notional collection standalone secrets live under.
pub const RESERVED_COLLECTION_NAME: &str = "standalone";

/// Authentication plugin recorded for device-lock protected entries.
pub const DEFAULT_AUTHENTICATION_PLUGIN: &str = "auth.devicelock";

/// Returns true when `name` claims the reserved collection.
///
/// Collection names are case-insensitive throughout the catalogue.
pub fn is_reserved_collection_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(RESERVED_COLLECTION_NAME)
}

/// Validate a client-supplied collection name: non-empty, not reserved.
pub fn require_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidCollection("empty collection name given".into()));
    }
    if is_reserved_collection_name(name) {
        return Err(Error::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Validate a client-supplied secret name: non-empty.
pub fn require_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidSecret("empty secret name given".into()));
    }
    Ok(())
}

/// Lock policy of a collection or standalone secret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnlockSemantic {
    DeviceLockKeepUnlocked,
    DeviceLockRelock,
    CustomLockKeepUnlocked,
    CustomLockDeviceLockRelock,
    CustomLockTimeoutRelock,
    CustomLockAccessRelock,
}

impl UnlockSemantic {
    /// True for the semantics driven by the daemon-global device lock key.
    pub fn is_device_lock(self) -> bool {
        matches!(
            self,
            Self::DeviceLockKeepUnlocked | Self::DeviceLockRelock
        )
    }

    pub fn is_custom_lock(self) -> bool {
        !self.is_device_lock()
    }

    /// Stable integer form used by the catalogue.
    pub fn as_code(self) -> i64 {
        match self {
            Self::DeviceLockKeepUnlocked => 0,
            Self::DeviceLockRelock => 1,
            Self::CustomLockKeepUnlocked => 2,
            Self::CustomLockDeviceLockRelock => 3,
            Self::CustomLockTimeoutRelock => 4,
            Self::CustomLockAccessRelock => 5,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::DeviceLockKeepUnlocked),
            1 => Ok(Self::DeviceLockRelock),
            2 => Ok(Self::CustomLockKeepUnlocked),
            3 => Ok(Self::CustomLockDeviceLockRelock),
            4 => Ok(Self::CustomLockTimeoutRelock),
            5 => Ok(Self::CustomLockAccessRelock),
            other => Err(Error::DatabaseQuery(format!(
                "unknown unlock semantic code {other}"
            ))),
        }
    }
}

/// Who may operate on a collection or secret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessControlMode {
    OwnerOnly,
    SystemControlled,
}

impl AccessControlMode {
    pub fn as_code(self) -> i64 {
        match self {
            Self::OwnerOnly => 0,
            Self::SystemControlled => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::OwnerOnly),
            1 => Ok(Self::SystemControlled),
            other => Err(Error::DatabaseQuery(format!(
                "unknown access control mode code {other}"
            ))),
        }
    }
}

/// Whether the caller permits a user-facing authentication flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserInteractionMode {
    Prevent,
    System,
    InProcess,
}

/// Descriptor for one loaded plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub is_test: bool,
}

/// Snapshot of every loaded plugin, one ordered list per capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfoReport {
    pub storage_plugins: Vec<PluginInfo>,
    pub encryption_plugins: Vec<PluginInfo>,
    pub encrypted_storage_plugins: Vec<PluginInfo>,
    pub authentication_plugins: Vec<PluginInfo>,
}

/// Identifier of a stored key, as used by the crypto helper surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KeyIdentifier {
    pub collection_name: String,
    pub key_name: String,
}

impl KeyIdentifier {
    pub fn new(collection_name: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            key_name: key_name.into(),
        }
    }
}

/// Authentication key material.
///
/// Wiped on drop; never serialised and never logged.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SecretKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for SecretKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_name_is_case_insensitive() {
        assert!(is_reserved_collection_name("standalone"));
        assert!(is_reserved_collection_name("Standalone"));
        assert!(is_reserved_collection_name("STANDALONE"));
        assert!(!is_reserved_collection_name("stand-alone"));
    }

    #[test]
    fn unlock_semantic_codes_round_trip() {
        for code in 0..6 {
            let semantic = UnlockSemantic::from_code(code).unwrap();
            assert_eq!(semantic.as_code(), code);
        }
        assert!(UnlockSemantic::from_code(6).is_err());
        assert!(UnlockSemantic::DeviceLockRelock.is_device_lock());
        assert!(UnlockSemantic::CustomLockTimeoutRelock.is_custom_lock());
    }

    #[test]
    fn secret_key_debug_hides_material() {
        let key = SecretKey::from(b"hunter2".as_slice());
        assert!(!format!("{key:?}").contains("hunter2"));
    }
}
