//! Shared contracts for the coffer secrets daemon: the error taxonomy, the
//! four extension plugin capabilities, hashed-secret-name derivation and the
//! reference plugin implementations.

pub mod error;
pub mod hashing;
pub mod plugin;
pub mod plugins;
pub mod types;

pub use error::{Error, ErrorCode, Result, ResultCode, WireResult};
pub use hashing::hashed_secret_name;
pub use plugin::{
    AuthenticationContext, AuthenticationOutcome, AuthenticationPlugin, AuthenticationSink,
    AuthenticationType, EncryptedStoragePlugin, EncryptionPlugin, Plugin, PluginHandle,
    PluginRegistry, ReencryptTarget, StoragePlugin,
};
pub use types::{
    is_reserved_collection_name, AccessControlMode, KeyIdentifier, PluginInfo, PluginInfoReport,
    SecretKey, UnlockSemantic, UserInteractionMode, DEFAULT_AUTHENTICATION_PLUGIN,
    RESERVED_COLLECTION_NAME,
};
