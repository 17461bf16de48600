//! Reference plugin implementations.
//!
//! Production deployments are expected to bring their own backends; these
//! cover the common cases and back the autotest mode.

pub mod auth;
pub mod cipher;
pub mod file;
pub mod memory;
pub mod sealed;

pub use auth::{DeviceLockAuthPlugin, StaticKeyAuthPlugin};
pub use cipher::AesCbcEncryptionPlugin;
pub use file::FileStoragePlugin;
pub use memory::MemoryStoragePlugin;
pub use sealed::SealedMemoryStoragePlugin;
