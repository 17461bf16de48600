//! The coffer secrets daemon.
//!
//! A single dispatcher task drives an ordered request queue; verbs consult
//! the master catalogue and delegate storage and encryption to extension
//! plugins, suspending on authentication flows and resuming when the
//! plugin's completion arrives.

pub mod catalogue;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod facade;
pub mod keycache;
pub mod keys;
pub mod permissions;
pub mod processor;
pub mod queue;
pub mod request;
pub mod server;
pub mod telemetry;
pub mod wire;

use std::sync::Arc;

use anyhow::Context;
use coffer_core::plugins::{
    AesCbcEncryptionPlugin, DeviceLockAuthPlugin, FileStoragePlugin, MemoryStoragePlugin,
    SealedMemoryStoragePlugin,
};
use coffer_core::{PluginHandle, PluginRegistry, SecretKey};
use tokio::net::UnixListener;
use tracing::info;

use crate::catalogue::Catalogue;
use crate::config::Config;
use crate::daemon::Daemon;
use crate::permissions::ProcPermissions;

/// The plugin set the daemon ships with. Production mode uses the
/// file-backed storage plugin; autotest mode swaps in the in-memory ones.
fn builtin_plugins(config: &Config, device_lock_key: &SecretKey) -> Vec<PluginHandle> {
    vec![
        PluginHandle::Storage(Arc::new(FileStoragePlugin::new(config.plugin_storage_dir()))),
        PluginHandle::Storage(Arc::new(MemoryStoragePlugin::new())),
        PluginHandle::EncryptedStorage(Arc::new(SealedMemoryStoragePlugin::new())),
        PluginHandle::Encryption(Arc::new(AesCbcEncryptionPlugin::new())),
        PluginHandle::Encryption(Arc::new(AesCbcEncryptionPlugin::test())),
        PluginHandle::Authentication(Arc::new(DeviceLockAuthPlugin::new(device_lock_key.clone()))),
        PluginHandle::Authentication(Arc::new(DeviceLockAuthPlugin::test(
            device_lock_key.clone(),
        ))),
    ]
}

/// Bring the daemon up and serve the Unix socket until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;

    let device_lock_key =
        keys::load_or_create_device_lock_key(&config.data_dir).context("device lock key")?;
    let catalogue =
        Arc::new(Catalogue::open(&config.catalogue_path()).context("opening catalogue")?);
    let registry = Arc::new(PluginRegistry::load(
        builtin_plugins(&config, &device_lock_key),
        config.autotest_mode,
    ));

    let (daemon, facade, _crypto, _crypto_signals) = Daemon::new(
        catalogue,
        registry,
        Arc::new(ProcPermissions),
        device_lock_key,
        config.queue_capacity,
    );
    tokio::spawn(daemon.run());

    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent).context("creating socket directory")?;
    }
    match std::fs::remove_file(&config.socket_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).context("removing stale socket"),
    }
    let listener = UnixListener::bind(&config.socket_path).context("binding socket")?;
    info!(socket = %config.socket_path.display(), autotest = config.autotest_mode, "cofferd listening");

    server::serve(listener, facade).await.context("serving")
}
