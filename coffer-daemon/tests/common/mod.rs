#![allow(dead_code)]

use std::sync::Arc;

use coffer_core::plugins::{
    AesCbcEncryptionPlugin, DeviceLockAuthPlugin, MemoryStoragePlugin, SealedMemoryStoragePlugin,
    StaticKeyAuthPlugin,
};
use coffer_core::{PluginHandle, PluginRegistry, SecretKey};
use coffer_daemon::catalogue::Catalogue;
use coffer_daemon::crypto::CryptoHelper;
use coffer_daemon::daemon::Daemon;
use coffer_daemon::facade::{Caller, SecretsFacade};
use coffer_daemon::permissions::StaticPermissions;
use coffer_daemon::request::CryptoSignal;
use tokio::sync::mpsc::UnboundedReceiver;

pub const APP_A_PID: u32 = 101;
pub const APP_B_PID: u32 = 202;

pub const AUTH_PLUGIN: &str = "auth.prompt";
pub const AUTH_KEY: &[u8] = b"user-passphrase";
pub const DEVICE_LOCK_KEY: &[u8] = b"test-device-lock-key";

pub const STORAGE: &str = MemoryStoragePlugin::NAME;
pub const SEALED: &str = SealedMemoryStoragePlugin::NAME;
pub const CIPHER: &str = AesCbcEncryptionPlugin::NAME;

pub struct Harness {
    pub facade: SecretsFacade,
    pub crypto: CryptoHelper,
    pub crypto_signals: UnboundedReceiver<CryptoSignal>,
    pub catalogue: Arc<Catalogue>,
    pub auth: Arc<StaticKeyAuthPlugin>,
}

pub fn device_key() -> SecretKey {
    SecretKey::from(DEVICE_LOCK_KEY)
}

pub fn auth_key() -> SecretKey {
    SecretKey::from(AUTH_KEY)
}

pub fn prompt_auth() -> Arc<StaticKeyAuthPlugin> {
    Arc::new(StaticKeyAuthPlugin::new(AUTH_PLUGIN, auth_key()))
}

pub fn caller_a() -> Caller {
    Caller::with_pid(APP_A_PID)
}

pub fn caller_b() -> Caller {
    Caller::with_pid(APP_B_PID)
}

/// Boot a daemon with the standard autotest plugin set plus `extra`,
/// dispatching on a background task. Must run inside a tokio runtime.
pub fn spawn_daemon_with(
    extra: Vec<PluginHandle>,
    queue_capacity: usize,
    auth: Arc<StaticKeyAuthPlugin>,
) -> Harness {
    let catalogue = Arc::new(Catalogue::open_in_memory().expect("open catalogue"));

    let mut plugins = vec![
        PluginHandle::Storage(Arc::new(MemoryStoragePlugin::new())),
        PluginHandle::EncryptedStorage(Arc::new(SealedMemoryStoragePlugin::new())),
        PluginHandle::Encryption(Arc::new(AesCbcEncryptionPlugin::test())),
        PluginHandle::Authentication(Arc::new(DeviceLockAuthPlugin::test(device_key()))),
        PluginHandle::Authentication(auth.clone() as Arc<dyn coffer_core::AuthenticationPlugin>),
    ];
    plugins.extend(extra);
    let registry = Arc::new(PluginRegistry::load(plugins, true));

    let permissions = Arc::new(
        StaticPermissions::new("app-other")
            .with_application(APP_A_PID, "app-a")
            .with_application(APP_B_PID, "app-b"),
    );

    let (daemon, facade, crypto, crypto_signals) = Daemon::new(
        Arc::clone(&catalogue),
        registry,
        permissions,
        device_key(),
        queue_capacity,
    );
    tokio::spawn(daemon.run());

    Harness {
        facade,
        crypto,
        crypto_signals,
        catalogue,
        auth,
    }
}

pub fn spawn_daemon() -> Harness {
    spawn_daemon_with(Vec::new(), 64, prompt_auth())
}
