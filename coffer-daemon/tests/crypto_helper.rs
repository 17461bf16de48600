//! The crypto helper surface: key-entry bookkeeping plus the asynchronous
//! key material flows that complete through signals.

mod common;

use coffer_core::{
    AccessControlMode, ErrorCode, KeyIdentifier, ResultCode, UnlockSemantic, UserInteractionMode,
};
use coffer_daemon::request::CryptoSignal;

use common::*;

#[tokio::test]
async fn key_entry_bookkeeping_round_trip() {
    let harness = spawn_daemon();

    assert!(harness
        .crypto
        .storage_plugin_names()
        .contains(&STORAGE.to_string()));

    let id = KeyIdentifier::new("keys", "signing");
    assert!(harness.crypto.key_entry(&id).unwrap().is_none());

    harness
        .crypto
        .add_key_entry(&id, "crypto.soft", STORAGE)
        .unwrap();
    let (crypto_plugin, storage_plugin) = harness.crypto.key_entry(&id).unwrap().unwrap();
    assert_eq!(crypto_plugin, "crypto.soft");
    assert_eq!(storage_plugin, STORAGE);
    assert_eq!(harness.crypto.key_entry_identifiers().unwrap(), vec![id.clone()]);

    harness.crypto.remove_key_entry(&id).unwrap();
    assert!(harness.crypto.key_entry_identifiers().unwrap().is_empty());
}

#[tokio::test]
async fn stored_key_flows_complete_through_signals() {
    let mut harness = spawn_daemon();

    // Key material lives as an ordinary secret inside a collection.
    let result = harness
        .facade
        .create_device_lock_collection(
            caller_a(),
            "keys",
            STORAGE,
            CIPHER,
            UnlockSemantic::DeviceLockKeepUnlocked,
            AccessControlMode::OwnerOnly,
        )
        .await;
    assert!(result.is_succeeded(), "create failed: {result:?}");

    let id = KeyIdentifier::new("keys", "signing");
    harness
        .crypto
        .store_key(APP_A_PID, 1, &id, b"serialised-key-material".to_vec())
        .unwrap();
    match harness.crypto_signals.recv().await.unwrap() {
        CryptoSignal::StoreKeyCompleted {
            crypto_request_id,
            result,
        } => {
            assert_eq!(crypto_request_id, 1);
            assert!(result.is_succeeded(), "store failed: {result:?}");
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    harness.crypto.stored_key(APP_A_PID, 2, &id).unwrap();
    match harness.crypto_signals.recv().await.unwrap() {
        CryptoSignal::StoredKeyCompleted {
            crypto_request_id,
            result,
            serialised_key,
        } => {
            assert_eq!(crypto_request_id, 2);
            assert!(result.is_succeeded(), "fetch failed: {result:?}");
            assert_eq!(serialised_key, b"serialised-key-material");
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    harness.crypto.delete_stored_key(APP_A_PID, 3, &id).unwrap();
    match harness.crypto_signals.recv().await.unwrap() {
        CryptoSignal::DeleteStoredKeyCompleted {
            crypto_request_id,
            result,
        } => {
            assert_eq!(crypto_request_id, 3);
            assert!(result.is_succeeded(), "delete failed: {result:?}");
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    // The material is gone afterwards.
    harness.crypto.stored_key(APP_A_PID, 4, &id).unwrap();
    match harness.crypto_signals.recv().await.unwrap() {
        CryptoSignal::StoredKeyCompleted { result, .. } => {
            assert_eq!(result.code, ResultCode::Failed);
            assert_eq!(result.error_code, Some(ErrorCode::InvalidSecret));
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}

#[tokio::test]
async fn crypto_requests_share_the_client_queue() {
    let mut harness = spawn_daemon();

    // A crypto-origin store into a nonexistent collection fails like the
    // equivalent client verb would.
    let id = KeyIdentifier::new("missing", "signing");
    harness
        .crypto
        .store_key(APP_A_PID, 9, &id, b"material".to_vec())
        .unwrap();
    match harness.crypto_signals.recv().await.unwrap() {
        CryptoSignal::StoreKeyCompleted {
            crypto_request_id,
            result,
        } => {
            assert_eq!(crypto_request_id, 9);
            assert_eq!(result.error_code, Some(ErrorCode::InvalidCollection));
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    // Interaction mode is always Prevent for crypto-origin requests, so a
    // locked custom-lock collection cannot trigger UI.
    let result = harness
        .facade
        .create_custom_lock_collection(
            caller_a(),
            "locked",
            STORAGE,
            CIPHER,
            AUTH_PLUGIN,
            UnlockSemantic::CustomLockKeepUnlocked,
            0,
            AccessControlMode::OwnerOnly,
            UserInteractionMode::System,
            "",
        )
        .await;
    assert!(result.is_succeeded());

    // The creation flow cached the key, so the Prevent-mode store goes
    // through without interaction.
    let id = KeyIdentifier::new("locked", "k");
    harness
        .crypto
        .store_key(APP_A_PID, 10, &id, b"material".to_vec())
        .unwrap();
    match harness.crypto_signals.recv().await.unwrap() {
        CryptoSignal::StoreKeyCompleted { result, .. } => {
            assert!(result.is_succeeded(), "store failed: {result:?}");
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}
