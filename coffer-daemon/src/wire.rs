//! JSON-line protocol spoken over the daemon's Unix socket.
//!
//! One request object per line, one response object per line. The framing is
//! intentionally minimal; richer transports sit outside the core daemon.

use coffer_core::{
    AccessControlMode, PluginInfoReport, UnlockSemantic, UserInteractionMode, WireResult,
};
use serde::{Deserialize, Serialize};

fn default_interaction_mode() -> UserInteractionMode {
    UserInteractionMode::Prevent
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum RpcRequest {
    GetPluginInfo,
    CreateDeviceLockCollection {
        collection_name: String,
        storage_plugin: String,
        encryption_plugin: String,
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
    },
    CreateCustomLockCollection {
        collection_name: String,
        storage_plugin: String,
        encryption_plugin: String,
        authentication_plugin: String,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
        #[serde(default)]
        ui_service_address: String,
    },
    DeleteCollection {
        collection_name: String,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
    },
    SetCollectionSecret {
        collection_name: String,
        secret_name: String,
        value: Vec<u8>,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
        #[serde(default)]
        ui_service_address: String,
    },
    SetStandaloneDeviceLockSecret {
        storage_plugin: String,
        encryption_plugin: String,
        secret_name: String,
        value: Vec<u8>,
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
    },
    SetStandaloneCustomLockSecret {
        storage_plugin: String,
        encryption_plugin: String,
        authentication_plugin: String,
        secret_name: String,
        value: Vec<u8>,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
        #[serde(default)]
        ui_service_address: String,
    },
    GetCollectionSecret {
        collection_name: String,
        secret_name: String,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
        #[serde(default)]
        ui_service_address: String,
    },
    GetStandaloneSecret {
        secret_name: String,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
        #[serde(default)]
        ui_service_address: String,
    },
    DeleteCollectionSecret {
        collection_name: String,
        secret_name: String,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
        #[serde(default)]
        ui_service_address: String,
    },
    DeleteStandaloneSecret {
        secret_name: String,
        #[serde(default = "default_interaction_mode")]
        interaction_mode: UserInteractionMode,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: WireResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_info: Option<PluginInfoReport>,
}

impl RpcResponse {
    pub fn result_only(result: WireResult) -> Self {
        Self {
            result,
            secret: None,
            plugin_info: None,
        }
    }

    pub fn with_secret(result: WireResult, secret: Vec<u8>) -> Self {
        Self {
            result,
            secret: Some(secret),
            plugin_info: None,
        }
    }

    pub fn with_plugin_info(result: WireResult, plugin_info: PluginInfoReport) -> Self {
        Self {
            result,
            secret: None,
            plugin_info: Some(plugin_info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let request = RpcRequest::SetCollectionSecret {
            collection_name: "kv".into(),
            secret_name: "token".into(),
            value: b"hello".to_vec(),
            interaction_mode: UserInteractionMode::System,
            ui_service_address: String::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"verb\":\"set_collection_secret\""));
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        match back {
            RpcRequest::SetCollectionSecret { value, .. } => assert_eq!(value, b"hello"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn optional_fields_default() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"verb":"delete_collection","collection_name":"kv"}"#,
        )
        .unwrap();
        match request {
            RpcRequest::DeleteCollection {
                interaction_mode, ..
            } => assert_eq!(interaction_mode, UserInteractionMode::Prevent),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
