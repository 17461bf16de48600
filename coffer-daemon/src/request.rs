//! Typed request inputs, replies and daemon events.

use coffer_core::{
    AccessControlMode, PluginInfoReport, UnlockSemantic, UserInteractionMode, WireResult,
};
use tokio::sync::oneshot;

/// Arguments for one API verb, as marshalled by the façade.
#[derive(Debug, Clone)]
pub enum RequestInput {
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
        interaction_mode: UserInteractionMode,
        ui_service_address: String,
    },
    DeleteCollection {
        collection_name: String,
        interaction_mode: UserInteractionMode,
    },
    SetCollectionSecret {
        collection_name: String,
        secret_name: String,
        value: Vec<u8>,
        interaction_mode: UserInteractionMode,
        ui_service_address: String,
    },
    SetStandaloneDeviceLockSecret {
        storage_plugin: String,
        encryption_plugin: String,
        secret_name: String,
        value: Vec<u8>,
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
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
        interaction_mode: UserInteractionMode,
        ui_service_address: String,
    },
    GetCollectionSecret {
        collection_name: String,
        secret_name: String,
        interaction_mode: UserInteractionMode,
        ui_service_address: String,
    },
    GetStandaloneSecret {
        secret_name: String,
        interaction_mode: UserInteractionMode,
        ui_service_address: String,
    },
    DeleteCollectionSecret {
        collection_name: String,
        secret_name: String,
        interaction_mode: UserInteractionMode,
        ui_service_address: String,
    },
    DeleteStandaloneSecret {
        secret_name: String,
        interaction_mode: UserInteractionMode,
    },
}

impl RequestInput {
    pub fn verb_name(&self) -> &'static str {
        match self {
            Self::GetPluginInfo => "GetPluginInfo",
            Self::CreateDeviceLockCollection { .. } => "CreateDeviceLockCollection",
            Self::CreateCustomLockCollection { .. } => "CreateCustomLockCollection",
            Self::DeleteCollection { .. } => "DeleteCollection",
            Self::SetCollectionSecret { .. } => "SetCollectionSecret",
            Self::SetStandaloneDeviceLockSecret { .. } => "SetStandaloneDeviceLockSecret",
            Self::SetStandaloneCustomLockSecret { .. } => "SetStandaloneCustomLockSecret",
            Self::GetCollectionSecret { .. } => "GetCollectionSecret",
            Self::GetStandaloneSecret { .. } => "GetStandaloneSecret",
            Self::DeleteCollectionSecret { .. } => "DeleteCollectionSecret",
            Self::DeleteStandaloneSecret { .. } => "DeleteStandaloneSecret",
        }
    }
}

/// Verb-specific payload accompanying the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    None,
    Secret(Vec<u8>),
    PluginInfo(PluginInfoReport),
}

impl ResponseBody {
    pub fn into_secret(self) -> Vec<u8> {
        match self {
            Self::Secret(bytes) => bytes,
            _ => Vec::new(),
        }
    }

    pub fn into_plugin_info(self) -> PluginInfoReport {
        match self {
            Self::PluginInfo(report) => report,
            _ => PluginInfoReport::default(),
        }
    }
}

/// Terminal outcome of a request.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    pub result: WireResult,
    pub body: ResponseBody,
}

impl CompletedRequest {
    pub fn new(result: WireResult, body: ResponseBody) -> Self {
        Self { result, body }
    }

    pub fn result_only(result: WireResult) -> Self {
        Self {
            result,
            body: ResponseBody::None,
        }
    }
}

/// Which crypto helper call a crypto-origin request serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoHelperKind {
    StoreKey,
    StoredKey,
    DeleteStoredKey,
}

/// Where a request came from and therefore where its reply goes.
#[derive(Debug)]
pub enum RequestOrigin {
    /// An IPC client awaiting a delayed reply.
    Client {
        reply: oneshot::Sender<CompletedRequest>,
    },
    /// The crypto helper surface; completion fires a signal instead of a
    /// client reply.
    Crypto {
        crypto_request_id: u64,
        kind: CryptoHelperKind,
    },
}

/// Completion signals emitted for crypto-origin requests.
#[derive(Debug, Clone)]
pub enum CryptoSignal {
    StoreKeyCompleted {
        crypto_request_id: u64,
        result: WireResult,
    },
    StoredKeyCompleted {
        crypto_request_id: u64,
        result: WireResult,
        serialised_key: Vec<u8>,
    },
    DeleteStoredKeyCompleted {
        crypto_request_id: u64,
        result: WireResult,
    },
}

/// Events driving the dispatcher task.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A new request to enqueue and dispatch.
    Request {
        caller_pid: u32,
        input: RequestInput,
        origin: RequestOrigin,
    },
    /// Re-posted dispatch after a cooperative yield.
    Dispatch,
    /// A relock timer fired for a collection.
    RelockCollection { collection_name: String },
    /// A relock timer fired for a standalone secret.
    RelockStandaloneSecret { hashed_secret_name: String },
}
