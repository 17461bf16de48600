//! The API façade: one method per verb, marshalling arguments into the
//! request queue and awaiting the delayed reply.

use coffer_core::{
    AccessControlMode, Error, PluginInfoReport, UnlockSemantic, UserInteractionMode, WireResult,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::request::{CompletedRequest, DaemonEvent, RequestInput, RequestOrigin};

/// Identity of the requesting client, as established by the IPC transport.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pid: Option<u32>,
}

impl Caller {
    pub fn with_pid(pid: u32) -> Self {
        Self { pid: Some(pid) }
    }

    /// A caller whose PID the transport could not determine. Every verb
    /// fails immediately for such a caller.
    pub fn unknown() -> Self {
        Self { pid: None }
    }
}

#[derive(Clone)]
pub struct SecretsFacade {
    events: UnboundedSender<DaemonEvent>,
}

impl SecretsFacade {
    pub(crate) fn new(events: UnboundedSender<DaemonEvent>) -> Self {
        Self { events }
    }

    async fn submit(&self, caller: Caller, input: RequestInput) -> CompletedRequest {
        let Some(caller_pid) = caller.pid else {
            return CompletedRequest::result_only(WireResult::failed(&Error::Daemon(
                "could not determine PID of caller to enforce access controls".into(),
            )));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let event = DaemonEvent::Request {
            caller_pid,
            input,
            origin: RequestOrigin::Client { reply: reply_tx },
        };
        if self.events.send(event).is_err() {
            return CompletedRequest::result_only(WireResult::failed(&Error::Daemon(
                "secrets daemon is not running".into(),
            )));
        }

        match reply_rx.await {
            Ok(completed) => completed,
            Err(_) => CompletedRequest::result_only(WireResult::failed(&Error::Daemon(
                "secrets daemon dropped the request".into(),
            ))),
        }
    }

    pub async fn get_plugin_info(&self, caller: Caller) -> (WireResult, PluginInfoReport) {
        let completed = self.submit(caller, RequestInput::GetPluginInfo).await;
        (completed.result, completed.body.into_plugin_info())
    }

    pub async fn create_device_lock_collection(
        &self,
        caller: Caller,
        collection_name: impl Into<String>,
        storage_plugin: impl Into<String>,
        encryption_plugin: impl Into<String>,
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::CreateDeviceLockCollection {
                collection_name: collection_name.into(),
                storage_plugin: storage_plugin.into(),
                encryption_plugin: encryption_plugin.into(),
                unlock_semantic,
                access_control_mode,
            },
        )
        .await
        .result
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_custom_lock_collection(
        &self,
        caller: Caller,
        collection_name: impl Into<String>,
        storage_plugin: impl Into<String>,
        encryption_plugin: impl Into<String>,
        authentication_plugin: impl Into<String>,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        interaction_mode: UserInteractionMode,
        ui_service_address: impl Into<String>,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::CreateCustomLockCollection {
                collection_name: collection_name.into(),
                storage_plugin: storage_plugin.into(),
                encryption_plugin: encryption_plugin.into(),
                authentication_plugin: authentication_plugin.into(),
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
                interaction_mode,
                ui_service_address: ui_service_address.into(),
            },
        )
        .await
        .result
    }

    pub async fn delete_collection(
        &self,
        caller: Caller,
        collection_name: impl Into<String>,
        interaction_mode: UserInteractionMode,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::DeleteCollection {
                collection_name: collection_name.into(),
                interaction_mode,
            },
        )
        .await
        .result
    }

    pub async fn set_collection_secret(
        &self,
        caller: Caller,
        collection_name: impl Into<String>,
        secret_name: impl Into<String>,
        value: Vec<u8>,
        interaction_mode: UserInteractionMode,
        ui_service_address: impl Into<String>,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::SetCollectionSecret {
                collection_name: collection_name.into(),
                secret_name: secret_name.into(),
                value,
                interaction_mode,
                ui_service_address: ui_service_address.into(),
            },
        )
        .await
        .result
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_standalone_device_lock_secret(
        &self,
        caller: Caller,
        storage_plugin: impl Into<String>,
        encryption_plugin: impl Into<String>,
        secret_name: impl Into<String>,
        value: Vec<u8>,
        unlock_semantic: UnlockSemantic,
        access_control_mode: AccessControlMode,
        interaction_mode: UserInteractionMode,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::SetStandaloneDeviceLockSecret {
                storage_plugin: storage_plugin.into(),
                encryption_plugin: encryption_plugin.into(),
                secret_name: secret_name.into(),
                value,
                unlock_semantic,
                access_control_mode,
                interaction_mode,
            },
        )
        .await
        .result
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_standalone_custom_lock_secret(
        &self,
        caller: Caller,
        storage_plugin: impl Into<String>,
        encryption_plugin: impl Into<String>,
        authentication_plugin: impl Into<String>,
        secret_name: impl Into<String>,
        value: Vec<u8>,
        unlock_semantic: UnlockSemantic,
        custom_lock_timeout_ms: u64,
        access_control_mode: AccessControlMode,
        interaction_mode: UserInteractionMode,
        ui_service_address: impl Into<String>,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::SetStandaloneCustomLockSecret {
                storage_plugin: storage_plugin.into(),
                encryption_plugin: encryption_plugin.into(),
                authentication_plugin: authentication_plugin.into(),
                secret_name: secret_name.into(),
                value,
                unlock_semantic,
                custom_lock_timeout_ms,
                access_control_mode,
                interaction_mode,
                ui_service_address: ui_service_address.into(),
            },
        )
        .await
        .result
    }

    pub async fn get_collection_secret(
        &self,
        caller: Caller,
        collection_name: impl Into<String>,
        secret_name: impl Into<String>,
        interaction_mode: UserInteractionMode,
        ui_service_address: impl Into<String>,
    ) -> (WireResult, Vec<u8>) {
        let completed = self
            .submit(
                caller,
                RequestInput::GetCollectionSecret {
                    collection_name: collection_name.into(),
                    secret_name: secret_name.into(),
                    interaction_mode,
                    ui_service_address: ui_service_address.into(),
                },
            )
            .await;
        (completed.result, completed.body.into_secret())
    }

    pub async fn get_standalone_secret(
        &self,
        caller: Caller,
        secret_name: impl Into<String>,
        interaction_mode: UserInteractionMode,
        ui_service_address: impl Into<String>,
    ) -> (WireResult, Vec<u8>) {
        let completed = self
            .submit(
                caller,
                RequestInput::GetStandaloneSecret {
                    secret_name: secret_name.into(),
                    interaction_mode,
                    ui_service_address: ui_service_address.into(),
                },
            )
            .await;
        (completed.result, completed.body.into_secret())
    }

    pub async fn delete_collection_secret(
        &self,
        caller: Caller,
        collection_name: impl Into<String>,
        secret_name: impl Into<String>,
        interaction_mode: UserInteractionMode,
        ui_service_address: impl Into<String>,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::DeleteCollectionSecret {
                collection_name: collection_name.into(),
                secret_name: secret_name.into(),
                interaction_mode,
                ui_service_address: ui_service_address.into(),
            },
        )
        .await
        .result
    }

    pub async fn delete_standalone_secret(
        &self,
        caller: Caller,
        secret_name: impl Into<String>,
        interaction_mode: UserInteractionMode,
    ) -> WireResult {
        self.submit(
            caller,
            RequestInput::DeleteStandaloneSecret {
                secret_name: secret_name.into(),
                interaction_mode,
            },
        )
        .await
        .result
    }
}
