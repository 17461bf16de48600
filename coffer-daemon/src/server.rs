//! Unix-socket edge of the daemon.
//!
//! Each connection carries newline-delimited JSON requests; the caller's PID
//! comes from `SO_PEERCRED`. A request whose peer PID cannot be established
//! still gets a reply, but every verb fails with a daemon error.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::facade::{Caller, SecretsFacade};
use crate::wire::{RpcRequest, RpcResponse};
use coffer_core::{Error, WireResult};

pub async fn serve(listener: UnixListener, facade: SecretsFacade) -> std::io::Result<()> {
    info!("accepting client connections");
    loop {
        let (stream, _addr) = listener.accept().await?;
        let facade = facade.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, facade).await {
                debug!(%err, "client connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, facade: SecretsFacade) -> std::io::Result<()> {
    let caller = match stream.peer_cred() {
        Ok(cred) => match cred.pid() {
            Some(pid) if pid > 0 => Caller::with_pid(pid as u32),
            _ => Caller::unknown(),
        },
        Err(err) => {
            warn!(%err, "unable to read peer credentials");
            Caller::unknown()
        }
    };

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => dispatch(&facade, caller, request).await,
            Err(err) => RpcResponse::result_only(WireResult::failed(&Error::Daemon(format!(
                "malformed request: {err}"
            )))),
        };

        let mut payload = serde_json::to_vec(&response).unwrap_or_default();
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
    Ok(())
}

async fn dispatch(facade: &SecretsFacade, caller: Caller, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::GetPluginInfo => {
            let (result, report) = facade.get_plugin_info(caller).await;
            RpcResponse::with_plugin_info(result, report)
        }
        RpcRequest::CreateDeviceLockCollection {
            collection_name,
            storage_plugin,
            encryption_plugin,
            unlock_semantic,
            access_control_mode,
        } => RpcResponse::result_only(
            facade
                .create_device_lock_collection(
                    caller,
                    collection_name,
                    storage_plugin,
                    encryption_plugin,
                    unlock_semantic,
                    access_control_mode,
                )
                .await,
        ),
        RpcRequest::CreateCustomLockCollection {
            collection_name,
            storage_plugin,
            encryption_plugin,
            authentication_plugin,
            unlock_semantic,
            custom_lock_timeout_ms,
            access_control_mode,
            interaction_mode,
            ui_service_address,
        } => RpcResponse::result_only(
            facade
                .create_custom_lock_collection(
                    caller,
                    collection_name,
                    storage_plugin,
                    encryption_plugin,
                    authentication_plugin,
                    unlock_semantic,
                    custom_lock_timeout_ms,
                    access_control_mode,
                    interaction_mode,
                    ui_service_address,
                )
                .await,
        ),
        RpcRequest::DeleteCollection {
            collection_name,
            interaction_mode,
        } => RpcResponse::result_only(
            facade
                .delete_collection(caller, collection_name, interaction_mode)
                .await,
        ),
        RpcRequest::SetCollectionSecret {
            collection_name,
            secret_name,
            value,
            interaction_mode,
            ui_service_address,
        } => RpcResponse::result_only(
            facade
                .set_collection_secret(
                    caller,
                    collection_name,
                    secret_name,
                    value,
                    interaction_mode,
                    ui_service_address,
                )
                .await,
        ),
        RpcRequest::SetStandaloneDeviceLockSecret {
            storage_plugin,
            encryption_plugin,
            secret_name,
            value,
            unlock_semantic,
            access_control_mode,
            interaction_mode,
        } => RpcResponse::result_only(
            facade
                .set_standalone_device_lock_secret(
                    caller,
                    storage_plugin,
                    encryption_plugin,
                    secret_name,
                    value,
                    unlock_semantic,
                    access_control_mode,
                    interaction_mode,
                )
                .await,
        ),
        RpcRequest::SetStandaloneCustomLockSecret {
            storage_plugin,
            encryption_plugin,
            authentication_plugin,
            secret_name,
            value,
            unlock_semantic,
            custom_lock_timeout_ms,
            access_control_mode,
            interaction_mode,
            ui_service_address,
        } => RpcResponse::result_only(
            facade
                .set_standalone_custom_lock_secret(
                    caller,
                    storage_plugin,
                    encryption_plugin,
                    authentication_plugin,
                    secret_name,
                    value,
                    unlock_semantic,
                    custom_lock_timeout_ms,
                    access_control_mode,
                    interaction_mode,
                    ui_service_address,
                )
                .await,
        ),
        RpcRequest::GetCollectionSecret {
            collection_name,
            secret_name,
            interaction_mode,
            ui_service_address,
        } => {
            let (result, secret) = facade
                .get_collection_secret(
                    caller,
                    collection_name,
                    secret_name,
                    interaction_mode,
                    ui_service_address,
                )
                .await;
            RpcResponse::with_secret(result, secret)
        }
        RpcRequest::GetStandaloneSecret {
            secret_name,
            interaction_mode,
            ui_service_address,
        } => {
            let (result, secret) = facade
                .get_standalone_secret(caller, secret_name, interaction_mode, ui_service_address)
                .await;
            RpcResponse::with_secret(result, secret)
        }
        RpcRequest::DeleteCollectionSecret {
            collection_name,
            secret_name,
            interaction_mode,
            ui_service_address,
        } => RpcResponse::result_only(
            facade
                .delete_collection_secret(
                    caller,
                    collection_name,
                    secret_name,
                    interaction_mode,
                    ui_service_address,
                )
                .await,
        ),
        RpcRequest::DeleteStandaloneSecret {
            secret_name,
            interaction_mode,
        } => RpcResponse::result_only(
            facade
                .delete_standalone_secret(caller, secret_name, interaction_mode)
                .await,
        ),
    }
}
