use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy shared by the daemon core and its plugins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid collection: {0}")]
    InvalidCollection(String),
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("no such {kind} plugin exists: {name}")]
    InvalidExtensionPlugin { kind: &'static str, name: String },
    #[error("reserved collection name given: {0}")]
    ReservedName(String),
    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),
    #[error("{0} is locked and requires device lock authentication")]
    CollectionIsLocked(String),
    #[error("{0}")]
    IncorrectAuthenticationKey(String),
    #[error("{0}")]
    Permissions(String),
    #[error("{0}")]
    OperationNotSupported(String),
    #[error("authentication plugin {0} requires user interaction")]
    OperationRequiresUserInteraction(String),
    #[error("authentication plugin {0} requires in-process user interaction")]
    OperationRequiresInProcessUserInteraction(String),
    #[error("plugin failed to encrypt the secret: {0}")]
    PluginEncryption(String),
    #[error("plugin failed to decrypt the secret: {0}")]
    PluginDecryption(String),
    #[error("plugin operation failed: {0}")]
    Plugin(String),
    #[error("database query failed: {0}")]
    DatabaseQuery(String),
    #[error("database transaction failed: {0}")]
    DatabaseTransaction(String),
    #[error("request queue is full, try again later")]
    RequestQueueFull,
    #[error("daemon error: {0}")]
    Daemon(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Stable wire code for this error.
    ///
    /// A reserved name is an invalid collection as far as clients are
    /// concerned; the distinction only matters inside the daemon.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidCollection(_) | Error::ReservedName(_) => ErrorCode::InvalidCollection,
            Error::InvalidSecret(_) => ErrorCode::InvalidSecret,
            Error::InvalidExtensionPlugin { .. } => ErrorCode::InvalidExtensionPlugin,
            Error::CollectionAlreadyExists(_) => ErrorCode::CollectionAlreadyExists,
            Error::CollectionIsLocked(_) => ErrorCode::CollectionIsLocked,
            Error::IncorrectAuthenticationKey(_) => ErrorCode::IncorrectAuthenticationKey,
            Error::Permissions(_) => ErrorCode::Permissions,
            Error::OperationNotSupported(_) => ErrorCode::OperationNotSupported,
            Error::OperationRequiresUserInteraction(_) => {
                ErrorCode::OperationRequiresUserInteraction
            }
            Error::OperationRequiresInProcessUserInteraction(_) => {
                ErrorCode::OperationRequiresInProcessUserInteraction
            }
            Error::PluginEncryption(_) => ErrorCode::PluginEncryption,
            Error::PluginDecryption(_) => ErrorCode::PluginDecryption,
            Error::Plugin(_) => ErrorCode::Plugin,
            Error::DatabaseQuery(_) => ErrorCode::DatabaseQuery,
            Error::DatabaseTransaction(_) => ErrorCode::DatabaseTransaction,
            Error::RequestQueueFull => ErrorCode::RequestQueueFull,
            Error::Daemon(_) => ErrorCode::Daemon,
            Error::Unknown(_) => ErrorCode::Unknown,
        }
    }
}

/// Wire-level error discriminant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCollection,
    InvalidSecret,
    InvalidExtensionPlugin,
    CollectionAlreadyExists,
    CollectionIsLocked,
    IncorrectAuthenticationKey,
    Permissions,
    OperationNotSupported,
    OperationRequiresUserInteraction,
    OperationRequiresInProcessUserInteraction,
    PluginEncryption,
    PluginDecryption,
    Plugin,
    DatabaseQuery,
    DatabaseTransaction,
    RequestQueueFull,
    Daemon,
    Unknown,
}

/// Overall outcome of a request.
///
/// `Pending` is internal to the daemon: a reply sent to a client always
/// carries `Succeeded` or `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Succeeded,
    Failed,
}

/// Reply record delivered for every verb.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireResult {
    pub code: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl WireResult {
    pub fn succeeded() -> Self {
        Self {
            code: ResultCode::Succeeded,
            error_code: None,
            error_message: String::new(),
        }
    }

    pub fn failed(err: &Error) -> Self {
        Self {
            code: ResultCode::Failed,
            error_code: Some(err.code()),
            error_message: err.to_string(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.code == ResultCode::Succeeded
    }
}

impl From<std::result::Result<(), Error>> for WireResult {
    fn from(value: std::result::Result<(), Error>) -> Self {
        match value {
            Ok(()) => WireResult::succeeded(),
            Err(err) => WireResult::failed(&err),
        }
    }
}
