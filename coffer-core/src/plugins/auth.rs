use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::plugin::{
    AuthenticationContext, AuthenticationPlugin, AuthenticationSink, AuthenticationType, Plugin,
};
use crate::types::{SecretKey, DEFAULT_AUTHENTICATION_PLUGIN};

/// Authentication plugin that completes every flow with a fixed key after a
/// short delay, standing in for a real user-facing prompt. The autotest
/// flavour backs the interactive scenarios in the daemon's test suite.
pub struct StaticKeyAuthPlugin {
    name: String,
    test: bool,
    auth_type: AuthenticationType,
    key: SecretKey,
    delay: Duration,
    failure: Option<Error>,
    begun: AtomicUsize,
}

impl StaticKeyAuthPlugin {
    pub fn new(name: impl Into<String>, key: SecretKey) -> Self {
        Self {
            name: name.into(),
            test: true,
            auth_type: AuthenticationType::SystemMediated,
            key,
            delay: Duration::from_millis(5),
            failure: None,
            begun: AtomicUsize::new(0),
        }
    }

    pub fn with_type(mut self, auth_type: AuthenticationType) -> Self {
        self.auth_type = auth_type;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every flow completes with this error instead of a key.
    pub fn failing_with(mut self, error: Error) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn production(mut self) -> Self {
        self.test = false;
        self
    }

    /// Number of flows begun so far.
    pub fn authentication_count(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }
}

impl Plugin for StaticKeyAuthPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_test(&self) -> bool {
        self.test
    }
}

impl AuthenticationPlugin for StaticKeyAuthPlugin {
    fn authentication_type(&self) -> AuthenticationType {
        self.auth_type
    }

    fn begin_authentication(
        &self,
        context: AuthenticationContext,
        sink: AuthenticationSink,
    ) -> Result<()> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        let outcome = match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.key.clone()),
        };
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.complete(context.request_id, outcome);
        });
        Ok(())
    }
}

/// The daemon-default authentication plugin for device-lock protected
/// entries. Confirmation is system mediated; a completed flow yields the
/// daemon-global device lock key.
pub struct DeviceLockAuthPlugin {
    test: bool,
    key: SecretKey,
    delay: Duration,
}

impl DeviceLockAuthPlugin {
    pub fn new(device_lock_key: SecretKey) -> Self {
        Self {
            test: false,
            key: device_lock_key,
            delay: Duration::from_millis(5),
        }
    }

    pub fn test(device_lock_key: SecretKey) -> Self {
        Self {
            test: true,
            key: device_lock_key,
            delay: Duration::from_millis(5),
        }
    }
}

impl Plugin for DeviceLockAuthPlugin {
    fn name(&self) -> &str {
        DEFAULT_AUTHENTICATION_PLUGIN
    }

    fn is_test(&self) -> bool {
        self.test
    }
}

impl AuthenticationPlugin for DeviceLockAuthPlugin {
    fn authentication_type(&self) -> AuthenticationType {
        AuthenticationType::SystemMediated
    }

    fn begin_authentication(
        &self,
        context: AuthenticationContext,
        sink: AuthenticationSink,
    ) -> Result<()> {
        let key = self.key.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.complete(context.request_id, Ok(key));
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn context(request_id: u64) -> AuthenticationContext {
        AuthenticationContext {
            caller_pid: 42,
            request_id,
            application_id: "app".into(),
            collection_name: "kv".into(),
            secret_name: "s".into(),
            ui_service_address: String::new(),
        }
    }

    #[tokio::test]
    async fn static_plugin_delivers_its_key() {
        let plugin = StaticKeyAuthPlugin::new("auth.test", SecretKey::from(b"k".as_slice()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        plugin
            .begin_authentication(context(7), AuthenticationSink::new(tx))
            .unwrap();

        let completed = rx.recv().await.unwrap();
        assert_eq!(completed.request_id, 7);
        assert_eq!(completed.outcome.unwrap().as_bytes(), b"k");
        assert_eq!(plugin.authentication_count(), 1);
    }

    #[tokio::test]
    async fn failing_plugin_reports_the_configured_error() {
        let plugin = StaticKeyAuthPlugin::new("auth.test", SecretKey::empty())
            .failing_with(Error::OperationRequiresUserInteraction("auth.test".into()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        plugin
            .begin_authentication(context(9), AuthenticationSink::new(tx))
            .unwrap();

        let completed = rx.recv().await.unwrap();
        assert!(matches!(
            completed.outcome,
            Err(Error::OperationRequiresUserInteraction(_))
        ));
    }
}
