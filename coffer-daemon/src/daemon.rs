//! Daemon assembly: the dispatcher task driving the request queue, the
//! processor, authentication completions and relock timers.

use std::sync::Arc;

use coffer_core::{
    AuthenticationOutcome, AuthenticationSink, PluginRegistry, SecretKey, WireResult,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::catalogue::Catalogue;
use crate::crypto::CryptoHelper;
use crate::facade::SecretsFacade;
use crate::permissions::CallerPermissions;
use crate::processor::RequestProcessor;
use crate::queue::RequestQueue;
use crate::request::{
    CompletedRequest, CryptoHelperKind, CryptoSignal, DaemonEvent, RequestOrigin,
};

/// The dispatcher. All request progression happens on the task running
/// [`Daemon::run`]; the only suspension points are authentication flows,
/// relock timers and the queue's cooperative yield.
pub struct Daemon {
    core: DispatcherCore,
    events_rx: UnboundedReceiver<DaemonEvent>,
    auth_rx: UnboundedReceiver<AuthenticationOutcome>,
}

struct DispatcherCore {
    queue: RequestQueue,
    processor: RequestProcessor,
    events_tx: UnboundedSender<DaemonEvent>,
    crypto_signals: UnboundedSender<CryptoSignal>,
}

impl Daemon {
    /// Wire up a daemon around the given catalogue and plugins. Returns the
    /// dispatcher itself, the client façade, the crypto helper surface and
    /// the stream of crypto completion signals.
    pub fn new(
        catalogue: Arc<Catalogue>,
        registry: Arc<PluginRegistry>,
        permissions: Arc<dyn CallerPermissions>,
        device_lock_key: SecretKey,
        queue_capacity: usize,
    ) -> (
        Daemon,
        SecretsFacade,
        CryptoHelper,
        UnboundedReceiver<CryptoSignal>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let (crypto_tx, crypto_rx) = mpsc::unbounded_channel();

        let processor = RequestProcessor::new(
            Arc::clone(&catalogue),
            Arc::clone(&registry),
            permissions,
            device_lock_key,
            AuthenticationSink::new(auth_tx),
            events_tx.clone(),
        );

        let daemon = Daemon {
            core: DispatcherCore {
                queue: RequestQueue::new(queue_capacity),
                processor,
                events_tx: events_tx.clone(),
                crypto_signals: crypto_tx,
            },
            events_rx,
            auth_rx,
        };
        let facade = SecretsFacade::new(events_tx.clone());
        let crypto = CryptoHelper::new(events_tx, catalogue, registry);

        (daemon, facade, crypto, crypto_rx)
    }

    /// Run the dispatcher until the process shuts down.
    pub async fn run(self) {
        let Daemon {
            mut core,
            mut events_rx,
            mut auth_rx,
        } = self;
        info!("secrets daemon dispatcher running");
        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => core.handle_event(event),
                    None => break,
                },
                outcome = auth_rx.recv() => match outcome {
                    Some(outcome) => core.handle_authentication(outcome),
                    None => break,
                },
            }
        }
        debug!("dispatcher channels closed; stopping");
    }
}

impl DispatcherCore {
    fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::Request {
                caller_pid,
                input,
                origin,
            } => match self.queue.enqueue(caller_pid, input, origin) {
                Ok(_) => self.dispatch(),
                Err(rejected) => deliver(
                    &self.crypto_signals,
                    rejected.origin,
                    CompletedRequest::result_only(WireResult::failed(&rejected.error)),
                ),
            },
            DaemonEvent::Dispatch => self.dispatch(),
            DaemonEvent::RelockCollection { collection_name } => {
                self.processor.relock_collection(&collection_name);
            }
            DaemonEvent::RelockStandaloneSecret { hashed_secret_name } => {
                self.processor.relock_standalone_secret(&hashed_secret_name);
            }
        }
    }

    fn handle_authentication(&mut self, outcome: AuthenticationOutcome) {
        let (request_id, completed) = self.processor.authentication_completed(outcome);
        if self.queue.request_finished(request_id, completed) {
            self.dispatch();
        }
    }

    fn dispatch(&mut self) {
        let DispatcherCore {
            queue,
            processor,
            events_tx,
            crypto_signals,
        } = self;
        let yielded = queue.dispatch(
            |request_id, caller_pid, input| processor.handle(request_id, caller_pid, input),
            |origin, outcome| deliver(crypto_signals, origin, outcome),
        );
        if yielded {
            let _ = events_tx.send(DaemonEvent::Dispatch);
        }
    }
}

/// Send a finished request's outcome back to its origin. A client that has
/// gone away simply never sees the reply; crypto-origin requests fire their
/// completion signal instead.
fn deliver(
    crypto_signals: &UnboundedSender<CryptoSignal>,
    origin: RequestOrigin,
    outcome: CompletedRequest,
) {
    match origin {
        RequestOrigin::Client { reply } => {
            if reply.send(outcome).is_err() {
                debug!("discarding reply for disconnected client");
            }
        }
        RequestOrigin::Crypto {
            crypto_request_id,
            kind,
        } => {
            let signal = match kind {
                CryptoHelperKind::StoreKey => CryptoSignal::StoreKeyCompleted {
                    crypto_request_id,
                    result: outcome.result,
                },
                CryptoHelperKind::StoredKey => CryptoSignal::StoredKeyCompleted {
                    crypto_request_id,
                    result: outcome.result,
                    serialised_key: outcome.body.into_secret(),
                },
                CryptoHelperKind::DeleteStoredKey => CryptoSignal::DeleteStoredKeyCompleted {
                    crypto_request_id,
                    result: outcome.result,
                },
            };
            if crypto_signals.send(signal).is_err() {
                debug!("discarding crypto completion signal: no subscriber");
            }
        }
    }
}
