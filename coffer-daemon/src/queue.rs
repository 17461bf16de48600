//! Ordered queue of in-flight requests with cooperative dispatch.

use std::time::{Duration, Instant};

use coffer_core::{Error, WireResult};
use tracing::{debug, warn};

use crate::request::{CompletedRequest, RequestInput, RequestOrigin, ResponseBody};

/// How long one dispatch pass may run before yielding back to the event loop.
pub const YIELD_BUDGET: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    InProgress,
    Finished,
}

pub struct RequestData {
    pub request_id: u64,
    pub caller_pid: u32,
    pub status: RequestStatus,
    pub input: RequestInput,
    pub origin: RequestOrigin,
    outcome: Option<CompletedRequest>,
}

/// What a handler did with a pending request.
pub enum HandlerProgress {
    /// The request suspended on an asynchronous flow; leave it queued.
    Pending,
    /// The request ran to completion.
    Complete(CompletedRequest),
}

/// An enqueue that failed, returning the origin so the rejection can still
/// be delivered to it.
#[derive(Debug)]
pub struct RejectedRequest {
    pub error: Error,
    pub origin: RequestOrigin,
}

pub struct RequestQueue {
    requests: Vec<RequestData>,
    next_request_id: u64,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            requests: Vec::new(),
            next_request_id: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Assign an identifier and append the request.
    ///
    /// Identifiers come from a monotonic counter, probing past any value
    /// still held by an in-flight request. The pending capacity bounds the
    /// identifier space; at capacity the enqueue fails rather than risking a
    /// collision.
    pub fn enqueue(
        &mut self,
        caller_pid: u32,
        input: RequestInput,
        origin: RequestOrigin,
    ) -> Result<u64, RejectedRequest> {
        if self.requests.len() >= self.capacity {
            warn!(
                verb = input.verb_name(),
                queued = self.requests.len(),
                "cannot enqueue request: queue is full"
            );
            return Err(RejectedRequest {
                error: Error::RequestQueueFull,
                origin,
            });
        }

        loop {
            self.next_request_id = self.next_request_id.wrapping_add(1);
            let candidate = self.next_request_id;
            if !self
                .requests
                .iter()
                .any(|request| request.request_id == candidate)
            {
                break;
            }
        }

        let request_id = self.next_request_id;
        debug!(verb = input.verb_name(), request_id, "enqueuing request");
        self.requests.push(RequestData {
            request_id,
            caller_pid,
            status: RequestStatus::Pending,
            input,
            origin,
            outcome: None,
        });
        Ok(request_id)
    }

    /// Mark a suspended request finished with its final outcome. Returns
    /// false when no such request is queued.
    pub fn request_finished(&mut self, request_id: u64, outcome: CompletedRequest) -> bool {
        match self
            .requests
            .iter_mut()
            .find(|request| request.request_id == request_id)
        {
            Some(request) => {
                request.status = RequestStatus::Finished;
                request.outcome = Some(outcome);
                true
            }
            None => {
                warn!(request_id, "unable to finish unknown request");
                false
            }
        }
    }

    /// One cooperative dispatch pass.
    ///
    /// Walks the queue in order: pending requests are handed to `handle`,
    /// finished ones have their stored outcome delivered, in-progress ones
    /// are skipped. Returns true when the wall-clock budget ran out with
    /// requests still queued, in which case the caller must re-post a
    /// dispatch event.
    pub fn dispatch(
        &mut self,
        mut handle: impl FnMut(u64, u32, &RequestInput) -> HandlerProgress,
        mut deliver: impl FnMut(RequestOrigin, CompletedRequest),
    ) -> bool {
        let started = Instant::now();
        let mut index = 0;
        while index < self.requests.len() {
            match self.requests[index].status {
                RequestStatus::Pending => {
                    self.requests[index].status = RequestStatus::InProgress;
                    let request = &self.requests[index];
                    match handle(request.request_id, request.caller_pid, &request.input) {
                        HandlerProgress::Pending => index += 1,
                        HandlerProgress::Complete(outcome) => {
                            let request = self.requests.remove(index);
                            deliver(request.origin, outcome);
                        }
                    }
                }
                RequestStatus::Finished => {
                    let request = self.requests.remove(index);
                    let outcome = request.outcome.unwrap_or_else(|| {
                        CompletedRequest::new(
                            WireResult::failed(&Error::Unknown(
                                "unable to determine result of finished request".into(),
                            )),
                            ResponseBody::None,
                        )
                    });
                    deliver(request.origin, outcome);
                }
                RequestStatus::InProgress => index += 1,
            }

            if !self.requests.is_empty() && started.elapsed() > YIELD_BUDGET {
                debug!(
                    queued = self.requests.len(),
                    "yielding to event loop mid-dispatch"
                );
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::UserInteractionMode;

    fn input(name: &str) -> RequestInput {
        RequestInput::DeleteStandaloneSecret {
            secret_name: name.to_string(),
            interaction_mode: UserInteractionMode::Prevent,
        }
    }

    fn client_origin() -> (
        RequestOrigin,
        tokio::sync::oneshot::Receiver<CompletedRequest>,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (RequestOrigin::Client { reply: tx }, rx)
    }

    #[test]
    fn identifiers_are_distinct_while_in_flight() {
        let mut queue = RequestQueue::new(8);
        let mut ids = Vec::new();
        for i in 0..5 {
            let (origin, _rx) = client_origin();
            ids.push(queue.enqueue(1, input(&i.to_string()), origin).unwrap());
        }
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn enqueue_fails_when_saturated() {
        let mut queue = RequestQueue::new(2);
        let (a, _ra) = client_origin();
        let (b, _rb) = client_origin();
        let (c, _rc) = client_origin();
        queue.enqueue(1, input("a"), a).unwrap();
        queue.enqueue(1, input("b"), b).unwrap();
        let rejected = queue.enqueue(1, input("c"), c).err().unwrap();
        assert!(matches!(rejected.error, Error::RequestQueueFull));
    }

    #[test]
    fn dispatch_completes_pending_requests_in_order() {
        let mut queue = RequestQueue::new(8);
        let (a, _ra) = client_origin();
        let (b, _rb) = client_origin();
        queue.enqueue(1, input("first"), a).unwrap();
        queue.enqueue(1, input("second"), b).unwrap();

        let mut handled = Vec::new();
        let yielded = queue.dispatch(
            |_, _, input| {
                if let RequestInput::DeleteStandaloneSecret { secret_name, .. } = input {
                    handled.push(secret_name.clone());
                }
                HandlerProgress::Complete(CompletedRequest::result_only(WireResult::succeeded()))
            },
            |_, _| {},
        );
        assert!(!yielded);
        assert_eq!(handled, vec!["first", "second"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn suspended_request_stays_until_finished() {
        let mut queue = RequestQueue::new(8);
        let (origin, _rx) = client_origin();
        let id = queue.enqueue(1, input("s"), origin).unwrap();

        queue.dispatch(|_, _, _| HandlerProgress::Pending, |_, _| {});
        assert_eq!(queue.len(), 1);

        // Later dispatch passes skip the in-progress record.
        let mut handled = 0;
        queue.dispatch(
            |_, _, _| {
                handled += 1;
                HandlerProgress::Pending
            },
            |_, _| {},
        );
        assert_eq!(handled, 0);

        assert!(queue.request_finished(
            id,
            CompletedRequest::result_only(WireResult::succeeded())
        ));
        let mut delivered = 0;
        queue.dispatch(|_, _, _| HandlerProgress::Pending, |_, _| delivered += 1);
        assert_eq!(delivered, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn finishing_an_unknown_request_is_reported() {
        let mut queue = RequestQueue::new(8);
        assert!(!queue.request_finished(
            42,
            CompletedRequest::result_only(WireResult::succeeded())
        ));
    }

    #[test]
    fn dispatch_yields_once_the_budget_is_spent() {
        let mut queue = RequestQueue::new(8);
        for i in 0..3 {
            let (origin, _rx) = client_origin();
            queue.enqueue(1, input(&i.to_string()), origin).unwrap();
        }

        let mut handled = 0;
        let yielded = queue.dispatch(
            |_, _, _| {
                handled += 1;
                std::thread::sleep(YIELD_BUDGET + Duration::from_millis(5));
                HandlerProgress::Complete(CompletedRequest::result_only(WireResult::succeeded()))
            },
            |_, _| {},
        );
        assert!(yielded);
        assert_eq!(handled, 1);
        assert_eq!(queue.len(), 2);
    }
}
