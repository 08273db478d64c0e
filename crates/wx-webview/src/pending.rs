//! Correlation of page-bound requests with their results.

use crate::backend::EvaluationOutcome;
use futures::channel::oneshot;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use tracing::debug;
use tracing::warn;
use wx_core::ErrorKind;
use wx_core::WebViewError;
use wx_core::WebViewResult;
use wx_ipc::RequestId;
use wx_ipc::Settlement;
use wx_ipc::parse_stringified_result;

/// Result delivered to a caller.
pub type BridgeOutcome = WebViewResult<Value>;

/// Eventual result of a request sent to the page.
///
/// Await it, or poll it with [`PendingResult::try_take`] while driving the
/// container.
#[derive(Debug)]
#[must_use = "a pending result does nothing unless awaited or polled"]
pub struct PendingResult {
    id: RequestId,
    receiver: oneshot::Receiver<BridgeOutcome>,
    taken: bool,
}

impl PendingResult {
    pub(crate) fn new(id: RequestId) -> (Self, oneshot::Sender<BridgeOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                id,
                receiver,
                taken: false,
            },
            sender,
        )
    }

    /// Result that is already settled with `error`.
    pub(crate) fn failed(id: RequestId, error: WebViewError) -> Self {
        let (pending, sender) = Self::new(id);
        let _ = sender.send(Err(error));
        pending
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Takes the result if it has arrived. Returns `None` while still pending
    /// and after the result has been taken once.
    pub fn try_take(&mut self) -> Option<BridgeOutcome> {
        if self.taken {
            return None;
        }

        let outcome = match self.receiver.try_recv() {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return None,
            Err(oneshot::Canceled) => Err(abandoned(self.id)),
        };
        self.taken = true;
        Some(outcome)
    }
}

impl Future for PendingResult {
    type Output = BridgeOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(abandoned(id))))
    }
}

fn abandoned(id: RequestId) -> WebViewError {
    WebViewError::new(
        ErrorKind::ChannelUnavailable,
        "bridge.request_abandoned",
        format!("request {id} was dropped before the page answered"),
    )
}

/// How a request's evaluation completion is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// The completion value is the result.
    Value { stringified: bool },
    /// The completion only confirms dispatch; the result arrives as a settlement.
    Promise,
}

#[derive(Debug)]
struct PendingRequest {
    kind: RequestKind,
    label: String,
    responder: Option<oneshot::Sender<BridgeOutcome>>,
}

impl PendingRequest {
    fn finish(self, id: RequestId, outcome: BridgeOutcome) {
        match self.responder {
            Some(responder) => {
                // The caller may have dropped its handle.
                let _ = responder.send(outcome);
            }
            None => {
                if let Err(error) = outcome {
                    warn!(request = %id, label = self.label.as_str(), %error, "internal page request failed");
                }
            }
        }
    }
}

/// Requests awaiting a page response, keyed by correlation token.
///
/// Every entry is removed exactly once: by its completion, its settlement or
/// a rejection.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    pub(crate) fn insert(
        &mut self,
        id: RequestId,
        kind: RequestKind,
        label: impl Into<String>,
        responder: Option<oneshot::Sender<BridgeOutcome>>,
    ) -> WebViewResult<()> {
        if self.entries.contains_key(&id) {
            return Err(WebViewError::new(
                ErrorKind::Protocol,
                "bridge.token_in_use",
                format!("request token {id} is already pending"),
            ));
        }

        self.entries.insert(
            id,
            PendingRequest {
                kind,
                label: label.into(),
                responder,
            },
        );
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Applies the platform's evaluation completion for `id`.
    pub(crate) fn complete_evaluation(&mut self, id: RequestId, outcome: EvaluationOutcome) {
        let Some(kind) = self.entries.get(&id).map(|request| request.kind) else {
            debug!(request = %id, "evaluation completed for a request that is no longer pending");
            return;
        };

        match (kind, outcome) {
            (RequestKind::Promise, Ok(_)) => {
                debug!(request = %id, "promise dispatched; awaiting settlement");
            }
            (RequestKind::Promise, Err(exception)) => {
                self.finish(
                    id,
                    Err(WebViewError::from_script(
                        "bridge.script_failed",
                        ErrorKind::ScriptEvaluation,
                        exception,
                    )),
                );
            }
            (RequestKind::Value { stringified }, Ok(value)) => {
                let result = if stringified {
                    parse_stringified_result(value)
                } else {
                    Ok(value)
                };
                self.finish(id, result);
            }
            (RequestKind::Value { .. }, Err(exception)) => {
                self.finish(
                    id,
                    Err(WebViewError::from_script(
                        "bridge.script_failed",
                        ErrorKind::ScriptEvaluation,
                        exception,
                    )),
                );
            }
        }
    }

    /// Applies a page-side promise settlement. Tokens that are unknown or do
    /// not belong to a promise request are ignored.
    pub(crate) fn settle(&mut self, settlement: Settlement) {
        let id = settlement.request_id;
        match self.entries.get(&id).map(|request| request.kind) {
            Some(RequestKind::Promise) => {}
            Some(RequestKind::Value { .. }) => {
                warn!(request = %id, "settlement addressed a non-promise request; ignoring");
                return;
            }
            None => {
                debug!(request = %id, "settlement for a request that is no longer pending");
                return;
            }
        }

        let outcome = settlement.outcome.map_err(|exception| {
            WebViewError::from_script("bridge.promise_rejected", ErrorKind::PromiseRejected, exception)
        });
        self.finish(id, outcome);
    }

    pub(crate) fn reject(&mut self, id: RequestId, error: WebViewError) {
        self.finish(id, Err(error));
    }

    fn finish(&mut self, id: RequestId, outcome: BridgeOutcome) {
        if let Some(request) = self.entries.remove(&id) {
            request.finish(id, outcome);
        }
    }
}
