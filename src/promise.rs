//! Write-once completion handle for one in-flight request
//!
//! A [`ResponsePromise`] travels with the request it resolves: the router
//! creates it, and every hop (group coordinator, device handler) receives the
//! promise itself rather than a copy of the request. Whoever holds it last is
//! responsible for resolving it. Dropping an unresolved promise fails the
//! request with its default error, so a crashed handler never leaves a
//! requester waiting.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::message::{
    ErrorDescription, ErrorKind, Reply, RequestId, RequestPtr, RequestResult, RequestState,
    Response,
};

/// Misuse of a promise by a handler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromiseError {
    #[error("request {0} already resolved")]
    AlreadyResolved(RequestId),
}

/// Single-fulfillment handle for a request
#[derive(Debug)]
pub struct ResponsePromise {
    request: RequestPtr,
    reply: Option<oneshot::Sender<Reply>>,
    progress: Option<mpsc::UnboundedSender<RequestState>>,
    observer: Option<mpsc::UnboundedSender<RequestState>>,
    default_error: ErrorDescription,
    resolved: bool,
}

impl ResponsePromise {
    /// Create a promise that delivers its completion to `reply`
    #[must_use]
    pub fn new(request: RequestPtr, reply: oneshot::Sender<Reply>) -> Self {
        Self {
            request,
            reply: Some(reply),
            progress: None,
            observer: None,
            default_error: ErrorDescription::with_detail(
                ErrorKind::ReceiverUnreachable,
                "handler disconnected",
            ),
            resolved: false,
        }
    }

    /// Create a promise together with the receiving end of its completion
    #[must_use]
    pub fn pair(request: RequestPtr) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(request, tx), rx)
    }

    /// Route progress signals to the requester
    #[must_use]
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<RequestState>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach a supervisory observer that receives the terminal result
    pub fn observe(&mut self, observer: mpsc::UnboundedSender<RequestState>) {
        self.observer = Some(observer);
    }

    /// Error delivered if the promise is dropped unresolved
    pub fn set_default_error(&mut self, error: impl Into<ErrorDescription>) {
        self.default_error = error.into();
    }

    #[must_use]
    pub const fn request(&self) -> &RequestPtr {
        &self.request
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.request.id()
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Report progress in percent; ignored once the promise is resolved
    pub fn report_progress(&self, percent: u8) {
        if self.resolved {
            return;
        }
        if let Some(progress) = &self.progress {
            let _ = progress.send(RequestState::progress(self.request.clone(), percent));
        }
    }

    /// Report `part` of `whole` mapped into the `shift..=limit` percent range
    ///
    /// Used when one request is served in stages: a stage covering 20..60
    /// reports `report_progress_ratio(n, total, 20, 60)`. Completion (100) is
    /// never reported unless `part == whole`.
    pub fn report_progress_ratio(&self, part: u64, whole: u64, shift: u8, limit: u8) {
        if whole == 0 {
            return;
        }
        let shift = u128::from(shift.min(100));
        let limit = u128::from(limit.min(100)).max(shift);
        let part = part.min(whole);

        let mut percent = shift + (limit - shift) * u128::from(part) / u128::from(whole);
        if percent >= 100 && part != whole {
            percent = 99;
        }
        self.report_progress(u8::try_from(percent).unwrap_or(100));
    }

    /// Resolve successfully with a response body
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyResolved`] if the promise was already
    /// resolved; nothing is delivered in that case.
    pub fn resolve(&mut self, body: Value) -> Result<(), PromiseError> {
        let response = Response::new(self.id(), body);
        self.complete(Ok(response), RequestResult::Done)
    }

    /// Resolve successfully with an empty body
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyResolved`] if the promise was already
    /// resolved.
    pub fn done(&mut self) -> Result<(), PromiseError> {
        self.resolve(Value::Null)
    }

    /// Resolve with a terminal failure
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyResolved`] if the promise was already
    /// resolved.
    pub fn fail(&mut self, error: impl Into<ErrorDescription>) -> Result<(), PromiseError> {
        let error = error.into();
        let result = if error.is_canceled() {
            RequestResult::Canceled
        } else {
            RequestResult::Failed
        };
        self.complete(Err(error), result)
    }

    /// Confirm cancellation
    ///
    /// # Errors
    ///
    /// Returns [`PromiseError::AlreadyResolved`] if the promise was already
    /// resolved.
    pub fn cancel(&mut self) -> Result<(), PromiseError> {
        self.fail(ErrorKind::Canceled)
    }

    fn complete(&mut self, reply: Reply, result: RequestResult) -> Result<(), PromiseError> {
        if self.resolved {
            tracing::warn!(request_id = %self.id(), "promise resolved twice, ignoring");
            return Err(PromiseError::AlreadyResolved(self.id()));
        }
        self.resolved = true;

        if let Some(reply_tx) = self.reply.take()
            && reply_tx.send(reply).is_err()
        {
            tracing::debug!(request_id = %self.id(), "requester gone before completion");
        }

        if let Some(observer) = &self.observer {
            let _ = observer.send(RequestState::finished(self.request.clone(), result));
        }

        Ok(())
    }
}

impl Drop for ResponsePromise {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        tracing::debug!(
            request_id = %self.id(),
            request = self.request.name(),
            error = %self.default_error,
            "promise dropped unresolved"
        );
        let error = self.default_error.clone();
        let _ = self.complete(Err(error), RequestResult::Failed);
    }
}
