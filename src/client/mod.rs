//! Client correlation table
//!
//! Lets a single-threaded presentation context issue requests and receive
//! their completions without blocking. A bridge task talks to the router on
//! the context's behalf and queues every completion, state signal and
//! notification; the context drains that queue with
//! [`ClientExchange::dispatch_pending`] whenever [`ClientExchange::waker`]
//! fires, and callbacks run on the draining thread.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::Result;
use crate::handler::UiEvent;
use crate::message::{
    Cancel, ErrorDescription, ErrorKind, LogLevel, LogRecord, Notification, NotificationPtr,
    Reply, RequestId, RequestPtr, RequestResult, RequestState, Response, StateSignal,
};
use crate::router::RouterHandle;

type SuccessFn = Box<dyn FnOnce(Response) + Send>;
type ErrorFn = Box<dyn FnOnce(ErrorDescription) + Send>;
type ProgressFn = Box<dyn FnMut(u8) + Send>;
type NotificationFn = Box<dyn FnMut(&Notification) + Send>;

/// Completion callbacks for one request
#[derive(Default)]
pub struct Callbacks {
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    on_progress: Option<ProgressFn>,
}

impl Callbacks {
    /// Callbacks that ignore every outcome
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_success(f: impl FnOnce(Response) + Send + 'static) -> Self {
        Self {
            on_success: Some(Box::new(f)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_error(mut self, f: impl FnOnce(ErrorDescription) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_progress(mut self, f: impl FnMut(u8) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    fn succeed(self, response: Response) {
        if let Some(f) = self.on_success {
            f(response);
        }
    }

    fn fail(self, id: RequestId, error: ErrorDescription) {
        match self.on_error {
            Some(f) => f(error),
            None => tracing::debug!(request_id = %id, error = %error, "unhandled request failure"),
        }
    }

    fn progress(&mut self, percent: u8) {
        if let Some(f) = &mut self.on_progress {
            f(percent);
        }
    }
}

struct PendingEntry {
    request: RequestPtr,
    callbacks: Callbacks,
    cancelable: bool,
    canceling: bool,
}

#[derive(Debug)]
enum Outbound {
    Submit(RequestPtr),
    Cancel(Cancel),
    Log(LogRecord),
}

#[derive(Debug)]
enum BridgeEvent {
    Completed(RequestId, Reply),
    State(RequestState),
    Notification(NotificationPtr),
}

/// UI-side view of the exchange
pub struct ClientExchange {
    router: RouterHandle,
    outbox: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    wake: Arc<Notify>,
    pending: HashMap<RequestId, PendingEntry>,
    on_notification: Option<NotificationFn>,
    disconnected: bool,
}

impl ClientExchange {
    /// Register as a UI client and start the bridge task
    ///
    /// # Errors
    ///
    /// Returns an error if the router has shut down.
    pub async fn connect(router: &RouterHandle) -> Result<Self> {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        router.register_ui(ui_tx).await?;

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let wake = Arc::new(Notify::new());

        tokio::spawn(bridge(
            router.clone(),
            outbox_rx,
            ui_rx,
            events_tx,
            Arc::clone(&wake),
        ));

        Ok(Self {
            router: router.clone(),
            outbox,
            events,
            wake,
            pending: HashMap::new(),
            on_notification: None,
            disconnected: false,
        })
    }

    /// Notified whenever events are waiting to be dispatched
    #[must_use]
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Callback for every broadcast notification
    pub fn on_notification(&mut self, f: impl FnMut(&Notification) + Send + 'static) {
        self.on_notification = Some(Box::new(f));
    }

    /// Store callbacks for `request` and hand it to the router
    ///
    /// # Errors
    ///
    /// Fails with `CoreDisconnected` when the router cannot be reached, and
    /// with `CmdFailed` when the same request is already pending. In both
    /// cases the callbacks are dropped without being called.
    pub fn submit(
        &mut self,
        request: RequestPtr,
        callbacks: Callbacks,
        cancelable: bool,
    ) -> std::result::Result<RequestId, ErrorDescription> {
        let id = request.id();
        if self.disconnected || self.router.is_closed() {
            return Err(ErrorKind::CoreDisconnected.into());
        }
        if self.pending.contains_key(&id) {
            return Err(ErrorDescription::with_detail(
                ErrorKind::CmdFailed,
                "request already pending",
            ));
        }

        self.pending.insert(
            id,
            PendingEntry {
                request: Arc::clone(&request),
                callbacks,
                cancelable,
                canceling: false,
            },
        );
        if self.outbox.send(Outbound::Submit(request)).is_err() {
            self.pending.remove(&id);
            return Err(ErrorKind::CoreDisconnected.into());
        }

        tracing::debug!(request_id = %id, "request submitted");
        Ok(id)
    }

    /// Ask for cancellation of a pending request
    ///
    /// Returns `false` without sending anything when the id is unknown, the
    /// request is not cancelable, or a cancel is already in flight.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let Some(entry) = self.pending.get_mut(&id) else {
            return false;
        };
        if !entry.cancelable || entry.canceling {
            return false;
        }
        entry.canceling = true;

        let cancel = Cancel::new(Arc::clone(&entry.request));
        self.outbox.send(Outbound::Cancel(cancel)).is_ok()
    }

    /// Broadcast a log line from this client
    ///
    /// # Errors
    ///
    /// Fails with `CoreDisconnected` when the router cannot be reached.
    pub fn log(
        &self,
        level: LogLevel,
        text: impl Into<String>,
    ) -> std::result::Result<(), ErrorDescription> {
        self.outbox
            .send(Outbound::Log(LogRecord::new(level, "ui", text)))
            .map_err(|_| ErrorKind::CoreDisconnected.into())
    }

    #[must_use]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Run callbacks for every queued event without waiting
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnect();
                    break;
                }
            }
        }
        handled
    }

    /// Wait for one event and run its callbacks
    ///
    /// Returns `false` once the bridge to the router is gone.
    pub async fn dispatch_next(&mut self) -> bool {
        if let Some(event) = self.events.recv().await {
            self.handle_event(event);
            true
        } else {
            self.disconnect();
            false
        }
    }

    fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Completed(id, reply) => {
                let Some(entry) = self.pending.remove(&id) else {
                    tracing::trace!(request_id = %id, "completion for finished request");
                    return;
                };
                match reply {
                    Ok(response) => entry.callbacks.succeed(response),
                    Err(error) => entry.callbacks.fail(id, error),
                }
            }
            BridgeEvent::State(state) => self.handle_state(&state),
            BridgeEvent::Notification(note) => {
                if let Some(f) = &mut self.on_notification {
                    f(&note);
                }
            }
        }
    }

    fn handle_state(&mut self, state: &RequestState) {
        let id = state.request_id();
        // Relayed states may arrive for requests this client never submitted
        let entry = self.pending.entry(id).or_insert_with(|| PendingEntry {
            request: Arc::clone(state.request()),
            callbacks: Callbacks::silent(),
            cancelable: true,
            canceling: false,
        });

        match state.signal() {
            StateSignal::Progress(percent) => entry.callbacks.progress(percent),
            StateSignal::Finished(result) => {
                let Some(entry) = self.pending.remove(&id) else {
                    return;
                };
                match result {
                    RequestResult::Done => entry.callbacks.succeed(Response::empty(id)),
                    RequestResult::Failed => entry.callbacks.fail(id, ErrorKind::CmdFailed.into()),
                    RequestResult::Canceled => entry.callbacks.fail(id, ErrorKind::Canceled.into()),
                }
            }
        }
    }

    /// Fail everything still pending once the router is unreachable
    fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        tracing::warn!(pending = self.pending.len(), "router disconnected");
        for (id, entry) in self.pending.drain() {
            entry.callbacks.fail(id, ErrorKind::CoreDisconnected.into());
        }
    }
}

/// Forward between the router and the client's event queue
async fn bridge(
    router: RouterHandle,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    mut ui: mpsc::UnboundedReceiver<UiEvent>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    wake: Arc<Notify>,
) {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let mut completions = FuturesUnordered::new();

    loop {
        let event = tokio::select! {
            biased;

            Some((id, reply)) = completions.next(), if !completions.is_empty() => {
                BridgeEvent::Completed(id, reply)
            }
            Some(state) = progress_rx.recv() => BridgeEvent::State(state),
            ui_event = ui.recv() => match ui_event {
                Some(UiEvent::Notification(note)) => BridgeEvent::Notification(note),
                Some(UiEvent::State(state)) => BridgeEvent::State(state),
                None => break,
            },
            outbound = outbox.recv() => {
                match outbound {
                    Some(Outbound::Submit(request)) => {
                        let id = request.id();
                        let (reply, completion) = oneshot::channel();
                        // A closed router drops `reply`, which completes as disconnected
                        let _ = router.submit_with(request, reply, Some(progress_tx.clone())).await;
                        completions.push(async move {
                            let reply = completion
                                .await
                                .unwrap_or_else(|_| Err(ErrorKind::CoreDisconnected.into()));
                            (id, reply)
                        });
                    }
                    Some(Outbound::Cancel(cancel)) => {
                        let _ = router.cancel(cancel).await;
                    }
                    Some(Outbound::Log(record)) => {
                        let _ = router.log(record).await;
                    }
                    None => break,
                }
                continue;
            }
        };

        if events.send(event).is_err() {
            break;
        }
        wake.notify_one();
    }

    // Completions already resolved still reach the client
    while let Some(Some((id, reply))) = futures::FutureExt::now_or_never(completions.next()) {
        let _ = events.send(BridgeEvent::Completed(id, reply));
    }
    wake.notify_one();
    tracing::debug!("client bridge stopped");
}
