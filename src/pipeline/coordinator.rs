//! Session coordinator: the single-consumer event loop around a
//! [`TurnController`].
//!
//! Collaborators and the UI push [`SessionEvent`]s through cloned
//! [`EventSink`]s. The coordinator drains them one at a time, so every
//! transition is evaluated against the controller's current state.

use crate::pipeline::controller::TurnController;
use crate::pipeline::messages::{EventSink, SessionEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receiving half of a session channel.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the channel a session runs on.
///
/// The sink is handed to collaborators before the controller exists; the
/// receiver goes to [`SessionCoordinator::new`].
pub fn session_channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}

/// Drives a [`TurnController`] until cancelled.
pub struct SessionCoordinator {
    controller: TurnController,
    events: EventReceiver,
    cancel: CancellationToken,
}

impl SessionCoordinator {
    pub fn new(controller: TurnController, events: EventReceiver) -> Self {
        Self {
            controller,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops [`run`](Self::run).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    /// Process events until cancelled or until every sink is dropped.
    ///
    /// Active collaborators are stopped on the way out and the controller is
    /// handed back so callers can inspect the final conversation.
    pub async fn run(self) -> TurnController {
        let Self {
            mut controller,
            mut events,
            cancel,
        } = self;
        info!(state = %controller.state(), "session coordinator started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session coordinator cancelled");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("all event sinks dropped, stopping session");
                        break;
                    };
                    let state = controller.handle(event).await;
                    debug!(%state, "event processed");
                }
            }
        }

        controller.shutdown().await;
        controller
    }
}
