//! Drives one conversation: send, decode, reduce, dispatch.
//!
//! A turn runs `Idle -> Sending -> Streaming -> Idle`. Every path out of a
//! turn, successful or not, lands back in `Idle` with the placeholder message
//! finalized, so the next `send` is always accepted.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::decoder::decode_stream;
use crate::error::ChatError;
use crate::event::StreamEvent;
use crate::markers::{MarkerRegistry, SideEffectDispatcher};
use crate::session::{SessionGuard, LOGIN_REQUIRED_TEXT, SESSION_EXPIRED_TEXT};
use crate::transcript::{reduce, MessageId, Transcript};

pub const GENERIC_FAILURE_TEXT: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Sending,
    Streaming,
}

/// Why a `send` was refused without touching the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyMessage,
    Busy,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed(MessageId),
    Failed { id: MessageId, error: ChatError },
}

impl TurnOutcome {
    pub fn id(&self) -> MessageId {
        match self {
            TurnOutcome::Completed(id) => *id,
            TurnOutcome::Failed { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTurn {
    id: MessageId,
    message: String,
}

pub struct ChatSessionController {
    state: ControllerState,
    transcript: Transcript,
    active: Option<PendingTurn>,
    backend: Arc<dyn ChatBackend>,
    guard: SessionGuard,
    dispatcher: SideEffectDispatcher,
    updates: watch::Sender<Transcript>,
}

impl ChatSessionController {
    pub fn new(backend: Arc<dyn ChatBackend>, guard: SessionGuard) -> Self {
        let transcript = Transcript::new();
        let (updates, _) = watch::channel(transcript.clone());
        Self {
            state: ControllerState::Idle,
            transcript,
            active: None,
            backend,
            guard,
            dispatcher: SideEffectDispatcher::default(),
            updates,
        }
    }

    pub fn with_markers(mut self, registry: MarkerRegistry) -> Self {
        self.dispatcher = SideEffectDispatcher::new(registry);
        self
    }

    /// Replaces the starting transcript, e.g. with one holding a greeting.
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self.publish();
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    /// Receives a snapshot after every change to the transcript.
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.updates.subscribe()
    }

    /// Sends `text` and runs the turn to completion.
    pub async fn send(&mut self, text: &str) -> Result<TurnOutcome, Rejection> {
        self.begin_turn(text)?;
        match self.active.clone() {
            Some(turn) => Ok(self.run_turn(turn).await),
            None => Err(Rejection::Busy),
        }
    }

    /// Appends the user message and the streaming placeholder without any
    /// I/O. Follow with [`drive_turn`](Self::drive_turn).
    pub fn begin_turn(&mut self, text: &str) -> Result<MessageId, Rejection> {
        if text.trim().is_empty() {
            return Err(Rejection::EmptyMessage);
        }
        if self.state != ControllerState::Idle {
            debug!(state = ?self.state, "send rejected while a turn is in flight");
            return Err(Rejection::Busy);
        }

        self.state = ControllerState::Sending;
        let (transcript, _) = std::mem::take(&mut self.transcript).push_user(text);
        let (transcript, id) = transcript.push_placeholder();
        self.transcript = transcript;
        self.active = Some(PendingTurn {
            id,
            message: text.to_string(),
        });
        self.publish();

        Ok(id)
    }

    /// Runs the turn opened by [`begin_turn`](Self::begin_turn). Returns
    /// `None` when no turn is waiting to be sent.
    pub async fn drive_turn(&mut self) -> Option<TurnOutcome> {
        if self.state != ControllerState::Sending {
            return None;
        }
        let turn = self.active.clone()?;
        Some(self.run_turn(turn).await)
    }

    /// Finalizes a turn whose driving future was dropped before it finished.
    pub fn abandon_turn(&mut self) -> bool {
        let Some(turn) = self.active.take() else {
            return false;
        };
        warn!(id = %turn.id, state = ?self.state, "abandoning unfinished turn");
        self.transcript = std::mem::take(&mut self.transcript).fail(turn.id, GENERIC_FAILURE_TEXT);
        self.state = ControllerState::Idle;
        self.publish();
        true
    }

    async fn run_turn(&mut self, turn: PendingTurn) -> TurnOutcome {
        let outcome = match self.stream_turn(&turn).await {
            Ok(()) => {
                debug!(id = %turn.id, "turn completed");
                TurnOutcome::Completed(turn.id)
            }
            Err(error) => {
                self.recover(turn.id, &error);
                TurnOutcome::Failed { id: turn.id, error }
            }
        };

        self.active = None;
        self.state = ControllerState::Idle;
        self.publish();
        outcome
    }

    async fn stream_turn(&mut self, turn: &PendingTurn) -> Result<(), ChatError> {
        let token = self.guard.require_token()?;
        let body = self.backend.open_stream(&token, &turn.message).await?;
        self.state = ControllerState::Streaming;

        let events = decode_stream(body);
        let mut events = std::pin::pin!(events);
        while let Some(item) = events.next().await {
            let event = item?;
            debug!(id = %turn.id, event = event.tag(), "applying event");

            if let StreamEvent::Error(payload) = &event {
                let error = self.guard.classify(payload);
                if !matches!(error, ChatError::SessionExpired) {
                    self.apply(turn.id, &event);
                }
                return Err(error);
            }

            self.apply(turn.id, &event);

            if let StreamEvent::Done(done) = &event {
                let report = self.dispatcher.dispatch(done);
                if !report.is_empty() {
                    debug!(id = %turn.id, ?report, "markers dispatched");
                }
                return Ok(());
            }
        }

        debug!(id = %turn.id, "stream ended without a terminal event");
        self.transcript = std::mem::take(&mut self.transcript).settle(turn.id, GENERIC_FAILURE_TEXT);
        Ok(())
    }

    fn apply(&mut self, id: MessageId, event: &StreamEvent) {
        self.transcript = reduce(std::mem::take(&mut self.transcript), id, event);
        self.publish();
    }

    fn recover(&mut self, id: MessageId, error: &ChatError) {
        let text = match error {
            ChatError::SessionExpired => SESSION_EXPIRED_TEXT.to_string(),
            ChatError::Unauthenticated => LOGIN_REQUIRED_TEXT.to_string(),
            ChatError::BackendError(message) => message.clone(),
            ChatError::NetworkFailure(_) | ChatError::MalformedRecord { .. } => {
                GENERIC_FAILURE_TEXT.to_string()
            }
        };
        self.transcript = std::mem::take(&mut self.transcript).fail(id, text);

        if error.requires_login() {
            info!(%id, "{error}");
            self.guard.expire();
        } else {
            warn!(%id, "turn failed: {error}");
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.transcript.clone());
    }
}
