//! Connection management and the read loop.
//!
//! [`ConnectionManager`] owns at most one live socket. Every outbound frame
//! goes through one lock, which is also held while dialing and while running
//! the close sequence, so frames never interleave. Each socket has its own
//! read loop task; all sink deliveries for that socket, including its final
//! `Close`, happen on that task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::{self, FailureKind, ReadFailure};
use crate::config::RetryPolicy;
use crate::error::Error;
use crate::flow::FlowController;
use crate::messages::{self, CloseMessage, ControlCommand, EventKind, InboundEvent, OpenMessage};
use crate::router::MessageRouter;
use crate::sink::Sink;
use crate::ws::{CloseReason, Dialer, Frame, Transport};

const NORMAL_CLOSE: u16 = 1000;

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket has been opened yet.
    Disconnected,
    /// Dialing.
    Connecting,
    /// A socket is open.
    Open,
    /// Running the close sequence.
    Closing,
    /// The last socket is gone.
    Terminated {
        /// Whether it ended without the close handshake.
        fatal: bool,
    },
}

/// Fixed behaviour of a manager.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub retry: RetryPolicy,
    pub close_grace: Duration,
    pub close_command: ControlCommand,
    pub log_frames: bool,
}

struct Session {
    id: String,
    transport: Arc<dyn Transport>,
    done: CancellationToken,
}

struct Link {
    session: Option<Arc<Session>>,
    retry: bool,
}

enum Step {
    Continue,
    Exit,
}

enum Wake {
    Done,
    Cancelled,
    Received(Result<Option<Frame>, Error>),
}

/// Owner of the socket, the retry loop and the writer lock.
pub struct ConnectionManager {
    dialer: Arc<dyn Dialer>,
    router: MessageRouter,
    flow: Option<Arc<FlowController>>,
    settings: Settings,
    link: Mutex<Link>,
    token: watch::Sender<CancellationToken>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub(crate) fn new(
        dialer: Arc<dyn Dialer>,
        sink: Arc<dyn Sink>,
        settings: Settings,
        flow: Option<Arc<FlowController>>,
        token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer,
            router: MessageRouter::new(sink),
            flow,
            settings,
            link: Mutex::new(Link {
                session: None,
                retry: true,
            }),
            token: watch::Sender::new(token),
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver of state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The cancellation token currently in force.
    pub fn token(&self) -> CancellationToken {
        self.token.borrow().clone()
    }

    /// Flushes sent and not yet acknowledged; zero without auto-flush.
    pub fn outstanding_flushes(&self) -> u64 {
        self.flow.as_ref().map_or(0, |f| f.outstanding())
    }

    pub(crate) fn flow(&self) -> Option<&Arc<FlowController>> {
        self.flow.as_ref()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    /// Connects unless a socket is already open.
    ///
    /// `token` replaces the cancellation token first; `allow_retry` re-enables
    /// dialing after `stop` or exhausted retries.
    pub(crate) async fn connect(
        self: &Arc<Self>,
        policy: RetryPolicy,
        token: Option<CancellationToken>,
        allow_retry: bool,
    ) -> Result<(), Error> {
        let mut link = self.link.lock().await;
        if let Some(token) = token {
            self.token.send_replace(token);
            if let Some(flow) = &self.flow {
                flow.halt();
            }
        }
        if allow_retry {
            link.retry = true;
        }
        self.obtain(&mut link, policy).await?;
        if let Some(flow) = &self.flow {
            flow.ensure_running(self, self.token());
        }
        Ok(())
    }

    /// Returns the open socket, dialing when allowed.
    async fn obtain(
        self: &Arc<Self>,
        link: &mut Link,
        policy: RetryPolicy,
    ) -> Result<Arc<dyn Transport>, Error> {
        if let Some(session) = &link.session {
            return Ok(Arc::clone(&session.transport));
        }
        let token = self.token();
        if token.is_cancelled() || !link.retry {
            return Err(Error::NoConnection);
        }
        self.dial(link, policy, token).await
    }

    async fn dial(
        self: &Arc<Self>,
        link: &mut Link,
        policy: RetryPolicy,
        token: CancellationToken,
    ) -> Result<Arc<dyn Transport>, Error> {
        self.set_state(ConnectionState::Connecting);
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(policy.delay_between_attempts).await;
                if token.is_cancelled() {
                    break;
                }
            }
            attempts = attempt;
            match self.dialer.dial().await {
                Ok(transport) => {
                    if token.is_cancelled() {
                        transport.shutdown().await;
                        break;
                    }
                    let session = Arc::new(Session {
                        id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
                        transport: Arc::clone(&transport),
                        done: CancellationToken::new(),
                    });
                    info!(session_id = %session.id, attempt, "Connected");
                    link.session = Some(Arc::clone(&session));
                    self.set_state(ConnectionState::Open);
                    tokio::spawn(Arc::clone(self).read_loop(session));
                    if let Some(flow) = &self.flow {
                        flow.ensure_running(self, token);
                    }
                    return Ok(transport);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Dial failed");
                }
            }
        }

        error!(attempts, "Giving up on connecting");
        link.retry = false;
        self.set_state(ConnectionState::Terminated { fatal: false });
        Err(Error::RetriesExhausted { attempts })
    }

    /// Sends one frame, dialing first if no socket is open and dialing is allowed.
    pub async fn write(self: &Arc<Self>, frame: Frame) -> Result<(), Error> {
        let mut link = self.link.lock().await;
        let transport = match self.obtain(&mut link, self.settings.retry).await {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "No connection for write");
                return Err(Error::NoConnection);
            }
        };
        if self.settings.log_frames {
            match &frame {
                Frame::Text(text) => debug!(frame = %text, "Sending text frame"),
                Frame::Binary(data) => debug!(len = data.len(), "Sending binary frame"),
                Frame::Close(reason) => debug!(reason = ?reason, "Sending close frame"),
            }
        }
        transport.send(frame).await
    }

    /// Sends a control command.
    pub async fn write_control(self: &Arc<Self>, command: &ControlCommand) -> Result<(), Error> {
        let json = messages::encode(command)?;
        self.write(Frame::Text(json)).await?;
        if let (ControlCommand::Flush, Some(flow)) = (command, &self.flow) {
            flow.record_flush();
        }
        Ok(())
    }

    /// Tears the socket down, forbids implicit reconnection and cancels the token.
    pub async fn stop(&self) {
        let mut link = self.link.lock().await;
        link.retry = false;
        self.token().cancel();
        match link.session.take() {
            Some(session) => self.teardown(&session, false).await,
            None => self.set_state(ConnectionState::Terminated { fatal: false }),
        }
    }

    /// Closes `session` if it is still the live one.
    async fn close_session(&self, session: &Arc<Session>, fatal: bool) {
        let mut link = self.link.lock().await;
        let current = matches!(&link.session, Some(s) if Arc::ptr_eq(s, session));
        if current {
            link.session = None;
            self.teardown(session, fatal).await;
        }
    }

    // Caller holds the link lock.
    async fn teardown(&self, session: &Session, fatal: bool) {
        info!(session_id = %session.id, fatal, "Closing connection");
        if !fatal {
            self.set_state(ConnectionState::Closing);
            match messages::encode(&self.settings.close_command) {
                Ok(json) => {
                    if let Err(e) = session.transport.send(Frame::Text(json)).await {
                        warn!(session_id = %session.id, error = %e, "Failed to send close command");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode close command"),
            }
            tokio::time::sleep(self.settings.close_grace).await;

            let close = Frame::Close(Some(CloseReason::new(NORMAL_CLOSE, "")));
            if let Err(e) = session.transport.send(close).await {
                warn!(session_id = %session.id, error = %e, "Failed to send close frame");
            }
            tokio::time::sleep(self.settings.close_grace).await;
        }
        session.transport.shutdown().await;
        self.set_state(ConnectionState::Terminated { fatal });
        session.done.cancel();
    }

    async fn read_loop(self: Arc<Self>, session: Arc<Session>) {
        debug!(session_id = %session.id, "Read loop started");
        let mut tokens = self.token.subscribe();
        let mut close_seen = false;
        self.deliver_guarded(InboundEvent::Open(OpenMessage::new()))
            .await;

        loop {
            let received = match self.next_wake(&session, &mut tokens).await {
                Wake::Done => break,
                Wake::Cancelled => {
                    debug!(session_id = %session.id, "Cancelled, closing connection");
                    self.close_session(&session, false).await;
                    break;
                }
                Wake::Received(received) => received,
            };
            if session.done.is_cancelled() {
                break;
            }
            if self.token().is_cancelled() {
                debug!(session_id = %session.id, "Cancelled, closing connection");
                self.close_session(&session, false).await;
                break;
            }

            let step = AssertUnwindSafe(self.handle(&session, received, &mut close_seen))
                .catch_unwind()
                .await;
            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Exit) => break,
                Err(panic) => {
                    let event = classify::panic_event(panic.as_ref());
                    error!(session_id = %session.id, err_msg = %event.err_msg, "Panic on read loop");
                    self.deliver_guarded(InboundEvent::Error(event)).await;
                    self.close_session(&session, true).await;
                    break;
                }
            }
        }

        if !close_seen {
            self.deliver_guarded(InboundEvent::Close(CloseMessage::new()))
                .await;
        }
        debug!(session_id = %session.id, "Read loop finished");
    }

    /// Waits for the next frame, the end of the session, or cancellation of
    /// whichever token is current. A pending read survives token replacement.
    async fn next_wake(
        &self,
        session: &Session,
        tokens: &mut watch::Receiver<CancellationToken>,
    ) -> Wake {
        let recv = session.transport.recv();
        tokio::pin!(recv);
        loop {
            let token = tokens.borrow_and_update().clone();
            tokio::select! {
                biased;
                _ = session.done.cancelled() => return Wake::Done,
                _ = token.cancelled() => {
                    if self.token().is_cancelled() {
                        return Wake::Cancelled;
                    }
                }
                // The sender lives in `self`, so this never fails here.
                changed = tokens.changed() => {
                    if changed.is_err() {
                        return Wake::Done;
                    }
                }
                received = &mut recv => return Wake::Received(received),
            }
        }
    }

    async fn handle(
        &self,
        session: &Arc<Session>,
        received: Result<Option<Frame>, Error>,
        close_seen: &mut bool,
    ) -> Step {
        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => return self.fail(session, ReadFailure::EndOfStream).await,
            Err(e) => return self.fail(session, ReadFailure::Transport(e)).await,
        };

        match frame {
            Frame::Text(text) => {
                if text.is_empty() {
                    return Step::Continue;
                }
                if self.settings.log_frames {
                    debug!(session_id = %session.id, frame = %text, "Received text frame");
                }
                let kind = match self.router.message(text.as_bytes()).await {
                    Ok(kind) => kind,
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "Dropping malformed message");
                        return Step::Continue;
                    }
                };
                match kind {
                    EventKind::Flushed => {
                        if let Some(flow) = &self.flow {
                            flow.acknowledge();
                        }
                        Step::Continue
                    }
                    EventKind::Error => {
                        warn!(session_id = %session.id, "Platform reported an error, closing");
                        self.close_session(session, false).await;
                        Step::Exit
                    }
                    EventKind::Close => {
                        info!(session_id = %session.id, "Platform closed the session");
                        *close_seen = true;
                        self.close_session(session, false).await;
                        Step::Exit
                    }
                    _ => Step::Continue,
                }
            }
            Frame::Binary(data) => {
                if data.is_empty() {
                    return Step::Continue;
                }
                if self.settings.log_frames {
                    debug!(session_id = %session.id, len = data.len(), "Received binary frame");
                }
                self.router.binary(data).await;
                Step::Continue
            }
            Frame::Close(reason) => self.fail(session, ReadFailure::Closed(reason)).await,
        }
    }

    async fn fail(&self, session: &Arc<Session>, failure: ReadFailure) -> Step {
        let retrying = self.link.lock().await.retry;
        let classification = classify::classify(&failure, retrying);
        match classification.kind {
            FailureKind::GracefulClose | FailureKind::ClosedSocket => {
                info!(session_id = %session.id, kind = ?classification.kind, "Connection closed");
            }
            kind => {
                error!(session_id = %session.id, ?kind, failure = ?failure, "Read failed");
            }
        }
        if let Some(event) = classification.event {
            self.router.deliver(InboundEvent::Error(event)).await;
        }
        self.close_session(session, classification.kind.is_fatal())
            .await;
        Step::Exit
    }

    async fn deliver_guarded(&self, event: InboundEvent) {
        let kind = event.kind();
        if AssertUnwindSafe(self.router.deliver(event))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(?kind, "Handler panicked");
        }
    }
}
