//! One live contest session: REST bootstrap, push subscription, state
//! reconciliation, auto-submission and teardown.
//!
//! A [`ClashSession`] is a cheap handle. The push events of one session are
//! processed by a single spawned loop, so reconciliation never interleaves
//! with itself; explicit calls (`fetch`, `submit`, `disconnect`) may run
//! concurrently with it and the last completed write wins.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::{
    sync::{mpsc, Mutex},
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClashConfig;

use super::{
    client::ContestApi,
    error::{ApiError, ApiResult, SessionError, SubmitError},
    push::{lobby_group, DisconnectReason, PushChannel, PushConnection, PushEvent, PushLink},
    registry::SessionRegistry,
    solution::{SolutionProvider, SolveRequest, StaticSolution, Submission},
    types::{ClashState, GameMode, Player},
    wire::{ClashPush, UpdateClashDto, STATUS_UPDATE, STATUS_UPDATE_CURRENT},
};

/// Floor for the recurring lobby check; a zero period would stall the loop.
const MIN_LOBBY_CHECK: Duration = Duration::from_secs(1);

/// Lifecycle signal delivered alongside a state update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerSignal {
    LobbyTimedOut,
    InteractionTimedOut,
    Disconnected,
    Finished,
}

/// Consumer of a session's updates. `signal` is `None` for an ordinary update.
#[async_trait]
pub trait ClashHandler: Send + Sync {
    async fn on_update(&self, session: &ClashSession, signal: Option<HandlerSignal>);
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn ContestApi>,
    pub push: Arc<dyn PushChannel>,
    pub registry: SessionRegistry,
    /// Used for the automatic submission when a duel starts.
    pub auto_solution: Arc<dyn SolutionProvider>,
    pub lobby_timeout: Duration,
    pub push_ack_timeout: Duration,
}

impl SessionDeps {
    pub fn new(
        api: Arc<dyn ContestApi>,
        push: Arc<dyn PushChannel>,
        registry: SessionRegistry,
        cfg: &ClashConfig,
    ) -> Self {
        Self {
            api,
            push,
            registry,
            auto_solution: Arc::new(StaticSolution),
            lobby_timeout: cfg.lobby_timeout,
            push_ack_timeout: cfg.push_ack_timeout,
        }
    }

    pub fn with_auto_solution(mut self, provider: Arc<dyn SolutionProvider>) -> Self {
        self.auto_solution = provider;
        self
    }
}

#[derive(Clone)]
pub struct ClashSession {
    inner: Arc<Inner>,
}

struct Inner {
    handle: String,
    deps: SessionDeps,
    state: Mutex<ClashState>,
    handler: Mutex<Option<Arc<dyn ClashHandler>>>,
    link: Mutex<Option<Box<dyn PushLink>>>,
    seen_started: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    receive_signals: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ClashSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClashSession")
            .field("handle", &self.inner.handle)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ClashSession {
    pub(crate) fn new(
        deps: SessionDeps,
        state: ClashState,
        handler: Option<Arc<dyn ClashHandler>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle: state.handle.clone(),
                seen_started: AtomicBool::new(state.started()),
                deps,
                state: Mutex::new(state),
                handler: Mutex::new(handler),
                link: Mutex::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                receive_signals: AtomicBool::new(true),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Create a lobby on the service and start tracking it.
    pub async fn create_new(
        deps: SessionDeps,
        languages: &[String],
        modes: &[GameMode],
        handler: Arc<dyn ClashHandler>,
    ) -> Result<ClashSession, SessionError> {
        let state = deps.api.create_session(languages, modes).await?;
        info!(handle = %state.handle, ?languages, ?modes, "clash created");

        let session = ClashSession::new(deps.clone(), state, Some(handler));
        deps.registry.insert(session.clone()).await?;
        session.populate().await?;
        Ok(session)
    }

    /// Re-attach to a known handle. `Ok(None)` when the service no longer knows it.
    ///
    /// A session already tracked by the registry is reused and handed the new handler.
    pub async fn create_existing(
        deps: SessionDeps,
        handle: &str,
        handler: Arc<dyn ClashHandler>,
    ) -> Result<Option<ClashSession>, SessionError> {
        if let Some(existing) = deps.registry.get(handle).await {
            existing.attach(handler).await;
            return Ok(Some(existing));
        }

        let state = match deps.api.fetch_session(handle).await {
            Ok(s) => s,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session = ClashSession::new(deps.clone(), state, Some(handler.clone()));
        if session.state().await.finished() {
            session.inner.closed.store(true, Ordering::SeqCst);
            return Ok(Some(session));
        }

        if deps.registry.insert(session.clone()).await.is_err() {
            // Lost a race with another re-attach; hand the handler to the winner.
            if let Some(existing) = deps.registry.get(handle).await {
                existing.attach(handler).await;
                return Ok(Some(existing));
            }
            deps.registry.insert(session.clone()).await?;
        }
        session.populate().await?;
        Ok(Some(session))
    }

    async fn populate(&self) -> Result<(), SessionError> {
        if self.state().await.finished() {
            self.inner.closed.store(true, Ordering::SeqCst);
            self.inner.deps.registry.remove_session(self).await;
            return Ok(());
        }

        let PushConnection { mut events, link } = match self.inner.deps.push.connect().await {
            Ok(c) => c,
            Err(e) => {
                warn!(handle = %self.inner.handle, error = %e, "push connect failed");
                self.inner.closed.store(true, Ordering::SeqCst);
                self.inner.cancel.cancel();
                self.inner.deps.registry.remove_session(self).await;
                return Err(e.into());
            }
        };
        *self.inner.link.lock().await = Some(link);

        match timeout(self.inner.deps.push_ack_timeout, events.recv()).await {
            Ok(Some(event)) => self.handle_event(event).await,
            Ok(None) => {
                self.disconnect(Some(HandlerSignal::Disconnected)).await;
                return Ok(());
            }
            Err(_) => {
                warn!(handle = %self.inner.handle, "push connect not acknowledged; continuing without live updates");
                self.inner.connected.store(true, Ordering::SeqCst);
            }
        }

        if self.is_closed() {
            return Ok(());
        }
        tokio::spawn(self.clone().run(events));
        Ok(())
    }

    async fn run(self, mut events: mpsc::Receiver<PushEvent>) {
        let every = self.inner.deps.lobby_timeout.max(MIN_LOBBY_CHECK);
        let mut lobby = interval_at(Instant::now() + every, every);
        lobby.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_lobby = !self.state().await.started();

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                _ = lobby.tick(), if in_lobby => {
                    let state = self.state().await;
                    in_lobby = !state.started();
                    if in_lobby && state.player_count() <= 1 {
                        info!(handle = %self.inner.handle, "lobby timed out");
                        self.disconnect(Some(HandlerSignal::LobbyTimedOut)).await;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.disconnect(Some(HandlerSignal::Disconnected)).await;
                        break;
                    }
                },
            }
        }
        debug!(handle = %self.inner.handle, "session loop stopped");
    }

    async fn handle_event(&self, event: PushEvent) {
        match event {
            PushEvent::Connected { reconnect } => {
                self.inner.connected.store(true, Ordering::SeqCst);
                if let Some(link) = self.inner.link.lock().await.as_ref() {
                    link.emit("register", json!(self.inner.deps.api.user_id().0));
                    link.emit("joinGroup", json!(lobby_group(&self.inner.handle)));
                }
                if reconnect {
                    info!(handle = %self.inner.handle, "push reconnected; refreshing");
                    match self.inner.deps.api.fetch_session(&self.inner.handle).await {
                        Ok(next) => self.reconcile(next, false).await,
                        Err(e) => {
                            warn!(handle = %self.inner.handle, error = %e, "refresh after reconnect failed");
                            self.notify(None).await;
                        }
                    }
                }
            }
            PushEvent::Clash(push) => self.on_clash(push).await,
            PushEvent::Disconnected(reason) => {
                self.inner.connected.store(false, Ordering::SeqCst);
                match reason {
                    DisconnectReason::ConnectionLost => {
                        warn!(handle = %self.inner.handle, "push connection lost");
                        self.disconnect(Some(HandlerSignal::Disconnected)).await;
                    }
                    DisconnectReason::ServerClosed => {
                        info!(handle = %self.inner.handle, "push closed by server");
                        self.notify(None).await;
                    }
                    DisconnectReason::ClientClosed => {}
                }
            }
        }
    }

    async fn on_clash(&self, push: ClashPush) {
        let handle = self.inner.handle.as_str();
        match push.status.as_deref() {
            Some(STATUS_UPDATE_CURRENT) => {
                let Some(raw) = push.clash_dto else {
                    warn!(handle, status = STATUS_UPDATE_CURRENT, "clash delta without payload");
                    return;
                };
                let dto: UpdateClashDto = match serde_json::from_str(&raw) {
                    Ok(dto) => dto,
                    Err(e) => {
                        error!(handle, error = %e, "clash delta does not match the expected shape");
                        self.disconnect(Some(HandlerSignal::Disconnected)).await;
                        return;
                    }
                };
                if dto.public_handle.as_deref() != Some(handle) {
                    warn!(handle, got = ?dto.public_handle, "clash delta handle mismatch");
                    return;
                }
                let reported_finished = dto.progress.finished;
                let current = self.state().await;
                match dto.into_state(&current, Utc::now()) {
                    Ok(next) => self.reconcile(next, reported_finished).await,
                    Err(missing) => {
                        warn!(handle, field = missing.0, "clash delta missing field");
                        if reported_finished {
                            self.disconnect(Some(HandlerSignal::Finished)).await;
                        }
                    }
                }
            }
            Some(STATUS_UPDATE) => {
                if push.clash_handle.as_deref() != Some(handle) {
                    debug!(handle, got = ?push.clash_handle, "refresh hint for another clash");
                    return;
                }
                match self.inner.deps.api.fetch_session(handle).await {
                    Ok(next) => self.reconcile(next, false).await,
                    Err(e) => warn!(handle, error = %e, "refresh after hint failed"),
                }
            }
            other => debug!(handle, status = ?other, "ignoring clash status"),
        }
    }

    /// Apply a full state from either update path. `reported_finished` is the
    /// raw flag of a delta; the session closes on it even if the state is refused.
    async fn reconcile(&self, next: ClashState, reported_finished: bool) {
        let applied = {
            let mut state = self.inner.state.lock().await;
            let accepted = state.accepts(&next);
            if accepted {
                *state = next.clone();
            }
            accepted
        };

        if applied {
            let just_started =
                next.is_running() && !self.inner.seen_started.swap(true, Ordering::SeqCst);
            if just_started {
                self.auto_submit(next.default_language().to_string());
            }
            self.notify(None).await;
        } else {
            debug!(handle = %self.inner.handle, "ignoring update that would move progress backwards");
        }

        if reported_finished || next.finished() {
            self.disconnect(Some(HandlerSignal::Finished)).await;
        }
    }

    /// Runs beside the event loop; a slow provider must not hold up push handling.
    fn auto_submit(&self, language: String) {
        let session = self.clone();
        let provider = self.inner.deps.auto_solution.clone();
        tokio::spawn(async move {
            let handle = session.handle();
            match session
                .submit(Submission::Provider(provider), Some(&language))
                .await
            {
                Ok(()) => info!(handle, language = %language, "submitted automatically"),
                Err(e) => warn!(handle, language = %language, error = %e, "did not submit"),
            }
        });
    }

    async fn notify(&self, signal: Option<HandlerSignal>) {
        if !self.inner.receive_signals.load(Ordering::SeqCst) {
            return;
        }
        let handler = self.inner.handler.lock().await.clone();
        if let Some(handler) = handler {
            handler.on_update(self, signal).await;
        }
    }

    // ============== operations ==============

    pub fn handle(&self) -> &str {
        &self.inner.handle
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> ClashState {
        self.inner.state.lock().await.clone()
    }

    /// The bot's own player entry.
    pub async fn me(&self) -> Option<Player> {
        let uid = self.inner.deps.api.user_id().0;
        self.inner.state.lock().await.player(uid).cloned()
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn same_as(&self, other: &ClashSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Replace the active handler. At most one handler is attached at a time.
    pub async fn attach(&self, handler: Arc<dyn ClashHandler>) {
        *self.inner.handler.lock().await = Some(handler);
    }

    pub async fn detach(&self) -> Option<Arc<dyn ClashHandler>> {
        self.inner.handler.lock().await.take()
    }

    /// While off, the handler is not called at all.
    pub fn set_receive_signals(&self, on: bool) {
        self.inner.receive_signals.store(on, Ordering::SeqCst);
    }

    pub fn receives_signals(&self) -> bool {
        self.inner.receive_signals.load(Ordering::SeqCst)
    }

    /// Deliver a consumer-owned signal (e.g. an interaction expiry) through the handler.
    pub async fn signal(&self, signal: HandlerSignal) {
        self.notify(Some(signal)).await;
    }

    pub async fn start(&self) -> ApiResult<()> {
        if self.state().await.started() {
            return Err(ApiError::AlreadyStarted);
        }
        self.inner.deps.api.start_session(&self.inner.handle).await?;
        info!(handle = %self.inner.handle, "clash start requested");
        Ok(())
    }

    /// Submit code for the bot. `language` defaults to the session's default language.
    pub async fn submit(
        &self,
        submission: Submission,
        language: Option<&str>,
    ) -> Result<(), SubmitError> {
        let (language, mode) = {
            let state = self.inner.state.lock().await;
            if !state.is_running() {
                return Err(SubmitError::NotRunning);
            }
            let language = language.unwrap_or_else(|| state.default_language()).to_string();
            if !state.allows_language(&language) {
                return Err(SubmitError::LanguageNotAllowed(language));
            }
            (language, state.mode())
        };

        let api = self.inner.deps.api.as_ref();
        let token = api.open_submission_window(&self.inner.handle).await?;
        let code = match submission {
            Submission::Code(code) => code,
            Submission::Provider(provider) => {
                let req = SolveRequest {
                    token: token.clone(),
                    language: language.clone(),
                    mode,
                };
                provider.solve(api, &req).await
            }
        };
        api.submit_code(&token, &code, &language).await?;
        api.share_solution(&self.inner.handle).await?;
        Ok(())
    }

    /// Refresh from the service.
    ///
    /// Without a handle this updates the live session and returns its new state.
    /// With a handle it returns a detached snapshot and leaves `self` untouched.
    /// `Ok(None)` means the service does not know the handle.
    pub async fn fetch(&self, handle: Option<&str>) -> ApiResult<Option<ClashState>> {
        let api = &self.inner.deps.api;
        let target = handle.unwrap_or(&self.inner.handle);
        let fetched = match api.fetch_session(target).await {
            Ok(s) => s,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if handle.is_some() {
            return Ok(Some(fetched));
        }

        let mut state = self.inner.state.lock().await;
        if state.accepts(&fetched) {
            *state = fetched;
        }
        Ok(Some(state.clone()))
    }

    /// Tear the session down and notify the handler once. Later calls do nothing.
    pub async fn disconnect(&self, signal: Option<HandlerSignal>) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let signal = signal.unwrap_or(HandlerSignal::Disconnected);
        info!(handle = %self.inner.handle, ?signal, "clash session closing");

        self.inner.cancel.cancel();
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(link) = self.inner.link.lock().await.take() {
            link.close();
        }
        self.inner.deps.registry.remove_session(self).await;
        self.notify(Some(signal)).await;
    }
}
