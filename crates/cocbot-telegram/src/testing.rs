//! Fakes for the handler and consumer tests.

use std::sync::{
    atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use cocbot_core::{
    clash::{
        ApiError, ApiResult, ClashProgress, ClashSession, ClashState, ContestApi, GameMode,
        Player, PlayerResult, Problem, PushChannel, PushConnection, PushError, PushEvent,
        PushLink, SessionDeps, SessionRegistry, SolutionProvider, SolveRequest, StaticSolution,
    },
    config::{ClashConfig, ClashCredentials, Config},
    domain::{ChatId, ContestUserId, MessageId, MessageRef, UserId},
    messaging::{port::MessagingPort, types::InlineKeyboard},
    Result,
};

use crate::{consumer::ChatClashHandler, router::AppState};

pub const BOT_ID: u64 = 1_234_567;
pub const OWNER: UserId = UserId(42);
pub const INTERACTION_TIMEOUT: Duration = Duration::from_secs(60);

fn players(n: usize, started: bool, bot_completed: bool) -> Vec<Player> {
    (0..n)
        .map(|i| Player {
            nickname: if i == 0 { "bot".to_string() } else { format!("p{i}") },
            user_id: if i == 0 { BOT_ID } else { i as u64 },
            result: started.then(|| PlayerResult {
                completed: i == 0 && bot_completed,
                rank: i as u32 + 1,
                score: 0,
                duration: Duration::ZERO,
                criterion: None,
            }),
        })
        .collect()
}

pub fn lobby(handle: &str, player_count: usize) -> ClashState {
    let mut s = ClashState::lobby(handle, Vec::new(), vec![GameMode::Shortest]);
    s.players = players(player_count, false, false);
    s
}

pub fn running(handle: &str, player_count: usize, bot_completed: bool) -> ClashState {
    let mut s = lobby(handle, player_count);
    s.players = players(player_count, true, bot_completed);
    s.progress = ClashProgress::Running {
        mode: GameMode::Shortest,
        end_date: Utc::now() + chrono::Duration::minutes(15),
    };
    s
}

pub fn message_ref() -> MessageRef {
    MessageRef {
        chat_id: ChatId(10),
        message_id: MessageId(500),
    }
}

// ============== contest service ==============

#[derive(Default)]
pub struct StubApi {
    state: Mutex<Option<ClashState>>,
    missing: AtomicBool,
    fail_create: AtomicBool,
    started: AtomicBool,
    created_with: Mutex<Vec<(Vec<String>, Vec<GameMode>)>>,
    submissions: Mutex<Vec<(String, String)>>,
}

impl StubApi {
    pub fn new(state: ClashState) -> Arc<Self> {
        let api = Self::default();
        *api.state.lock().unwrap() = Some(state);
        Arc::new(api)
    }

    /// Every handle is unknown from now on.
    pub fn set_missing(&self) {
        self.missing.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn creations(&self) -> usize {
        self.created_with.lock().unwrap().len()
    }

    pub fn created_with(&self) -> Vec<(Vec<String>, Vec<GameMode>)> {
        self.created_with.lock().unwrap().clone()
    }

    /// `(code, language)` per submission.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions.lock().unwrap().clone()
    }

    fn snapshot(&self, handle: &str) -> ApiResult<ClashState> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(ApiError::NotFound(handle.to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::NotFound(handle.to_string()))
    }
}

#[async_trait]
impl ContestApi for StubApi {
    fn user_id(&self) -> ContestUserId {
        ContestUserId(BOT_ID)
    }

    async fn create_session(
        &self,
        languages: &[String],
        modes: &[GameMode],
    ) -> ApiResult<ClashState> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                endpoint: "create",
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.created_with
            .lock()
            .unwrap()
            .push((languages.to_vec(), modes.to_vec()));
        self.snapshot("new")
    }

    async fn fetch_session(&self, handle: &str) -> ApiResult<ClashState> {
        self.snapshot(handle)
    }

    async fn start_session(&self, handle: &str) -> ApiResult<()> {
        self.snapshot(handle)?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open_submission_window(&self, _: &str) -> ApiResult<String> {
        Ok("test-session".to_string())
    }

    async fn fetch_problem(&self, _: &str) -> ApiResult<Problem> {
        Ok(Problem::default())
    }

    async fn submit_code(&self, _: &str, code: &str, language: &str) -> ApiResult<()> {
        self.submissions
            .lock()
            .unwrap()
            .push((code.to_string(), language.to_string()));
        Ok(())
    }

    async fn share_solution(&self, _: &str) -> ApiResult<()> {
        Ok(())
    }
}

// ============== push channel ==============

/// Acknowledges every connection and then stays quiet.
#[derive(Default)]
pub struct StubPush {
    senders: Mutex<Vec<mpsc::Sender<PushEvent>>>,
}

#[async_trait]
impl PushChannel for StubPush {
    async fn connect(&self) -> std::result::Result<PushConnection, PushError> {
        let (tx, rx) = mpsc::channel(16);
        tx.try_send(PushEvent::Connected { reconnect: false })
            .map_err(|_| PushError::Closed)?;
        self.senders.lock().unwrap().push(tx);
        Ok(PushConnection {
            events: rx,
            link: Box::new(NoopLink),
        })
    }
}

struct NoopLink;

impl PushLink for NoopLink {
    fn emit(&self, _event: &str, _payload: Value) {}
    fn close(&self) {}
}

// ============== messenger ==============

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Send {
        chat_id: ChatId,
        html: String,
        labels: Vec<String>,
    },
    Edit {
        msg: MessageRef,
        html: String,
        labels: Vec<String>,
    },
    Delete(MessageRef),
    Answer {
        id: String,
        text: Option<String>,
    },
}

pub struct FakeMessenger {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI32,
}

impl FakeMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(1),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { html, .. } => Some(html),
                _ => None,
            })
            .collect()
    }

    /// `(html, button labels)` of the most recent edit.
    pub fn last_edit(&self) -> Option<(String, Vec<String>)> {
        self.calls().into_iter().rev().find_map(|c| match c {
            Call::Edit { html, labels, .. } => Some((html, labels)),
            _ => None,
        })
    }

    pub fn answers(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Answer { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn labels(keyboard: &Option<InlineKeyboard>) -> Vec<String> {
    keyboard
        .as_ref()
        .map(|k| k.buttons().map(|b| b.label.clone()).collect())
        .unwrap_or_default()
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.record(Call::Send {
            chat_id,
            html: html.to_string(),
            labels: labels(&keyboard),
        });
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)),
        })
    }

    async fn edit_html(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.record(Call::Edit {
            msg,
            html: html.to_string(),
            labels: labels(&keyboard),
        });
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.record(Call::Delete(msg));
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.record(Call::Answer {
            id: callback_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }
}

// ============== solutions ==============

struct Canned(String);

#[async_trait]
impl SolutionProvider for Canned {
    async fn solve(&self, _api: &dyn ContestApi, _req: &SolveRequest) -> String {
        self.0.clone()
    }
}

pub fn canned_solution(code: &str) -> Arc<dyn SolutionProvider> {
    Arc::new(Canned(code.to_string()))
}

// ============== wiring ==============

pub fn config() -> Config {
    Config {
        telegram_bot_token: "test-token".to_string(),
        telegram_allowed_users: Vec::new(),
        openai_api_key: None,
        openai_model: "gpt-4o-mini".to_string(),
        openai_base_url: "http://localhost".to_string(),
        clash: ClashConfig {
            credentials: ClashCredentials::from_secret("1234567secret").unwrap(),
            base_url: "http://localhost".to_string(),
            push_url: "http://localhost".to_string(),
            static_file_url: "http://localhost".to_string(),
            lobby_timeout: Duration::from_secs(300),
            push_ack_timeout: Duration::from_millis(1500),
            http_timeout: Duration::from_secs(10),
            reconnect_attempts: 0,
            reconnect_delay: Duration::from_millis(10),
            prompt_test_cases: 3,
        },
        interaction_timeout: INTERACTION_TIMEOUT,
        create_cooldown: Duration::from_secs(15),
    }
}

pub fn deps(api: Arc<StubApi>) -> SessionDeps {
    SessionDeps {
        api,
        push: Arc::new(StubPush::default()),
        registry: SessionRegistry::new(),
        auto_solution: Arc::new(StaticSolution),
        lobby_timeout: Duration::from_secs(300),
        push_ack_timeout: Duration::from_millis(1500),
    }
}

pub fn app_state(api: Arc<StubApi>, messenger: Arc<FakeMessenger>) -> AppState {
    app_state_with(deps(api), messenger)
}

pub fn app_state_with(deps: SessionDeps, messenger: Arc<FakeMessenger>) -> AppState {
    AppState::new(Arc::new(config()), messenger, deps, None)
}

/// A connected session bound to a fresh message owned by [`OWNER`].
pub async fn live_session(
    api: Arc<StubApi>,
    messenger: Arc<FakeMessenger>,
) -> (ClashSession, Arc<ChatClashHandler>) {
    live_session_with(deps(api), messenger).await
}

pub async fn live_session_with(
    deps: SessionDeps,
    messenger: Arc<FakeMessenger>,
) -> (ClashSession, Arc<ChatClashHandler>) {
    let msg = messenger
        .send_html(ChatId(10), "placeholder", None)
        .await
        .unwrap();
    let handler = ChatClashHandler::new(messenger, msg, OWNER, INTERACTION_TIMEOUT);
    let session = ClashSession::create_new(deps, &[], &[GameMode::Shortest], handler.clone())
        .await
        .unwrap();
    (session, handler)
}

/// Poll `check` until it yields, for work done on spawned tasks.
pub async fn eventually<T>(check: impl Fn() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(v) = check() {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
