//! Hand-written fakes shared by the clash tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::domain::ContestUserId;

use super::{
    client::{ContestApi, Problem},
    error::{ApiResult, PushError},
    push::{PushChannel, PushConnection, PushEvent, PushLink},
    registry::SessionRegistry,
    session::{ClashHandler, ClashSession, HandlerSignal, SessionDeps},
    solution::{SolutionProvider, SolveRequest, StaticSolution},
    types::{ClashProgress, ClashState, GameMode, Player, PlayerResult},
    wire::{ClashPush, STATUS_UPDATE_CURRENT},
};

pub const BOT_ID: u64 = 1_234_567;

fn players(n: usize, started: bool) -> Vec<Player> {
    (0..n)
        .map(|i| Player {
            nickname: if i == 0 { "bot".to_string() } else { format!("p{i}") },
            user_id: if i == 0 { BOT_ID } else { i as u64 },
            result: started.then(|| PlayerResult {
                completed: false,
                rank: i as u32 + 1,
                score: 0,
                duration: Duration::ZERO,
                criterion: None,
            }),
        })
        .collect()
}

pub fn lobby(handle: &str, player_count: usize) -> ClashState {
    let mut s = ClashState::lobby(handle, Vec::new(), vec![GameMode::Fastest]);
    s.players = players(player_count, false);
    s
}

pub fn running(handle: &str, player_count: usize) -> ClashState {
    let mut s = lobby(handle, player_count);
    s.players = players(player_count, true);
    s.progress = ClashProgress::Running {
        mode: GameMode::Fastest,
        end_date: Utc::now() + chrono::Duration::minutes(15),
    };
    s
}

/// An `updateCurrentClash` push for `handle` with two players.
pub fn delta(handle: &str, started: bool, finished: bool) -> PushEvent {
    let dto = json!({
        "publicHandle": handle,
        "started": started,
        "finished": finished,
        "programmingLanguages": [],
        "modes": ["FASTEST"],
        "mode": "FASTEST",
        "msBeforeEnd": 900_000,
        "minifiedPlayers": [
            {"id": BOT_ID, "k": "bot", "d": 0, "r": 1},
            {"id": 1, "k": "p1", "d": 0, "r": 2}
        ]
    });
    PushEvent::Clash(ClashPush {
        status: Some(STATUS_UPDATE_CURRENT.to_string()),
        clash_dto: Some(dto.to_string()),
        clash_handle: None,
    })
}

pub struct FakeApi {
    create: ClashState,
    fetch: Mutex<ApiResult<ClashState>>,
    calls: Mutex<Vec<&'static str>>,
    submissions: Mutex<Vec<(String, String)>>,
}

impl FakeApi {
    pub fn new(state: ClashState) -> Arc<Self> {
        Arc::new(Self {
            fetch: Mutex::new(Ok(state.clone())),
            create: state,
            calls: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_fetch(&self, result: ApiResult<ClashState>) {
        *self.fetch.lock().unwrap() = result;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// `(language, code)` pairs in submission order.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContestApi for FakeApi {
    fn user_id(&self) -> ContestUserId {
        ContestUserId(BOT_ID)
    }

    async fn create_session(&self, _: &[String], _: &[GameMode]) -> ApiResult<ClashState> {
        self.record("create");
        Ok(self.create.clone())
    }

    async fn fetch_session(&self, _handle: &str) -> ApiResult<ClashState> {
        self.record("fetch");
        self.fetch.lock().unwrap().clone()
    }

    async fn start_session(&self, _: &str) -> ApiResult<()> {
        self.record("start");
        Ok(())
    }

    async fn open_submission_window(&self, _: &str) -> ApiResult<String> {
        self.record("open");
        Ok("token".to_string())
    }

    async fn fetch_problem(&self, _: &str) -> ApiResult<Problem> {
        self.record("problem");
        Ok(Problem::default())
    }

    async fn submit_code(&self, _: &str, code: &str, language: &str) -> ApiResult<()> {
        self.record("submit");
        self.submissions
            .lock()
            .unwrap()
            .push((language.to_string(), code.to_string()));
        Ok(())
    }

    async fn share_solution(&self, _: &str) -> ApiResult<()> {
        self.record("share");
        Ok(())
    }
}

/// Single-use push channel driven by the test through [`FakePush::send`].
pub struct FakePush {
    tx: mpsc::Sender<PushEvent>,
    rx: Mutex<Option<mpsc::Receiver<PushEvent>>>,
    emits: Arc<Mutex<Vec<(String, Value)>>>,
    pub close_calls: Arc<AtomicUsize>,
    pub connects: AtomicUsize,
}

impl FakePush {
    /// Acknowledges the connection as soon as it is opened.
    pub fn connected() -> Arc<Self> {
        let push = Self::silent();
        push.tx
            .try_send(PushEvent::Connected { reconnect: false })
            .unwrap();
        push
    }

    /// Never acknowledges.
    pub fn silent() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(16);
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            emits: Arc::new(Mutex::new(Vec::new())),
            close_calls: Arc::new(AtomicUsize::new(0)),
            connects: AtomicUsize::new(0),
        })
    }

    pub async fn send(&self, event: PushEvent) {
        self.tx.send(event).await.unwrap();
    }

    pub fn emits(&self) -> Vec<(String, Value)> {
        self.emits.lock().unwrap().clone()
    }

    pub fn closed(&self) -> bool {
        self.close_calls.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl PushChannel for FakePush {
    async fn connect(&self) -> Result<PushConnection, PushError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let events = self.rx.lock().unwrap().take().ok_or(PushError::Closed)?;
        Ok(PushConnection {
            events,
            link: Box::new(FakeLink {
                emits: self.emits.clone(),
                close_calls: self.close_calls.clone(),
            }),
        })
    }
}

struct FakeLink {
    emits: Arc<Mutex<Vec<(String, Value)>>>,
    close_calls: Arc<AtomicUsize>,
}

impl PushLink for FakeLink {
    fn emit(&self, event: &str, payload: Value) {
        self.emits.lock().unwrap().push((event.to_string(), payload));
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards every update to a channel the test reads from.
pub struct Recorder {
    tx: mpsc::UnboundedSender<(ClashState, Option<HandlerSignal>)>,
}

impl Recorder {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (
        Arc<dyn ClashHandler>,
        mpsc::UnboundedReceiver<(ClashState, Option<HandlerSignal>)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }
}

#[async_trait]
impl ClashHandler for Recorder {
    async fn on_update(&self, session: &ClashSession, signal: Option<HandlerSignal>) {
        let _ = self.tx.send((session.state().await, signal));
    }
}

pub fn deps(api: Arc<FakeApi>, push: Arc<FakePush>) -> SessionDeps {
    SessionDeps {
        api,
        push,
        registry: SessionRegistry::new(),
        auto_solution: Arc::new(StaticSolution),
        lobby_timeout: Duration::from_secs(300),
        push_ack_timeout: Duration::from_millis(1500),
    }
}

/// A tracked-nowhere session for registry and timer tests.
pub fn idle_session(handle: &str) -> (ClashSession, mpsc::UnboundedReceiver<(ClashState, Option<HandlerSignal>)>) {
    let (handler, rx) = Recorder::new();
    let d = deps(FakeApi::new(lobby(handle, 1)), FakePush::silent());
    (ClashSession::new(d, lobby(handle, 1), Some(handler)), rx)
}

/// A provider that never answers.
pub struct Stalled;

#[async_trait]
impl SolutionProvider for Stalled {
    async fn solve(&self, _: &dyn ContestApi, _: &SolveRequest) -> String {
        std::future::pending().await
    }
}

/// Poll `check` until it yields a value; panics after about a second.
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    for _ in 0..100 {
        if let Some(v) = check() {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
