//! REST client for the contest service's clash endpoints.
//!
//! Every call is a single request that either yields a typed payload or an
//! [`ApiError`]. Nothing here retries and nothing here keeps state between
//! calls, so callers are free to repeat any of them.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{config::ClashConfig, domain::ContestUserId, formatting::truncate_one_line};

use super::{
    error::{ApiError, ApiResult},
    types::{ClashState, GameMode, Player},
    wire::{CreateClashResponse, FindClashResponse, ProblemResponse, TestSessionResponse},
};

const CREATE: &str = "create-session";
const START: &str = "start-session";
const FIND: &str = "find-session";
const OPEN_WINDOW: &str = "open-submission-window";
const PROBLEM: &str = "fetch-problem";
const SUBMIT: &str = "submit-code";
const SHARE: &str = "share-solution";
const BLOB: &str = "test-case-blob";

/// Problem shown once a submission window is open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Problem {
    /// Statement with presentation markup removed.
    pub statement: String,
    /// Starter code generator text provided by the service.
    pub stub: String,
    pub test_cases: Vec<TestCase>,
}

/// One example; either side is missing when its blob failed to download.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestCase {
    pub input: Option<String>,
    pub output: Option<String>,
}

/// Port for the contest service's session endpoints.
#[async_trait]
pub trait ContestApi: Send + Sync {
    /// The bot's own account on the service.
    fn user_id(&self) -> ContestUserId;

    /// Create a private lobby and return its initial state.
    async fn create_session(
        &self,
        languages: &[String],
        modes: &[GameMode],
    ) -> ApiResult<ClashState>;

    /// Full snapshot; [`ApiError::NotFound`] when the service does not know the handle.
    async fn fetch_session(&self, handle: &str) -> ApiResult<ClashState>;

    async fn start_session(&self, handle: &str) -> ApiResult<()>;

    /// Open the bot's submission window and return its token.
    async fn open_submission_window(&self, handle: &str) -> ApiResult<String>;

    async fn fetch_problem(&self, token: &str) -> ApiResult<Problem>;

    async fn submit_code(&self, token: &str, code: &str, language: &str) -> ApiResult<()>;

    async fn share_solution(&self, handle: &str) -> ApiResult<()>;
}

#[derive(Clone, Debug)]
pub struct CodinGameClient {
    cfg: ClashConfig,
    http: reqwest::Client,
}

impl CodinGameClient {
    pub fn new(cfg: ClashConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .expect("reqwest client build");
        Self { cfg, http }
    }

    fn service_url(&self, service: &str) -> String {
        format!(
            "{}/services/{service}",
            self.cfg.base_url.trim_end_matches('/')
        )
    }

    /// POST a JSON array body; non-2xx statuses become [`ApiError::Status`].
    async fn post(
        &self,
        endpoint: &'static str,
        service: &str,
        body: Value,
    ) -> ApiResult<reqwest::Response> {
        debug!(endpoint, %body, "contest request");
        let resp = self
            .http
            .post(self.service_url(service))
            .header("Content-Type", "application/json;charset=utf-8")
            .header("Cookie", self.cfg.credentials.cookie())
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                endpoint,
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body_text = resp.text().await.unwrap_or_default();
        let body_text: String = body_text.chars().take(200).collect();
        warn!(endpoint, status = status.as_u16(), body = %body_text, %body, "contest request failed");
        Err(ApiError::Status {
            endpoint,
            status: status.as_u16(),
            body: body_text,
        })
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        service: &str,
        body: Value,
    ) -> ApiResult<T> {
        let resp = self.post(endpoint, service, body).await?;
        let text = resp.text().await.map_err(|e| ApiError::Transport {
            endpoint,
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| {
            warn!(endpoint, error = %e, body = %truncate_one_line(&text, 200), "contest response did not parse");
            ApiError::Decode {
                endpoint,
                message: e.to_string(),
            }
        })
    }

    async fn download_blob(&self, id: u64) -> Option<String> {
        let url = format!("{}?id={id}", self.cfg.static_file_url);
        let resp = match self.http.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(endpoint = BLOB, id, status = r.status().as_u16(), "skipping test case blob");
                return None;
            }
            Err(e) => {
                warn!(endpoint = BLOB, id, error = %e, "skipping test case blob");
                return None;
            }
        };
        match resp.text().await {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(endpoint = BLOB, id, error = %e, "skipping test case blob");
                None
            }
        }
    }
}

#[async_trait]
impl ContestApi for CodinGameClient {
    fn user_id(&self) -> ContestUserId {
        self.cfg.credentials.user_id
    }

    async fn create_session(
        &self,
        languages: &[String],
        modes: &[GameMode],
    ) -> ApiResult<ClashState> {
        let body = json!([self.user_id().0, languages, modes]);
        let resp: CreateClashResponse = self
            .post_json(CREATE, "ClashOfCode/createPrivateClash", body)
            .await?;

        let handle = resp
            .public_handle
            .filter(|h| !h.is_empty())
            .ok_or(ApiError::MissingField {
                endpoint: CREATE,
                field: "publicHandle",
            })?;

        let mut state = ClashState::lobby(handle, languages.to_vec(), modes.to_vec());
        state.players = resp
            .players
            .into_iter()
            .map(|p| Player {
                nickname: p.codingamer_nickname,
                user_id: p.codingamer_id,
                result: None,
            })
            .collect();
        Ok(state)
    }

    async fn fetch_session(&self, handle: &str) -> ApiResult<ClashState> {
        let resp = match self
            .post(FIND, "ClashOfCode/findClashByHandle", json!([handle]))
            .await
        {
            Ok(r) => r,
            Err(e) if is_not_found_status(&e) => return Err(ApiError::NotFound(handle.to_string())),
            Err(e) => return Err(e),
        };

        let text = resp.text().await.map_err(|e| ApiError::Transport {
            endpoint: FIND,
            message: e.to_string(),
        })?;
        if text.trim().is_empty() || text.trim() == "null" {
            return Err(ApiError::NotFound(handle.to_string()));
        }

        let parsed: FindClashResponse = serde_json::from_str(&text).map_err(|e| {
            warn!(endpoint = FIND, handle, error = %e, body = %truncate_one_line(&text, 200), "clash snapshot did not parse");
            ApiError::Decode {
                endpoint: FIND,
                message: e.to_string(),
            }
        })?;

        parsed
            .into_state(handle, Utc::now())
            .map_err(|missing| ApiError::MissingField {
                endpoint: FIND,
                field: missing.0,
            })
    }

    async fn start_session(&self, handle: &str) -> ApiResult<()> {
        let body = json!([self.user_id().0, handle]);
        match self.post(START, "ClashOfCode/startClashByHandle", body).await {
            Ok(resp) if resp.status().as_u16() == 204 => Ok(()),
            Ok(resp) => Err(ApiError::Status {
                endpoint: START,
                status: resp.status().as_u16(),
                body: String::new(),
            }),
            Err(ApiError::Status { body, .. }) if body.to_lowercase().contains("started") => {
                Err(ApiError::AlreadyStarted)
            }
            Err(e) => Err(e),
        }
    }

    async fn open_submission_window(&self, handle: &str) -> ApiResult<String> {
        let body = json!([self.user_id().0, handle]);
        let resp: TestSessionResponse = self
            .post_json(OPEN_WINDOW, "ClashOfCode/startClashTestSession", body)
            .await?;
        resp.handle
            .filter(|h| !h.is_empty())
            .ok_or(ApiError::MissingField {
                endpoint: OPEN_WINDOW,
                field: "handle",
            })
    }

    async fn fetch_problem(&self, token: &str) -> ApiResult<Problem> {
        let resp: ProblemResponse = self
            .post_json(PROBLEM, "TestSession/startTestSession", json!([token]))
            .await?;
        let question = resp
            .current_question
            .and_then(|q| q.question)
            .ok_or(ApiError::MissingField {
                endpoint: PROBLEM,
                field: "currentQuestion.question",
            })?;

        let mut test_cases = Vec::with_capacity(question.test_cases.len());
        for case in &question.test_cases {
            let input = self.download_blob(case.input_binary_id).await;
            let output = self.download_blob(case.output_binary_id).await;
            if input.is_none() && output.is_none() {
                continue;
            }
            test_cases.push(TestCase { input, output });
        }

        Ok(Problem {
            statement: strip_markup(&question.statement),
            stub: question.stub_generator,
            test_cases,
        })
    }

    async fn submit_code(&self, token: &str, code: &str, language: &str) -> ApiResult<()> {
        let body = json!([token, { "code": code, "programmingLanguageId": language }, null]);
        self.post(SUBMIT, "TestSession/submit", body).await?;
        Ok(())
    }

    async fn share_solution(&self, handle: &str) -> ApiResult<()> {
        let body = json!([self.user_id().0, handle]);
        self.post(SHARE, "ClashOfCode/shareCodinGamerSolutionByHandle", body)
            .await?;
        Ok(())
    }
}

/// The service answers unknown handles with 404, or 422 plus a "not found" message.
fn is_not_found_status(err: &ApiError) -> bool {
    match err {
        ApiError::Status { status: 404, .. } => true,
        ApiError::Status { status, body, .. } if (400..500).contains(status) => {
            let lower = body.to_lowercase();
            lower.contains("not found") || lower.contains("not_found")
        }
        _ => false,
    }
}

/// Remove HTML tags and decode the handful of entities the statements use.
pub fn strip_markup(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINES: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    let blank = BLANK_LINES.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let text = html.replace("<br>", "\n").replace("<br/>", "\n");
    let text = tag.replace_all(&text, "");
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    blank.replace_all(text.trim(), "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::config::ClashCredentials;

    const FIND_PATH: &str = "/services/ClashOfCode/findClashByHandle";
    const CREATE_PATH: &str = "/services/ClashOfCode/createPrivateClash";
    const START_PATH: &str = "/services/ClashOfCode/startClashByHandle";
    const PROBLEM_PATH: &str = "/services/TestSession/startTestSession";

    /// Plain HTTP/1.1 server answering each request path with a canned
    /// `(status, body)`; unknown paths get a 500.
    async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let path = read_request(&mut sock).await;
                    let (status, body) = routes
                        .iter()
                        .find(|(p, ..)| *p == path)
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((500, "no route"));
                    let resp = if status == 204 {
                        "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string()
                    } else {
                        format!(
                            "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        )
                    };
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    /// Read one request and return its path, query included.
    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_len = loop {
            let n = sock.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_len]).to_string();
        let body_len = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_len + body_len {
            let n = sock.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        head.split_whitespace().nth(1).unwrap_or_default().to_string()
    }

    fn client(base: &str) -> CodinGameClient {
        CodinGameClient::new(ClashConfig {
            credentials: ClashCredentials::from_secret("1234567secret").unwrap(),
            base_url: base.to_string(),
            push_url: base.to_string(),
            static_file_url: format!("{base}/blob"),
            lobby_timeout: Duration::from_secs(300),
            push_ack_timeout: Duration::from_millis(1500),
            http_timeout: Duration::from_secs(5),
            reconnect_attempts: 0,
            reconnect_delay: Duration::from_millis(10),
            prompt_test_cases: 3,
        })
    }

    #[tokio::test]
    async fn unknown_handle_answers_are_not_found() {
        let missing = client(&serve(vec![(FIND_PATH, 404, "")]).await);
        assert!(matches!(
            missing.fetch_session("abc").await,
            Err(ApiError::NotFound(h)) if h == "abc"
        ));

        let null = client(&serve(vec![(FIND_PATH, 200, "null")]).await);
        assert!(null.fetch_session("abc").await.unwrap_err().is_not_found());

        let empty = client(&serve(vec![(FIND_PATH, 200, "")]).await);
        assert!(empty.fetch_session("abc").await.unwrap_err().is_not_found());

        let worded = client(&serve(vec![(FIND_PATH, 422, "{\"message\":\"Clash not found\"}")]).await);
        assert!(worded.fetch_session("abc").await.unwrap_err().is_not_found());

        let broken = client(&serve(vec![(FIND_PATH, 500, "oops")]).await);
        assert!(matches!(
            broken.fetch_session("abc").await,
            Err(ApiError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn fetches_lobby_snapshot() {
        let body = r#"{"started":false,"finished":false,"programmingLanguages":["Go"],"modes":["REVERSE"],
            "players":[{"codingamerId":1234567,"codingamerNickname":"bot"}]}"#;
        let c = client(&serve(vec![(FIND_PATH, 200, body)]).await);

        let state = c.fetch_session("abc").await.unwrap();
        assert_eq!(state.handle, "abc");
        assert!(!state.started());
        assert_eq!(state.languages, vec!["Go".to_string()]);
        assert_eq!(state.player(1_234_567).map(|p| p.nickname.as_str()), Some("bot"));
    }

    #[tokio::test]
    async fn create_requires_public_handle() {
        let c = client(&serve(vec![(CREATE_PATH, 200, r#"{"players":[]}"#)]).await);
        assert!(matches!(
            c.create_session(&[], &[GameMode::Fastest]).await,
            Err(ApiError::MissingField { field: "publicHandle", .. })
        ));

        let body = r#"{"publicHandle":"1234567abc","players":[{"codingamerId":1234567,"codingamerNickname":"bot"}]}"#;
        let c = client(&serve(vec![(CREATE_PATH, 200, body)]).await);
        let state = c
            .create_session(&["Ruby".to_string()], &[GameMode::Shortest])
            .await
            .unwrap();
        assert_eq!(state.handle, "1234567abc");
        assert_eq!(state.modes, vec![GameMode::Shortest]);
        assert_eq!(state.player_count(), 1);
    }

    #[tokio::test]
    async fn start_accepts_only_no_content() {
        let ok = client(&serve(vec![(START_PATH, 204, "")]).await);
        assert!(ok.start_session("abc").await.is_ok());

        let odd = client(&serve(vec![(START_PATH, 200, "{}")]).await);
        assert!(matches!(
            odd.start_session("abc").await,
            Err(ApiError::Status { status: 200, .. })
        ));

        let late = client(&serve(vec![(START_PATH, 422, "{\"message\":\"Clash already started\"}")]).await);
        assert!(matches!(late.start_session("abc").await, Err(ApiError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn problem_skips_blobs_that_fail() {
        let problem = r#"{"currentQuestion":{"question":{
            "statement":"<p>Print <var>N</var></p>",
            "stubGenerator":"read n:int",
            "testCases":[
                {"inputBinaryId":1,"outputBinaryId":2},
                {"inputBinaryId":3,"outputBinaryId":4},
                {"inputBinaryId":5,"outputBinaryId":6}
            ]}}}"#;
        let c = client(
            &serve(vec![
                (PROBLEM_PATH, 200, problem),
                ("/blob?id=1", 200, "3"),
                ("/blob?id=2", 200, "6"),
                ("/blob?id=5", 200, "7"),
            ])
            .await,
        );

        let p = c.fetch_problem("token").await.unwrap();
        assert_eq!(p.statement, "Print N");
        assert_eq!(p.stub, "read n:int");
        assert_eq!(
            p.test_cases,
            vec![
                TestCase {
                    input: Some("3".to_string()),
                    output: Some("6".to_string()),
                },
                TestCase {
                    input: Some("7".to_string()),
                    output: None,
                },
            ]
        );
    }

    #[test]
    fn strips_statement_markup() {
        let html = "<div class=\"statement\">Given <var>N</var>,<br>print N &lt; 10 &amp; more</div>\n\n\n\n<p>end</p>";
        assert_eq!(strip_markup(html), "Given N,\nprint N < 10 & more\n\nend");
    }

    #[test]
    fn recognises_not_found_answers() {
        let nf = ApiError::Status {
            endpoint: FIND,
            status: 422,
            body: "{\"message\":\"Clash not found\"}".to_string(),
        };
        assert!(is_not_found_status(&nf));
        assert!(is_not_found_status(&ApiError::Status {
            endpoint: FIND,
            status: 404,
            body: String::new(),
        }));
        assert!(!is_not_found_status(&ApiError::Status {
            endpoint: FIND,
            status: 500,
            body: "not found".to_string(),
        }));
    }
}
