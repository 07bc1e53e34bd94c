//! Where submitted code comes from.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::Result;

use super::{
    client::{ContestApi, Problem},
    types::GameMode,
};

/// Everything a provider may need to produce code for an open submission window.
#[derive(Clone, Debug)]
pub struct SolveRequest {
    pub token: String,
    pub language: String,
    pub mode: Option<GameMode>,
}

/// Produces the code text to submit.
///
/// Providers never fail: when they cannot produce a real answer they return a
/// short diagnostic that is submitted in its place.
#[async_trait]
pub trait SolutionProvider: Send + Sync {
    async fn solve(&self, api: &dyn ContestApi, req: &SolveRequest) -> String;
}

/// The code argument of `submit`: literal text or a provider to ask.
#[derive(Clone)]
pub enum Submission {
    Code(String),
    Provider(Arc<dyn SolutionProvider>),
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Submission::Code(c) => f.debug_tuple("Code").field(&c.len()).finish(),
            Submission::Provider(_) => f.write_str("Provider"),
        }
    }
}

/// Inert placeholder: a one-line comment in the target language.
#[derive(Clone, Debug, Default)]
pub struct StaticSolution;

pub const PLACEHOLDER_TEXT: &str = "thank you :3";

impl StaticSolution {
    pub fn code_for(language: &str) -> String {
        match language {
            "Bash" | "Perl" | "Python3" | "Ruby" => format!("# {PLACEHOLDER_TEXT}"),
            "Haskell" | "Lua" => format!("-- {PLACEHOLDER_TEXT}"),
            "Clojure" => format!("; {PLACEHOLDER_TEXT}"),
            "VB.NET" => format!("' {PLACEHOLDER_TEXT}"),
            "OCaml" | "F#" => format!("(* {PLACEHOLDER_TEXT} *)"),
            "Pascal" => format!("{{ {PLACEHOLDER_TEXT} }}"),
            _ => format!("// {PLACEHOLDER_TEXT}"),
        }
    }
}

#[async_trait]
impl SolutionProvider for StaticSolution {
    async fn solve(&self, _api: &dyn ContestApi, req: &SolveRequest) -> String {
        Self::code_for(&req.language)
    }
}

/// A single-prompt text completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Fetches the problem and asks a language model for a solution.
pub struct AiSolution<C> {
    completion: C,
    max_test_cases: usize,
}

impl<C: CompletionClient> AiSolution<C> {
    pub fn new(completion: C, max_test_cases: usize) -> Self {
        Self {
            completion,
            max_test_cases,
        }
    }
}

#[async_trait]
impl<C: CompletionClient> SolutionProvider for AiSolution<C> {
    async fn solve(&self, api: &dyn ContestApi, req: &SolveRequest) -> String {
        let problem = match api.fetch_problem(&req.token).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "could not fetch problem for AI solution");
                return diagnostic(&req.language, &format!("problem unavailable: {e}"));
            }
        };

        let prompt = build_prompt(&problem, req, self.max_test_cases);
        match self.completion.complete(&prompt).await {
            Ok(text) => {
                let code = strip_code_fences(&text);
                if code.trim().is_empty() {
                    warn!(language = %req.language, "completion returned no code");
                    return diagnostic(&req.language, "empty completion");
                }
                info!(language = %req.language, bytes = code.len(), "AI solution ready");
                code
            }
            Err(e) => {
                warn!(error = %e, "completion request failed");
                diagnostic(&req.language, &e.to_string())
            }
        }
    }
}

/// Forfeit text shaped as a comment so the submission still parses.
fn diagnostic(language: &str, reason: &str) -> String {
    let reason: String = reason.chars().take(120).collect();
    StaticSolution::code_for(language).replace(PLACEHOLDER_TEXT, &format!("no solution: {reason}"))
}

pub fn build_prompt(problem: &Problem, req: &SolveRequest, max_test_cases: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Solve the following competitive programming puzzle in {}.\n",
        req.language
    ));
    match req.mode {
        Some(GameMode::Shortest) => {
            out.push_str("The shortest source code wins, so golf the solution aggressively.\n")
        }
        Some(GameMode::Fastest) => {
            out.push_str("The first correct solution wins; keep it simple and correct.\n")
        }
        Some(GameMode::Reverse) => out.push_str(
            "The statement is hidden: infer the rule from the test cases alone. Pay close \
             attention to the symmetry between inputs and outputs.\n",
        ),
        None => {}
    }
    out.push_str("Reply with the code only, no explanation.\n");

    if !problem.statement.trim().is_empty() {
        out.push_str("\nStatement:\n");
        out.push_str(problem.statement.trim());
        out.push('\n');
    }
    if !problem.stub.trim().is_empty() {
        out.push_str("\nInput/output stub:\n");
        out.push_str(problem.stub.trim());
        out.push('\n');
    }

    for (i, case) in problem.test_cases.iter().take(max_test_cases).enumerate() {
        out.push_str(&format!("\nTest {}:\n", i + 1));
        if let Some(input) = &case.input {
            out.push_str("Input:\n");
            out.push_str(input.trim_end());
            out.push('\n');
        }
        if let Some(output) = &case.output {
            out.push_str("Expected output:\n");
            out.push_str(output.trim_end());
            out.push('\n');
        }
    }
    out
}

/// Keep only the body of the first fenced block, if the reply has one.
pub fn strip_code_fences(text: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence =
        FENCE.get_or_init(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)\n?```").expect("valid regex"));
    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => text.trim().to_string(),
    }
}
