//! Live contest session orchestration.
//!
//! Leaf-first: [`types`] and [`wire`] describe state and payloads,
//! [`client`] talks REST, [`push`] carries real-time updates, [`solution`]
//! produces code, and [`session`] ties them together. The registry and the
//! interaction expiry timer are used by the chat-side consumers.

pub mod client;
pub mod error;
pub mod expiry;
pub mod push;
pub mod registry;
pub mod session;
pub mod solution;
pub mod types;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CodinGameClient, ContestApi, Problem, TestCase};
pub use error::{ApiError, ApiResult, PushError, RegistryError, SessionError, SubmitError};
pub use expiry::InteractionExpiry;
pub use push::{DisconnectReason, PushChannel, PushConnection, PushEvent, PushLink, SocketIoChannel};
pub use registry::SessionRegistry;
pub use session::{ClashHandler, ClashSession, HandlerSignal, SessionDeps};
pub use solution::{AiSolution, CompletionClient, SolutionProvider, SolveRequest, StaticSolution, Submission};
pub use types::{ClashProgress, ClashState, GameMode, Player, PlayerResult};
