use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::Mutex;
use tracing::{info, warn};

use cocbot_core::{
    clash::{HandlerSignal, SessionDeps, SessionRegistry, SolutionProvider},
    config::Config,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    security::RateLimiter,
};

use crate::handlers;
use crate::TelegramMessenger;

pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub deps: SessionDeps,
    /// Present when a completion endpoint is configured.
    pub ai: Option<Arc<dyn SolutionProvider>>,
    /// Clash creation, keyed by chat id.
    pub cooldown: Mutex<RateLimiter<i64>>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        deps: SessionDeps,
        ai: Option<Arc<dyn SolutionProvider>>,
    ) -> Self {
        let cooldown = RateLimiter::new(true, 1, cfg.create_cooldown);
        Self {
            cfg,
            messenger,
            deps,
            ai,
            cooldown: Mutex::new(cooldown),
        }
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    deps: SessionDeps,
    ai: Option<Arc<dyn SolutionProvider>>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }
    info!(
        allowed_users = cfg.telegram_allowed_users.len(),
        ai = ai.is_some(),
        "configuration loaded"
    );

    // Live clash messages are edited on every push update; space them out so
    // bursts do not hit Telegram's flood limits. The adapter still retries a
    // 429 RetryAfter once.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let state = Arc::new(AppState::new(cfg, messenger, deps, ai));

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .build();

    let shutdown = dispatcher.shutdown_token();
    let registry = state.deps.registry.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutting down");
        close_sessions(&registry).await;
        match shutdown.shutdown() {
            Ok(done) => done.await,
            Err(e) => warn!(error = %e, "dispatcher was not running"),
        }
    });

    dispatcher.dispatch().await;
    Ok(())
}

/// Turn every live message into a "continue" prompt, then drop the sessions.
pub async fn close_sessions(registry: &SessionRegistry) {
    for session in registry.drain().await {
        session.signal(HandlerSignal::InteractionTimedOut).await;
        session.disconnect(None).await;
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
