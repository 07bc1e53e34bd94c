use std::sync::Arc;

use tracing::info;

use cocbot_core::{
    clash::{
        AiSolution, CodinGameClient, SessionDeps, SessionRegistry, SocketIoChannel,
        SolutionProvider,
    },
    config::Config,
};
use cocbot_openai::OpenAiClient;

#[tokio::main]
async fn main() -> Result<(), cocbot_core::Error> {
    cocbot_core::logging::init("cocbot")?;

    let cfg = Arc::new(Config::load()?);
    info!(user_id = cfg.clash.credentials.user_id.0, "contest account loaded");

    let api = Arc::new(CodinGameClient::new(cfg.clash.clone()));
    let push = Arc::new(
        SocketIoChannel::new(&cfg.clash)
            .map_err(|e| cocbot_core::Error::Config(format!("push channel: {e}")))?,
    );
    let deps = SessionDeps::new(api, push, SessionRegistry::new(), &cfg.clash);

    let ai: Option<Arc<dyn SolutionProvider>> = cfg.openai_api_key.as_ref().map(|key| {
        let completion = OpenAiClient::new(
            key.clone(),
            cfg.openai_model.clone(),
            cfg.openai_base_url.clone(),
        );
        Arc::new(AiSolution::new(completion, cfg.clash.prompt_test_cases))
            as Arc<dyn SolutionProvider>
    });

    cocbot_telegram::router::run_polling(cfg, deps, ai)
        .await
        .map_err(|e| cocbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
