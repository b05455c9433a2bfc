use std::sync::Arc;

use interview_coach::channels::TwilioChannel;
use interview_coach::config::Config;
use interview_coach::http::{AppState, app};
use interview_coach::llm::GeminiClient;
use interview_coach::router::MessageRouter;
use interview_coach::store::{ConversationStore, LibSqlStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.llm.model,
        db = %config.db_path.display(),
        bind = %config.bind_addr,
        "Starting interview coach"
    );

    let store: Arc<dyn ConversationStore> = Arc::new(LibSqlStore::open(&config.db_path).await?);
    let llm = Arc::new(GeminiClient::new(&config.llm));
    let sender = Arc::new(TwilioChannel::new(&config.twilio));

    let router = Arc::new(MessageRouter::new(
        Arc::clone(&store),
        llm,
        sender,
        config.prompts.clone(),
    ));

    let state = AppState { router, store };
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
