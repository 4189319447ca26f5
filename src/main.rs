use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use insight_chat_backend::{
    api,
    chart::PngChartRenderer,
    commands::{CommandDispatcher, CompletionSettings},
    completion,
    config::{AiProvider, AppConfig},
    database::SqliteExecutor,
    session::{InMemorySessionStore, SessionStore},
    AppState,
};

#[derive(Parser, Debug)]
#[command(
    name = "insight-chat-backend",
    about = "Chat backend that turns prompts into SQL, analyses and charts"
)]
struct Args {
    /// Address to listen on (overrides INSIGHT_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// JSON config file (defaults to ~/.insightchat/config.json when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,insight_chat_backend=debug".into()),
        )
        .init();

    let args = Args::parse();

    // Initialize config
    let mut config = AppConfig::load(args.config.as_deref()).await?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    let config = Arc::new(config);

    if config.api_key.is_none() && config.ai_provider == AiProvider::OpenAI {
        tracing::warn!("OPENAI_API_KEY is not set; completion requests will fail");
    }
    if config.database_path.is_none() {
        tracing::warn!("INSIGHT_DATABASE_PATH is not set; FETCH will fail");
    }

    // Initialize collaborators
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let dispatcher = Arc::new(CommandDispatcher::new(
        completion::client_from_config(&config),
        Arc::new(SqliteExecutor::new(
            config.database_path.clone(),
            config.max_result_bytes(),
        )),
        Arc::new(PngChartRenderer::default()),
        sessions.clone(),
        CompletionSettings {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        },
        config.database_name.clone(),
    ));

    let app_state = AppState {
        config: config.clone(),
        dispatcher,
        sessions,
    };

    let app = api::router(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;
    tracing::info!(
        "Backend server running on http://{} (provider: {:?}, model: {})",
        config.bind_addr,
        config.ai_provider,
        config.ai_model
    );

    axum::serve(listener, app).await?;

    Ok(())
}
