//! Main Entrypoint for the Hermes API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Building the content, grading, report and speech providers.
//! 4. Constructing the Axum router and applying middleware, and starting
//!    the idle-session sweep.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use hermes_api::{
    config::{Config, Provider},
    db::Db,
    router::create_router,
    state::AppState,
};
use hermes_core::{
    audio::{SpeechSynthesizer, UnavailableSynthesizer},
    content::ContentGenerator,
    gemini::GeminiClient,
    llm_client::{LLMClient, OpenAICompatibleClient},
    orchestrator::AssessmentServices,
    report::ReportSynthesizer,
    scoring::ResponseScorer,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn build_llm_client(config: &Config) -> anyhow::Result<Arc<dyn LLMClient>> {
    Ok(match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY must be set for 'openai' provider")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/");
            Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
            ))
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .clone()
                .context("GEMINI_API_KEY must be set for 'gemini' provider")?;
            Arc::new(GeminiClient::new(api_key, config.chat_model.clone()))
        }
    })
}

fn build_synthesizer(config: &Config) -> Arc<dyn SpeechSynthesizer> {
    match &config.gemini_api_key {
        Some(api_key) => Arc::new(GeminiClient::new(api_key.clone(), config.tts_model.clone())),
        None => {
            warn!("GEMINI_API_KEY is not set; dialogue audio is unavailable.");
            Arc::new(UnavailableSynthesizer::new(
                "speech synthesis requires GEMINI_API_KEY",
            ))
        }
    }
}

/// Periodically drops sessions nobody has touched for `max_idle`.
fn spawn_idle_eviction(state: Arc<AppState>, max_idle: chrono::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            state.evict_idle(max_idle).await;
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Shared Services ---
    let llm_client = build_llm_client(&config)?;
    let assessment_config = config.assessment_config();
    let services = AssessmentServices {
        generator: Arc::new(ContentGenerator::new(
            llm_client.clone(),
            assessment_config.clone(),
        )),
        scorer: Arc::new(ResponseScorer::new(
            llm_client.clone(),
            assessment_config.clone(),
        )),
        reporter: Arc::new(ReportSynthesizer::new(llm_client)),
        synthesizer: build_synthesizer(&config),
        store: db,
        config: assessment_config,
    };
    let app_state = Arc::new(AppState::new(services));
    spawn_idle_eviction(
        app_state.clone(),
        chrono::Duration::minutes(config.session_idle_minutes as i64),
    );

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        tts_model = %config.tts_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
