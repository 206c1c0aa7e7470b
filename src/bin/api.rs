use std::sync::Arc;
use tabular_query_orchestrator::{
    agent::Orchestrator, api::start_server, config::Settings, gemini::GeminiClient,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    if settings.gemini_api_key.is_empty() {
        warn!("⚠️  GEMINI_API_KEY not set; every generation call will fail over to its default");
    }

    info!("🚀 Tabular Query Orchestrator - API Server");
    info!("📍 Port: {}", settings.port);
    info!("🗂️  Sessions: {}", settings.storage_dir.display());
    info!("📊 Dataset: {}", settings.dataset_path.display());

    let generator = Arc::new(GeminiClient::new(
        settings.gemini_api_key.clone(),
        &settings.gemini_model,
    )?);
    let port = settings.port;

    let orchestrator = Arc::new(Orchestrator::from_settings(settings, generator)?);
    orchestrator.maintenance().spawn_periodic();

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, port).await?;

    Ok(())
}
