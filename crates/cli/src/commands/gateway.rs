//! `studyguide gateway` — Start the HTTP API server.

use studyguide_config::AppConfig;
use tracing::debug;

pub async fn run(port_override: Option<u16>, host_override: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }
    debug!(
        max_iterations = config.agent.max_iterations,
        history_limit = config.agent.history_limit,
        "Loaded config"
    );

    println!("📚 StudyGuide Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.default_model);
    println!("   Database:  {}", config.storage.database_path.display());

    studyguide_gateway::start(config).await?;

    Ok(())
}
