//! Orchestrator server binary: loads runtime configuration, wires up the
//! Agent Card registry, Quality Framework, Connection Pool, and Session
//! Manager, and serves the A2A HTTP surface.

use orchestrator::agent_card::AgentCardRegistry;
use orchestrator::api::{create_router, AppState};
use orchestrator::config::loader::load_yaml_config;
use orchestrator::config::RuntimeConfig;
use orchestrator::orchestrator::MasterOrchestrator;
use orchestrator::pool::{ConnectionPool, PoolConfig};
use orchestrator::quality::{QualityConfig, QualityFramework};
use orchestrator::session::{SessionManager, SessionManagerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config_path = std::env::var("ORCHESTRATOR_CONFIG").unwrap_or_else(|_| "config/orchestrator.yaml".to_string());
    tracing::info!(path = %config_path, "loading runtime configuration");
    let config: RuntimeConfig = match load_yaml_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load configuration file, using defaults");
            RuntimeConfig {
                llm_endpoint: None,
                unary_timeout: Duration::from_secs(30),
                streaming_timeout: Duration::from_secs(180),
                pool_health_check_interval: Duration::from_secs(300),
                pool_max_connections_per_host: 10,
                pool_max_idle_per_host: 5,
                pool_idle_timeout: Duration::from_secs(30),
                session_expiration_minutes: 30,
                min_parallel_nodes: 2,
                agent_cards_dir: "config/agent-cards".to_string(),
                quality_profile_path: "config/quality-profiles.yaml".to_string(),
                bind_host: "0.0.0.0".to_string(),
                bind_port: 8080,
            }
        }
    };

    tracing::info!(dir = %config.agent_cards_dir, "loading agent cards");
    let agent_cards = Arc::new(AgentCardRegistry::load_dir(&config.agent_cards_dir)?);
    tracing::info!(count = agent_cards.len(), "agent cards loaded");

    let quality_config: QualityConfig = load_yaml_config(&config.quality_profile_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load quality profiles, using an empty registry");
        QualityConfig::default()
    });
    let quality = Arc::new(QualityFramework::new(quality_config));

    let pool = ConnectionPool::new(PoolConfig {
        health_check_interval: config.pool_health_check_interval,
        max_connections_per_host: config.pool_max_connections_per_host,
        max_idle_per_host: config.pool_max_idle_per_host,
        idle_timeout: config.pool_idle_timeout,
    });
    tokio::spawn(pool.clone().run_health_checks());

    let sessions = SessionManager::new(SessionManagerConfig {
        default_expiration: chrono::Duration::minutes(config.session_expiration_minutes),
        history_capacity: 256,
        janitor_interval: Duration::from_secs(60),
    });
    tokio::spawn(sessions.clone().run_janitor());

    let orchestrator = Arc::new(MasterOrchestrator::new(
        agent_cards.clone(),
        quality.clone(),
        pool.clone(),
        sessions.clone(),
    ));

    let self_card = serde_json::json!({
        "agent_id": "orchestrator",
        "name": "Master Orchestrator",
        "tier": "orchestrator",
        "capabilities": ["plan", "delegate", "synthesize"],
    });

    let app = create_router(AppState {
        orchestrator,
        agent_cards,
        self_card,
    });

    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    tracing::info!(%addr, "orchestrator server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
