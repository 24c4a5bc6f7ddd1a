use std::sync::Arc;
use std::time::Duration;

use lifeline::channels::{CloudApiChannel, LogChannel};
use lifeline::config::{CloudApiConfig, FlowKeyConfig, IntakeConfig};
use lifeline::crypto::FlowCrypto;
use lifeline::dedup::DedupCache;
use lifeline::directory::{Directory, StaticDirectory};
use lifeline::engine::ConversationEngine;
use lifeline::flow::FlowRouter;
use lifeline::incident::{IncidentAssembler, IncidentStore, MemoryIncidentStore};
use lifeline::outbound::OutboundChannel;
use lifeline::routes::{AppState, router};
use lifeline::session::SessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = IntakeConfig::from_env();

    let port: u16 = std::env::var("LIFELINE_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("🚑 {} v{}", config.service_name, env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{port}/webhook");
    eprintln!("   Flow:    http://0.0.0.0:{port}/flow");
    eprintln!("   Health:  http://0.0.0.0:{port}/health\n");

    // ── Member directory ─────────────────────────────────────────────
    let directory: Arc<dyn Directory> = match std::env::var("LIFELINE_MEMBERS_PATH") {
        Ok(path) => {
            let directory = StaticDirectory::from_json_file(std::path::Path::new(&path))
                .unwrap_or_else(|e| {
                    eprintln!("Error: Failed to load member directory from {path}: {e}");
                    std::process::exit(1);
                });
            eprintln!("   Members: {path}");
            Arc::new(directory)
        }
        Err(_) => {
            tracing::warn!("LIFELINE_MEMBERS_PATH not set; member directory is empty");
            Arc::new(StaticDirectory::default())
        }
    };

    // ── Outbound channel ─────────────────────────────────────────────
    let (outbound, webhook_verify_token): (Arc<dyn OutboundChannel>, String) =
        match CloudApiConfig::from_env() {
            Some(cloud) => {
                let verify_token = cloud.webhook_verify_token.clone();
                tracing::info!(phone_number_id = %cloud.phone_number_id, "Cloud API channel configured");
                (Arc::new(CloudApiChannel::new(cloud)), verify_token)
            }
            None => {
                tracing::warn!("LIFELINE_CLOUD_ACCESS_TOKEN not set; outbound messages are log-only");
                (Arc::new(LogChannel), String::new())
            }
        };

    // ── Encrypted form channel ───────────────────────────────────────
    let crypto = match FlowKeyConfig::from_env()? {
        Some(key_config) => {
            let crypto = FlowCrypto::from_config(&key_config).unwrap_or_else(|e| {
                eprintln!("Error: Failed to load flow private key: {e}");
                std::process::exit(1);
            });
            Some(Arc::new(crypto))
        }
        None => {
            tracing::warn!("No flow private key configured; form endpoints answer 503");
            None
        }
    };

    // ── Core wiring ──────────────────────────────────────────────────
    let store: Arc<dyn IncidentStore> = Arc::new(MemoryIncidentStore::new());
    let sessions = Arc::new(SessionStore::new(config.session_ttl, config.max_sessions));
    let dedup = Arc::new(DedupCache::new(config.dedup_window, config.max_dedup_entries));
    let assembler = Arc::new(IncidentAssembler::new(
        store,
        Arc::clone(&directory),
        Arc::clone(&outbound),
        config.clone(),
    ));
    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&sessions),
        dedup,
        Arc::clone(&directory),
        outbound,
        Arc::clone(&assembler),
        config.clone(),
    )?);
    let flow = Arc::new(FlowRouter::new(directory, assembler, config.clone()));

    let _sweeper = SessionStore::spawn_sweeper(Arc::clone(&sessions), Duration::from_secs(60));

    let state = Arc::new(AppState {
        engine,
        flow,
        crypto,
        service_name: config.service_name.clone(),
        webhook_verify_token,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, service = %config.service_name, "Listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
