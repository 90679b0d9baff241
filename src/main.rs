//! Skywatch Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - SKYWATCH_HOST: Bind address (default: 0.0.0.0)
//! - SKYWATCH_PORT: Port number (default: 8080)
//! - SKYWATCH_CONFIG_PATH: JSON snapshot of rules and preferences (default: in-memory)
//! - SKYWATCH_CONFIRMATION_COUNT: Consecutive crossings before an alarm latches (default: 2)
//! - SKYWATCH_REPORT_CHECK_SECS: Report scheduler tick (default: 30)
//! - SKYWATCH_HISTORY_LIMIT: Readings kept per scope (default: 1000)
//! - SKYWATCH_CHAT_BOT_TOKEN / SKYWATCH_CHAT_API_BASE: Chat bot delivery
//! - KAFKA_TOPICS, KAFKA_BROKERS, KAFKA_GROUP_ID: Kafka ingest (feature `kafka`)
//! - RUST_LOG: Log level (default: info)

use skywatch::alerts::{ChatBotConfig, DEFAULT_CONFIRMATIONS};
use skywatch::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skywatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig {
        host: std::env::var("SKYWATCH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: env_or("SKYWATCH_PORT", 8080),
        config_path: std::env::var("SKYWATCH_CONFIG_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(Into::into),
        confirmations: env_or("SKYWATCH_CONFIRMATION_COUNT", DEFAULT_CONFIRMATIONS).max(1),
        report_check_interval_secs: env_or("SKYWATCH_REPORT_CHECK_SECS", 30u64).max(1),
        history_limit: env_or("SKYWATCH_HISTORY_LIMIT", 1000usize),
        chat: ChatBotConfig::from_env(),
        #[cfg(feature = "kafka")]
        kafka: skywatch::ingest::KafkaConfig::from_env(),
    };

    tracing::info!("Skywatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    match &config.config_path {
        Some(path) => tracing::info!("  Config snapshot: {}", path.display()),
        None => tracing::info!("  Config snapshot: DISABLED (in-memory)"),
    }
    tracing::info!("  Confirmations: {}", config.confirmations);
    tracing::info!(
        "  Report check interval: {} seconds",
        config.report_check_interval_secs
    );
    tracing::info!(
        "  Chat bot: {}",
        if config.chat.is_some() { "enabled" } else { "disabled" }
    );
    #[cfg(feature = "kafka")]
    match &config.kafka {
        Some(kafka) => tracing::info!("  Kafka topics: {:?} @ {}", kafka.topics, kafka.brokers),
        None => tracing::info!("  Kafka: DISABLED (KAFKA_TOPICS unset)"),
    }

    println!(
        r#"
  ____  _                              _       _
 / ___|| | ___   ___      ____ _| |_ ___| |__
 \___ \| |/ / | | \ \ /\ / / _` | __/ __| '_ \
  ___) |   <| |_| |\ V  V / (_| | || (__| | | |
 |____/|_|\_\\__, | \_/\_/ \__,_|\__\___|_| |_|
             |___/

 Environmental Threshold Alerting
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
