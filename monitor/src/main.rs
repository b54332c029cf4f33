mod advice;
mod agent;
mod batching;
mod config;
mod dashboard;
mod db;
mod errors;
mod measurements;
mod metrics;
mod model;
mod mqtt;
mod normalize;
mod query;
mod rest;
mod rule;
mod store;
#[cfg(test)]
mod testing;
mod validate;

use agent::{
    AgentRegistry, HttpAgent, FARM_AGENT, FARM_INSTRUCTIONS, WEATHER_AGENT, WEATHER_INSTRUCTIONS,
};
use axum::{routing::get, Router};
use config::Config;
use dashboard::DashboardService;
use rule::TopicRule;
use std::sync::Arc;
use std::time::Duration;
use store::{PgStore, TimeSeriesStore};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RETENTION_CHECK_PERIOD: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting farm monitor");
    info!(
        "MQTT broker: {}:{} topic {}",
        config.mqtt_broker, config.mqtt_port, config.iot_topic
    );
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_display());
    info!("Agent endpoint: {} model {}", config.agent.base_url, config.agent.model);

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let pool = match db::make_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let agents = match build_agents(&config) {
        Ok(agents) => Arc::new(agents),
        Err(e) => {
            error!("Failed to build agents: {}", e);
            std::process::exit(1);
        }
    };
    info!("Registered agents: {}", agents.names().join(", "));

    // Bounded channel between the MQTT router and the batcher
    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let client_id = format!("monitor-{}", uuid::Uuid::new_v4());
    let rule = TopicRule::sensor_rule(config.iot_topic.clone());
    let (broker, port) = (config.mqtt_broker.clone(), config.mqtt_port);
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(broker, port, client_id, rule, tx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let batcher_pool = pool.clone();
    let (batch_size, batch_timeout_ms) = (config.batch_size, config.batch_timeout_ms);
    let batcher_handle = tokio::spawn(async move {
        let limits = batching::BatchLimits::new(batch_size, batch_timeout_ms);
        batching::run_batcher(rx, batcher_pool, limits).await;
    });

    let retention_handle = tokio::spawn(db::run_retention(
        pool.clone(),
        config.retention_days,
        RETENTION_CHECK_PERIOD,
    ));

    let store: Arc<dyn TimeSeriesStore> = Arc::new(PgStore::new(pool));
    let dashboard = Arc::new(DashboardService::new(
        config.dashboard.clone(),
        store.clone(),
        agents.clone(),
    ));
    let poller_handle = tokio::spawn(dashboard::run_poller(
        dashboard.clone(),
        config.refresh_period,
    ));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(rest::AppState {
            store,
            agents,
            dashboard,
        }));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = batcher_handle => {
            error!("Batcher task terminated");
        }
        _ = retention_handle => {
            error!("Retention task terminated");
        }
        _ = poller_handle => {
            error!("Dashboard poller terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

fn build_agents(config: &Config) -> errors::Result<AgentRegistry> {
    let farm = HttpAgent::new(FARM_AGENT, FARM_INSTRUCTIONS, config.agent.clone())?;
    let weather = HttpAgent::new(WEATHER_AGENT, WEATHER_INSTRUCTIONS, config.agent.clone())?;

    Ok(AgentRegistry::new()
        .with_agent(Arc::new(farm))
        .with_agent(Arc::new(weather)))
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
