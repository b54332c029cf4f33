use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Normalization error: {0}")]
    Normalize(String),

    #[error("Agent not registered: {0}")]
    AgentNotFound(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;
