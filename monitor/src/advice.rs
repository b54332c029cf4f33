use crate::agent::{AgentRegistry, Generation, FARM_AGENT, WEATHER_AGENT};
use crate::errors::Result;
use crate::metrics::{ADVICE_FAILURES_TOTAL, ADVICE_REQUESTS_TOTAL};
use crate::model::{AdviceResult, WeatherReport, HUMIDITY, TEMPERATURE};
use crate::normalize::MeasurementRow;
use chrono::Utc;
use tracing::{error, info};

pub const MISSING_READINGS: &str = "Temperature or humidity reading is not available";
pub const ANALYSIS_FAILED: &str = "An error occurred while analysing the environment";
pub const WEATHER_FAILED: &str = "An error occurred while fetching the weather";

pub fn farm_prompt(temperature: &str, humidity: &str, time: &str) -> String {
    format!(
        "Analyse the environment data of a tomato planting:
  Temperature: {temperature}°C
  Humidity: {humidity}%
  Measured at: {time}

Compare the current environment with the optimal growing conditions for tomatoes and point out improvements and things to watch out for."
    )
}

async fn generate(registry: &AgentRegistry, agent: &str, prompt: &str) -> Result<Generation> {
    registry.get(agent)?.generate(prompt).await
}

/// Asks the farm agent about the given readings. A missing reading
/// short-circuits without contacting the agent.
pub async fn request_farm_advice(
    registry: &AgentRegistry,
    temperature: Option<&str>,
    humidity: Option<&str>,
    time: &str,
) -> AdviceResult {
    let (Some(temperature), Some(humidity)) = (temperature, humidity) else {
        info!("Skipping farm advice: {}", MISSING_READINGS);
        return AdviceResult::failed(MISSING_READINGS);
    };

    ADVICE_REQUESTS_TOTAL.inc();
    let prompt = farm_prompt(temperature, humidity, time);

    match generate(registry, FARM_AGENT, &prompt).await {
        Ok(generation) => AdviceResult {
            success: true,
            advice: Some(generation.text),
            error: None,
            timestamp: Utc::now(),
            total_tokens: generation.usage.map(|u| u.total_tokens),
            finish_reason: generation.finish_reason,
        },
        Err(e) => {
            ADVICE_FAILURES_TOTAL.inc();
            error!("{} request failed: {}", FARM_AGENT, e);
            AdviceResult::failed(ANALYSIS_FAILED)
        }
    }
}

/// Advice for the newest temperature and humidity in a newest-first batch
pub async fn advise_from_rows(registry: &AgentRegistry, rows: &[MeasurementRow]) -> AdviceResult {
    let temperature = rows.iter().find(|r| r.is_measure(TEMPERATURE));
    let humidity = rows.iter().find(|r| r.is_measure(HUMIDITY));
    let time = temperature
        .map(MeasurementRow::display_time)
        .unwrap_or_default();

    request_farm_advice(
        registry,
        temperature.map(MeasurementRow::display_value).as_deref(),
        humidity.map(MeasurementRow::display_value).as_deref(),
        &time,
    )
    .await
}

pub async fn request_weather(registry: &AgentRegistry, city: &str) -> WeatherReport {
    let city = city.trim();
    if city.is_empty() {
        return WeatherReport {
            success: false,
            text: None,
            error: Some("City must not be empty".to_string()),
            finish_reason: None,
            total_tokens: None,
            timestamp: Utc::now(),
        };
    }

    let prompt = format!("What's the weather like in {}?", city);
    match generate(registry, WEATHER_AGENT, &prompt).await {
        Ok(generation) => WeatherReport {
            success: true,
            text: Some(generation.text),
            error: None,
            finish_reason: generation.finish_reason,
            total_tokens: generation.usage.map(|u| u.total_tokens),
            timestamp: Utc::now(),
        },
        Err(e) => {
            error!("{} request failed: {}", WEATHER_AGENT, e);
            WeatherReport {
                success: false,
                text: None,
                error: Some(WEATHER_FAILED.to_string()),
                finish_reason: None,
                total_tokens: None,
                timestamp: Utc::now(),
            }
        }
    }
}
