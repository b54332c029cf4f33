use crate::errors::{Error, Result};
use crate::metrics::{
    CHANNEL_FULL_TOTAL, INVALID_MESSAGES_TOTAL, MESSAGES_TOTAL, RECORDS_ROUTED_TOTAL,
    RULE_SKIPPED_TOTAL,
};
use crate::model::MeasurementRecord;
use crate::rule::{RuleOutcome, TopicRule};
use crate::validate::validate;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    rule: TopicRule,
    tx: mpsc::Sender<MeasurementRecord>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client.subscribe(rule.topic.as_str(), QoS::AtLeastOnce).await?;

    info!("Subscribed to {} with QoS 1", rule.topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    match process_message(&rule, &publish.topic, &publish.payload, &tx).await {
                        Ok(()) => {}
                        Err(Error::ChannelSend) => {
                            error!("Measurement channel closed, stopping MQTT intake");
                            return Err(Error::ChannelSend);
                        }
                        Err(e) => {
                            warn!("Rejected message on {}: {}", publish.topic, e);
                            INVALID_MESSAGES_TOTAL.inc();
                        }
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Routes one publish through the rule and queues every resulting record.
/// A single invalid record rejects the whole message.
async fn process_message(
    rule: &TopicRule,
    topic: &str,
    payload: &[u8],
    tx: &mpsc::Sender<MeasurementRecord>,
) -> Result<()> {
    let records = match rule.apply(topic, payload, Utc::now())? {
        RuleOutcome::Skipped => {
            RULE_SKIPPED_TOTAL.inc();
            debug!("Message on {} did not match the rule condition", topic);
            return Ok(());
        }
        RuleOutcome::Records(records) => records,
    };

    for record in &records {
        validate(record)?;
    }

    for record in records {
        match tx.try_send(record) {
            Ok(()) => RECORDS_ROUTED_TOTAL.inc(),
            Err(mpsc::error::TrySendError::Full(record)) => {
                CHANNEL_FULL_TOTAL.inc();
                debug!("Channel full, using blocking send");
                tx.send(record).await.map_err(|_| Error::ChannelSend)?;
                RECORDS_ROUTED_TOTAL.inc();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Channel closed, cannot queue measurement");
                return Err(Error::ChannelSend);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MeasureValue;
    use crate::rule::DEFAULT_TOPIC;

    fn rule() -> TopicRule {
        TopicRule::sensor_rule(DEFAULT_TOPIC)
    }

    #[test]
    fn test_closed_channel_fails_without_waiting() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(10);
            drop(rx);
            let payload = br#"{"temp": 22.5, "humid": 55, "status": "0"}"#;

            let start = std::time::Instant::now();
            let result = process_message(&rule(), DEFAULT_TOPIC, payload, &tx).await;
            assert!(matches!(result, Err(Error::ChannelSend)));
            assert!(start.elapsed() < std::time::Duration::from_millis(50));
        });
    }

    #[test]
    fn test_process_message_valid() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            let payload = br#"{"temp": 22.5, "humid": 55, "status": "0"}"#;

            assert!(process_message(&rule(), DEFAULT_TOPIC, payload, &tx).await.is_ok());

            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.device_id, "esp32-thing");
            assert_eq!(first.value, MeasureValue::Double(22.5));
            assert_eq!(second.measure_name, "humidity");
        });
    }

    #[test]
    fn test_process_message_skipped_queues_nothing() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            let payload = br#"{"temp": 22.5, "humid": 55, "status": "3"}"#;

            assert!(process_message(&rule(), DEFAULT_TOPIC, payload, &tx).await.is_ok());
            drop(tx);
            assert!(rx.recv().await.is_none());
        });
    }

    #[test]
    fn test_process_message_invalid_json() {
        tokio_test::block_on(async {
            let (tx, _rx) = mpsc::channel(10);

            assert!(process_message(&rule(), DEFAULT_TOPIC, b"invalid json", &tx)
                .await
                .is_err());
        });
    }

    #[test]
    fn test_process_message_out_of_range_rejects_whole_message() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            let payload = br#"{"temp": 999.0, "humid": 55, "status": "0"}"#;

            assert!(process_message(&rule(), DEFAULT_TOPIC, payload, &tx).await.is_err());
            drop(tx);
            assert!(rx.recv().await.is_none());
        });
    }
}
