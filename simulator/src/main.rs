mod reading;

use clap::Parser;
use rand::Rng;
use reading::SensorReading;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(about = "Publishes simulated ESP32 temperature/humidity readings")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "IOT_TOPIC", default_value = "esp32-thing/example/topic")]
    topic: String,

    /// Seconds between readings
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 5)]
    interval_secs: u64,

    /// Probability that a reading reports a sensor failure
    #[arg(long, env = "FAILURE_RATE", default_value_t = 0.05)]
    failure_rate: f64,

    /// Stop after this many readings (runs forever when omitted)
    #[arg(long, env = "COUNT")]
    count: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    info!("Starting sensor simulator");
    info!(
        "Broker: {}:{}, topic: {}, every {}s",
        args.broker, args.port, args.topic, args.interval_secs
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Connected to MQTT broker, starting to publish readings");

    let mut rng = rand::thread_rng();
    let mut sensor = Sensor::new(&mut rng);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let mut published = 0u64;

    loop {
        ticker.tick().await;

        let reading = sensor.next(&mut rng, args.failure_rate);
        let payload = match serde_json::to_string(&reading) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize reading: {}", e);
                continue;
            }
        };

        match client
            .publish(&args.topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(_) => {
                published += 1;
                info!(
                    "Published #{}: {:.1}°C {}% status={}",
                    published, reading.temp, reading.humid, reading.status
                );
            }
            Err(e) => warn!("Failed to publish: {}", e),
        }

        if args.count.is_some_and(|limit| published >= limit) {
            info!("Published {} readings, exiting", published);
            break;
        }
    }
}

/// Slowly drifting greenhouse climate
struct Sensor {
    temperature: f64,
    humidity: f64,
}

impl Sensor {
    fn new(rng: &mut impl Rng) -> Self {
        Self {
            temperature: rng.gen_range(18.0..28.0),
            humidity: rng.gen_range(45.0..75.0),
        }
    }

    fn next(&mut self, rng: &mut impl Rng, failure_rate: f64) -> SensorReading {
        self.temperature = (self.temperature + rng.gen_range(-0.3..0.3)).clamp(5.0, 40.0);
        self.humidity = (self.humidity + rng.gen_range(-1.5..1.5)).clamp(20.0, 95.0);

        let failed = rng.gen_bool(failure_rate.clamp(0.0, 1.0));
        SensorReading {
            temp: (self.temperature * 10.0).round() / 10.0,
            humid: self.humidity.round() as i64,
            status: if failed { "1" } else { "0" }.to_string(),
        }
    }
}
