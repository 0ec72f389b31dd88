use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Mqtt,
    Kafka,
}

impl FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mqtt" => Ok(Transport::Mqtt),
            "kafka" => Ok(Transport::Kafka),
            other => bail!("Unknown CHANNEL_TRANSPORT '{}', expected 'mqtt' or 'kafka'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub transport: Transport,
    pub sos_event_name: String,
    pub channel_buffer: usize,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub mqtt_keep_alive: u64,
    pub kafka_bootstrap_servers: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub dashboard_utc_offset_minutes: i32,
    pub dashboard_clock_interval_ms: u64,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let transport = env::var("CHANNEL_TRANSPORT")
            .unwrap_or_else(|_| "mqtt".to_string())
            .parse()?;
        let sos_event_name = env::var("SOS_EVENT_NAME").unwrap_or_else(|_| "new-sos".to_string());
        let channel_buffer = parse_or("CHANNEL_BUFFER", 100);

        let mqtt_broker = env::var("MQTT_BROKER").unwrap_or_else(|_| "localhost".to_string());
        let mqtt_port = parse_or("MQTT_PORT", 1883);
        let mqtt_username = env::var("MQTT_USERNAME").unwrap_or_default();
        let mqtt_password = env::var("MQTT_PASSWORD").unwrap_or_default();
        let mqtt_keep_alive = parse_or("MQTT_KEEP_ALIVE", 5);

        let kafka_bootstrap_servers =
            env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let kafka_group_id =
            env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "siscom-sos-dashboard".to_string());
        let kafka_auto_offset_reset =
            env::var("KAFKA_AUTO_OFFSET_RESET").unwrap_or_else(|_| "latest".to_string());
        let kafka_sasl_mechanism =
            env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "SCRAM-SHA-256".to_string());
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol =
            env::var("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|_| "SASL_PLAINTEXT".to_string());
        let kafka_max_retries = parse_or("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = parse_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        // India Standard Time
        let dashboard_utc_offset_minutes = parse_or("DASHBOARD_UTC_OFFSET_MINUTES", 330);
        let dashboard_clock_interval_ms = parse_or("DASHBOARD_CLOCK_INTERVAL_MS", 1000);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            transport,
            sos_event_name,
            channel_buffer,
            mqtt_broker,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_keep_alive,
            kafka_bootstrap_servers,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            dashboard_utc_offset_minutes,
            dashboard_clock_interval_ms,
            log_level,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
