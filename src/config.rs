use crate::error::{BridgeError, Result};
use crate::frame_normalizer::DeviceFilter;
use crate::home_assistant::DEFAULT_DISCOVERY_PREFIX;
use rumqttc::QoS;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const DEFAULT_DECODER_COMMAND: &str = "rtl_433 -F json -M utc";

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub qos: QoS,
    pub connection_attempts: u32,
}

/// Everything the bridge reads from its environment at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub topic_prefix: String,
    pub reconfig_interval: Duration,
    pub update_expiration_secs: u64,
    pub filter: DeviceFilter,
    pub decoder_command: String,
    pub registry_file: Option<PathBuf>,
    pub debug: bool,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, so tests don't touch the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let credentials = match (get("MQTT_USER"), get("MQTT_PASS")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        };

        let qos = match parse_number(get("MQTT_QOS"), "MQTT_QOS", 0u8)? {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => {
                return Err(BridgeError::Config(format!(
                    "MQTT_QOS must be 0, 1 or 2, got {other}"
                )))
            }
        };

        let connection_attempts = parse_number(get("CONNECTION_ATTEMPTS"), "CONNECTION_ATTEMPTS", 5u32)?;
        if connection_attempts == 0 {
            return Err(BridgeError::Config(
                "CONNECTION_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let reconfig_minutes = parse_number(get("RECONFIG_INTERVAL"), "RECONFIG_INTERVAL", 60u64)?;
        let reconfig_interval = reconfig_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "RECONFIG_INTERVAL={reconfig_minutes} minutes is too large"
                ))
            })?;

        let filter = match get("FILTER_IDS") {
            Some(ids) => DeviceFilter::only(
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty()),
            ),
            None => DeviceFilter::Any,
        };

        Ok(Self {
            mqtt: MqttConfig {
                host: get("MQTT_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: parse_number(get("MQTT_PORT"), "MQTT_PORT", 1883u16)?,
                client_id: get("MQTT_CLIENT_ID").unwrap_or_else(|| "rtl433-mqtt-bridge".to_string()),
                credentials,
                qos,
                connection_attempts,
            },
            topic_prefix: get("MQTT_TOPIC")
                .map(|prefix| prefix.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_DISCOVERY_PREFIX.to_string()),
            reconfig_interval,
            update_expiration_secs: parse_number(get("UPDATE_EXPIRATION"), "UPDATE_EXPIRATION", 630u64)?,
            filter,
            decoder_command: get("RTL_433_CMD").unwrap_or_else(|| DEFAULT_DECODER_COMMAND.to_string()),
            registry_file: get("REGISTRY_FILE").map(PathBuf::from),
            debug: parse_bool_safe(get("LOG_DEBUG")),
        })
    }

    pub fn log_summary(&self) {
        info!("Bridge Config:");
        info!("  Broker: {}:{} as {}", self.mqtt.host, self.mqtt.port, self.mqtt.client_id);
        info!(
            "  Credentials: {}",
            if self.mqtt.credentials.is_some() { "set" } else { "none" }
        );
        info!("  QoS: {:?}", self.mqtt.qos);
        info!("  Topic prefix: {}", self.topic_prefix);
        info!(
            "  Re-announce every {} minutes",
            self.reconfig_interval.as_secs() / 60
        );
        match &self.filter {
            DeviceFilter::Any => info!("  Device filter: none"),
            DeviceFilter::Only(ids) => info!("  Device filter: {} ids", ids.len()),
        }
        info!("  Decoder: {}", self.decoder_command);
    }
}

fn parse_number<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| BridgeError::Config(format!("{key}={raw:?} is not valid: {e}"))),
    }
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
