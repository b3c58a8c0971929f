use thiserror::Error;

/// Failures that leave the cycle loop: collaborator outages and startup misconfiguration.
///
/// Per-frame problems (bad JSON, unknown models, filtered devices) are never errors, see
/// [`crate::frame_normalizer::Skip`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid device registry: {0}")]
    Registry(String),

    #[error("failed to start decoder `{command}`: {source}")]
    DecoderSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoder output stream closed")]
    DecoderClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("could not connect to broker after {attempts} attempts: {last_error}")]
    Connect { attempts: u32, last_error: String },

    #[error("lost connection to broker: {0}")]
    ConnectionLost(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
