//! rtl_433 to MQTT bridge library
//!
//! Normalizes the JSON records of an RF decoder into Home Assistant sensor state, announcing
//! each sensor through MQTT discovery and batching state updates into one publish per topic
//! per read cycle.

pub mod config;
pub mod cycle_driver;
pub mod decoder_process;
pub mod device_registry;
pub mod discovery_tracker;
pub mod error;
pub mod frame_normalizer;
pub mod home_assistant;
pub mod mqtt_publisher;
pub mod publication_batcher;

// Re-export commonly used types for easier access
pub use config::BridgeConfig;
pub use cycle_driver::{CycleDriver, CycleReport, Publisher};
pub use decoder_process::DecoderProcess;
pub use device_registry::{DeviceRegistry, FieldExtractor, Subtype, Transform};
pub use discovery_tracker::DiscoveryTracker;
pub use error::BridgeError;
pub use frame_normalizer::{CanonicalReading, DeviceFilter, FrameNormalizer, Skip};
pub use mqtt_publisher::MqttPublisher;
pub use publication_batcher::PublicationBatcher;
