use crate::device_registry::{Component, FieldExtractor, Subtype};
use crate::frame_normalizer::SensorIdentity;
use serde_derive::Serialize;

/// Default discovery prefix Home Assistant listens on.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// `<prefix>/<component>/<uid>/state`, suffixed with the subtype for subtype-specific fields.
pub fn state_topic(
    prefix: &str,
    component: Component,
    uid: &str,
    subtype: Option<&Subtype>,
    generic: bool,
) -> String {
    let base = format!("{prefix}/{component}/{uid}/state");
    match subtype {
        Some(subtype) if !generic => format!("{base}{subtype}"),
        _ => base,
    }
}

/// `<prefix>/<component>/<uid>/<short>/config`
pub fn discovery_topic(prefix: &str, component: Component, uid: &str, short: &str) -> String {
    format!("{prefix}/{component}/{uid}/{short}/config")
}

/// Retained MQTT discovery payload describing one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryConfig {
    pub name: String,
    pub state_topic: String,
    pub value_template: String,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<u64>,
}

impl DiscoveryConfig {
    /// Builds the config for `extractor` on the sensor `identity`.
    ///
    /// `update_expiration_secs` is only announced when the extractor asks for expiry.
    pub fn new(
        identity: &SensorIdentity,
        extractor: &FieldExtractor,
        state_topic: &str,
        update_expiration_secs: u64,
    ) -> Self {
        let fragment = &extractor.discovery;
        Self {
            name: format!("{} {}", identity.display_name(), extractor.label),
            state_topic: state_topic.to_string(),
            value_template: format!("{{{{ value_json.{} }}}}", extractor.name_out),
            unique_id: unique_id(&identity.uid, &extractor.short),
            unit_of_measurement: fragment.unit_of_measurement.clone(),
            device_class: fragment.device_class.clone(),
            icon: fragment.icon.clone(),
            expire_after: fragment.expire_after.then_some(update_expiration_secs),
        }
    }
}

/// Discovery de-duplication key and Home Assistant `unique_id`.
pub fn unique_id(uid: &str, short: &str) -> String {
    format!("{uid}{short}")
}
