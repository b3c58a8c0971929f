use crate::device_registry::{DeviceRegistry, FieldExtractor, Subtype};
use crate::home_assistant;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// Raw text every decoded telemetry record carries. Lines without it are decoder chatter.
pub const TELEMETRY_MARKER: &str = "\"time\"";

/// Why a line produced no readings. All of these are expected in normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NotTelemetry,
    ParseError,
    NoModel,
    NoId,
    Filtered,
    UnknownType,
}

impl Skip {
    pub fn reason(&self) -> &'static str {
        match self {
            Skip::NotTelemetry => "not_telemetry",
            Skip::ParseError => "parse_error",
            Skip::NoModel => "no_model",
            Skip::NoId => "no_id",
            Skip::Filtered => "filtered",
            Skip::UnknownType => "unknown_type",
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Allow-list of sensor uids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceFilter {
    /// No list configured: every uid passes.
    #[default]
    Any,
    Only(HashSet<String>),
}

impl DeviceFilter {
    pub fn only<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DeviceFilter::Only(uids.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, uid: &str) -> bool {
        match self {
            DeviceFilter::Any => true,
            DeviceFilter::Only(uids) => uids.contains(uid),
        }
    }
}

/// Who sent a frame, and the uid used in topics and discovery keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    pub model: String,
    pub id: String,
    pub channel: Option<String>,
    pub uid: String,
}

impl SensorIdentity {
    pub fn new(model: String, id: String, channel: Option<String>) -> Self {
        let uid = [Some(model.as_str()), Some(id.as_str()), channel.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
            .replace(' ', "-");

        Self {
            model,
            id,
            channel,
            uid,
        }
    }

    /// Human readable device name, e.g. `Acurite-5n1 2006 Channel A`.
    pub fn display_name(&self) -> String {
        match self.channel.as_deref() {
            Some(channel) if !channel.is_empty() => {
                format!("{} {} Channel {}", self.model, self.id, channel)
            }
            _ => format!("{} {}", self.model, self.id),
        }
    }
}

/// One canonical value bound for a state topic.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalReading {
    pub state_topic: String,
    pub output_field: String,
    pub value: Value,
}

/// A reading together with the extractor that produced it, for discovery.
#[derive(Debug, Clone)]
pub struct ExtractedReading<'r> {
    pub extractor: &'r FieldExtractor,
    pub reading: CanonicalReading,
}

#[derive(Debug, Clone)]
pub struct NormalizedFrame<'r> {
    pub identity: SensorIdentity,
    pub subtype: Option<Subtype>,
    pub readings: Vec<ExtractedReading<'r>>,
}

/// Turns decoder JSON lines into canonical readings.
#[derive(Debug, Clone)]
pub struct FrameNormalizer {
    registry: DeviceRegistry,
    filter: DeviceFilter,
    topic_prefix: String,
}

impl FrameNormalizer {
    pub fn new(registry: DeviceRegistry, filter: DeviceFilter, topic_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            filter,
            topic_prefix: topic_prefix.into(),
        }
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Normalizes one decoder line. Readings follow the registry's extractor order.
    pub fn normalize(&self, line: &str) -> Result<NormalizedFrame<'_>, Skip> {
        if !line.contains(TELEMETRY_MARKER) {
            return Err(Skip::NotTelemetry);
        }

        let frame: Map<String, Value> = serde_json::from_str(line).map_err(|_| Skip::ParseError)?;

        let model = field_text(&frame, &["model"]).ok_or(Skip::NoModel)?;
        let id = field_text(&frame, &["id", "sensor_id"]).ok_or(Skip::NoId)?;
        let channel = field_text(&frame, &["channel"]);
        let identity = SensorIdentity::new(model, id, channel);

        if !self.filter.allows(&identity.uid) {
            return Err(Skip::Filtered);
        }

        let subtype = ["subtype", "message_type"]
            .iter()
            .find_map(|key| frame.get(*key).and_then(Subtype::from_json));

        let extractors = self
            .registry
            .lookup(&identity.model, subtype.as_ref())
            .ok_or(Skip::UnknownType)?;

        let mut readings = Vec::with_capacity(extractors.len());
        for extractor in extractors {
            let Some(raw) = frame.get(&extractor.name_in) else {
                warn!(
                    "Could not find field `{}` in message from {}",
                    extractor.name_in, identity.uid
                );
                continue;
            };

            let Some(value) = extractor.transform.apply(raw) else {
                warn!(
                    "Field `{}` from {} has unusable value {} for {:?}",
                    extractor.name_in, identity.uid, raw, extractor.transform
                );
                continue;
            };

            let state_topic = home_assistant::state_topic(
                &self.topic_prefix,
                extractor.component,
                &identity.uid,
                subtype.as_ref(),
                extractor.generic,
            );

            readings.push(ExtractedReading {
                extractor,
                reading: CanonicalReading {
                    state_topic,
                    output_field: extractor.name_out.clone(),
                    value,
                },
            });
        }

        Ok(NormalizedFrame {
            identity,
            subtype,
            readings,
        })
    }
}

/// First present, non-empty scalar among `keys`, rendered as text.
fn field_text(frame: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match frame.get(*key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}
