use crate::error::{BridgeError, Result};
use serde_derive::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Secondary key inside a model's table, taken from `subtype` or `message_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subtype {
    Number(i64),
    Text(String),
}

impl Subtype {
    /// Converts a decoded JSON value into a subtype key. `null` means "no subtype".
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Subtype::Number(i)),
                None => Some(Subtype::Text(n.to_string())),
            },
            Value::String(s) => Some(Subtype::Text(s.clone())),
            other => Some(Subtype::Text(other.to_string())),
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subtype::Number(n) => write!(f, "{n}"),
            Subtype::Text(s) => f.write_str(s),
        }
    }
}

/// Home Assistant entity class an extractor publishes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Sensor,
    BinarySensor,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::BinarySensor => "binary_sensor",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in value conversions applied to a raw decoder field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    Identity,
    /// Numeric or numeric-string input, emitted as a float.
    Float,
    /// `battery_ok` flag: `0` means low (`"ON"`), anything else is fine (`"OFF"`).
    BatteryOk,
    /// Battery status text: `"OK"` is fine (`"OFF"`), anything else is low (`"ON"`).
    BatteryStatus,
    /// km/h to mph, one decimal.
    KphToMph,
    /// °C to °F, one decimal.
    CelsiusToFahrenheit,
}

const KPH_TO_MPH: f64 = 0.621371;

impl Transform {
    /// Applies the conversion. Returns `None` when the raw value has the wrong shape.
    pub fn apply(&self, raw: &Value) -> Option<Value> {
        match self {
            Transform::Identity => Some(raw.clone()),
            Transform::Float => numeric(raw).and_then(float_value),
            Transform::BatteryOk => {
                let low = match raw {
                    Value::Bool(ok) => !ok,
                    other => numeric(other)? == 0.0,
                };
                Some(binary_state(low))
            }
            Transform::BatteryStatus => Some(binary_state(raw.as_str() != Some("OK"))),
            Transform::KphToMph => numeric(raw).and_then(|kph| float_value(round1(kph * KPH_TO_MPH))),
            Transform::CelsiusToFahrenheit => {
                numeric(raw).and_then(|c| float_value(round1(c * 9.0 / 5.0 + 32.0)))
            }
        }
    }
}

fn numeric(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_value(value: f64) -> Option<Value> {
    Number::from_f64(value).map(Value::Number)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn binary_state(on: bool) -> Value {
    Value::String(if on { "ON" } else { "OFF" }.to_string())
}

/// Static discovery metadata merged into an extractor's config payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// When set, the configured update expiration is announced as `expire_after`.
    #[serde(default)]
    pub expire_after: bool,
}

/// Describes one canonical output field of a device model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExtractor {
    pub short: String,
    pub label: String,
    #[serde(rename = "input")]
    pub name_in: String,
    #[serde(rename = "output")]
    pub name_out: String,
    #[serde(default)]
    pub transform: Transform,
    pub component: Component,
    #[serde(default)]
    pub discovery: DiscoveryFragment,
    /// Generic fields share one state topic across all subtypes of a model.
    #[serde(default)]
    pub generic: bool,
}

impl FieldExtractor {
    pub fn sensor(short: &str, label: &str, name_in: &str, name_out: &str) -> Self {
        Self::new(Component::Sensor, short, label, name_in, name_out)
    }

    pub fn binary_sensor(short: &str, label: &str, name_in: &str, name_out: &str) -> Self {
        Self::new(Component::BinarySensor, short, label, name_in, name_out)
    }

    fn new(component: Component, short: &str, label: &str, name_in: &str, name_out: &str) -> Self {
        Self {
            short: short.to_string(),
            label: label.to_string(),
            name_in: name_in.to_string(),
            name_out: name_out.to_string(),
            transform: Transform::Identity,
            component,
            discovery: DiscoveryFragment::default(),
            generic: false,
        }
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.discovery.unit_of_measurement = Some(unit.to_string());
        self
    }

    pub fn device_class(mut self, class: &str) -> Self {
        self.discovery.device_class = Some(class.to_string());
        self
    }

    pub fn icon(mut self, icon: &str) -> Self {
        self.discovery.icon = Some(icon.to_string());
        self
    }

    pub fn expiring(mut self) -> Self {
        self.discovery.expire_after = true;
        self
    }

    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }
}

type ModelTable = HashMap<Option<Subtype>, Vec<FieldExtractor>>;

#[derive(Debug, Deserialize)]
struct SubtypeTable {
    #[serde(default)]
    subtype: Option<Subtype>,
    fields: Vec<FieldExtractor>,
}

/// Maps (model, subtype) to the ordered extractor list that applies to it.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    models: HashMap<String, ModelTable>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the devices supported out of the box.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.insert(
            "Acurite-Tower",
            None,
            vec![
                battery_ok("Sensor Battery"),
                celsius_temperature(),
                humidity(),
            ],
        );

        registry.insert(
            "Acurite-5n1",
            Some(Subtype::Number(49)),
            vec![
                battery_ok("Weather Station Battery"),
                FieldExtractor::sensor("WndAvg", "Wind Speed", "wind_avg_km_h", "wind_speed")
                    .transform(Transform::KphToMph)
                    .unit("mph")
                    .icon("mdi:speedometer")
                    .expiring(),
                FieldExtractor::sensor("WndDir", "Wind Direction", "wind_dir_deg", "wind_dir")
                    .transform(Transform::Float)
                    .unit("°")
                    .icon("mdi:compass")
                    .expiring(),
                FieldExtractor::sensor("Rain", "Rainfall", "rain_in", "rain")
                    .transform(Transform::Float)
                    .unit("in")
                    .icon("mdi:ruler")
                    .expiring(),
            ],
        );

        registry.insert(
            "Acurite-5n1",
            Some(Subtype::Number(56)),
            vec![
                battery_ok("Weather Station Battery"),
                FieldExtractor::sensor("WndSpd", "Wind Speed", "wind_avg_km_h", "wind_speed")
                    .transform(Transform::KphToMph)
                    .unit("mph")
                    .icon("mdi:speedometer")
                    .expiring(),
                FieldExtractor::sensor("Temp", "Temperature", "temperature_F", "temperature")
                    .transform(Transform::Float)
                    .unit("°F")
                    .device_class("temperature")
                    .expiring(),
                humidity().transform(Transform::Float),
            ],
        );

        registry.insert(
            "LaCrosse-TX141THBv2",
            None,
            vec![
                battery_ok("Sensor Battery"),
                celsius_temperature(),
                humidity(),
            ],
        );

        registry
    }

    /// Built-in tables, extended by an optional JSON file, validated.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut registry = Self::builtin();
        if let Some(path) = extra {
            let tables = registry.merge_file(path)?;
            info!("Loaded {} device tables from {}", tables, path.display());
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Adds or replaces the table for (model, subtype), returning the replaced one.
    pub fn insert(
        &mut self,
        model: impl Into<String>,
        subtype: Option<Subtype>,
        fields: Vec<FieldExtractor>,
    ) -> Option<Vec<FieldExtractor>> {
        self.models
            .entry(model.into())
            .or_default()
            .insert(subtype, fields)
    }

    /// Two-level lookup: exact model name, then exact subtype key.
    ///
    /// `None` means the device is unsupported, which is an ordinary outcome.
    pub fn lookup(&self, model: &str, subtype: Option<&Subtype>) -> Option<&[FieldExtractor]> {
        self.models
            .get(model)?
            .get(&subtype.cloned())
            .map(Vec::as_slice)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Merges model tables from a JSON document, replacing existing (model, subtype) entries.
    /// Returns the number of tables read.
    pub fn merge_json(&mut self, json: &str) -> Result<usize> {
        let tables: HashMap<String, Vec<SubtypeTable>> = serde_json::from_str(json)
            .map_err(|e| BridgeError::Registry(format!("unreadable registry document: {e}")))?;

        let mut count = 0;
        for (model, entries) in tables {
            for entry in entries {
                self.insert(model.clone(), entry.subtype, entry.fields);
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Registry(format!("cannot read {}: {e}", path.display()))
        })?;
        self.merge_json(&contents)
    }

    /// Checks that every table is internally consistent. Run once at startup.
    pub fn validate(&self) -> Result<()> {
        for (model, table) in &self.models {
            if model.is_empty() {
                return Err(BridgeError::Registry("empty model name".to_string()));
            }

            let mut shorts: HashMap<&str, (&Option<Subtype>, &FieldExtractor)> = HashMap::new();

            for (subtype, fields) in table {
                let location = describe(model, subtype);
                if fields.is_empty() {
                    return Err(BridgeError::Registry(format!("{location} has no fields")));
                }

                let mut outputs = HashSet::new();
                for field in fields {
                    if field.short.is_empty() || field.name_in.is_empty() || field.name_out.is_empty()
                    {
                        return Err(BridgeError::Registry(format!(
                            "{location} has an extractor with an empty short code, input or output name"
                        )));
                    }
                    if !outputs.insert(field.name_out.as_str()) {
                        return Err(BridgeError::Registry(format!(
                            "{location} produces output `{}` twice",
                            field.name_out
                        )));
                    }

                    match shorts.get(field.short.as_str()).copied() {
                        None => {
                            shorts.insert(field.short.as_str(), (subtype, field));
                        }
                        Some((seen_subtype, _)) if seen_subtype == subtype => {
                            return Err(BridgeError::Registry(format!(
                                "{location} uses short code `{}` twice",
                                field.short
                            )));
                        }
                        Some((_, seen)) => {
                            let shared = field.generic
                                && seen.generic
                                && field.component == seen.component
                                && field.name_out == seen.name_out;
                            if !shared {
                                return Err(BridgeError::Registry(format!(
                                    "model `{model}` reuses short code `{}` across subtypes for a non-generic field",
                                    field.short
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn describe(model: &str, subtype: &Option<Subtype>) -> String {
    match subtype {
        Some(subtype) => format!("model `{model}` subtype `{subtype}`"),
        None => format!("model `{model}`"),
    }
}

fn battery_ok(label: &str) -> FieldExtractor {
    FieldExtractor::binary_sensor("Bat", label, "battery_ok", "battery_low")
        .transform(Transform::BatteryOk)
        .device_class("battery")
        .generic()
}

fn celsius_temperature() -> FieldExtractor {
    FieldExtractor::sensor("Temp", "Temperature", "temperature_C", "temperature")
        .unit("°C")
        .device_class("temperature")
        .expiring()
}

fn humidity() -> FieldExtractor {
    FieldExtractor::sensor("Hum", "Relative Humidity", "humidity", "humidity")
        .unit("%")
        .device_class("humidity")
        .expiring()
}
