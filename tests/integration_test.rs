use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::io::BufReader;

use rtl433_mqtt_bridge::{
    error::Result, BridgeError, CycleDriver, DeviceFilter, DeviceRegistry, FrameNormalizer,
    Publisher,
};

const RECONFIG_INTERVAL: Duration = Duration::from_secs(60 * 60);

const WEATHER_56: &str = r#"{"time":"2019-09-08 08:41:45","model":"Acurite-5n1","subtype":56,"id":2006,"channel":"A","battery_ok":1,"wind_avg_km_h":3.483,"temperature_F":59.4,"humidity":90}"#;
const WEATHER_49: &str = r#"{"time":"2019-09-08 08:41:63","model":"Acurite-5n1","subtype":49,"id":2006,"channel":"A","battery_ok":0,"wind_avg_km_h":10.0,"wind_dir_deg":180,"rain_in":0.25}"#;

/// A message captured by the recording publisher
#[derive(Debug, Clone)]
struct Sent {
    topic: String,
    payload: Value,
    retain: bool,
}

/// Publisher that keeps everything in memory
#[derive(Default)]
struct RecordingPublisher {
    sent: Vec<Sent>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&mut self, topic: &str, payload: String, retain: bool) -> Result<()> {
        self.sent.push(Sent {
            topic: topic.to_string(),
            payload: serde_json::from_str(&payload).expect("Payloads are always JSON"),
            retain,
        });
        Ok(())
    }
}

impl RecordingPublisher {
    fn configs(&self) -> Vec<&Sent> {
        self.sent.iter().filter(|s| s.retain).collect()
    }

    fn states(&self) -> Vec<&Sent> {
        self.sent.iter().filter(|s| !s.retain).collect()
    }

    fn state_for(&self, topic: &str) -> Vec<&Value> {
        self.states()
            .into_iter()
            .filter(|s| s.topic == topic)
            .map(|s| &s.payload)
            .collect()
    }
}

fn build_driver(filter: DeviceFilter) -> CycleDriver<RecordingPublisher> {
    build_driver_with(DeviceRegistry::builtin(), filter)
}

fn build_driver_with(
    registry: DeviceRegistry,
    filter: DeviceFilter,
) -> CycleDriver<RecordingPublisher> {
    let normalizer = FrameNormalizer::new(registry, filter, "homeassistant");
    CycleDriver::new(
        normalizer,
        RECONFIG_INTERVAL,
        630,
        RecordingPublisher::default(),
    )
}

#[tokio::test]
async fn test_weather_station_round_trip() {
    let mut driver = build_driver(DeviceFilter::only(["Acurite-5n1_2006_A"]));
    driver.process_line(WEATHER_56, Instant::now()).await.unwrap();

    let publisher = driver.publisher();

    assert_eq!(
        publisher.state_for("homeassistant/sensor/Acurite-5n1_2006_A/state56"),
        vec![&json!({"wind_speed": 2.2, "temperature": 59.4, "humidity": 90.0})]
    );
    assert_eq!(
        publisher.state_for("homeassistant/binary_sensor/Acurite-5n1_2006_A/state"),
        vec![&json!({"battery_low": "OFF"})]
    );
    assert_eq!(publisher.states().len(), 2);

    let config_topics: Vec<&str> = publisher
        .configs()
        .iter()
        .map(|s| s.topic.as_str())
        .collect();
    assert_eq!(
        config_topics,
        vec![
            "homeassistant/binary_sensor/Acurite-5n1_2006_A/Bat/config",
            "homeassistant/sensor/Acurite-5n1_2006_A/WndSpd/config",
            "homeassistant/sensor/Acurite-5n1_2006_A/Temp/config",
            "homeassistant/sensor/Acurite-5n1_2006_A/Hum/config",
        ]
    );

    let wind = &publisher.configs()[1].payload;
    assert_eq!(
        wind,
        &json!({
            "name": "Acurite-5n1 2006 Channel A Wind Speed",
            "state_topic": "homeassistant/sensor/Acurite-5n1_2006_A/state56",
            "value_template": "{{ value_json.wind_speed }}",
            "unique_id": "Acurite-5n1_2006_AWndSpd",
            "unit_of_measurement": "mph",
            "icon": "mdi:speedometer",
            "expire_after": 630
        })
    );
}

#[tokio::test]
async fn test_filtered_device_never_publishes() {
    let mut driver = build_driver(DeviceFilter::only(["Acurite-Tower_1_A"]));
    let now = Instant::now();

    for cycle in 0..3 {
        let report = driver
            .process_line(WEATHER_56, now + Duration::from_secs(cycle))
            .await
            .unwrap();
        assert_eq!(report.readings, 0);
    }

    assert!(driver.publisher().sent.is_empty());
    assert!(driver.tracker().is_empty());
}

#[tokio::test]
async fn test_discovery_is_sent_once_per_interval() {
    let mut driver = build_driver(DeviceFilter::Any);
    let start = Instant::now();

    driver.process_line(WEATHER_56, start).await.unwrap();
    driver
        .process_line(WEATHER_56, start + Duration::from_secs(30))
        .await
        .unwrap();

    let publisher = driver.publisher();
    assert_eq!(publisher.configs().len(), 4);
    // State goes out on every cycle
    assert_eq!(
        publisher
            .state_for("homeassistant/sensor/Acurite-5n1_2006_A/state56")
            .len(),
        2
    );
}

#[tokio::test]
async fn test_discovery_is_repeated_after_interval() {
    let mut driver = build_driver(DeviceFilter::Any);
    let start = Instant::now();

    driver.process_line(WEATHER_56, start).await.unwrap();
    assert_eq!(driver.publisher().configs().len(), 4);

    // Any cycle past the interval clears the records, even one without telemetry
    let later = start + RECONFIG_INTERVAL + Duration::from_secs(1);
    let report = driver
        .process_line("Detached kernel driver", later)
        .await
        .unwrap();
    assert!(report.discovery_reset);

    let report = driver
        .process_line(WEATHER_56, later + Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(report.discoveries, 4);
    assert_eq!(driver.publisher().configs().len(), 8);
}

#[tokio::test]
async fn test_unknown_model_never_publishes() {
    let mut driver = build_driver(DeviceFilter::Any);
    let line = r#"{"time":"2024-01-01 00:00:00","model":"Foo-Bar","id":1,"channel":"A","battery_ok":1,"temperature_C":20.0,"humidity":50}"#;

    let report = driver.process_line(line, Instant::now()).await.unwrap();

    assert_eq!(report.skipped, Some(rtl433_mqtt_bridge::Skip::UnknownType));
    assert!(driver.publisher().sent.is_empty());
}

#[tokio::test]
async fn test_empty_cycles_publish_nothing() {
    let mut driver = build_driver(DeviceFilter::Any);
    let now = Instant::now();

    for line in [
        "",
        "rtl_433 version 23.11",
        r#"{"time": not json"#,
        r#"{"time":"t","model":"Acurite-Tower"}"#,
        r#"{"time":"t","model":"Acurite-Tower","id":5}"#,
    ] {
        let report = driver.process_line(line, now).await.unwrap();
        assert_eq!(report.state_publishes, 0);
    }

    assert!(driver.publisher().sent.is_empty());
}

#[tokio::test]
async fn test_subtypes_split_specific_fields_and_share_generic_ones() {
    let mut driver = build_driver(DeviceFilter::Any);
    let now = Instant::now();

    driver.process_line(WEATHER_49, now).await.unwrap();
    driver.process_line(WEATHER_56, now).await.unwrap();

    let publisher = driver.publisher();
    assert_eq!(
        publisher.state_for("homeassistant/sensor/Acurite-5n1_2006_A/state49"),
        vec![&json!({"wind_speed": 6.2, "wind_dir": 180.0, "rain": 0.25})]
    );
    assert_eq!(
        publisher.state_for("homeassistant/sensor/Acurite-5n1_2006_A/state56"),
        vec![&json!({"wind_speed": 2.2, "temperature": 59.4, "humidity": 90.0})]
    );
    assert_eq!(
        publisher.state_for("homeassistant/binary_sensor/Acurite-5n1_2006_A/state"),
        vec![&json!({"battery_low": "ON"}), &json!({"battery_low": "OFF"})]
    );

    // The shared battery entity is announced once for both message types
    let battery_configs = publisher
        .configs()
        .iter()
        .filter(|s| s.topic.ends_with("/Bat/config"))
        .count();
    assert_eq!(battery_configs, 1);
    assert_eq!(publisher.configs().len(), 7);
}

#[tokio::test]
async fn test_run_processes_stream_until_closed() {
    let input = format!(
        "rtl_433 version 23.11\n{WEATHER_49}\nTuned to 433.920MHz.\n{WEATHER_56}\n"
    );
    let mut driver = build_driver(DeviceFilter::Any);

    let result = driver.run(BufReader::new(input.as_bytes())).await;

    assert!(matches!(result, Err(BridgeError::DecoderClosed)));
    let publisher = driver.publisher();
    assert_eq!(publisher.configs().len(), 7);
    // One flush per telemetry line: two topics each
    assert_eq!(publisher.states().len(), 4);
}

#[tokio::test]
async fn test_drivers_do_not_share_state() {
    let mut first = build_driver(DeviceFilter::Any);
    let mut second = build_driver(DeviceFilter::Any);
    let now = Instant::now();

    first.process_line(WEATHER_56, now).await.unwrap();
    second.process_line(WEATHER_56, now).await.unwrap();

    assert_eq!(first.publisher().configs().len(), 4);
    assert_eq!(second.publisher().configs().len(), 4);
}

#[tokio::test]
async fn test_custom_registry_with_text_subtype() {
    let mut registry = DeviceRegistry::builtin();
    registry
        .merge_json(
            r#"{
                "Fineoffset-WH2": [
                    {
                        "subtype": "TH",
                        "fields": [
                            {
                                "short": "TempF",
                                "label": "Temperature",
                                "input": "temperature_C",
                                "output": "temperature",
                                "transform": "celsius_to_fahrenheit",
                                "component": "sensor",
                                "discovery": { "unit_of_measurement": "°F", "device_class": "temperature" }
                            },
                            {
                                "short": "Bat",
                                "label": "Battery",
                                "input": "battery",
                                "output": "battery_low",
                                "transform": "battery_status",
                                "component": "binary_sensor",
                                "generic": true
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
    registry.validate().unwrap();

    let mut driver = build_driver_with(registry, DeviceFilter::only(["Fineoffset-WH2_77"]));
    let line = r#"{"time":"t","model":"Fineoffset-WH2","message_type":"TH","id":77,"temperature_C":25.0,"battery":"LOW"}"#;
    driver.process_line(line, Instant::now()).await.unwrap();

    let publisher = driver.publisher();
    assert_eq!(
        publisher.state_for("homeassistant/sensor/Fineoffset-WH2_77/stateTH"),
        vec![&json!({"temperature": 77.0})]
    );
    assert_eq!(
        publisher.state_for("homeassistant/binary_sensor/Fineoffset-WH2_77/state"),
        vec![&json!({"battery_low": "ON"})]
    );

    let temp_config = &publisher.configs()[0].payload;
    assert_eq!(temp_config["name"], json!("Fineoffset-WH2 77 Temperature"));
    assert!(temp_config.get("expire_after").is_none());
}
