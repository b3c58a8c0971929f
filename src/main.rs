use anyhow::anyhow;
use rtl433_mqtt_bridge::{
    BridgeConfig, CycleDriver, DecoderProcess, DeviceRegistry, FrameNormalizer, MqttPublisher,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::from_env()?;
    init_logging(config.debug);

    info!("Starting rtl_433 to MQTT bridge");
    config.log_summary();

    let registry = DeviceRegistry::load(config.registry_file.as_deref())?;
    info!("Device registry ready with {} models", registry.model_count());

    let (publisher, mut connection_lost) = MqttPublisher::connect(&config.mqtt).await?;
    let (decoder, decoder_output) = DecoderProcess::spawn(&config.decoder_command)?;
    info!("Decoder running with pid {:?}", decoder.id());

    let normalizer = FrameNormalizer::new(registry, config.filter.clone(), config.topic_prefix.clone());
    let mut driver = CycleDriver::new(
        normalizer,
        config.reconfig_interval,
        config.update_expiration_secs,
        publisher,
    );

    let outcome = tokio::select! {
        result = driver.run(decoder_output) => result.map_err(anyhow::Error::from),
        lost = &mut connection_lost => match lost {
            Ok(e) => Err(e.into()),
            Err(_) => Err(anyhow!("MQTT event loop stopped unexpectedly")),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt. Exiting...");
            Ok(())
        }
    };

    let dropped = driver.discard_pending();
    if dropped > 0 {
        info!("Discarded {} unpublished state payloads", dropped);
    }
    if let Err(e) = driver.publisher().disconnect().await {
        warn!("Failed to disconnect from broker cleanly: {}", e);
    }
    decoder.shutdown().await?;

    outcome
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
