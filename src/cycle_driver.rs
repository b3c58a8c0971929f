use crate::decoder_process::read_line_lossy;
use crate::discovery_tracker::DiscoveryTracker;
use crate::error::{BridgeError, Result};
use crate::frame_normalizer::{ExtractedReading, FrameNormalizer, Skip};
use crate::home_assistant::{discovery_topic, DiscoveryConfig};
use crate::publication_batcher::PublicationBatcher;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::io::AsyncBufRead;
use tracing::{debug, info, warn};

/// Outbound side of the bridge. Publishes are fire-and-forget; an error means the
/// transport is gone and the loop has to stop.
#[async_trait]
pub trait Publisher: Send {
    async fn publish(&mut self, topic: &str, payload: String, retain: bool) -> Result<()>;
}

/// What a single line did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub skipped: Option<Skip>,
    pub readings: usize,
    pub discoveries: usize,
    pub state_publishes: usize,
    pub discovery_reset: bool,
}

/// Runs lines through normalize → discovery → batch → flush, one line per cycle.
///
/// All per-cycle state (discovery records and the open batch) is owned here, so
/// independent drivers never share anything.
pub struct CycleDriver<P> {
    normalizer: FrameNormalizer,
    tracker: DiscoveryTracker,
    batcher: PublicationBatcher,
    publisher: P,
    update_expiration_secs: u64,
}

impl<P: Publisher> CycleDriver<P> {
    pub fn new(
        normalizer: FrameNormalizer,
        reconfig_interval: Duration,
        update_expiration_secs: u64,
        publisher: P,
    ) -> Self {
        Self {
            normalizer,
            tracker: DiscoveryTracker::new(reconfig_interval),
            batcher: PublicationBatcher::new(),
            publisher,
            update_expiration_secs,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn tracker(&self) -> &DiscoveryTracker {
        &self.tracker
    }

    /// Reads lines until the stream ends. A closed stream is always an error: the
    /// decoder is expected to run forever.
    ///
    /// Bytes that are not UTF-8 are replaced rather than rejected, so a garbled line is
    /// skipped like any other unparseable one.
    pub async fn run<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("Starting read loop");
        let mut buf = Vec::new();
        while let Some(line) = read_line_lossy(&mut reader, &mut buf).await? {
            debug!("Got message: {}", line);
            self.process_line(&line, Instant::now()).await?;
        }
        Err(BridgeError::DecoderClosed)
    }

    /// One full cycle for one input line, ending with a flush of the batch.
    pub async fn process_line(&mut self, line: &str, now: Instant) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        match self.normalizer.normalize(line) {
            Ok(frame) => {
                let uid = frame.identity.uid.as_str();
                for ExtractedReading { extractor, reading } in frame.readings {
                    info!(
                        "got sensor: {} - {}={}",
                        uid, reading.output_field, reading.value
                    );

                    if self.tracker.should_announce(uid, &extractor.short) {
                        let config = DiscoveryConfig::new(
                            &frame.identity,
                            extractor,
                            &reading.state_topic,
                            self.update_expiration_secs,
                        );
                        let topic = discovery_topic(
                            self.normalizer.topic_prefix(),
                            extractor.component,
                            uid,
                            &extractor.short,
                        );
                        info!("Sending config for sensor: {}", config.unique_id);
                        self.publisher
                            .publish(&topic, serde_json::to_string(&config)?, true)
                            .await?;
                        self.tracker.mark_announced(uid, &extractor.short, now);
                        report.discoveries += 1;
                    }

                    self.batcher.accumulate(reading);
                    report.readings += 1;
                }
            }
            Err(skip) => {
                match skip {
                    Skip::NotTelemetry => {}
                    Skip::ParseError => warn!("Could not parse message: {}", line),
                    _ => debug!("Skipping message ({}): {}", skip, line),
                }
                report.skipped = Some(skip);
            }
        }

        report.state_publishes = self.flush().await?;

        let announced = self.tracker.len();
        if self.tracker.maybe_reset(now) {
            info!(
                "Reconfiguration interval elapsed, {} sensor fields will be announced again",
                announced
            );
            report.discovery_reset = true;
        }

        Ok(report)
    }

    /// Drops any readings that were accumulated but never flushed.
    pub fn discard_pending(&mut self) -> usize {
        self.batcher.discard()
    }

    async fn flush(&mut self) -> Result<usize> {
        let batch = self.batcher.flush();
        let published = batch.len();
        for (topic, payload) in batch {
            let body = serde_json::to_string(&payload)?;
            debug!("Publishing {} to {}", body, topic);
            self.publisher.publish(&topic, body, false).await?;
        }
        Ok(published)
    }
}
