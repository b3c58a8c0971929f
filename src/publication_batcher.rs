use crate::frame_normalizer::CanonicalReading;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Merged state payloads keyed by topic, as handed to the publisher.
pub type StateBatch = BTreeMap<String, Map<String, Value>>;

/// Collects the readings of one read cycle into one payload per state topic.
#[derive(Debug, Clone, Default)]
pub struct PublicationBatcher {
    pending: StateBatch,
}

impl PublicationBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a reading into its topic's payload. A later value for the same field wins.
    pub fn accumulate(&mut self, reading: CanonicalReading) {
        self.pending
            .entry(reading.state_topic)
            .or_default()
            .insert(reading.output_field, reading.value);
    }

    /// Hands out everything gathered since the previous flush and starts over.
    pub fn flush(&mut self) -> StateBatch {
        std::mem::take(&mut self.pending)
    }

    /// Drops the open batch without publishing it.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    #[cfg(test)]
    fn pending_topics(&self) -> usize {
        self.pending.len()
    }
}
