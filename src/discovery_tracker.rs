use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Remembers which (uid, short code) pairs have had discovery metadata published.
///
/// The whole set is dropped once `reconfig_interval` has passed since the most recent
/// announcement, so every sensor gets announced again the next time it reports. This
/// recovers subscribers that lost their retained discovery state.
#[derive(Debug, Clone)]
pub struct DiscoveryTracker {
    announced: HashSet<String>,
    last_announcement: Option<Instant>,
    reconfig_interval: Duration,
}

impl DiscoveryTracker {
    pub fn new(reconfig_interval: Duration) -> Self {
        Self {
            announced: HashSet::new(),
            last_announcement: None,
            reconfig_interval,
        }
    }

    /// True when the pair has not been announced since the last reset.
    pub fn should_announce(&self, uid: &str, short: &str) -> bool {
        !self.announced.contains(&key(uid, short))
    }

    pub fn mark_announced(&mut self, uid: &str, short: &str, now: Instant) {
        self.announced.insert(key(uid, short));
        self.last_announcement = Some(now);
    }

    /// Clears every record once the reconfiguration interval has elapsed.
    /// Returns whether a reset happened.
    pub fn maybe_reset(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_announcement else {
            return false;
        };

        if now.saturating_duration_since(last) > self.reconfig_interval && !self.announced.is_empty() {
            self.announced.clear();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.announced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.announced.is_empty()
    }
}

fn key(uid: &str, short: &str) -> String {
    crate::home_assistant::unique_id(uid, short)
}
