//! Proportional scroll sync between a source pane and its preview.
//!
//! Applying a sync scrolls the other pane, which fires a scroll event of its
//! own. To break that loop the side that initiated the last sync is
//! remembered; events from the opposite side are ignored until both panes
//! have been quiet for `settle_ms`.
//!
//! The synchronizer never reads a clock. Callers pass `now` with every event,
//! and call `flush` on a timer to deliver the trailing update of a throttled
//! burst.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use web_time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pane {
    Source,
    Preview,
}

impl Pane {
    pub fn other(self) -> Pane {
        match self {
            Pane::Source => Pane::Preview,
            Pane::Preview => Pane::Source,
        }
    }

    fn index(self) -> usize {
        match self {
            Pane::Source => 0,
            Pane::Preview => 1,
        }
    }
}

/// Scroll geometry of one pane, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn max_scroll(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    /// Scroll position as a fraction of the scrollable range; None without overflow.
    pub fn ratio(&self) -> Option<f64> {
        let max = self.max_scroll();
        (max > 0.0).then(|| (self.scroll_top / max).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PanePair {
    pub source: ScrollMetrics,
    pub preview: ScrollMetrics,
}

impl PanePair {
    pub fn get(&self, pane: Pane) -> &ScrollMetrics {
        match pane {
            Pane::Source => &self.source,
            Pane::Preview => &self.preview,
        }
    }
}

/// Scroll position to apply to `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollUpdate {
    pub target: Pane,
    pub scroll_top: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollSyncConfig {
    /// Minimum spacing between handled events per direction
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Quiet period after which the initiator flag is cleared
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_throttle_ms() -> u64 {
    16
}

fn default_settle_ms() -> u64 {
    100
}

impl Default for ScrollSyncConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

#[derive(Debug)]
pub struct ScrollSynchronizer {
    throttle: Duration,
    settle: Duration,
    initiator: Option<Pane>,
    last_activity: Option<Instant>,
    /// Indexed by source pane
    last_handled: [Option<Instant>; 2],
    pending: [bool; 2],
}

impl ScrollSynchronizer {
    pub fn new(config: ScrollSyncConfig) -> Self {
        Self {
            throttle: Duration::from_millis(config.throttle_ms),
            settle: Duration::from_millis(config.settle_ms),
            initiator: None,
            last_activity: None,
            last_handled: [None; 2],
            pending: [false; 2],
        }
    }

    pub fn initiator(&self) -> Option<Pane> {
        self.initiator
    }

    /// Handle a scroll event from `from`; returns the position to apply to the other pane.
    pub fn on_scroll(
        &mut self,
        from: Pane,
        panes: &PanePair,
        now: Instant,
    ) -> Option<ScrollUpdate> {
        self.expire(now);
        self.last_activity = Some(now);

        if self.initiator.is_some_and(|initiator| initiator != from) {
            return None;
        }

        let idx = from.index();
        if let Some(last) = self.last_handled[idx] {
            if now.saturating_duration_since(last) < self.throttle {
                self.pending[idx] = true;
                return None;
            }
        }

        self.sync(from, panes, now)
    }

    /// Deliver the trailing update of a throttled direction, once its window has passed.
    pub fn flush(&mut self, panes: &PanePair, now: Instant) -> Option<ScrollUpdate> {
        self.expire(now);

        for from in [Pane::Source, Pane::Preview] {
            let idx = from.index();
            if !self.pending[idx] || self.initiator.is_some_and(|i| i != from) {
                continue;
            }
            let due = self.last_handled[idx]
                .is_none_or(|last| now.saturating_duration_since(last) >= self.throttle);
            if due {
                return self.sync(from, panes, now);
            }
        }
        None
    }

    fn expire(&mut self, now: Instant) {
        if let Some(last) = self.last_activity {
            if now.saturating_duration_since(last) >= self.settle {
                self.initiator = None;
                self.pending = [false; 2];
            }
        }
    }

    fn sync(&mut self, from: Pane, panes: &PanePair, now: Instant) -> Option<ScrollUpdate> {
        let idx = from.index();
        self.pending[idx] = false;
        self.last_handled[idx] = Some(now);

        let ratio = panes.get(from).ratio()?;
        let target = from.other();
        let max = panes.get(target).max_scroll();
        if max <= 0.0 {
            return None;
        }

        self.initiator = Some(from);
        Some(ScrollUpdate {
            target,
            scroll_top: ratio * max,
        })
    }
}

impl Default for ScrollSynchronizer {
    fn default() -> Self {
        Self::new(ScrollSyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn panes(source_top: f64, preview_top: f64) -> PanePair {
        PanePair {
            source: ScrollMetrics::new(source_top, 2000.0, 500.0),
            preview: ScrollMetrics::new(preview_top, 4000.0, 1000.0),
        }
    }

    #[test]
    fn test_maps_ratio_onto_other_pane() {
        let mut sync = ScrollSynchronizer::default();
        let update = sync
            .on_scroll(Pane::Source, &panes(750.0, 0.0), Instant::now())
            .unwrap();
        assert_eq!(update.target, Pane::Preview);
        assert!((update.scroll_top - 1500.0).abs() < 1e-6);
        assert_eq!(sync.initiator(), Some(Pane::Source));
    }

    #[test]
    fn test_no_overflow_is_noop() {
        let mut sync = ScrollSynchronizer::default();
        let t0 = Instant::now();
        let flat = PanePair {
            source: ScrollMetrics::new(300.0, 2000.0, 500.0),
            preview: ScrollMetrics::new(0.0, 800.0, 800.0),
        };

        for (i, top) in [0.0, 300.0, 1500.0].into_iter().enumerate() {
            let mut pair = flat;
            pair.source.scroll_top = top;
            assert!(sync.on_scroll(Pane::Source, &pair, t0 + ms(50 * i as u64)).is_none());
        }
        // Nothing was synced, so no side claims the initiator role.
        assert_eq!(sync.initiator(), None);
        assert!(sync.flush(&flat, t0 + ms(200)).is_none());
        assert!(sync.on_scroll(Pane::Preview, &flat, t0 + ms(500)).is_none());
    }

    #[test]
    fn test_echo_from_target_is_ignored() {
        let mut sync = ScrollSynchronizer::default();
        let t0 = Instant::now();
        assert!(sync.on_scroll(Pane::Source, &panes(750.0, 0.0), t0).is_some());

        // The preview fires its own event after being scrolled programmatically.
        assert!(sync
            .on_scroll(Pane::Preview, &panes(750.0, 1500.0), t0 + ms(5))
            .is_none());
        assert_eq!(sync.initiator(), Some(Pane::Source));
    }

    #[test]
    fn test_flag_clears_after_quiet_period() {
        let mut sync = ScrollSynchronizer::default();
        let t0 = Instant::now();
        sync.on_scroll(Pane::Source, &panes(750.0, 0.0), t0);

        // Continued echo keeps the flag alive.
        assert!(sync.on_scroll(Pane::Preview, &panes(750.0, 1500.0), t0 + ms(90)).is_none());
        assert!(sync.on_scroll(Pane::Preview, &panes(750.0, 1500.0), t0 + ms(180)).is_none());

        // Quiet for the settle window: preview may lead again.
        let update = sync
            .on_scroll(Pane::Preview, &panes(750.0, 3000.0), t0 + ms(300))
            .unwrap();
        assert_eq!(update.target, Pane::Source);
        assert!((update.scroll_top - 1500.0).abs() < 1e-6);
        assert_eq!(sync.initiator(), Some(Pane::Preview));
    }

    #[test]
    fn test_throttled_burst_flushes_last_position() {
        let mut sync = ScrollSynchronizer::default();
        let t0 = Instant::now();
        assert!(sync.on_scroll(Pane::Source, &panes(0.0, 0.0), t0).is_some());
        assert!(sync.on_scroll(Pane::Source, &panes(300.0, 0.0), t0 + ms(4)).is_none());
        assert!(sync.on_scroll(Pane::Source, &panes(600.0, 0.0), t0 + ms(8)).is_none());

        // Too early: still inside the throttle window.
        assert!(sync.flush(&panes(600.0, 0.0), t0 + ms(10)).is_none());

        let update = sync.flush(&panes(600.0, 0.0), t0 + ms(20)).unwrap();
        assert!((update.scroll_top - 1200.0).abs() < 1e-6);
        assert!(sync.flush(&panes(600.0, 0.0), t0 + ms(40)).is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config: ScrollSyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ScrollSyncConfig::default());
        assert_eq!(config.throttle_ms, 16);
        assert_eq!(config.settle_ms, 100);

        let config: ScrollSyncConfig = serde_json::from_str(r#"{"settle_ms": 250}"#).unwrap();
        assert_eq!(config.settle_ms, 250);
        assert_eq!(config.throttle_ms, 16);
    }
}
