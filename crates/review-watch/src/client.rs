//! Push channel client.
//!
//! Connects to the dashboard's WebSocket push channel, decodes each frame
//! into a `PushEvent` and emits it on a `PushChannel`. After a disconnect the
//! client reconnects with exponential backoff.

use anyhow::{bail, Result};
use futures::{Stream, StreamExt};
use review_core::{PushChannel, PushEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

/// Maximum accepted push message size (1MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of consecutive attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Consecutive failure count for one client.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    pub attempts: u32,
}

impl ReconnectState {
    /// Count another attempt and return how long to wait before making it.
    pub fn next_delay(&mut self, config: &ReconnectConfig) -> Duration {
        self.attempts += 1;
        calculate_backoff(self.attempts, config)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }
}

/// Reads push messages from a dashboard and fans them out on a channel.
pub struct PushClient {
    url: String,
    channel: Arc<PushChannel>,
    reconnect: ReconnectConfig,
}

impl PushClient {
    pub fn new(
        url: impl Into<String>,
        channel: Arc<PushChannel>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            url: url.into(),
            channel,
            reconnect,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect once and forward events until the server goes away.
    ///
    /// Returns the number of events delivered; connection failures are errors.
    pub async fn run_once(&self) -> Result<usize> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        info!("Connected to push channel {}", self.url);
        Ok(forward_messages(&self.url, ws_stream, &self.channel).await)
    }

    /// Stay connected, reconnecting with backoff after every disconnect.
    ///
    /// Only returns once `max_attempts` consecutive attempts have failed. A
    /// connection that closes before delivering any event counts as failed.
    pub async fn run(&self) -> Result<()> {
        let mut state = ReconnectState::default();
        loop {
            match self.run_once().await {
                Ok(0) => {
                    warn!("Push channel {} closed without delivering events", self.url);
                }
                Ok(delivered) => {
                    info!(
                        "Push channel {} closed after {} event(s)",
                        self.url, delivered
                    );
                    state.reset();
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", self.url, e);
                }
            }

            let delay = state.next_delay(&self.reconnect);
            if state.exceeded_max_attempts(&self.reconnect) {
                bail!(
                    "Giving up on {} after {} attempt(s)",
                    self.url,
                    state.attempts
                );
            }
            info!(
                "Reconnecting to {} in {:?} (attempt {})",
                self.url, delay, state.attempts
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Decode frames from `read` and emit them on `channel` until the stream ends.
///
/// Oversized, non-UTF-8 and malformed frames are dropped. Returns the number
/// of events emitted.
pub async fn forward_messages<S>(address: &str, mut read: S, channel: &PushChannel) -> usize
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut delivered = 0;

    while let Some(msg) = read.next().await {
        let data = match msg {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!("Received close frame from {}", address);
                break;
            }
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                debug!("Connection {} closed", address);
                break;
            }
            Err(e) => {
                error!("WebSocket error on {}: {}", address, e);
                break;
            }
        };

        if data.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds max size ({} > {}), dropping",
                address,
                data.len(),
                MAX_MESSAGE_SIZE
            );
            continue;
        }

        let Ok(text) = String::from_utf8(data) else {
            warn!("Dropping non-UTF-8 message from {}", address);
            continue;
        };

        if let Some(event) = PushEvent::from_json(&text) {
            debug!(
                "Push event from {} for {}",
                address,
                event.spec_name().unwrap_or("-")
            );
            channel.emit(&event);
            delivered += 1;
        }
    }

    delivered
}
