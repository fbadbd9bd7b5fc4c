use std::time::Duration;

use alloy::{
    providers::WsConnect,
    pubsub::{ConnectionHandle, PubSubConnect},
    transports::TransportResult,
};
use tokio_retry::{Retry, strategy::ExponentialBackoff};
use tracing::warn;
use url::Url;

/// First reconnect delay in milliseconds.
const INITIAL_RECONNECT_BACKOFF_MS: u64 = 100;

/// Upper bound for a single reconnect delay.
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Reconnect attempts before the subscription is given up.
const MAX_RECONNECT_ATTEMPTS: usize = 10;

/// A [`WsConnect`] wrapper that retries reconnection with a capped
/// exponential backoff before giving up on the connection.
#[derive(Debug, Clone)]
pub struct RetryWsConnect {
    inner: WsConnect,
}

impl RetryWsConnect {
    /// Create a new `RetryWsConnect` for `ws_url`.
    #[inline]
    pub fn from_url(ws_url: Url) -> Self {
        Self { inner: WsConnect::new(ws_url) }
    }

    fn strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(INITIAL_RECONNECT_BACKOFF_MS / 2)
            .max_delay(MAX_RECONNECT_BACKOFF)
            .take(MAX_RECONNECT_ATTEMPTS)
    }
}

impl PubSubConnect for RetryWsConnect {
    fn is_local(&self) -> bool {
        self.inner.is_local()
    }

    async fn connect(&self) -> TransportResult<ConnectionHandle> {
        self.inner.connect().await
    }

    fn try_reconnect(
        &self,
    ) -> alloy::transports::impl_future!(<Output = TransportResult<ConnectionHandle>>) {
        warn!(url = ?self.inner.url(), "reconnecting to websocket endpoint");
        Retry::spawn(Self::strategy(), || self.inner.try_reconnect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_is_bounded() {
        let delays: Vec<_> = RetryWsConnect::strategy().collect();
        assert_eq!(delays.len(), MAX_RECONNECT_ATTEMPTS);
        assert_eq!(delays[0], Duration::from_millis(INITIAL_RECONNECT_BACKOFF_MS));
        assert!(delays.iter().all(|d| *d <= MAX_RECONNECT_BACKOFF));
        assert_eq!(delays.last(), Some(&MAX_RECONNECT_BACKOFF));
    }
}
