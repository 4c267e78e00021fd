use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Minimum time between two pings.
pub const UPTIME_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pings an uptime monitor after successful on-chain reads.
///
/// Pings are fire-and-forget: they run on their own task and a failing
/// monitor never slows a worker down.
#[derive(Debug)]
pub struct UptimeNotifier {
    client: reqwest::Client,
    url: Option<Url>,
    min_interval: Duration,
    last_ping: Mutex<Option<Instant>>,
}

impl UptimeNotifier {
    /// Notifier pinging `url` at most every [`UPTIME_PING_INTERVAL`]. Without
    /// a url it does nothing.
    pub fn new(url: Option<Url>) -> Self {
        Self::with_interval(url, UPTIME_PING_INTERVAL)
    }

    /// Notifier with a custom minimum interval
    pub fn with_interval(url: Option<Url>, min_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            min_interval,
            last_ping: Mutex::new(None),
        }
    }

    /// Ping the monitor unless it was pinged less than the minimum interval
    /// ago. Returns whether a ping was sent.
    pub fn notify(&self) -> bool {
        let Some(url) = self.url.clone() else {
            return false;
        };
        {
            let mut last_ping = self.last_ping.lock();
            let now = Instant::now();
            if last_ping.is_some_and(|last| now.duration_since(last) < self.min_interval) {
                return false;
            }
            *last_ping = Some(now);
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(%url, "Pinged uptime monitor");
                }
                Ok(response) => {
                    warn!(%url, status = %response.status(), "Uptime monitor rejected ping");
                }
                Err(err) => warn!(%url, ?err, "Failed to ping uptime monitor"),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_url_nothing_is_sent() {
        let notifier = UptimeNotifier::new(None);
        assert!(!notifier.notify());
    }

    #[tokio::test(start_paused = true)]
    async fn pings_are_rate_limited() {
        // nothing listens on this port; failures are only logged
        let url: Url = "http://127.0.0.1:9/ping".parse().unwrap();
        let notifier = UptimeNotifier::new(Some(url));

        assert!(notifier.notify());
        assert!(!notifier.notify());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!notifier.notify());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(notifier.notify());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failed_pings_are_only_logged() {
        let url: Url = "http://127.0.0.1:9/ping".parse().unwrap();
        let notifier = UptimeNotifier::new(Some(url));

        assert!(notifier.notify());
        for _ in 0..200 {
            if logs_contain("Failed to ping uptime monitor") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(logs_contain("Failed to ping uptime monitor"));
    }
}
