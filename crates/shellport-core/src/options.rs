//! Connection options shared by every transport.

use std::time::Duration;

/// Options recognized by `connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// Send credentials (the configured cookie) with the handshake.
    pub with_credentials: bool,
    /// Cookie value sent when `with_credentials` is set.
    pub cookie: Option<String>,
    /// Maximum consecutive automatic reconnection tries (0 = never reconnect).
    pub reconnection_attempts: u32,
    /// An attempt with no answer after this long is abandoned.
    pub connect_timeout: Duration,
    /// Base delay before the first reconnection try.
    pub reconnection_delay: Duration,
    /// Upper bound for the backoff delay.
    pub reconnection_delay_max: Duration,
    /// Jitter applied to each delay, in `0.0..=1.0`.
    pub randomization_factor: f64,
    /// Keepalive ping interval (zero disables keepalive).
    pub ping_interval: Duration,
    /// Extra grace period after a ping before the peer is declared gone.
    pub ping_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            with_credentials: true,
            cookie: None,
            reconnection_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            reconnection_delay: Duration::from_millis(1000),
            reconnection_delay_max: Duration::from_millis(5000),
            randomization_factor: 0.5,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
        }
    }
}

impl ConnectOptions {
    /// Cookie to attach to the handshake, if credentials are enabled.
    pub fn handshake_cookie(&self) -> Option<&str> {
        if self.with_credentials {
            self.cookie.as_deref().filter(|c| !c.is_empty())
        } else {
            None
        }
    }

    /// Backoff delay before reconnection try `attempt` (1-based).
    ///
    /// `jitter` is a sample in `-1.0..=1.0`; it is scaled by
    /// `randomization_factor` before being applied.
    pub fn reconnect_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.reconnection_delay.as_millis() as f64;
        let exp = attempt.saturating_sub(1).min(31);
        let mut ms = base * f64::from(1u32 << exp);

        let factor = self.randomization_factor.clamp(0.0, 1.0);
        ms += ms * factor * jitter.clamp(-1.0, 1.0);

        let max = self.reconnection_delay_max.as_millis() as f64;
        Duration::from_millis(ms.clamp(0.0, max) as u64)
    }

    /// Silence after which a connected peer is considered gone.
    pub fn liveness_window(&self) -> Option<Duration> {
        if self.ping_interval.is_zero() {
            None
        } else {
            Some(self.ping_interval + self.ping_timeout)
        }
    }
}
