use std::time::Duration;

use backoff::backoff::Backoff;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Client configuration. Every field has a default, so an empty document
/// deserializes to the same values as [`ClientConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long a caller waits for another task's in-flight connect attempt
    /// before giving up with a response timeout.
    #[serde(default = "ClientConfig::connect_timeout_default", deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// Initial reconnect interval.
    #[serde(
        default = "ClientConfig::reconnect_interval_default",
        deserialize_with = "deserialize_duration"
    )]
    pub reconnect_interval: Duration,
    /// Total retry time after which the reconnect interval starts growing.
    #[serde(
        default = "ClientConfig::reconnect_growth_after_default",
        deserialize_with = "deserialize_duration"
    )]
    pub reconnect_growth_after: Duration,
    /// Upper bound on the reconnect interval.
    #[serde(
        default = "ClientConfig::reconnect_interval_max_default",
        deserialize_with = "deserialize_duration"
    )]
    pub reconnect_interval_max: Duration,
    /// Interval growth factor applied once `reconnect_growth_after` has elapsed.
    #[serde(default = "ClientConfig::reconnect_multiplier_default")]
    pub reconnect_multiplier: f64,
    /// Capacity of the received-message queue, consumed by the transport.
    #[serde(default = "ClientConfig::msg_queue_cap_default")]
    pub msg_queue_cap: usize,
    /// Capacity of the event queue; producers suspend when it is full.
    #[serde(default = "ClientConfig::event_queue_cap_default")]
    pub event_queue_cap: usize,
    /// Max subscriptions per multi-subscribe request.
    #[serde(default = "ClientConfig::resub_batch_size_default")]
    pub resub_batch_size: usize,
}

impl Default for ClientConfig {
    #[inline]
    fn default() -> Self {
        Self {
            connect_timeout: Self::connect_timeout_default(),
            reconnect_interval: Self::reconnect_interval_default(),
            reconnect_growth_after: Self::reconnect_growth_after_default(),
            reconnect_interval_max: Self::reconnect_interval_max_default(),
            reconnect_multiplier: Self::reconnect_multiplier_default(),
            msg_queue_cap: Self::msg_queue_cap_default(),
            event_queue_cap: Self::event_queue_cap_default(),
            resub_batch_size: Self::resub_batch_size_default(),
        }
    }
}

impl ClientConfig {
    fn connect_timeout_default() -> Duration {
        Duration::from_secs(5)
    }

    fn reconnect_interval_default() -> Duration {
        Duration::from_secs(1)
    }

    fn reconnect_growth_after_default() -> Duration {
        Duration::from_secs(10)
    }

    fn reconnect_interval_max_default() -> Duration {
        Duration::from_secs(10)
    }

    fn reconnect_multiplier_default() -> f64 {
        3.0
    }

    fn msg_queue_cap_default() -> usize {
        256
    }

    fn event_queue_cap_default() -> usize {
        256
    }

    fn resub_batch_size_default() -> usize {
        900
    }

    /// Backoff strategy for the reconnect loop: the interval stays at
    /// `reconnect_interval` until `reconnect_growth_after` of total delay has
    /// accumulated, then grows by `reconnect_multiplier` per attempt, capped
    /// at `reconnect_interval_max`. Retries forever.
    #[inline]
    pub fn reconnect_backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff {
            initial: self.reconnect_interval,
            growth_after: self.reconnect_growth_after,
            max: self.reconnect_interval_max,
            multiplier: self.reconnect_multiplier,
            current: self.reconnect_interval,
            elapsed: Duration::ZERO,
        }
    }
}

/// Exponential backoff with a growth threshold; delays are non-decreasing
/// and capped, and `next_backoff` never returns `None`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    growth_after: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    elapsed: Duration,
}

impl Backoff for ReconnectBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.elapsed = self.elapsed.saturating_add(delay);
        if self.elapsed >= self.growth_after {
            self.current = self.current.mul_f64(self.multiplier).min(self.max);
        }
        Some(delay)
    }

    fn reset(&mut self) {
        self.current = self.initial;
        self.elapsed = Duration::ZERO;
    }
}

/// Deserialize a Duration from a string like "500ms", "1s", "2m", "1h".
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Parse a human duration string; unrecognized parts count as zero.
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'Y'])
        .map(|part| {
            let mut chars = part.chars();
            let unit = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match unit {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60_000,
                'h' => v * 3_600_000,
                'd' => v * 86_400_000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_strings() {
        assert_eq!(to_duration("500ms"), Duration::from_millis(500));
        assert_eq!(to_duration("1s"), Duration::from_secs(1));
        assert_eq!(to_duration("1m30s"), Duration::from_secs(90));
        assert_eq!(to_duration("2h"), Duration::from_secs(7200));
        assert_eq!(to_duration(""), Duration::ZERO);
    }

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(1));
        assert_eq!(cfg.reconnect_growth_after, Duration::from_secs(10));
        assert_eq!(cfg.reconnect_interval_max, Duration::from_secs(10));
        assert_eq!(cfg.reconnect_multiplier, 3.0);
        assert_eq!(cfg.msg_queue_cap, 256);
        assert_eq!(cfg.event_queue_cap, 256);
        assert_eq!(cfg.resub_batch_size, 900);

        let from_empty: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(from_empty.resub_batch_size, cfg.resub_batch_size);
        assert_eq!(from_empty.connect_timeout, cfg.connect_timeout);
    }

    #[test]
    fn config_from_toml() {
        let cfg: ClientConfig = toml::from_str(
            r#"
            connect_timeout = "2s"
            reconnect_interval = "100ms"
            resub_batch_size = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(2));
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(100));
        assert_eq!(cfg.resub_batch_size, 50);
        assert_eq!(cfg.event_queue_cap, 256);
    }

    #[test]
    fn backoff_delays_non_decreasing_and_capped() {
        let mut cfg = ClientConfig::default();
        cfg.reconnect_interval = Duration::from_secs(1);
        cfg.reconnect_growth_after = Duration::from_secs(3);
        cfg.reconnect_interval_max = Duration::from_secs(10);
        cfg.reconnect_multiplier = 2.0;

        let mut b = cfg.reconnect_backoff();
        let mut prev = Duration::ZERO;
        let mut delays = Vec::new();
        for _ in 0..12 {
            let d = b.next_backoff().unwrap();
            assert!(d >= prev, "delays must not decrease");
            assert!(d <= Duration::from_secs(10), "delays must honor the cap");
            prev = d;
            delays.push(d);
        }
        // stays flat until the threshold, then grows
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(1));
        assert_eq!(delays[2], Duration::from_secs(1));
        assert!(delays[3] > Duration::from_secs(1));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(10));

        b.reset();
        assert_eq!(b.next_backoff().unwrap(), Duration::from_secs(1));
    }
}
