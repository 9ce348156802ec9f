//! Connection and session configuration.
//!
//! [`Config`] tunes a single event-channel connection. [`SessionConfig`]
//! describes one harness run and owns a connection `Config`.

use std::time::Duration;

use url::{Host, Url};

use crate::device::CameraStatus;
use crate::error::{ConfigError, Error};

/// Endpoint used when neither `--endpoint` nor `DEVSIM_ENDPOINT` is given.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:3000/";

/// Size limits for the wire layer.
///
/// Telemetry envelopes are a few hundred bytes, so the defaults are small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame payload.
    ///
    /// Default: 1 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message.
    ///
    /// Default: 4 MB
    pub max_message_size: usize,

    /// Maximum size of the HTTP upgrade response head.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            max_message_size: 4 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// # Errors
    ///
    /// [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// # Errors
    ///
    /// [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeouts enforced by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect.
    ///
    /// Default: 5 seconds
    pub connect: Duration,

    /// HTTP upgrade round trip.
    ///
    /// Default: 5 seconds
    pub handshake: Duration,

    /// A single event write, including waiting for the writer lock.
    ///
    /// Default: 5 seconds
    pub write: Duration,

    /// Sending the close frame on disconnect.
    ///
    /// Default: 2 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            handshake: Duration::from_secs(5),
            write: Duration::from_secs(5),
            close: Duration::from_secs(2),
        }
    }
}

/// Configuration for one event-channel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub limits: Limits,
    pub timeouts: Timeouts,
    /// Initial capacity of the frame reader buffer.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            read_buffer_size: 8 * 1024,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }
}

/// Parsed `ws://host:port/path` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// Parse an endpoint URL. `http://` is accepted as an alias of `ws://`,
    /// matching how messaging servers are usually advertised.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidEndpoint` for unparseable input or a missing host,
    /// `ConfigError::UnsupportedScheme` for anything but `ws`/`http`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            input: input.to_string(),
            reason,
        };

        let url = Url::parse(input).map_err(|err| invalid(err.to_string()))?;
        match url.scheme() {
            "ws" | "http" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        // IPv6 literals are kept without brackets so they resolve as-is.
        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        };
        if host.is_empty() {
            return Err(invalid("missing host".into()));
        }
        let port = url.port().unwrap_or(80);
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self { host, port, path })
    }

    /// Value for the `Host` header.
    pub fn authority(&self) -> String {
        if self.port == 80 {
            self.url_host()
        } else {
            format!("{}:{}", self.url_host(), self.port)
        }
    }

    fn url_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws://{}:{}{}", self.url_host(), self.port, self.path)
    }
}

/// Bounded exponential backoff for the initial connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    ///
    /// Default: 3
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure.
    ///
    /// Default: 250 ms
    pub initial_backoff: Duration,
    /// Upper bound on a single delay.
    ///
    /// Default: 2 seconds
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Candidate values for the independent simulated signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSet {
    pub gps_locations: Vec<String>,
    pub camera_statuses: Vec<CameraStatus>,
}

impl Default for SignalSet {
    fn default() -> Self {
        let gps_locations = [
            "41.0082° N, 28.9784° E",
            "39.9334° N, 32.8597° E",
            "38.4237° N, 27.1428° E",
            "37.0000° N, 35.3213° E",
            "36.8969° N, 30.7133° E",
            "40.1885° N, 29.0610° E",
            "41.2867° N, 36.3300° E",
            "38.7312° N, 35.4787° E",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            gps_locations,
            camera_statuses: CameraStatus::ALL.to_vec(),
        }
    }
}

/// One harness run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Number of simulated devices.
    ///
    /// Default: 1
    pub devices: usize,
    /// Session length.
    ///
    /// Default: 60 seconds
    pub duration: Duration,
    /// Telemetry cadence.
    ///
    /// Default: 2 seconds
    pub interval: Duration,
    /// Delay between a Park command and auto-park completion.
    ///
    /// Default: 5 seconds
    pub park_delay: Duration,
    pub retry: RetryPolicy,
    pub signals: SignalSet,
    /// Seed for signal selection; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Upper bound on the graceful disconnect at session end.
    ///
    /// Default: 2 seconds
    pub flush_timeout: Duration,
    pub connection: Config,
}

impl SessionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            devices: 1,
            duration: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            park_delay: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            signals: SignalSet::default(),
            seed: None,
            flush_timeout: Duration::from_secs(2),
            connection: Config::default(),
        }
    }

    #[must_use]
    pub fn with_devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_park_delay(mut self, delay: Duration) -> Self {
        self.park_delay = delay;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_signals(mut self, signals: SignalSet) -> Self {
        self.signals = signals;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_connection(mut self, connection: Config) -> Self {
        self.connection = connection;
        self
    }

    /// # Errors
    ///
    /// The first violated constraint, as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.devices == 0 {
            return Err(ConfigError::NoDevices);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "connect-attempts",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        if self.signals.gps_locations.is_empty() || self.signals.camera_statuses.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "signals",
                value: format!("{:?}", self.signals),
                reason: "every signal needs at least one candidate value".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert!(limits.check_frame_size(1024).is_ok());
        assert!(matches!(
            limits.check_message_size(5 * 1024 * 1024),
            Err(Error::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(5));
        assert_eq!(timeouts.close, Duration::from_secs(2));
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint = Endpoint::parse("ws://localhost:3000/").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 3000);
        assert_eq!(endpoint.path, "/");
        assert_eq!(endpoint.authority(), "localhost:3000");
        assert_eq!(endpoint.to_string(), "ws://localhost:3000/");
    }

    #[test]
    fn test_endpoint_http_alias_and_default_port() {
        let endpoint = Endpoint::parse("http://example.com/events?room=1").unwrap();
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.path, "/events?room=1");
        assert_eq!(endpoint.authority(), "example.com");
    }

    #[test]
    fn test_endpoint_ipv6_literal() {
        use std::net::ToSocketAddrs;

        let endpoint = Endpoint::parse("ws://[::1]:3000/").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.authority(), "[::1]:3000");
        assert_eq!(endpoint.to_string(), "ws://[::1]:3000/");
        let resolved: Vec<_> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .unwrap()
            .collect();
        assert_eq!(resolved, vec!["[::1]:3000".parse().unwrap()]);
    }

    #[test]
    fn test_endpoint_rejects_bad_input() {
        assert!(matches!(
            Endpoint::parse("localhost:3000"),
            Err(ConfigError::UnsupportedScheme(_)) | Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert_eq!(
            Endpoint::parse("wss://example.com/"),
            Err(ConfigError::UnsupportedScheme("wss".into()))
        );
        assert!(matches!(
            Endpoint::parse("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(10), Duration::from_secs(2));
    }

    #[test]
    fn test_session_config_validate() {
        let endpoint = Endpoint::parse(DEFAULT_ENDPOINT).unwrap();
        let config = SessionConfig::new(endpoint);
        assert!(config.validate().is_ok());

        assert_eq!(
            config.clone().with_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroInterval)
        );
        assert_eq!(
            config.clone().with_devices(0).validate(),
            Err(ConfigError::NoDevices)
        );

        let mut empty = config;
        empty.signals.gps_locations.clear();
        assert!(matches!(
            empty.validate(),
            Err(ConfigError::InvalidValue { name: "signals", .. })
        ));
    }

    #[test]
    fn test_default_signals() {
        let signals = SignalSet::default();
        assert_eq!(signals.gps_locations.len(), 8);
        assert_eq!(signals.camera_statuses.len(), 4);
    }
}
