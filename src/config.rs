//! Client configuration.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::Error;

/// Default platform host.
pub const DEFAULT_HOST: &str = "api.deepgram.com";

/// Default API version segment of the endpoint path.
pub const DEFAULT_API_VERSION: &str = "v1";

const DEFAULT_CONNECT_RETRIES: usize = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_FLUSH_TICK: Duration = Duration::from_millis(500);
const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(100);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded dial retries with a fixed delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of dial attempts, including the first one.
    pub max_attempts: usize,
    /// Sleep between two consecutive failed attempts.
    pub delay_between_attempts: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt count and delay.
    pub fn new(max_attempts: usize, delay_between_attempts: Duration) -> Self {
        Self {
            max_attempts,
            delay_between_attempts,
        }
    }

    /// Returns a copy of this policy with a different attempt count.
    pub fn with_attempts(self, max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

/// How the API key is presented in the `Authorization` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// `Authorization: Token <key>`.
    #[default]
    Token,
    /// `Authorization: Bearer <token>`.
    Bearer,
}

/// Which streaming channel a client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Realtime speech synthesis: text commands out, audio in.
    Speak,
    /// Realtime transcription: audio out, results in.
    Listen,
}

impl Direction {
    /// Resource path of the channel, relative to the API version.
    pub fn path(self) -> &'static str {
        match self {
            Direction::Speak => "speak",
            Direction::Listen => "listen",
        }
    }
}

/// Configuration shared by every streaming client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Credential sent in the `Authorization` header.
    pub api_key: SecretString,
    /// Authorization scheme for `api_key`.
    pub auth_scheme: AuthScheme,
    /// Platform host, optionally prefixed with `ws://` or `wss://`.
    pub host: String,
    /// API version path segment.
    pub api_version: String,
    /// Dial retry policy used by `connect` and lazy dials.
    pub retry: RetryPolicy,
    /// Quiescence window after which a `Flush` is sent automatically.
    pub auto_flush: Option<Duration>,
    /// Tick interval of the auto-flush timer.
    pub flush_tick: Duration,
    /// Sleep after each send of the close sequence.
    pub close_grace: Duration,
    /// Upper bound on a single dial.
    pub connect_timeout: Duration,
    /// Log every inbound and outbound frame at debug level.
    pub log_frames: bool,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl ClientConfig {
    /// Creates a configuration with defaults for everything but the key.
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            auth_scheme: AuthScheme::Token,
            host: DEFAULT_HOST.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            retry: RetryPolicy::default(),
            auto_flush: None,
            flush_tick: DEFAULT_FLUSH_TICK,
            close_grace: DEFAULT_CLOSE_GRACE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            log_frames: false,
            user_agent: concat!("rust-speechstream/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Sets the host; trailing whitespace and slashes are dropped.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end().trim_end_matches('/').to_string();
        self
    }

    /// Presents the key as a bearer token.
    pub fn with_bearer_token(mut self) -> Self {
        self.auth_scheme = AuthScheme::Bearer;
        self
    }

    /// Sets the API version segment.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the dial retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables automatic flushing after `delta` without payload writes.
    pub fn with_auto_flush(mut self, delta: Duration) -> Self {
        self.auto_flush = Some(delta);
        self
    }

    /// Sets the auto-flush timer tick.
    pub fn with_flush_tick(mut self, tick: Duration) -> Self {
        self.flush_tick = tick;
        self
    }

    /// Sets the grace sleep used by the close sequence.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Sets the dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables or disables per-frame debug logging.
    pub fn with_frame_logging(mut self, enabled: bool) -> Self {
        self.log_frames = enabled;
        self
    }

    /// Builds the websocket endpoint for `path` with `query` appended.
    pub fn endpoint(&self, path: &str, query: &[(String, String)]) -> Result<Url, Error> {
        let base = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("wss://{}", self.host)
        };
        let mut url = Url::parse(&format!(
            "{}/{}/{}",
            base,
            self.api_version.trim_matches('/'),
            path.trim_matches('/')
        ))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Value of the `Authorization` header.
    pub(crate) fn authorization(&self) -> String {
        let scheme = match self.auth_scheme {
            AuthScheme::Token => "Token",
            AuthScheme::Bearer => "Bearer",
        };
        format!("{} {}", scheme, self.api_key.expose_secret())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new(SecretString::new("secret-key".to_string()))
    }

    #[test]
    fn endpoint_defaults_to_secure_scheme() {
        let url = config().endpoint("speak", &[]).unwrap();
        assert_eq!(url.as_str(), "wss://api.deepgram.com/v1/speak");
    }

    #[test]
    fn endpoint_keeps_explicit_scheme_and_appends_query() {
        let query = vec![
            ("model".to_string(), "nova-2".to_string()),
            ("keywords".to_string(), "a b".to_string()),
        ];
        let url = config()
            .with_host("ws://127.0.0.1:9000/ \n")
            .endpoint("listen", &query)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:9000/v1/listen?model=nova-2&keywords=a+b"
        );
    }

    #[test]
    fn api_key_never_lands_in_the_query() {
        let url = config().endpoint("listen", &[]).unwrap();
        assert!(!url.as_str().contains("secret-key"));
        assert_eq!(config().authorization(), "Token secret-key");
        assert_eq!(
            config().with_bearer_token().authorization(),
            "Bearer secret-key"
        );
    }

    #[test]
    fn retry_policy_defaults() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_between_attempts, Duration::from_secs(2));
        assert_eq!(retry.with_attempts(5).max_attempts, 5);
    }
}
