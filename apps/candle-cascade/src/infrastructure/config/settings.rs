//! Service Configuration Settings
//!
//! Configuration types for the aggregation service, loaded from
//! environment variables. Parse failures on optional variables fall
//! back to defaults; structurally required values (pair mappings,
//! non-zero cadence and batch size) fail loading instead of limping
//! along misconfigured.

use std::time::Duration;

use crate::infrastructure::kraken::PairMapping;

/// Cascade scheduler settings.
#[derive(Debug, Clone)]
pub struct CascadeSettings {
    /// Wall-clock period between scheduled cascade runs.
    pub cadence: Duration,
    /// Period used after a run with failures (default: same as cadence).
    pub retry_cadence: Duration,
    /// Upper refresh bound lags `now` by this margin.
    pub safety_margin: Duration,
    /// Timeout applied to each individual tier refresh.
    pub refresh_timeout: Duration,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(30),
            retry_cadence: Duration::from_secs(30),
            safety_margin: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

/// Tick ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Flush the buffer when it reaches this many ticks.
    pub max_batch_size: usize,
    /// Flush the buffer when the oldest pending tick is this old.
    pub max_batch_interval: Duration,
    /// Write attempts per batch before it is dropped.
    pub flush_retry_attempts: u32,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_interval: Duration::from_secs(5),
            flush_retry_attempts: 3,
        }
    }
}

/// Feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket URL of the venue stream.
    pub url: String,
    /// Venue pairs and their canonical symbols.
    pub pairs: Vec<PairMapping>,
    /// Initial reconnect backoff delay.
    pub backoff_initial: Duration,
    /// Reconnect backoff ceiling.
    pub backoff_max: Duration,
    /// Recycle the connection when no frame arrives for this long.
    pub idle_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "wss://ws.kraken.com".to_string(),
            pairs: vec![PairMapping {
                pair: "XBT/USD".to_string(),
                symbol: "BTCUSD".to_string(),
            }],
            backoff_initial: Duration::from_millis(5_000),
            backoff_max: Duration::from_millis(60_000),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind address for the HTTP API and metrics endpoint.
    pub http_bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Cascade scheduler settings.
    pub cascade: CascadeSettings,
    /// Tick ingestion settings.
    pub ingestion: IngestionSettings,
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl Config {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when `FEED_PAIRS` is malformed or a value that
    /// must be positive parses to zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cadence = parse_env_duration_secs(
            "CASCADE_CADENCE_SECONDS",
            CascadeSettings::default().cadence,
        );
        let cascade = CascadeSettings {
            cadence,
            retry_cadence: parse_env_duration_secs("CASCADE_RETRY_CADENCE_SECONDS", cadence),
            safety_margin: parse_env_duration_secs(
                "SAFETY_MARGIN_SECONDS",
                CascadeSettings::default().safety_margin,
            ),
            refresh_timeout: parse_env_duration_secs(
                "REFRESH_TIMEOUT_SECONDS",
                CascadeSettings::default().refresh_timeout,
            ),
        };

        let ingestion = IngestionSettings {
            max_batch_size: parse_env_usize(
                "MAX_BATCH_SIZE",
                IngestionSettings::default().max_batch_size,
            ),
            max_batch_interval: parse_env_duration_secs(
                "MAX_BATCH_INTERVAL_SECONDS",
                IngestionSettings::default().max_batch_interval,
            ),
            flush_retry_attempts: parse_env_u32(
                "FLUSH_RETRY_ATTEMPTS",
                IngestionSettings::default().flush_retry_attempts,
            ),
        };

        let pairs = match std::env::var("FEED_PAIRS") {
            Ok(raw) => parse_pairs(&raw)?,
            Err(_) => FeedSettings::default().pairs,
        };
        let feed = FeedSettings {
            url: std::env::var("FEED_URL").unwrap_or_else(|_| FeedSettings::default().url),
            pairs,
            backoff_initial: parse_env_duration_millis(
                "BACKOFF_INITIAL_MS",
                FeedSettings::default().backoff_initial,
            ),
            backoff_max: parse_env_duration_millis(
                "BACKOFF_MAX_MS",
                FeedSettings::default().backoff_max,
            ),
            idle_timeout: parse_env_duration_secs(
                "FEED_IDLE_TIMEOUT_SECONDS",
                FeedSettings::default().idle_timeout,
            ),
        };

        let server = ServerSettings {
            http_bind_addr: std::env::var("HTTP_BIND_ADDR")
                .unwrap_or_else(|_| ServerSettings::default().http_bind_addr),
        };

        let config = Self {
            cascade,
            ingestion,
            feed,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Canonical symbols derived from the configured pair mappings.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.feed
            .pairs
            .iter()
            .map(|mapping| mapping.symbol.clone())
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cascade.cadence.is_zero() {
            return Err(ConfigError::InvalidValue(
                "CASCADE_CADENCE_SECONDS".to_string(),
                "must be positive".to_string(),
            ));
        }
        if self.ingestion.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_BATCH_SIZE".to_string(),
                "must be positive".to_string(),
            ));
        }
        if self.ingestion.flush_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUSH_RETRY_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.feed.pairs.is_empty() {
            return Err(ConfigError::InvalidValue(
                "FEED_PAIRS".to_string(),
                "at least one pair mapping is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable value failed validation.
    #[error("environment variable {0} is invalid: {1}")]
    InvalidValue(String, String),
}

/// Parse a `FEED_PAIRS` value: comma-separated `VENUE/PAIR:SYMBOL`
/// mappings, e.g. `XBT/USD:BTCUSD,ETH/USD:ETHUSD`.
fn parse_pairs(raw: &str) -> Result<Vec<PairMapping>, ConfigError> {
    let mut mappings = Vec::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let Some((pair, symbol)) = entry.rsplit_once(':') else {
            return Err(ConfigError::InvalidValue(
                "FEED_PAIRS".to_string(),
                format!("entry `{entry}` is not of the form PAIR:SYMBOL"),
            ));
        };
        let (pair, symbol) = (pair.trim(), symbol.trim());
        if pair.is_empty() || symbol.is_empty() {
            return Err(ConfigError::InvalidValue(
                "FEED_PAIRS".to_string(),
                format!("entry `{entry}` has an empty pair or symbol"),
            ));
        }
        if mappings.iter().any(|m: &PairMapping| m.pair == pair) {
            return Err(ConfigError::InvalidValue(
                "FEED_PAIRS".to_string(),
                format!("pair `{pair}` is mapped more than once"),
            ));
        }

        mappings.push(PairMapping {
            pair: pair.to_string(),
            symbol: symbol.to_string(),
        });
    }

    if mappings.is_empty() {
        return Err(ConfigError::EmptyValue("FEED_PAIRS".to_string()));
    }
    Ok(mappings)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_settings_defaults() {
        let settings = CascadeSettings::default();
        assert_eq!(settings.cadence, Duration::from_secs(30));
        assert_eq!(settings.retry_cadence, Duration::from_secs(30));
        assert_eq!(settings.safety_margin, Duration::from_secs(5));
        assert_eq!(settings.refresh_timeout, Duration::from_secs(30));
    }

    #[test]
    fn ingestion_settings_defaults() {
        let settings = IngestionSettings::default();
        assert_eq!(settings.max_batch_size, 100);
        assert_eq!(settings.max_batch_interval, Duration::from_secs(5));
        assert_eq!(settings.flush_retry_attempts, 3);
    }

    #[test]
    fn feed_settings_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.url, "wss://ws.kraken.com");
        assert_eq!(settings.backoff_initial, Duration::from_millis(5_000));
        assert_eq!(settings.backoff_max, Duration::from_millis(60_000));
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
        assert_eq!(settings.pairs.len(), 1);
        assert_eq!(settings.pairs[0].pair, "XBT/USD");
        assert_eq!(settings.pairs[0].symbol, "BTCUSD");
    }

    #[test]
    fn pairs_parse_multiple_mappings() {
        let pairs = parse_pairs("XBT/USD:BTCUSD,ETH/USD:ETHUSD").unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].pair, "XBT/USD");
        assert_eq!(pairs[0].symbol, "BTCUSD");
        assert_eq!(pairs[1].pair, "ETH/USD");
        assert_eq!(pairs[1].symbol, "ETHUSD");
    }

    #[test]
    fn pairs_tolerate_whitespace_and_trailing_commas() {
        let pairs = parse_pairs(" XBT/USD : BTCUSD , ").unwrap();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pair, "XBT/USD");
        assert_eq!(pairs[0].symbol, "BTCUSD");
    }

    #[test]
    fn pairs_without_symbol_are_rejected() {
        let cases = ["XBT/USD", "XBT/USD:", ":BTCUSD"];

        for case in cases {
            assert!(parse_pairs(case).is_err(), "`{case}` should be rejected");
        }
    }

    #[test]
    fn duplicate_pairs_are_rejected() {
        let err = parse_pairs("XBT/USD:BTCUSD,XBT/USD:XBTUSD").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(..)));
    }

    #[test]
    fn empty_pair_list_is_rejected() {
        assert!(matches!(
            parse_pairs(" , "),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn symbols_follow_pair_mappings() {
        let config = Config {
            feed: FeedSettings {
                pairs: parse_pairs("XBT/USD:BTCUSD,ETH/USD:ETHUSD").unwrap(),
                ..FeedSettings::default()
            },
            ..Config::default()
        };

        assert_eq!(config.symbols(), vec!["BTCUSD", "ETHUSD"]);
    }

    #[test]
    fn zero_cadence_fails_validation() {
        let config = Config {
            cascade: CascadeSettings {
                cadence: Duration::ZERO,
                ..CascadeSettings::default()
            },
            ..Config::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(..))
        ));
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let config = Config {
            ingestion: IngestionSettings {
                max_batch_size: 0,
                ..IngestionSettings::default()
            },
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }
}
