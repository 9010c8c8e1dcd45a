//! Gateway configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use vlwg_common::Identifier;

/// Development fallback identifier. `from_env` warns loudly if this is
/// still in effect once the gateway binds a non-loopback host.
const DEV_DEFAULT_UUID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to.
    pub host: String,

    /// Port for inbound HTTP/WebSocket traffic.
    pub port: u16,

    /// The static identity accepted by the identity store (spec §4.2).
    pub static_identifier: Identifier,

    /// Fallback ("proxy IP") destinations; one is chosen at random per
    /// fallback attempt (spec §6). Empty when no fallback is configured.
    pub fallback_hosts: Vec<String>,

    /// Redis connection string for the dynamic identity backend. `None`
    /// disables the dynamic backend entirely.
    pub redis_url: Option<String>,

    /// Bounded wait for the first inbound chunk (spec §5, default 5s).
    pub header_timeout: Duration,

    /// Bounded wait for an outbound dial, applied independently to the
    /// primary and fallback attempts (spec §5, default 10s).
    pub connect_timeout: Duration,

    /// Idle timeout with no bytes in either direction (spec §5, default
    /// 30s). `None` disables idle termination.
    pub idle_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let uuid_text = env::var("UUID").unwrap_or_else(|_| DEV_DEFAULT_UUID.to_string());
        let static_identifier =
            Identifier::from_canonical(&uuid_text).map_err(ConfigError::InvalidUuid)?;

        if uuid_text == DEV_DEFAULT_UUID && host != "127.0.0.1" && host != "localhost" {
            tracing::warn!(
                "UUID is unset; accepting only the all-zero development identifier on a \
                 non-loopback host. Set UUID to a private value before exposing this gateway."
            );
        }

        let fallback_hosts = env::var("PROXYIP")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let header_timeout = read_secs("HEADER_TIMEOUT_SECS", 5)?;
        let connect_timeout = read_secs("CONNECT_TIMEOUT_SECS", 10)?;
        let idle_timeout = match env::var("IDLE_TIMEOUT_SECS") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("off") => None,
            Ok(raw) => Some(Duration::from_secs(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidDuration("IDLE_TIMEOUT_SECS"))?,
            )),
            Err(_) => Some(Duration::from_secs(30)),
        };

        Ok(Self {
            host,
            port,
            static_identifier,
            fallback_hosts,
            redis_url,
            header_timeout,
            connect_timeout,
            idle_timeout,
        })
    }
}

fn read_secs(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidDuration(key)),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid UUID environment variable: {0}")]
    InvalidUuid(vlwg_common::IdentifierParseError),

    #[error("invalid port number")]
    InvalidPort,

    #[error("invalid duration for {0}")]
    InvalidDuration(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_secs_falls_back_to_default() {
        // SAFETY (test-only): no other test in this process reads this key.
        unsafe { env::remove_var("VLWG_TEST_TIMEOUT") };
        assert_eq!(
            read_secs("VLWG_TEST_TIMEOUT", 7).unwrap(),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn read_secs_rejects_garbage() {
        unsafe { env::set_var("VLWG_TEST_TIMEOUT_BAD", "not-a-number") };
        assert!(matches!(
            read_secs("VLWG_TEST_TIMEOUT_BAD", 7),
            Err(ConfigError::InvalidDuration("VLWG_TEST_TIMEOUT_BAD"))
        ));
        unsafe { env::remove_var("VLWG_TEST_TIMEOUT_BAD") };
    }
}
