//! API server configuration.

use std::time::Duration;

use shisha_core::auth::password::DEFAULT_BCRYPT_COST;
use shisha_core::rate_limit::RateLimitConfig;
use thiserror::Error;

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set to a non-empty value")]
    MissingJwtSecret,

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:8080").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Whether auth cookies carry the `Secure` flag.
    pub secure_cookies: bool,
    /// Token-bucket parameters for the login/register/refresh gate.
    pub rate_limit: RateLimitConfig,
    /// How often the rate limiter forgets every actor.
    pub rate_limit_sweep: Duration,
    /// How often expired refresh tokens are deleted.
    pub token_sweep: Duration,
    /// bcrypt cost factor.
    pub bcrypt_cost: u32,
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                | Default                             |
    /// |-------------------------|-------------------------------------|
    /// | `BIND_ADDR`             | `127.0.0.1:8080`                    |
    /// | `DATABASE_URL`          | `postgres://localhost:5432/shisha`  |
    /// | `JWT_SECRET`            | required                            |
    /// | `APP_ENV`               | `development` (`production` ⇒ Secure cookies) |
    /// | `RATE_LIMIT_PER_SEC`    | `1/12` (one per 12 s)               |
    /// | `RATE_LIMIT_BURST`      | `5`                                 |
    /// | `RATE_LIMIT_SWEEP_SECS` | `600`                               |
    /// | `TOKEN_SWEEP_SECS`      | `3600`                              |
    /// | `BCRYPT_COST`           | `10`                                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingJwtSecret)?;
        let defaults = RateLimitConfig::default();

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".into()),
            pg_connection_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost:5432/shisha".into()),
            jwt_secret,
            secure_cookies: lookup("APP_ENV").as_deref() == Some("production"),
            rate_limit: RateLimitConfig {
                per_second: refill_rate(&lookup, "RATE_LIMIT_PER_SEC", defaults.per_second)?,
                burst: burst_size(&lookup, "RATE_LIMIT_BURST", defaults.burst)?,
            },
            rate_limit_sweep: interval_secs(&lookup, "RATE_LIMIT_SWEEP_SECS", 600)?,
            token_sweep: interval_secs(&lookup, "TOKEN_SWEEP_SECS", 3600)?,
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Tokens per second; must be finite and positive.
fn refill_rate(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: f64,
) -> Result<f64, ConfigError> {
    let rate: f64 = parse_or(lookup, name, default)?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::Invalid {
            name,
            value: rate.to_string(),
        });
    }
    Ok(rate)
}

/// Bucket capacity; zero would reject every request.
fn burst_size(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    match parse_or(lookup, name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".into(),
        }),
        burst => Ok(burst),
    }
}

/// A sweep interval in whole seconds; zero is refused.
fn interval_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parse_or(lookup, name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: "0".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn missing_secret_fails() {
        assert!(matches!(
            ApiConfig::from_lookup(lookup_from(&[])),
            Err(ConfigError::MissingJwtSecret)
        ));
        assert!(matches!(
            ApiConfig::from_lookup(lookup_from(&[("JWT_SECRET", "")])),
            Err(ConfigError::MissingJwtSecret)
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = ApiConfig::from_lookup(lookup_from(&[("JWT_SECRET", "s")])).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080");
        assert!(!cfg.secure_cookies);
        assert_eq!(cfg.rate_limit, RateLimitConfig::default());
        assert_eq!(cfg.rate_limit_sweep, Duration::from_secs(600));
        assert_eq!(cfg.bcrypt_cost, DEFAULT_BCRYPT_COST);
    }

    #[test]
    fn production_enables_secure_cookies() {
        let cfg = ApiConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s"),
            ("APP_ENV", "production"),
            ("RATE_LIMIT_BURST", "10"),
        ]))
        .unwrap();
        assert!(cfg.secure_cookies);
        assert_eq!(cfg.rate_limit.burst, 10);
    }

    #[test]
    fn garbage_number_is_rejected() {
        let err = ApiConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s"),
            ("RATE_LIMIT_BURST", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "RATE_LIMIT_BURST",
                ..
            }
        ));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        assert!(
            ApiConfig::from_lookup(lookup_from(&[
                ("JWT_SECRET", "s"),
                ("TOKEN_SWEEP_SECS", "0"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn unusable_refill_rates_are_rejected() {
        for bad in ["NaN", "inf", "-inf", "-0.5", "0", "0.0"] {
            let err = ApiConfig::from_lookup(lookup_from(&[
                ("JWT_SECRET", "s"),
                ("RATE_LIMIT_PER_SEC", bad),
            ]))
            .unwrap_err();
            assert!(
                matches!(
                    err,
                    ConfigError::Invalid {
                        name: "RATE_LIMIT_PER_SEC",
                        ..
                    }
                ),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn zero_burst_is_rejected() {
        let err = ApiConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s"),
            ("RATE_LIMIT_BURST", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "RATE_LIMIT_BURST",
                ..
            }
        ));
    }

    #[test]
    fn custom_refill_rate_is_kept() {
        let cfg = ApiConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s"),
            ("RATE_LIMIT_PER_SEC", "0.5"),
        ]))
        .unwrap();
        assert_eq!(cfg.rate_limit.per_second, 0.5);
    }
}
