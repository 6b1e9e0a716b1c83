use serde::Deserialize;
use std::{env, str::FromStr};
use thiserror::Error;

// Top-level configuration, one section per concern
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub booking: BookingConfig,
    pub admin: AdminConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_hours: i64,
}

// Checkout and booking lifecycle tuning
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub seat_lock_ttl_seconds: u64,
    pub max_seats_per_booking: usize,
    pub payment_intent_ttl_minutes: i64,
    pub cleanup_interval_seconds: u64,
    pub cancellation_cutoff_minutes: i64,
    pub ticket_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub emails: Vec<String>,
}

impl AdminConfig {
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.emails.iter().any(|e| e.eq_ignore_ascii_case(email))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_analytics: bool,
    pub enable_cache: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = optional(name, default);
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;

        Ok(Config {
            app: AppConfig {
                host: optional("HOST", "0.0.0.0"),
                port: parsed("PORT", "5000")?,
                environment: optional("ENVIRONMENT", "development"),
                rust_log: optional("RUST_LOG", "cinema_booking=debug,tower_http=debug"),
                log_format: parsed("LOG_FORMAT", "pretty")?,
                cors_origins: list(&optional("CORS_ORIGINS", "*")),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
            },
            booking: BookingConfig {
                seat_lock_ttl_seconds: parsed("SEAT_LOCK_TTL_SECONDS", "600")?,
                max_seats_per_booking: parsed("MAX_SEATS_PER_BOOKING", "10")?,
                payment_intent_ttl_minutes: parsed("PAYMENT_INTENT_TTL_MINUTES", "15")?,
                cleanup_interval_seconds: parsed("CLEANUP_INTERVAL_SECONDS", "300")?,
                cancellation_cutoff_minutes: parsed("CANCELLATION_CUTOFF_MINUTES", "60")?,
                ticket_secret: env::var("TICKET_SECRET").unwrap_or_else(|_| jwt_secret.clone()),
            },
            jwt: JwtConfig {
                secret: jwt_secret,
                expires_in_hours: parsed("JWT_EXPIRES_IN_HOURS", "24")?,
            },
            admin: AdminConfig {
                emails: list(&optional("ADMIN_EMAILS", "")),
            },
            features: FeatureFlags {
                enable_analytics: parsed("ENABLE_ANALYTICS", "true")?,
                enable_cache: parsed("ENABLE_CACHE", "true")?,
            },
        })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".into(),
            port: 5000,
            environment: "test".into(),
            rust_log: "cinema_booking=debug".into(),
            log_format: LogFormat::Pretty,
            cors_origins: vec!["*".into()],
        },
        database: DatabaseConfig {
            url: "postgres://localhost/cinema_test".into(),
            pool_size: 1,
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1/".into(),
        },
        jwt: JwtConfig {
            secret: "test-secret".into(),
            expires_in_hours: 1,
        },
        booking: BookingConfig {
            seat_lock_ttl_seconds: 600,
            max_seats_per_booking: 10,
            payment_intent_ttl_minutes: 15,
            cleanup_interval_seconds: 300,
            cancellation_cutoff_minutes: 60,
            ticket_secret: "ticket-secret".into(),
        },
        admin: AdminConfig {
            emails: vec!["root@cinema.test".into()],
        },
        features: FeatureFlags {
            enable_analytics: true,
            enable_cache: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_splits_and_trims() {
        assert_eq!(
            list(" a@x.io, b@x.io ,,"),
            vec!["a@x.io".to_string(), "b@x.io".to_string()]
        );
        assert!(list("").is_empty());
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn admin_email_match_ignores_case() {
        let cfg = test_config();
        assert!(cfg.admin.is_admin_email("ROOT@cinema.test"));
        assert!(!cfg.admin.is_admin_email("guest@cinema.test"));
    }

    #[test]
    fn invalid_number_is_reported_with_its_name() {
        let err = parsed::<u16>("CINEMA_TEST_SURELY_UNSET_PORT", "not-a-port").unwrap_err();
        assert_eq!(
            err.to_string(),
            "CINEMA_TEST_SURELY_UNSET_PORT has an invalid value 'not-a-port'"
        );
    }
}
