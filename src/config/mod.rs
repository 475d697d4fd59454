//! Layered configuration: `campaignserver.toml` overridden by
//! `CAMPAIGN_`-prefixed environment variables (section and key separated by
//! a double underscore, e.g. `CAMPAIGN_SERVER__PORT`).

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL baked into tracking pixels and click redirects.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u16,
    pub database: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            username: "campaignserver".to_string(),
            password: String::new(),
            server: "localhost".to_string(),
            port: 5432,
            database: "campaignserver".to_string(),
            pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_email: "no-reply@localhost".to_string(),
            from_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub hmac_key: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            hmac_key: "change-me".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Recipients picked up per dispatch tick.
    pub page_size: usize,
    /// Delay before the dispatcher re-enqueues itself.
    pub requeue_delay_secs: u64,
    /// Rate-limited sends retry up to this many times.
    pub retry_max_attempts: u32,
    /// Base of the exponential retry backoff.
    pub retry_backoff_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            requeue_delay_secs: 10,
            retry_max_attempts: 5,
            retry_backoff_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("campaignserver.toml"))
            .merge(Env::prefixed("CAMPAIGN_").split("__"))
            .extract()
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.username,
            self.database.password,
            self.database.server,
            self.database.port,
            self.database.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.page_size, 50);
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.database_url(),
            "postgres://campaignserver:@localhost:5432/campaignserver"
        );
    }
}
