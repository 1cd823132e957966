//! Service configuration read from the environment at startup.

use std::{fmt::Display, path::PathBuf, str::FromStr};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_uri: String,
    pub database_name: String,
    /// Shared secret for session tokens and signed storage URLs.
    pub api_key: String,
    /// Elevated key accepted by the bootstrap user endpoint.
    pub service_key: Option<String>,
    pub bind_address: String,
    pub port: u16,
    pub storage_root: PathBuf,
    pub public_url: String,
    pub session_ttl_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{name} must be set")))
        };

        let mongodb_uri = required("MONGODB_URI")?;
        let api_key = required("SAFETY_API_KEY")?;

        Ok(Self {
            mongodb_uri,
            api_key,
            service_key: lookup("SAFETY_SERVICE_KEY").filter(|key| !key.is_empty()),
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "safety".to_string()),
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_with_default(&lookup, "PORT", 8000),
            storage_root: lookup("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./files")),
            public_url: lookup("PUBLIC_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            session_ttl_secs: parse_with_default(&lookup, "SESSION_TTL_SECS", 86400),
        })
    }
}

/// Unset variables fall back silently; unparseable ones fall back with a warning.
fn parse_with_default<F, T>(lookup: &F, var: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
{
    match lookup(var) {
        Some(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(var, value = %value, default = %default, "invalid env var value, using default");
                default
            }
        },
        None => default,
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
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_store_uri_is_fatal() {
        let result = Config::from_lookup(lookup_from(&[("SAFETY_API_KEY", "secret")]));
        assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("MONGODB_URI")));
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let result = Config::from_lookup(lookup_from(&[("MONGODB_URI", "mongodb://db")]));
        assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("SAFETY_API_KEY")));
    }

    #[test]
    fn defaults_fill_optional_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://db"),
            ("SAFETY_API_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.database_name, "safety");
        assert_eq!(config.port, 8000);
        assert_eq!(config.storage_root, PathBuf::from("./files"));
        assert_eq!(config.session_ttl_secs, 86400);
        assert!(config.service_key.is_none());
    }

    #[test]
    fn invalid_port_falls_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("MONGODB_URI", "mongodb://db"),
            ("SAFETY_API_KEY", "secret"),
            ("PORT", "banana"),
            ("PUBLIC_URL", "https://safety.example.com/"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.public_url, "https://safety.example.com");
    }
}
