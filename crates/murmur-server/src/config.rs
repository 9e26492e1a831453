use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use murmur_chat::fanout::DEFAULT_QUEUE_DEPTH;

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub subscriber_queue: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("MURMUR_JWT_SECRET").context("MURMUR_JWT_SECRET is not set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("MURMUR_JWT_SECRET is a placeholder value; set a real secret");
        }

        let db_path = lookup("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into());
        let host = lookup("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("MURMUR_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid MURMUR_PORT '{}'", raw))?,
            None => 3000,
        };
        let subscriber_queue = match lookup("MURMUR_SUBSCRIBER_QUEUE") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid MURMUR_SUBSCRIBER_QUEUE '{}'", raw))?,
            None => DEFAULT_QUEUE_DEPTH,
        };
        if subscriber_queue == 0 {
            bail!("MURMUR_SUBSCRIBER_QUEUE must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            host,
            port,
            subscriber_queue,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "a-real-secret")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("murmur.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.subscriber_queue, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn secret_is_required_and_not_a_placeholder() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "changeme")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "  ")])).is_err());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let secret = ("MURMUR_JWT_SECRET", "a-real-secret");
        assert!(Config::from_lookup(lookup(&[secret, ("MURMUR_PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup(&[secret, ("MURMUR_SUBSCRIBER_QUEUE", "0")])).is_err());

        let config = Config::from_lookup(lookup(&[secret, ("MURMUR_SUBSCRIBER_QUEUE", "8")])).unwrap();
        assert_eq!(config.subscriber_queue, 8);
    }
}
