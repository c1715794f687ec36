//! Runtime configuration loaded from environment variables with defaults.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::order::PricingPolicy;
use crate::utils::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Scylla,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub cart: CartConfig,
    pub redpanda: RedpandaConfig,
    pub server: ServerConfig,
    pub stock: StockConfig,
    pub pricing: PricingConfig,
}

/// Orders, stock records and checkout tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartConfig {
    pub backend: CartBackend,
    pub redis_url: String,
    /// Sliding TTL of a buyer's cart hash
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Audit publishing is off when unset
    pub brokers: Option<String>,
    pub audit_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockConfig {
    pub retry_attempts: u32,
    pub retry_initial_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub shipping_flat_fee: Decimal,
    pub free_shipping_threshold: Decimal,
    pub tax_rate: Decimal,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable numbers fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let storage_backend = match var("STORAGE_BACKEND", "memory").to_ascii_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "scylla" => StorageBackend::Scylla,
            other => bail!("unknown STORAGE_BACKEND '{other}' (expected memory or scylla)"),
        };

        let cart_backend = match var("CART_BACKEND", "memory").to_ascii_lowercase().as_str() {
            "memory" => CartBackend::Memory,
            "redis" => CartBackend::Redis,
            other => bail!("unknown CART_BACKEND '{other}' (expected memory or redis)"),
        };

        let defaults = PricingPolicy::default();

        Ok(Self {
            storage: StorageConfig {
                backend: storage_backend,
                scylla_nodes: var("SCYLLA_NODES", "127.0.0.1:9042")
                    .split(',')
                    .map(str::trim)
                    .filter(|node| !node.is_empty())
                    .map(str::to_string)
                    .collect(),
                scylla_keyspace: var("SCYLLA_KEYSPACE", "checkout_ks"),
            },
            cart: CartConfig {
                backend: cart_backend,
                redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
                ttl_secs: parse_or(&lookup, "CART_TTL_SECS", 604_800),
            },
            redpanda: RedpandaConfig {
                brokers: lookup("REDPANDA_BROKERS").filter(|b| !b.trim().is_empty()),
                audit_topic: var("AUDIT_TOPIC", "order-lifecycle"),
            },
            server: ServerConfig {
                host: var("HTTP_HOST", "0.0.0.0"),
                port: parse_or(&lookup, "HTTP_PORT", 8080),
                metrics_port: parse_or(&lookup, "METRICS_PORT", 9090),
            },
            stock: StockConfig {
                retry_attempts: parse_or(&lookup, "STOCK_RETRY_ATTEMPTS", 8),
                retry_initial_ms: parse_or(&lookup, "STOCK_RETRY_INITIAL_MS", 2),
            },
            pricing: PricingConfig {
                shipping_flat_fee: parse_or(&lookup, "SHIPPING_FLAT_FEE", defaults.shipping_flat_fee),
                free_shipping_threshold: parse_or(
                    &lookup,
                    "FREE_SHIPPING_THRESHOLD",
                    defaults.free_shipping_threshold,
                ),
                tax_rate: parse_or(&lookup, "TAX_RATE", defaults.tax_rate),
            },
        })
    }

    pub fn stock_retry(&self) -> RetryConfig {
        RetryConfig::stock_cas(
            self.stock.retry_attempts,
            Duration::from_millis(self.stock.retry_initial_ms),
        )
    }

    pub fn pricing_policy(&self) -> PricingPolicy {
        PricingPolicy {
            shipping_flat_fee: self.pricing.shipping_flat_fee,
            free_shipping_threshold: self.pricing.free_shipping_threshold,
            tax_rate: self.pricing.tax_rate,
        }
    }

    pub fn cart_ttl(&self) -> Duration {
        Duration::from_secs(self.cart.ttl_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.cart.backend, CartBackend::Memory);
        assert_eq!(config.storage.scylla_nodes, vec!["127.0.0.1:9042".to_string()]);
        assert_eq!(config.cart.ttl_secs, 604_800);
        assert!(config.redpanda.brokers.is_none());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.stock.retry_attempts, 8);
        assert_eq!(config.pricing_policy(), PricingPolicy::default());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = from_pairs(&[
            ("STORAGE_BACKEND", "Scylla"),
            ("CART_BACKEND", "redis"),
            ("SCYLLA_NODES", "10.0.0.1:9042, 10.0.0.2:9042,"),
            ("REDPANDA_BROKERS", "localhost:9092"),
            ("HTTP_PORT", "not-a-port"),
            ("TAX_RATE", "0.05"),
        ])
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Scylla);
        assert_eq!(config.cart.backend, CartBackend::Redis);
        assert_eq!(config.storage.scylla_nodes.len(), 2);
        assert_eq!(config.redpanda.brokers.as_deref(), Some("localhost:9092"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pricing.tax_rate, Decimal::new(5, 2));
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        assert!(from_pairs(&[("STORAGE_BACKEND", "postgres")]).is_err());
        assert!(from_pairs(&[("CART_BACKEND", "memcached")]).is_err());
    }
}
