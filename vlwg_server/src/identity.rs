//! Identity verification (C2): a required static identifier plus an
//! optional Redis-backed dynamic set, with a local TTL cache on the hot
//! path so every inbound header does not round-trip to Redis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fred::interfaces::{ClientLike, KeysInterface};
use fred::prelude::Client;

use vlwg_common::Identifier;

/// Redis key prefix for dynamic identifiers (stored as the 32-hex-digit
/// form, value is unused — existence is the signal).
const IDENTITY_KEY_PREFIX: &str = "vlwg:identity:";

/// How long a positive or negative dynamic-lookup result is trusted
/// locally before the backend is consulted again.
const CACHE_TTL: Duration = Duration::from_secs(5);

struct CacheEntry {
    present: bool,
    cached_at: Instant,
}

/// Initialize the Redis client used as the dynamic identity backend.
pub async fn init_client(redis_url: &str) -> anyhow::Result<Client> {
    let config = fred::types::config::Config::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.init().await?;
    Ok(client)
}

/// Accepts or rejects an [`Identifier`] carried in a VLESS request header.
///
/// The static identifier is always accepted (spec §4.2); when a Redis
/// client is configured, any identifier registered there is accepted
/// too. Management-surface inserts/removals only ever touch the dynamic
/// set — the static identifier is immutable for the process lifetime.
pub struct IdentityStore {
    static_identifier: Identifier,
    redis: Option<Client>,
    cache: Arc<DashMap<Identifier, CacheEntry>>,
}

impl IdentityStore {
    pub fn new(static_identifier: Identifier, redis: Option<Client>) -> Self {
        Self {
            static_identifier,
            redis,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Whether the dynamic backend is configured.
    pub fn has_dynamic_backend(&self) -> bool {
        self.redis.is_some()
    }

    /// Check whether `id` is an accepted identity (spec §4.2).
    pub async fn is_authorized(&self, id: &Identifier) -> bool {
        if id.ct_eq(&self.static_identifier) {
            return true;
        }

        let Some(redis) = &self.redis else {
            return false;
        };

        if let Some(entry) = self.cache.get(id) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                return entry.present;
            }
        }

        let key = format!("{IDENTITY_KEY_PREFIX}{}", id.to_hex32());
        let present: bool = redis.exists(&key).await.unwrap_or(false);
        self.cache.insert(
            *id,
            CacheEntry {
                present,
                cached_at: Instant::now(),
            },
        );
        present
    }

    /// Add `id` to the dynamic set (management surface, spec §9).
    /// Returns an error if no dynamic backend is configured.
    pub async fn insert_dynamic(&self, id: &Identifier) -> anyhow::Result<()> {
        let redis = self
            .redis
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no dynamic identity backend configured"))?;
        let key = format!("{IDENTITY_KEY_PREFIX}{}", id.to_hex32());
        redis.set::<(), _, _>(&key, "1", None, None, false).await?;
        self.cache.remove(id);
        Ok(())
    }

    /// Remove `id` from the dynamic set (management surface, spec §9).
    pub async fn remove_dynamic(&self, id: &Identifier) -> anyhow::Result<()> {
        let redis = self
            .redis
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no dynamic identity backend configured"))?;
        let key = format!("{IDENTITY_KEY_PREFIX}{}", id.to_hex32());
        redis.del::<i64, _>(&key).await?;
        self.cache.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(last_byte: u8) -> Identifier {
        let mut bytes = [0u8; 16];
        bytes[15] = last_byte;
        Identifier::from_bytes(bytes)
    }

    #[tokio::test]
    async fn static_identifier_is_always_authorized() {
        let store = IdentityStore::new(id(1), None);
        assert!(store.is_authorized(&id(1)).await);
    }

    #[tokio::test]
    async fn unknown_identifier_rejected_without_dynamic_backend() {
        let store = IdentityStore::new(id(1), None);
        assert!(!store.is_authorized(&id(2)).await);
        assert!(!store.has_dynamic_backend());
    }

    #[tokio::test]
    async fn insert_dynamic_without_backend_errors() {
        let store = IdentityStore::new(id(1), None);
        assert!(store.insert_dynamic(&id(2)).await.is_err());
    }
}
