//! Geolocation enrichment with a capacity-bounded lookup cache
//!
//! Lookup failures are never fatal: an unresolved IP only means the node
//! goes without a country label.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default bound on cached IP -> country entries
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default deadline for one external lookup in seconds
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Free geolocation endpoint returning `{status, countryCode}` JSON
const DEFAULT_LOOKUP_ENDPOINT: &str = "http://ip-api.com/json";

/// Capacity-bounded IP -> country-code map with oldest-first eviction
pub struct GeoCache {
    capacity: usize,
    entries: HashMap<IpAddr, String>,
    order: VecDeque<IpAddr>,
}

impl GeoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, ip: &IpAddr) -> Option<&str> {
        self.entries.get(ip).map(String::as_str)
    }

    /// Insert an entry, evicting the oldest one first when at capacity.
    /// Re-inserting a present key refreshes the value without changing
    /// its insertion rank.
    pub fn insert(&mut self, ip: IpAddr, country_code: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&ip) {
            self.entries.insert(ip, country_code);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(ip);
        self.entries.insert(ip, country_code);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// External country-code lookup capability. All failure modes (network
/// error, timeout, non-success status, missing field) collapse to `None`.
#[async_trait]
pub trait CountryLookup: Send + Sync {
    async fn country_code(&self, ip: IpAddr) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

/// HTTP lookup against an ip-api style endpoint
pub struct HttpCountryLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCountryLookup {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        Self::with_endpoint(timeout, DEFAULT_LOOKUP_ENDPOINT)
    }

    pub fn with_endpoint(timeout: Duration, endpoint: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CountryLookup for HttpCountryLookup {
    async fn country_code(&self, ip: IpAddr) -> Option<String> {
        let url = format!("{}/{}?fields=status,countryCode", self.endpoint, ip);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(%ip, error = %e, "geo lookup request failed");
                return None;
            }
        };

        let body: LookupResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                debug!(%ip, error = %e, "geo lookup response malformed");
                return None;
            }
        };

        if body.status.as_deref() != Some("success") {
            return None;
        }
        body.country_code
    }
}

/// Configuration for geolocation resolution
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Deadline for one external lookup
    pub lookup_timeout: Duration,
    /// Maximum cached IP -> country entries
    pub cache_capacity: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }
}

/// Resolves IPs to country codes through the cache, querying the external
/// lookup on misses
pub struct GeoResolver {
    cache: Mutex<GeoCache>,
    lookup: Arc<dyn CountryLookup>,
}

impl GeoResolver {
    pub fn new(config: GeoConfig) -> crate::Result<Self> {
        let lookup = Arc::new(HttpCountryLookup::new(config.lookup_timeout)?);
        Ok(Self::with_lookup(config, lookup))
    }

    pub fn with_lookup(config: GeoConfig, lookup: Arc<dyn CountryLookup>) -> Self {
        Self {
            cache: Mutex::new(GeoCache::new(config.cache_capacity)),
            lookup,
        }
    }

    /// Cache hit short-circuits the network call. The whole
    /// check-query-insert sequence holds the cache lock, so concurrent
    /// probes never issue duplicate lookups for one IP and eviction
    /// accounting stays exact. Failed lookups are not cached.
    pub async fn resolve_country(&self, ip: IpAddr) -> Option<String> {
        let mut cache = self.cache.lock().await;
        if let Some(code) = cache.get(&ip) {
            return Some(code.to_string());
        }

        let code = self.lookup.country_code(ip).await?;
        cache.insert(ip, code.clone());
        Some(code)
    }

    #[cfg(test)]
    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_cache_get_and_insert() {
        let mut cache = GeoCache::new(4);
        assert!(cache.is_empty());

        cache.insert(ip(1), "US".to_string());
        assert_eq!(cache.get(&ip(1)), Some("US"));
        assert_eq!(cache.get(&ip(2)), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_evicts_oldest_beyond_capacity() {
        let capacity = 8;
        let mut cache = GeoCache::new(capacity);

        for i in 0..(capacity + 5) {
            cache.insert(ip(i as u8), format!("C{i}"));
        }

        assert_eq!(cache.len(), capacity);
        // The 5 oldest entries are gone, the rest survive.
        for i in 0..5 {
            assert_eq!(cache.get(&ip(i as u8)), None);
        }
        for i in 5..(capacity + 5) {
            assert_eq!(cache.get(&ip(i as u8)), Some(format!("C{i}").as_str()));
        }
    }

    #[test]
    fn test_cache_reinsert_refreshes_without_growth() {
        let mut cache = GeoCache::new(2);
        cache.insert(ip(1), "US".to_string());
        cache.insert(ip(1), "DE".to_string());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&ip(1)), Some("DE"));
    }

    #[test]
    fn test_cache_zero_capacity_stores_nothing() {
        let mut cache = GeoCache::new(0);
        cache.insert(ip(1), "US".to_string());
        assert!(cache.is_empty());
    }

    struct CountingLookup {
        code: Option<String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CountryLookup for CountingLookup {
        async fn country_code(&self, _ip: IpAddr) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.code.clone()
        }
    }

    #[tokio::test]
    async fn test_resolver_caches_successful_lookups() {
        let lookup = Arc::new(CountingLookup {
            code: Some("NL".to_string()),
            calls: AtomicU32::new(0),
        });
        let resolver = GeoResolver::with_lookup(
            GeoConfig::new().with_cache_capacity(16),
            Arc::clone(&lookup) as Arc<dyn CountryLookup>,
        );

        assert_eq!(resolver.resolve_country(ip(1)).await.as_deref(), Some("NL"));
        assert_eq!(resolver.resolve_country(ip(1)).await.as_deref(), Some("NL"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    struct SlowLookup {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CountryLookup for SlowLookup {
        async fn country_code(&self, _ip: IpAddr) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some("SE".to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_issue_single_lookup() {
        let lookup = Arc::new(SlowLookup {
            calls: AtomicU32::new(0),
        });
        let resolver = Arc::new(GeoResolver::with_lookup(
            GeoConfig::new(),
            Arc::clone(&lookup) as Arc<dyn CountryLookup>,
        ));

        // Many probes missing on the same IP at once: the serialized
        // check-query-insert sequence must issue exactly one lookup.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(
                async move { resolver.resolve_country(ip(7)).await },
            ));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("SE"));
        }

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_entries().await, 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_leaves_cache_clean() {
        let lookup = Arc::new(CountingLookup {
            code: None,
            calls: AtomicU32::new(0),
        });
        let resolver = GeoResolver::with_lookup(
            GeoConfig::new(),
            Arc::clone(&lookup) as Arc<dyn CountryLookup>,
        );

        assert_eq!(resolver.resolve_country(ip(1)).await, None);
        assert_eq!(resolver.cached_entries().await, 0);
        // A later attempt queries again instead of caching the failure.
        assert_eq!(resolver.resolve_country(ip(1)).await, None);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }
}
