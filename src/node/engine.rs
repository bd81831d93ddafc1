//! Validation engine: dedup, bounded concurrent probing, aggregation
//!
//! One `process` call owns its dedup set and result map; state is fresh per
//! call, so the same input probed twice is probed twice. Each probe runs in
//! its own task gated by a semaphore, and a fault in one probe is absorbed
//! into that candidate's result without touching its siblings.

use crate::node::geo::GeoResolver;
use crate::node::models::ProbeResult;
use crate::node::parser::{ConfigParser, Deduplicator};
use crate::node::probe::{ProbeConfig, Prober, TcpProber};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::info;

/// Default bound on simultaneously in-flight probes
const DEFAULT_CONCURRENCY: usize = 20;

/// Configuration for the validation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for each connect attempt
    pub timeout: Duration,
    /// Maximum simultaneously in-flight probes
    pub concurrency: usize,
    /// Total connect attempts per candidate
    pub attempts: u32,
    /// Minimum plausible connect delay in milliseconds
    pub min_valid_delay_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let probe = ProbeConfig::default();
        Self {
            timeout: probe.timeout,
            concurrency: DEFAULT_CONCURRENCY,
            attempts: probe.attempts,
            min_valid_delay_ms: probe.min_valid_delay_ms,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_min_valid_delay_ms(mut self, min_valid_delay_ms: f64) -> Self {
        self.min_valid_delay_ms = min_valid_delay_ms;
        self
    }

    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::new()
            .with_timeout(self.timeout)
            .with_attempts(self.attempts)
            .with_min_valid_delay_ms(self.min_valid_delay_ms)
    }
}

/// Orchestrates dedup and bounded-concurrency probing over a candidate set
pub struct ValidationEngine {
    config: EngineConfig,
    prober: Arc<dyn Prober>,
    geo: Option<Arc<GeoResolver>>,
}

impl ValidationEngine {
    /// Engine with the real TCP prober
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let prober = Arc::new(TcpProber::new(config.probe_config()));
        Self {
            config,
            prober,
            geo: None,
        }
    }

    /// Engine with an injected prober, for simulation
    pub fn with_prober(config: EngineConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            config,
            prober,
            geo: None,
        }
    }

    /// Attach a geo resolver; reachable candidates get a country annotation
    pub fn with_geo(mut self, geo: Arc<GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Deduplicate, then probe the surviving candidates concurrently.
    /// Every input candidate gets exactly one entry in the returned map:
    /// probed, unparseable, duplicate, or failed.
    pub async fn process(&self, candidates: &HashSet<String>) -> HashMap<String, ProbeResult> {
        let mut results = HashMap::new();
        if candidates.is_empty() {
            return results;
        }

        // Dedup is a strictly sequential pass before any probing starts.
        let surviving = Deduplicator::dedupe(candidates);
        for candidate in candidates {
            if !surviving.contains(candidate) {
                results.insert(candidate.clone(), ProbeResult::duplicate(candidate.clone()));
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::new();

        for candidate in surviving {
            let info = ConfigParser::parse(&candidate);
            let (host, port) = match (info.host, info.port) {
                (Some(host), Some(port)) => (host, port),
                // No probe slot is consumed for unparseable candidates.
                _ => {
                    results.insert(candidate.clone(), ProbeResult::unparseable(candidate));
                    continue;
                }
            };

            let prober = Arc::clone(&self.prober);
            let geo = self.geo.clone();
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                // Closing can't happen while the engine holds the Arc.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore closed unexpectedly");

                let outcome = prober.probe(&host, port).await;
                let country = match (&geo, outcome.ip, outcome.reachable) {
                    (Some(geo), Some(ip), true) => geo.resolve_country(ip).await,
                    _ => None,
                };
                (outcome, country)
            });
            handles.push((candidate, handle));
        }

        for (candidate, handle) in handles {
            let result = match handle.await {
                Ok((outcome, country)) => {
                    ProbeResult::from_outcome(candidate.clone(), outcome, country)
                }
                // A panicking probe is isolated to its own candidate.
                Err(e) => ProbeResult::failed(candidate.clone(), format!("probe task failed: {e}")),
            };
            results.insert(candidate, result);
        }

        let valid = results.values().filter(|r| r.reachable).count();
        info!(total = results.len(), valid, "batch test completed");
        results
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidates confirmed reachable
pub fn valid_candidates(results: &HashMap<String, ProbeResult>) -> HashSet<String> {
    results
        .iter()
        .filter(|(_, r)| r.reachable)
        .map(|(c, _)| c.clone())
        .collect()
}

/// Reachable candidates ordered by ascending delay
pub fn sorted_by_delay(results: &HashMap<String, ProbeResult>) -> Vec<(String, f64)> {
    let mut valid: Vec<(String, f64)> = results
        .iter()
        .filter(|(_, r)| r.reachable)
        .map(|(c, r)| (c.clone(), r.delay_ms))
        .collect();
    valid.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    valid
}
