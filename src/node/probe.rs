//! Transport-level reachability probing
//!
//! A probe resolves the host when needed, opens one TCP connection under a
//! deadline, measures the elapsed time and immediately drops the stream.
//! No protocol payload is ever exchanged.

use crate::node::models::ProbeOutcome;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::debug;

/// Default per-attempt connect timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of total attempts per candidate
const DEFAULT_ATTEMPTS: u32 = 1;

/// Successful connects faster than this are treated as measurement noise
const DEFAULT_MIN_VALID_DELAY_MS: f64 = 5.0;

/// Upper bound on simultaneously in-flight blocking resolutions
const DEFAULT_RESOLVER_SLOTS: usize = 10;

/// Hostname-to-IP resolution capability
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve a hostname to one IP address; `None` means resolution failed
    async fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// System resolver backed by a bounded blocking pool. `getaddrinfo` has no
/// non-blocking equivalent, so each lookup runs on a blocking thread gated
/// by a semaphore.
pub struct SystemResolver {
    slots: Arc<Semaphore>,
}

impl SystemResolver {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVER_SLOTS)
    }
}

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> Option<IpAddr> {
        let _slot = self.slots.acquire().await.ok()?;
        let host = host.to_string();

        let lookup = tokio::task::spawn_blocking(move || {
            (host.as_str(), 0u16)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .map(|addr| addr.ip())
        })
        .await;

        lookup.unwrap_or(None)
    }
}

/// Transport dial capability, abstracted so probes can be simulated
#[async_trait]
pub trait Dial: Send + Sync {
    /// Open a transport connection to `addr` and discard it
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<()>;
}

/// Real TCP dialer; the stream closes when it is dropped, on every path
pub struct TcpDialer;

#[async_trait]
impl Dial for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<()> {
        TcpStream::connect(addr).await.map(|_stream| ())
    }
}

/// Configuration for connectivity probes
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Deadline for each connect attempt
    pub timeout: Duration,
    /// Total attempts per candidate (>= 1); failures retry, the
    /// minimum-delay rejection does not
    pub attempts: u32,
    /// Successful connects below this delay are downgraded to unreachable
    pub min_valid_delay_ms: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            attempts: DEFAULT_ATTEMPTS,
            min_valid_delay_ms: DEFAULT_MIN_VALID_DELAY_MS,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
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
}

/// Reachability probing capability
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `host:port` once (with configured retries) and classify it
    async fn probe(&self, host: &str, port: u16) -> ProbeOutcome;
}

/// TCP prober combining resolution, a timed dial and the delay policy
pub struct TcpProber {
    config: ProbeConfig,
    resolver: Arc<dyn Resolve>,
    dialer: Arc<dyn Dial>,
}

impl TcpProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_parts(config, Arc::new(SystemResolver::default()), Arc::new(TcpDialer))
    }

    pub fn with_parts(
        config: ProbeConfig,
        resolver: Arc<dyn Resolve>,
        dialer: Arc<dyn Dial>,
    ) -> Self {
        Self {
            config,
            resolver,
            dialer,
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        let attempts = self.config.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let start = Instant::now();

            // Literal IPs skip the resolver entirely. Resolution is a
            // suspension point like the dial, so it gets the same deadline.
            let ip = match host.parse::<IpAddr>() {
                Ok(ip) => ip,
                Err(_) => {
                    match tokio::time::timeout(self.config.timeout, self.resolver.resolve(host))
                        .await
                    {
                        Ok(Some(ip)) => ip,
                        Ok(None) => {
                            debug!(host, attempt, "hostname resolution failed");
                            last_error = Some(format!("failed to resolve {host}"));
                            continue;
                        }
                        Err(_) => {
                            debug!(host, attempt, "hostname resolution timed out");
                            last_error = Some(format!(
                                "resolution of {host} timed out after {:?}",
                                self.config.timeout
                            ));
                            continue;
                        }
                    }
                }
            };

            let addr = SocketAddr::new(ip, port);
            match tokio::time::timeout(self.config.timeout, self.dialer.dial(addr)).await {
                Ok(Ok(())) => {
                    let delay_ms = start.elapsed().as_secs_f64() * 1000.0;
                    if delay_ms < self.config.min_valid_delay_ms {
                        // Policy filter, not a transient fault: no retry.
                        return ProbeOutcome::below_min_delay(delay_ms, ip);
                    }
                    return ProbeOutcome::up(delay_ms, ip);
                }
                Ok(Err(e)) => {
                    debug!(%addr, attempt, error = %e, "connect failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    debug!(%addr, attempt, "connect timed out");
                    last_error = Some(format!(
                        "connect timed out after {:?}",
                        self.config.timeout
                    ));
                }
            }
        }

        ProbeOutcome::down(last_error)
    }
}
