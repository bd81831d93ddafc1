//! Harvesting raw candidates from remote text sources
//!
//! Thin glue in front of the engine: fetch page text, regex-extract
//! scheme-prefixed candidate strings, drop implausible junk. A failing
//! source is logged and skipped, never fatal.

use crate::node::parser::is_plausible;
use crate::Result;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default number of concurrent fetches
const DEFAULT_CONCURRENCY: usize = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Matches scheme-prefixed candidate strings embedded in page text
static CANDIDATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:vmess|vless|ssr|ss|trojan|tuic|hysteria2)://[^\s"'<>`]+"#)
        .expect("invalid candidate regex")
});

/// Configuration for the harvester
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Timeout for each HTTP request
    pub timeout: Duration,
    /// Number of concurrent fetches
    pub concurrency: usize,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HarvesterConfig {
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

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Fetches source pages and extracts raw candidates from them
pub struct Harvester {
    config: HarvesterConfig,
    client: Client,
}

impl Harvester {
    pub fn new() -> Result<Self> {
        Self::with_config(HarvesterConfig::default())
    }

    pub fn with_config(config: HarvesterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { config, client })
    }

    /// Fetch one URL as text
    pub async fn fetch_url(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        Ok(response.text().await?)
    }

    /// Extract plausible scheme-prefixed candidates from page text
    pub fn extract_candidates(text: &str) -> HashSet<String> {
        CANDIDATE_REGEX
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|c| is_plausible(c))
            .collect()
    }

    /// Fetch all URLs with bounded concurrency and pool the extracted
    /// candidates. Per-source failures are logged and skipped.
    pub async fn harvest(&self, urls: &[String]) -> HashSet<String> {
        let fetched: Vec<(String, Option<String>)> = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                match self.fetch_url(&url).await {
                    Ok(text) => {
                        info!(%url, "fetched source");
                        (url, Some(text))
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "failed to fetch source");
                        (url, None)
                    }
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut candidates = HashSet::new();
        for (url, text) in fetched {
            if let Some(text) = text {
                let found = Self::extract_candidates(&text);
                info!(%url, count = found.len(), "extracted candidates");
                candidates.extend(found);
            }
        }
        candidates
    }
}

/// Read a URL list file, skipping blank lines and `#` comments
pub fn load_urls_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_candidates_from_mixed_text() {
        let text = r#"
<html><body>
<pre>vmess://1.2.3.4:443#NodeA</pre>
some prose, then vless://uuid@host.example:8443?type=ws#US%20node inline,
<td>trojan://pw@9.9.9.9:443#Tokyo</td>
and an http://not-a-node.example/page link.
</body></html>
"#;
        let found = Harvester::extract_candidates(text);
        assert_eq!(found.len(), 3);
        assert!(found.contains("vmess://1.2.3.4:443#NodeA"));
        assert!(found.iter().any(|c| c.starts_with("vless://")));
        assert!(found.iter().any(|c| c.starts_with("trojan://")));
    }

    #[test]
    fn test_extract_candidates_stops_at_markup() {
        let text = "<span>ssr://abcdef@1.2.3.4:8388</span>";
        let found = Harvester::extract_candidates(text);
        assert!(found.contains("ssr://abcdef@1.2.3.4:8388"));
    }

    #[test]
    fn test_extract_candidates_drops_implausible() {
        let long = format!("vmess://{}", "a".repeat(2000));
        let mangled = format!("ss://{}@host:443", "%25".repeat(20));
        let text = format!("{long}\n{mangled}\nvmess://1.2.3.4:443#ok");
        let found = Harvester::extract_candidates(&text);
        assert_eq!(found.len(), 1);
        assert!(found.contains("vmess://1.2.3.4:443#ok"));
    }

    #[test]
    fn test_extract_candidates_empty_text() {
        assert!(Harvester::extract_candidates("").is_empty());
        assert!(Harvester::extract_candidates("nothing to see here").is_empty());
    }

    #[test]
    fn test_load_urls_file() {
        let path = std::env::temp_dir().join(format!("nodesift-urls-{}", std::process::id()));
        fs::write(&path, "# sources\nhttps://a.example/page\n\n https://b.example/raw \n").unwrap();

        let urls = load_urls_file(&path).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://a.example/page".to_string(),
                "https://b.example/raw".to_string()
            ]
        );
        fs::remove_file(&path).unwrap();
    }
}
