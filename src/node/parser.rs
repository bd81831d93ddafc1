//! Parsing, identity derivation and deduplication for raw candidates
//!
//! Parsing is total: any string, including random bytes, yields a
//! `ParsedInfo` whose absent fields signal what could not be extracted.

use crate::node::models::{ParsedInfo, Protocol};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use tracing::info;

/// Candidates at or above this length are extraction junk, not configs
const MAX_CANDIDATE_LEN: usize = 1500;

/// `%25` repetitions at or above this count mark a re-encoded mangled string
const MAX_PERCENT25_COUNT: usize = 15;

/// `user-info@host:port` form (vless, trojan, ss, tuic, hysteria2)
static AT_ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@([^@:/?#\s]+):(\d{1,5})").expect("invalid @host:port regex")
});

/// Bare `host:port` immediately after the scheme (common for vmess links
/// carried in plain form)
static BARE_ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^@:/?#\s]+):(\d{1,5})").expect("invalid host:port regex")
});

/// Parser extracting `{protocol, host, port}` from raw candidate strings
pub struct ConfigParser;

impl ConfigParser {
    /// Parse a raw candidate. The trailing free-text label (after `#`) is
    /// stripped first, then the body is matched against the closed set of
    /// scheme prefixes and the per-protocol endpoint pattern.
    pub fn parse(raw: &str) -> ParsedInfo {
        let body = strip_label(raw).trim();

        let Some((protocol, rest)) = Protocol::match_scheme(body) else {
            return ParsedInfo::default();
        };

        let (host, port) = extract_endpoint(rest);
        ParsedInfo {
            protocol: Some(protocol),
            host,
            port,
        }
    }
}

/// Text before the first `#`
fn strip_label(raw: &str) -> &str {
    raw.split('#').next().unwrap_or("")
}

/// Trailing free-text label after the first `#`, if any
pub fn label_of(raw: &str) -> Option<&str> {
    raw.splitn(2, '#').nth(1)
}

fn extract_endpoint(rest: &str) -> (Option<String>, Option<u16>) {
    let caps = AT_ENDPOINT_REGEX
        .captures(rest)
        .or_else(|| BARE_ENDPOINT_REGEX.captures(rest));

    match caps {
        Some(caps) => {
            let host = caps.get(1).map(|m| m.as_str().to_string());
            let port = caps.get(2).and_then(|m| m.as_str().parse::<u16>().ok());
            (host, port)
        }
        None => (None, None),
    }
}

/// Derives the canonical dedup key for a candidate
pub struct IdentityResolver;

impl IdentityResolver {
    /// Canonical identity: `protocol:host:port` when the candidate parses
    /// completely, otherwise a hash over the scheme- and label-stripped
    /// text so candidates differing only in trailing label still collapse.
    /// Total: always returns a key.
    pub fn identify(raw: &str) -> String {
        let info = ConfigParser::parse(raw);
        if let (Some(protocol), Some(host), Some(port)) =
            (info.protocol, info.host.as_deref(), info.port)
        {
            return format!("{protocol}:{host}:{port}");
        }

        let body = strip_label(raw).trim();
        let body = Protocol::match_scheme(body)
            .map(|(_, rest)| rest)
            .unwrap_or(body);

        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        format!("hash:{:x}", hasher.finish())
    }
}

/// Collapses cosmetically distinct candidates onto one per identity
pub struct Deduplicator;

impl Deduplicator {
    /// Keep the first candidate observed for each identity. Seen-key state
    /// is local to the call, so independent invocations never leak into
    /// each other.
    pub fn dedupe(candidates: &HashSet<String>) -> HashSet<String> {
        let mut seen_keys = HashSet::new();
        let mut kept = HashSet::new();

        for candidate in candidates {
            if seen_keys.insert(IdentityResolver::identify(candidate)) {
                kept.insert(candidate.clone());
            }
        }

        info!(
            input = candidates.len(),
            kept = kept.len(),
            "deduplication completed"
        );
        kept
    }
}

/// Basic format sanity for harvested candidates: over-long strings and
/// percent-encoding pileups come from broken page extraction
pub fn is_plausible(raw: &str) -> bool {
    if raw.len() >= MAX_CANDIDATE_LEN {
        return false;
    }
    if raw.matches("%25").count() >= MAX_PERCENT25_COUNT {
        return false;
    }
    if raw.contains("%2525") {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_endpoint() {
        let info = ConfigParser::parse("vmess://1.2.3.4:443#NodeA");
        assert_eq!(info.protocol, Some(Protocol::Vmess));
        assert_eq!(info.host.as_deref(), Some("1.2.3.4"));
        assert_eq!(info.port, Some(443));
    }

    #[test]
    fn test_parse_at_endpoint() {
        let info = ConfigParser::parse("vless://uuid-here@example.com:8443?security=tls#US node");
        assert_eq!(info.protocol, Some(Protocol::Vless));
        assert_eq!(info.host.as_deref(), Some("example.com"));
        assert_eq!(info.port, Some(8443));
    }

    #[test]
    fn test_parse_trojan() {
        let info = ConfigParser::parse("trojan://password@10.0.0.1:443");
        assert_eq!(info.protocol, Some(Protocol::Trojan));
        assert_eq!(info.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(info.port, Some(443));
    }

    #[test]
    fn test_parse_uppercase_scheme() {
        // Harvesting is case-insensitive, so parsing must be too.
        let info = ConfigParser::parse("VMESS://1.2.3.4:443#A");
        assert_eq!(info.protocol, Some(Protocol::Vmess));
        assert!(info.is_complete());

        let upper = IdentityResolver::identify("VMESS://1.2.3.4:443#A");
        let lower = IdentityResolver::identify("vmess://1.2.3.4:443#B");
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_parse_unmatched_scheme() {
        let info = ConfigParser::parse("http://example.com:80");
        assert_eq!(info, ParsedInfo::default());
    }

    #[test]
    fn test_parse_missing_endpoint() {
        let info = ConfigParser::parse("vmess://eyJhZGQiOiJub3BvcnQifQ==");
        assert_eq!(info.protocol, Some(Protocol::Vmess));
        assert!(info.host.is_none());
        assert!(info.port.is_none());
        assert!(!info.is_complete());
    }

    #[test]
    fn test_parse_port_out_of_range() {
        let info = ConfigParser::parse("trojan://pw@host:99999");
        assert_eq!(info.host.as_deref(), Some("host"));
        assert!(info.port.is_none());
    }

    #[test]
    fn test_parse_is_total() {
        // None of these may panic; unparseable input just has absent fields.
        for input in [
            "",
            "#",
            "####",
            "vmess://",
            "ss://#label-only",
            "random text with spaces",
            "\u{1F980}\u{FFFD}\0\t\r\n",
            "trojan://@:",
            ":::::",
        ] {
            let _ = ConfigParser::parse(input);
            let _ = IdentityResolver::identify(input);
        }
    }

    #[test]
    fn test_identify_complete_candidate() {
        let key = IdentityResolver::identify("vmess://1.2.3.4:443#Whatever");
        assert_eq!(key, "vmess:1.2.3.4:443");
    }

    #[test]
    fn test_identify_label_does_not_change_identity() {
        let a = IdentityResolver::identify("vmess://host:1#LabelA");
        let b = IdentityResolver::identify("vmess://host:1#LabelB");
        assert_eq!(a, b);
    }

    #[test]
    fn test_identify_hash_fallback_strips_label() {
        // Incomplete parse falls back to hashing; differing labels still
        // collapse to one identity.
        let a = IdentityResolver::identify("vmess://b64payload#A");
        let b = IdentityResolver::identify("vmess://b64payload#B");
        assert!(a.starts_with("hash:"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_identify_hash_fallback_distinguishes_content() {
        let a = IdentityResolver::identify("vmess://payload-one");
        let b = IdentityResolver::identify("vmess://payload-two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_dedupe_collapses_cosmetic_duplicates() {
        let candidates: HashSet<String> = [
            "vmess://host:1#LabelA".to_string(),
            "vmess://host:1#LabelB".to_string(),
        ]
        .into_iter()
        .collect();

        let deduped = Deduplicator::dedupe(&candidates);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn test_dedupe_idempotent() {
        let candidates: HashSet<String> = [
            "vmess://host:1#A",
            "vmess://host:1#B",
            "trojan://pw@other:443",
            "not a config at all",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let once = Deduplicator::dedupe(&candidates);
        let twice = Deduplicator::dedupe(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dedupe_no_cross_call_leakage() {
        let candidates: HashSet<String> = ["vmess://host:1#A".to_string()].into_iter().collect();
        // The same input run twice keeps its single element both times.
        assert_eq!(Deduplicator::dedupe(&candidates).len(), 1);
        assert_eq!(Deduplicator::dedupe(&candidates).len(), 1);
    }

    #[test]
    fn test_is_plausible() {
        assert!(is_plausible("vmess://1.2.3.4:443#ok"));
        assert!(!is_plausible(&"x".repeat(2000)));
        assert!(!is_plausible(&format!("ss://{}", "%25".repeat(20))));
        assert!(!is_plausible("vless://a%2525b@host:443"));
    }
}
