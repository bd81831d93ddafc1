//! Core data models for node candidates and probe results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Node protocol, discriminated by URI scheme prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    ShadowsocksR,
    Trojan,
    Tuic,
    Hysteria2,
}

impl Protocol {
    /// All supported protocols, in scheme-matching order. `ShadowsocksR`
    /// precedes `Shadowsocks` so `ssr://` is never shadowed by `ss://`.
    pub const ALL: [Protocol; 7] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::ShadowsocksR,
        Protocol::Shadowsocks,
        Protocol::Trojan,
        Protocol::Tuic,
        Protocol::Hysteria2,
    ];

    /// The scheme prefix that identifies this protocol in a raw candidate
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess://",
            Protocol::Vless => "vless://",
            Protocol::Shadowsocks => "ss://",
            Protocol::ShadowsocksR => "ssr://",
            Protocol::Trojan => "trojan://",
            Protocol::Tuic => "tuic://",
            Protocol::Hysteria2 => "hysteria2://",
        }
    }

    /// Category label used for output buckets
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Vmess => "Vmess",
            Protocol::Vless => "Vless",
            Protocol::Shadowsocks => "ShadowSocks",
            Protocol::ShadowsocksR => "ShadowSocksR",
            Protocol::Trojan => "Trojan",
            Protocol::Tuic => "Tuic",
            Protocol::Hysteria2 => "Hysteria2",
        }
    }

    /// Match a candidate body against the known scheme prefixes, returning
    /// the protocol and the remainder after the scheme. Harvested pages
    /// carry schemes in any case, so the comparison ignores ASCII case.
    pub fn match_scheme(body: &str) -> Option<(Protocol, &str)> {
        Protocol::ALL.iter().find_map(|p| {
            let scheme = p.scheme();
            // `get` keeps the slice on a char boundary for arbitrary input.
            body.get(..scheme.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
                .map(|_| (*p, &body[scheme.len()..]))
        })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vmess => write!(f, "vmess"),
            Protocol::Vless => write!(f, "vless"),
            Protocol::Shadowsocks => write!(f, "ss"),
            Protocol::ShadowsocksR => write!(f, "ssr"),
            Protocol::Trojan => write!(f, "trojan"),
            Protocol::Tuic => write!(f, "tuic"),
            Protocol::Hysteria2 => write!(f, "hysteria2"),
        }
    }
}

/// Fields extracted from a raw candidate. Absent fields mean the candidate
/// could not be parsed; parsing itself never fails.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedInfo {
    pub protocol: Option<Protocol>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ParsedInfo {
    /// True when protocol, host and port were all extracted
    pub fn is_complete(&self) -> bool {
        self.protocol.is_some() && self.host.is_some() && self.port.is_some()
    }
}

/// Raw outcome of a single probe, before it is tied back to a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub delay_ms: f64,
    /// Resolved address, kept so geo lookup does not re-resolve
    pub ip: Option<IpAddr>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Successful connect with a plausible delay
    pub fn up(delay_ms: f64, ip: IpAddr) -> Self {
        Self {
            reachable: true,
            delay_ms,
            ip: Some(ip),
            error: None,
        }
    }

    /// Connect succeeded but faster than the minimum valid delay; treated
    /// as a measurement artifact and downgraded
    pub fn below_min_delay(delay_ms: f64, ip: IpAddr) -> Self {
        Self {
            reachable: false,
            delay_ms,
            ip: Some(ip),
            error: Some(format!("measured delay {delay_ms:.2}ms below minimum")),
        }
    }

    /// Resolution or connection failure after all attempts
    pub fn down(error: Option<String>) -> Self {
        Self {
            reachable: false,
            delay_ms: 0.0,
            ip: None,
            error,
        }
    }
}

/// Per-candidate validation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub candidate: String,
    pub reachable: bool,
    pub delay_ms: f64,
    pub error: Option<String>,
    /// Country code annotation from the geo resolver, when available
    pub country: Option<String>,
}

impl ProbeResult {
    pub fn from_outcome(candidate: String, outcome: ProbeOutcome, country: Option<String>) -> Self {
        Self {
            candidate,
            reachable: outcome.reachable,
            delay_ms: outcome.delay_ms,
            error: outcome.error,
            country,
        }
    }

    /// Candidate lacked host/port; recorded without consuming a probe slot
    pub fn unparseable(candidate: String) -> Self {
        Self {
            candidate,
            reachable: false,
            delay_ms: 0.0,
            error: Some("could not extract host and port".to_string()),
            country: None,
        }
    }

    /// Candidate collapsed onto an already-seen identity during dedup
    pub fn duplicate(candidate: String) -> Self {
        Self {
            candidate,
            reachable: false,
            delay_ms: 0.0,
            error: Some("duplicate of an already-seen node".to_string()),
            country: None,
        }
    }

    /// Probe failed outright (including an isolated per-candidate fault)
    pub fn failed(candidate: String, error: String) -> Self {
        Self {
            candidate,
            reachable: false,
            delay_ms: 0.0,
            error: Some(error),
            country: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_scheme() {
        let (proto, rest) = Protocol::match_scheme("vmess://1.2.3.4:443").unwrap();
        assert_eq!(proto, Protocol::Vmess);
        assert_eq!(rest, "1.2.3.4:443");
    }

    #[test]
    fn test_match_scheme_ssr_not_shadowed_by_ss() {
        let (proto, rest) = Protocol::match_scheme("ssr://abc@host:8388").unwrap();
        assert_eq!(proto, Protocol::ShadowsocksR);
        assert_eq!(rest, "abc@host:8388");

        let (proto, _) = Protocol::match_scheme("ss://abc@host:8388").unwrap();
        assert_eq!(proto, Protocol::Shadowsocks);
    }

    #[test]
    fn test_match_scheme_ignores_ascii_case() {
        let (proto, rest) = Protocol::match_scheme("VMESS://1.2.3.4:443").unwrap();
        assert_eq!(proto, Protocol::Vmess);
        assert_eq!(rest, "1.2.3.4:443");

        let (proto, _) = Protocol::match_scheme("Trojan://pw@host:443").unwrap();
        assert_eq!(proto, Protocol::Trojan);
    }

    #[test]
    fn test_match_scheme_multibyte_near_prefix_is_safe() {
        // Shorter than a scheme with a multibyte char at the cut point;
        // must not panic on a non-boundary slice.
        assert!(Protocol::match_scheme("VMESS\u{1F980}").is_none());
        assert!(Protocol::match_scheme("ss:\u{00FF}").is_none());
    }

    #[test]
    fn test_match_scheme_unknown() {
        assert!(Protocol::match_scheme("http://example.com").is_none());
        assert!(Protocol::match_scheme("").is_none());
    }

    #[test]
    fn test_parsed_info_completeness() {
        let mut info = ParsedInfo::default();
        assert!(!info.is_complete());

        info.protocol = Some(Protocol::Trojan);
        info.host = Some("example.com".to_string());
        assert!(!info.is_complete());

        info.port = Some(443);
        assert!(info.is_complete());
    }

    #[test]
    fn test_probe_outcome_up() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let outcome = ProbeOutcome::up(42.0, ip);
        assert!(outcome.reachable);
        assert_eq!(outcome.delay_ms, 42.0);
        assert_eq!(outcome.ip, Some(ip));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_probe_outcome_below_min_delay_keeps_measurement() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let outcome = ProbeOutcome::below_min_delay(0.3, ip);
        assert!(!outcome.reachable);
        assert_eq!(outcome.delay_ms, 0.3);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_probe_result_unparseable() {
        let result = ProbeResult::unparseable("not-a-config".to_string());
        assert!(!result.reachable);
        assert_eq!(result.delay_ms, 0.0);
        assert!(result.error.is_some());
    }
}
