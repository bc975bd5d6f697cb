//! URL scanning for the feature extractor.
//!
//! Detection is a permissive token scan: any whitespace-delimited token starting with
//! `http://` or `https://` (case-insensitive) is a URL candidate. Each candidate is parsed on its
//! own into a `Result`; failures are kept (and counted) instead of aborting the scan.

use std::net::IpAddr;

use serde::Serialize;
use thiserror::Error;

/// Two-label public suffixes treated as a single effective TLD.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "ltd.uk", "me.uk", "net.uk", "com.au", "net.au",
    "org.au", "edu.au", "gov.au", "co.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "co.za", "com.br",
    "com.cn", "com.mx", "com.tr", "com.sg", "com.hk", "co.in", "co.kr", "com.ar", "co.id",
];

/// Trailing characters that usually belong to the surrounding sentence, not the URL.
const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '>', '"', '\''];

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UrlParseError {
    #[error("missing host")]
    MissingHost,
    #[error("invalid host `{0}`")]
    InvalidHost(String),
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    #[error("unterminated IPv6 literal")]
    UnterminatedIpv6,
}

/// A URL that survived lenient parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedUrl {
    pub raw: String,
    pub https: bool,
    pub host: String,
    pub registrable: String,
    pub subdomain_depth: usize,
    pub is_ip: bool,
}

/// Outcome of scanning one text: parsed URLs plus the candidates that failed to parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UrlScan {
    pub parsed: Vec<ParsedUrl>,
    pub skipped: Vec<(String, UrlParseError)>,
}

impl UrlScan {
    /// Number of detected candidates, parsed or not.
    pub fn detected(&self) -> usize {
        self.parsed.len() + self.skipped.len()
    }
}

/// Whitespace tokens that look like `http(s)://` URLs, with sentence punctuation trimmed.
pub fn find_urls(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|tok| has_http_scheme(tok))
        .map(|tok| tok.trim_end_matches(TRAILING_PUNCT))
        .collect()
}

fn has_http_scheme(tok: &str) -> bool {
    starts_with_ignore_case(tok, "http://") || starts_with_ignore_case(tok, "https://")
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Scan `text` and parse every candidate independently.
pub fn scan_urls(text: &str) -> UrlScan {
    let mut scan = UrlScan::default();
    for raw in find_urls(text) {
        match parse_url(raw) {
            Ok(u) => scan.parsed.push(u),
            Err(e) => scan.skipped.push((raw.to_string(), e)),
        }
    }
    scan
}

/// Lenient parse of a single `http(s)://` URL.
pub fn parse_url(raw: &str) -> Result<ParsedUrl, UrlParseError> {
    let (scheme, rest) = raw.split_once("://").ok_or(UrlParseError::MissingHost)?;
    let https = scheme.eq_ignore_ascii_case("https");

    let authority = rest
        .split(['/', '?', '#', '\\'])
        .next()
        .unwrap_or_default();
    // Drop userinfo: `http://paypal.com@evil.tld/` really points at `evil.tld`.
    let authority = authority
        .rsplit_once('@')
        .map(|(_, a)| a)
        .unwrap_or(authority);
    if authority.is_empty() {
        return Err(UrlParseError::MissingHost);
    }

    let host = if let Some(v6) = authority.strip_prefix('[') {
        let (inner, after) = v6.split_once(']').ok_or(UrlParseError::UnterminatedIpv6)?;
        check_port(after.strip_prefix(':').unwrap_or(after))?;
        inner.to_string()
    } else {
        let (h, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, p),
            None => (authority, ""),
        };
        check_port(port)?;
        h.trim_end_matches('.').to_ascii_lowercase()
    };

    if host.is_empty() {
        return Err(UrlParseError::MissingHost);
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ParsedUrl {
            raw: raw.to_string(),
            https,
            host: ip.to_string(),
            registrable: ip.to_string(),
            subdomain_depth: 0,
            is_ip: true,
        });
    }

    if !host.split('.').all(valid_label) {
        return Err(UrlParseError::InvalidHost(host));
    }

    let registrable =
        registrable_domain(&host).ok_or_else(|| UrlParseError::InvalidHost(host.clone()))?;
    let subdomain_depth = label_count(&host) - label_count(&registrable);

    Ok(ParsedUrl {
        raw: raw.to_string(),
        https,
        host,
        registrable,
        subdomain_depth,
        is_ip: false,
    })
}

fn check_port(port: &str) -> Result<(), UrlParseError> {
    if port.is_empty() || (port.len() <= 5 && port.chars().all(|c| c.is_ascii_digit())) {
        Ok(())
    } else {
        Err(UrlParseError::InvalidPort(port.to_string()))
    }
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && label
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

fn label_count(host: &str) -> usize {
    host.split('.').count()
}

/// Effective TLD plus one label, e.g. `mail.paypal.com` → `paypal.com`,
/// `login.bank.co.uk` → `bank.co.uk`. Single-label hosts are their own registrable domain.
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.iter().any(|l| l.is_empty()) {
        return None;
    }
    let n = labels.len();
    if n <= 2 {
        return Some(host);
    }
    let last_two = labels[n - 2..].join(".");
    let take = if MULTI_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    Some(labels[n - take..].join("."))
}

/// Domain part of an address-like sender (`Name <user@domain>`). `None` when there is no `@`.
pub fn sender_domain(sender: &str) -> Option<&str> {
    let addr = sender.trim();
    let (_, domain) = addr.rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('>').trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}
