use crate::config::RoutingRule;
use crate::routing::Defaults;
use anyhow::{Context, Result, anyhow, bail};
use hyper::Uri;
use std::fmt::Display;
use std::time::Duration;

/// Scheme label of a listen spec. The label participates in grouping, so
/// `https:443` and `tcp:443` stay distinct keys; dispatch only cares about
/// the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenScheme {
    Http,
    Https,
    Tcp,
}

/// Which engine serves a listen key: HTTP virtual hosting, or the raw byte
/// relay (`https` is TLS-opaque and relays like `tcp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeClass {
    Http,
    Tcp,
}

impl ListenScheme {
    pub fn class(self) -> SchemeClass {
        match self {
            ListenScheme::Http => SchemeClass::Http,
            ListenScheme::Https | ListenScheme::Tcp => SchemeClass::Tcp,
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            ListenScheme::Http => Some(80),
            ListenScheme::Https => Some(443),
            ListenScheme::Tcp => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListenScheme::Http => "http",
            ListenScheme::Https => "https",
            ListenScheme::Tcp => "tcp",
        }
    }
}

/// Identifies one physical listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenKey {
    pub scheme: ListenScheme,
    pub port: u16,
}

impl Display for ListenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scheme.as_str(), self.port)
    }
}

/// Compiled matcher for the requester side of an HTTP rule.
///
/// `Literal` holds the canonical `scheme://host[:port]` prefix (lowercased,
/// default port elided). Wildcard hosts (`*` or `0.0.0.0`) compile to `Any`,
/// which matches every requester host on the rule's port. Compiling the
/// wildcard structurally keeps it working when the default port was elided
/// from the listen string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Literal(String),
    Any { port: u16 },
}

impl HostPattern {
    pub fn matches(&self, canonical: &str, request_port: u16) -> bool {
        match self {
            HostPattern::Literal(prefix) => canonical.starts_with(prefix.as_str()),
            HostPattern::Any { port } => *port == request_port,
        }
    }
}

/// One rule after validation, ready for grouping by the compiler.
#[derive(Debug, Clone)]
pub struct NormalizedRule {
    pub key: ListenKey,
    pub pattern: HostPattern,
    pub target: Uri,
    // upstream proxy dial address, honored by the tcp relay only
    pub proxy: Option<String>,
    pub dial_timeout: Duration,
    pub keepalive: Duration,
}

/// Validate and canonicalize a single raw rule.
pub fn normalize_rule(rule: &RoutingRule, defaults: &Defaults) -> Result<NormalizedRule> {
    let listen: Uri = rule.listen.parse().with_context(|| format!("parse rule error: {}", rule.listen))?;

    let scheme = match listen.scheme_str().map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("http") => ListenScheme::Http,
        Some("https") => ListenScheme::Https,
        Some("tcp") => ListenScheme::Tcp,
        other => bail!("unsupported listen scheme {:?}: {}", other.unwrap_or(""), rule.listen),
    };
    let host = listen
        .host()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| anyhow!("missing host in listen spec: {}", rule.listen))?;
    let port = match listen.port_u16().or(scheme.default_port()) {
        Some(p) => p,
        None => bail!("tcp missing port: {}", rule.listen),
    };

    let key = ListenKey { scheme, port };
    let pattern = if host == "*" || host == "0.0.0.0" {
        HostPattern::Any { port }
    } else {
        HostPattern::Literal(canonical_listen(scheme, &host, port))
    };

    let target: Uri = rule.target.parse().with_context(|| format!("parse rule error: {}", rule.target))?;
    if target.host().is_none() {
        bail!("missing host in target spec: {}", rule.target);
    }
    if target.scheme_str().is_some_and(|s| s.eq_ignore_ascii_case("tcp")) && target.port_u16().is_none() {
        bail!("tcp missing port: {}", rule.target);
    }

    let proxy = match rule.proxy.as_deref() {
        Some(spec) if !spec.is_empty() => Some(proxy_address(spec)?),
        _ => None,
    };

    Ok(NormalizedRule {
        key,
        pattern,
        target,
        proxy,
        dial_timeout: pick_timeout(rule.dial_timeout, defaults.dial_timeout),
        keepalive: pick_timeout(rule.keepalive, defaults.keepalive),
    })
}

/// Dial address (`host:port`) for a parsed target or proxy URL, with the
/// scheme's default port filling in when none is explicit.
pub fn dial_address(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    let port = uri
        .port_u16()
        .or_else(|| scheme_default_port(&uri.scheme_str().unwrap_or("").to_ascii_lowercase()))?;
    Some(format!("{host}:{port}"))
}

fn canonical_listen(scheme: ListenScheme, host: &str, port: u16) -> String {
    if Some(port) == scheme.default_port() {
        format!("{}://{}", scheme.as_str(), host)
    } else {
        format!("{}://{}:{}", scheme.as_str(), host, port)
    }
}

fn proxy_address(spec: &str) -> Result<String> {
    let uri: Uri = spec.parse().with_context(|| format!("parse rule error: {spec}"))?;
    if uri.host().is_none() {
        bail!("missing host in proxy spec: {spec}");
    }
    dial_address(&uri).ok_or_else(|| anyhow!("missing port in proxy spec: {spec}"))
}

fn scheme_default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn pick_timeout(rule_seconds: u64, fallback: Duration) -> Duration {
    if rule_seconds > 0 { Duration::from_secs(rule_seconds) } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Defaults {
        Defaults { dial_timeout: Duration::from_secs(10), keepalive: Duration::from_secs(30) }
    }

    fn rule(listen: &str, target: &str) -> RoutingRule {
        RoutingRule { listen: listen.to_string(), target: target.to_string(), proxy: None, dial_timeout: 0, keepalive: 0 }
    }

    #[test]
    fn test_http_default_port_elided() {
        let n = normalize_rule(&rule("http://Example.COM:80", "http://127.0.0.1:8080"), &defaults()).unwrap();
        assert_eq!(n.key, ListenKey { scheme: ListenScheme::Http, port: 80 });
        assert_eq!(n.pattern, HostPattern::Literal("http://example.com".to_string()));
    }

    #[test]
    fn test_elision_matches_portless_spec() {
        let explicit = normalize_rule(&rule("http://example.com:80", "http://127.0.0.1:8080"), &defaults()).unwrap();
        let implicit = normalize_rule(&rule("http://example.com", "http://127.0.0.1:8080"), &defaults()).unwrap();
        assert_eq!(explicit.key, implicit.key);
        assert_eq!(explicit.pattern, implicit.pattern);
    }

    #[test]
    fn test_https_default_port_elided() {
        let n = normalize_rule(&rule("https://example.com:443", "tcp://10.0.0.2:8443"), &defaults()).unwrap();
        assert_eq!(n.key, ListenKey { scheme: ListenScheme::Https, port: 443 });
        assert_eq!(n.pattern, HostPattern::Literal("https://example.com".to_string()));
    }

    #[test]
    fn test_explicit_port_kept() {
        let n = normalize_rule(&rule("http://example.com:8080", "http://127.0.0.1:3000"), &defaults()).unwrap();
        assert_eq!(n.key.port, 8080);
        assert_eq!(n.pattern, HostPattern::Literal("http://example.com:8080".to_string()));
    }

    #[test]
    fn test_wildcard_star() {
        let n = normalize_rule(&rule("http://*:8080", "http://127.0.0.1:3000"), &defaults()).unwrap();
        assert_eq!(n.pattern, HostPattern::Any { port: 8080 });
    }

    #[test]
    fn test_wildcard_zero_host_on_default_port() {
        let n = normalize_rule(&rule("http://0.0.0.0:80", "http://10.0.0.2:8080"), &defaults()).unwrap();
        assert_eq!(n.key, ListenKey { scheme: ListenScheme::Http, port: 80 });
        assert_eq!(n.pattern, HostPattern::Any { port: 80 });
    }

    #[test]
    fn test_wildcard_without_port_uses_scheme_default() {
        let n = normalize_rule(&rule("http://*", "http://10.0.0.2:8080"), &defaults()).unwrap();
        assert_eq!(n.pattern, HostPattern::Any { port: 80 });
    }

    #[test]
    fn test_tcp_listen_requires_port() {
        let err = normalize_rule(&rule("tcp://0.0.0.0", "tcp://10.0.0.3:22"), &defaults()).unwrap_err();
        assert!(err.to_string().contains("tcp missing port"));
    }

    #[test]
    fn test_tcp_target_requires_port() {
        let err = normalize_rule(&rule("tcp://0.0.0.0:9000", "tcp://10.0.0.3"), &defaults()).unwrap_err();
        assert!(err.to_string().contains("tcp missing port"));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let err = normalize_rule(&rule("udp://0.0.0.0:53", "udp://10.0.0.3:53"), &defaults()).unwrap_err();
        assert!(err.to_string().contains("unsupported listen scheme"));
    }

    #[test]
    fn test_unparseable_target_carries_spec() {
        let err = normalize_rule(&rule("http://example.com", "http://exa mple/"), &defaults()).unwrap_err();
        assert!(format!("{err:#}").contains("http://exa mple/"));
    }

    #[test]
    fn test_timeout_fallbacks() {
        let mut r = rule("tcp://0.0.0.0:9000", "tcp://10.0.0.3:22");
        r.dial_timeout = 5;
        let n = normalize_rule(&r, &defaults()).unwrap();
        assert_eq!(n.dial_timeout, Duration::from_secs(5));
        assert_eq!(n.keepalive, Duration::from_secs(30));
    }

    #[test]
    fn test_proxy_spec_resolved_to_dial_address() {
        let mut r = rule("tcp://0.0.0.0:9000", "tcp://10.0.0.3:22");
        r.proxy = Some("http://gateway.internal".to_string());
        let n = normalize_rule(&r, &defaults()).unwrap();
        assert_eq!(n.proxy.as_deref(), Some("gateway.internal:80"));
    }

    #[test]
    fn test_proxy_spec_with_explicit_port() {
        let mut r = rule("tcp://0.0.0.0:9000", "tcp://10.0.0.3:22");
        r.proxy = Some("http://gateway.internal:3128/".to_string());
        let n = normalize_rule(&r, &defaults()).unwrap();
        assert_eq!(n.proxy.as_deref(), Some("gateway.internal:3128"));
    }

    #[test]
    fn test_dial_address_fills_scheme_default() {
        assert_eq!(dial_address(&"http://10.0.0.2".parse().unwrap()).as_deref(), Some("10.0.0.2:80"));
        assert_eq!(dial_address(&"https://10.0.0.2".parse().unwrap()).as_deref(), Some("10.0.0.2:443"));
        assert_eq!(dial_address(&"tcp://10.0.0.3:22".parse().unwrap()).as_deref(), Some("10.0.0.3:22"));
        assert_eq!(dial_address(&"tcp://10.0.0.3".parse().unwrap()), None);
    }

    #[test]
    fn test_listen_key_display() {
        let key = ListenKey { scheme: ListenScheme::Tcp, port: 9000 };
        assert_eq!(key.to_string(), "tcp:9000");
    }
}
