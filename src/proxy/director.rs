use crate::routing::HttpRoute;
use anyhow::Result;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Uri};
use std::sync::atomic::{AtomicU64, Ordering};

/// Rewrites inbound requests in place to address the matched upstream.
///
/// One director per HTTP listening port; its route list is the compiled,
/// order-preserved slice for that port.
pub struct Director {
    routes: Vec<HttpRoute>,
    requests: AtomicU64,
}

impl Director {
    pub fn new(routes: Vec<HttpRoute>) -> Self {
        Self { routes, requests: AtomicU64::new(0) }
    }

    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Scan the route list in configuration order; the first matching rule
    /// wins, whether literal or wildcard.
    pub fn resolve(&self, scheme: &str, host: &str) -> Option<&Uri> {
        let canonical = format!("{scheme}://{host}").to_lowercase();
        let port = request_port(host, scheme);
        self.routes.iter().find(|route| route.pattern.matches(&canonical, port)).map(|route| &route.target)
    }

    /// Rewrite the request to target the matched upstream. Returns false and
    /// leaves the request untouched when no rule matches; the caller decides
    /// what to answer.
    pub fn rewrite<B>(&self, req: &mut Request<B>, scheme: &str) -> Result<bool> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let Some(host) = request_host(req) else {
            return Ok(false);
        };
        let Some(target) = self.resolve(scheme, &host) else {
            return Ok(false);
        };

        let path = single_joining_slash(target.path(), req.uri().path());
        let path_and_query = match merge_query(target.query(), req.uri().query()) {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        let authority = match target.authority() {
            Some(authority) => authority.clone(),
            None => return Ok(false),
        };
        *req.uri_mut() = Uri::builder()
            .scheme(target.scheme_str().unwrap_or("http"))
            .authority(authority)
            .path_and_query(path_and_query)
            .build()?;

        if !req.headers().contains_key(header::USER_AGENT) {
            // explicitly disable User-Agent so it's not set to a default value
            req.headers_mut().insert(header::USER_AGENT, HeaderValue::from_static(""));
        }
        Ok(true)
    }
}

/// Requester host as sent, port included: the Host header when present,
/// otherwise the request URI's authority.
pub(crate) fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(hv) = req.headers().get(header::HOST) {
        if let Ok(host) = hv.to_str() {
            return Some(host.to_string());
        }
    }
    req.uri().authority().map(|a| a.to_string())
}

/// Numeric port of the requester host, split on `:` and `/`; the scheme
/// default fills in when the Host header carries no port.
pub(crate) fn request_port(host: &str, scheme: &str) -> u16 {
    let explicit = host
        .split(':')
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .and_then(|p| p.parse().ok());
    match explicit {
        Some(port) => port,
        None => {
            if scheme.eq_ignore_ascii_case("https") {
                443
            } else {
                80
            }
        }
    }
}

/// Join two path segments with exactly one slash between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let aslash = a.ends_with('/');
    let bslash = b.starts_with('/');
    match (aslash, bslash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Merge target and request query strings: both when both are non-empty,
/// else whichever is.
pub fn merge_query(target: Option<&str>, request: Option<&str>) -> Option<String> {
    match (target, request) {
        (Some(t), Some(r)) if !t.is_empty() && !r.is_empty() => Some(format!("{t}&{r}")),
        (Some(t), _) if !t.is_empty() => Some(t.to_string()),
        (_, Some(r)) if !r.is_empty() => Some(r.to_string()),
        _ => None,
    }
}
