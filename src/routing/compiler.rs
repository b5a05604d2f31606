use crate::config::RoutingRule;
use crate::routing::normalizer::{self, HostPattern, ListenKey, NormalizedRule, SchemeClass};
use crate::routing::Defaults;
use anyhow::{Result, bail};
use hyper::Uri;
use log::error;
use std::time::Duration;

/// One entry of an HTTP-class routing set.
#[derive(Debug, Clone)]
pub struct HttpRoute {
    pub pattern: HostPattern,
    pub target: Uri,
}

/// The single route of a TCP-class listen key.
#[derive(Debug, Clone)]
pub struct TcpRoute {
    pub target_addr: String,
    pub proxy_addr: Option<String>,
    pub dial_timeout: Duration,
    pub keepalive: Duration,
}

#[derive(Debug)]
pub enum RouteSet {
    // ordered, first match wins
    Http(Vec<HttpRoute>),
    Tcp(TcpRoute),
}

/// The compiled routing table. Immutable once built; shared read-only by
/// every connection task.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<(ListenKey, RouteSet)>,
}

impl RouteTable {
    pub fn get(&self, key: &ListenKey) -> Option<&RouteSet> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, set)| set)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<(ListenKey, RouteSet)> {
        self.entries
    }
}

/// Compile raw rules into a route table.
///
/// All-or-nothing: every rule and every group is checked, every error is
/// logged and accumulated, and a single failure means no table at all — the
/// caller must not start any listener from a partially valid configuration.
pub fn compile(rules: &[RoutingRule], defaults: &Defaults) -> Result<RouteTable> {
    let mut errors: Vec<String> = Vec::new();
    let mut normalized: Vec<NormalizedRule> = Vec::new();
    for rule in rules {
        match normalizer::normalize_rule(rule, defaults) {
            Ok(n) => normalized.push(n),
            Err(e) => {
                error!("{e:#}");
                errors.push(format!("{e:#}"));
            }
        }
    }

    // Group by listen key, keeping configuration order both across groups and
    // within each group. Order within a group is what makes first-match-wins
    // dispatch deterministic.
    let mut groups: Vec<(ListenKey, Vec<NormalizedRule>)> = Vec::new();
    for n in normalized {
        match groups.iter_mut().find(|(key, _)| *key == n.key) {
            Some((_, group)) => group.push(n),
            None => groups.push((n.key, vec![n])),
        }
    }

    let mut entries = Vec::new();
    for (key, group) in groups {
        match key.scheme.class() {
            SchemeClass::Http => {
                let routes = group
                    .into_iter()
                    .map(|n| HttpRoute { pattern: n.pattern, target: n.target })
                    .collect();
                entries.push((key, RouteSet::Http(routes)));
            }
            SchemeClass::Tcp => {
                let mut group = group.into_iter();
                match (group.next(), group.next()) {
                    (Some(n), None) => match normalizer::dial_address(&n.target) {
                        Some(target_addr) => entries.push((
                            key,
                            RouteSet::Tcp(TcpRoute {
                                target_addr,
                                proxy_addr: n.proxy,
                                dial_timeout: n.dial_timeout,
                                keepalive: n.keepalive,
                            }),
                        )),
                        None => {
                            error!("listen {key} is not valid: target {} has no dialable address", n.target);
                            errors.push(format!("listen {key} is not valid"));
                        }
                    },
                    _ => {
                        error!("listen {key} is not valid: a tcp-class port must map to exactly one target");
                        errors.push(format!("listen {key} is not valid"));
                    }
                }
            }
        }
    }

    if !errors.is_empty() {
        bail!("{} invalid rule(s): {}", errors.len(), errors.join("; "));
    }
    Ok(RouteTable { entries })
}
