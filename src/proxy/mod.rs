pub mod director;
pub mod http_server;
pub mod tcp_relay;

use crate::routing::{RouteSet, RouteTable};
use crate::shutdown::Shutdown;
use anyhow::{Result, anyhow};
use log::{info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// A running unit bound to one listen key, alive for the process lifetime.
pub enum ProxyHandle {
    Http(http_server::HttpHandle),
    Tcp(tcp_relay::TcpHandle),
}

impl ProxyHandle {
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        match self {
            ProxyHandle::Http(handle) => handle.run(shutdown).await,
            ProxyHandle::Tcp(handle) => handle.run(shutdown).await,
        }
    }
}

/// One handle per compiled listen key.
pub fn build_handles(table: RouteTable) -> Vec<ProxyHandle> {
    table
        .into_entries()
        .into_iter()
        .map(|(key, set)| match set {
            RouteSet::Http(routes) => ProxyHandle::Http(http_server::HttpHandle::new(key.port, routes)),
            RouteSet::Tcp(route) => ProxyHandle::Tcp(tcp_relay::TcpHandle::new(key.port, route)),
        })
        .collect()
}

/// Run every handle concurrently until all terminate. A handle error (a bind
/// failure) is fatal to the whole process, not just its own port: the
/// remaining handles are shut down and the error propagates.
pub async fn run_all(handles: Vec<ProxyHandle>, shutdown: &Shutdown) -> Result<()> {
    if handles.is_empty() {
        warn!("no routes configured; nothing to serve");
        return Ok(());
    }

    let mut tasks = JoinSet::new();
    for handle in handles {
        let rx = shutdown.subscribe();
        tasks.spawn(handle.run(rx));
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shutdown.trigger();
                return Err(e);
            }
            Err(e) => {
                shutdown.trigger();
                return Err(anyhow!("proxy task failed: {e}"));
            }
        }
    }
    info!("all listeners stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Defaults, compile};
    use crate::config::RoutingRule;
    use std::time::Duration;

    fn rule(listen: &str, target: &str) -> RoutingRule {
        RoutingRule { listen: listen.to_string(), target: target.to_string(), proxy: None, dial_timeout: 0, keepalive: 0 }
    }

    #[test]
    fn test_one_handle_per_listen_key() {
        let rules = vec![
            rule("http://a.example.com", "http://127.0.0.1:8001"),
            rule("http://b.example.com", "http://127.0.0.1:8002"),
            rule("tcp://0.0.0.0:9000", "tcp://10.0.0.3:22"),
        ];
        let defaults = Defaults { dial_timeout: Duration::from_secs(10), keepalive: Duration::from_secs(30) };
        let table = compile(&rules, &defaults).unwrap();
        let handles = build_handles(table);
        assert_eq!(handles.len(), 2);
        assert!(matches!(handles[0], ProxyHandle::Http(_)));
        assert!(matches!(handles[1], ProxyHandle::Tcp(_)));
    }

    #[tokio::test]
    async fn test_run_all_with_no_handles_returns_immediately() {
        let shutdown = Shutdown::new();
        assert!(run_all(Vec::new(), &shutdown).await.is_ok());
    }
}
