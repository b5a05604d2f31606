use crate::routing::TcpRoute;
use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error, info};
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;

/// One raw byte relay: a TCP listener on a single port, every accepted
/// connection piped to the port's one configured target.
pub struct TcpHandle {
    port: u16,
    route: TcpRoute,
}

impl TcpHandle {
    pub fn new(port: u16, route: TcpRoute) -> Self {
        Self { port, route }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind tcp relay on {addr}"))?;
        info!("tcp relay listening on {} -> {}", addr, self.route.target_addr);

        let route = Arc::new(self.route);
        let mut incoming = TcpListenerStream::new(listener);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("tcp relay on {addr} shutting down");
                    break;
                }
                accepted = incoming.next() => match accepted {
                    Some(Ok(inbound)) => {
                        let route = route.clone();
                        let conn_shutdown = shutdown.resubscribe();
                        tokio::spawn(async move {
                            if let Err(e) = relay_connection(inbound, &route, conn_shutdown).await {
                                error!("relay error on {addr}: {e:#}");
                            }
                        });
                    }
                    Some(Err(e)) => error!("tcp accept error on {addr}: {e}"),
                    None => break,
                }
            }
        }
        Ok(())
    }
}

/// Dial the upstream and copy bytes both ways until either side closes, an
/// error occurs, or shutdown is requested. Errors here never outlive the
/// connection's own task.
async fn relay_connection(
    mut inbound: TcpStream,
    route: &TcpRoute,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let peer = inbound.peer_addr().map(|a| a.to_string()).unwrap_or_default();
    let mut outbound = dial_upstream(route).await?;
    tokio::select! {
        _ = shutdown.recv() => {
            debug!("closing relayed connection from {peer} on shutdown");
        }
        copied = copy_bidirectional(&mut inbound, &mut outbound) => match copied {
            Ok((to_target, to_client)) => {
                debug!("relay from {peer} done: {to_target} bytes out, {to_client} bytes back");
            }
            Err(e) => debug!("relay from {peer} ended: {e}"),
        }
    }
    Ok(())
}

/// Connect to the route's target — through the upstream proxy when one is
/// configured — bounded by the dial timeout, with keep-alive applied to the
/// outbound socket.
async fn dial_upstream(route: &TcpRoute) -> Result<TcpStream> {
    let dial_addr = route.proxy_addr.as_deref().unwrap_or(&route.target_addr);
    let mut stream = timeout(route.dial_timeout, TcpStream::connect(dial_addr))
        .await
        .map_err(|_| anyhow!("dial timeout after {:?} connecting to {dial_addr}", route.dial_timeout))?
        .with_context(|| format!("failed to connect to {dial_addr}"))?;
    apply_keepalive(&stream, route.keepalive)?;
    if route.proxy_addr.is_some() {
        establish_tunnel(&mut stream, &route.target_addr, route.dial_timeout).await?;
    }
    Ok(stream)
}

fn apply_keepalive(stream: &TcpStream, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Ok(());
    }
    let keepalive = TcpKeepalive::new().with_time(interval);
    SockRef::from(stream).set_tcp_keepalive(&keepalive).context("failed to set tcp keepalive")?;
    Ok(())
}

pub(crate) fn connect_preamble(target: &str) -> String {
    format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n")
}

pub(crate) fn connect_succeeded(response: &[u8]) -> bool {
    let head = String::from_utf8_lossy(response);
    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(|code| code.starts_with('2'))
        .unwrap_or(false)
}

/// Issue an HTTP CONNECT through the upstream proxy and wait for its 2xx
/// before any relay bytes flow.
async fn establish_tunnel(stream: &mut TcpStream, target: &str, deadline: Duration) -> Result<()> {
    timeout(deadline, async {
        stream.write_all(connect_preamble(target).as_bytes()).await?;

        // read the response headers one byte at a time so no relay bytes are
        // consumed past the blank line
        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            if response.len() > 4096 {
                bail!("oversized CONNECT response from proxy");
            }
            if stream.read(&mut byte).await? == 0 {
                bail!("proxy closed the connection during CONNECT");
            }
            response.push(byte[0]);
        }

        if !connect_succeeded(&response) {
            let status = String::from_utf8_lossy(&response);
            bail!("proxy refused CONNECT to {target}: {}", status.lines().next().unwrap_or(""));
        }
        Ok(())
    })
    .await
    .map_err(|_| anyhow!("dial timeout after {deadline:?} during CONNECT to {target}"))?
}
