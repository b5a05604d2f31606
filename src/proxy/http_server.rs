use crate::proxy::director::{self, Director};
use crate::routing::HttpRoute;
use anyhow::{Context, Result};
use hyper::client::HttpConnector;
use hyper::header::HeaderValue;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use log::{error, info, warn};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::broadcast;

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

// Removed before forwarding; they describe the client connection, not the
// upstream one.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// One HTTP virtual-hosting listener: a hyper server on a single port whose
/// requests are rewritten by the port's director and forwarded upstream.
pub struct HttpHandle {
    port: u16,
    director: Arc<Director>,
}

impl HttpHandle {
    pub fn new(port: u16, routes: Vec<HttpRoute>) -> Self {
        Self { port, director: Arc::new(Director::new(routes)) }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let director = self.director;
        let stats = director.clone();
        let client: HttpClient = Client::builder().build(HttpsConnector::new());

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr().ip();
            let director = director.clone();
            let client = client.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let director = director.clone();
                    let client = client.clone();
                    async move {
                        match forward(&director, &client, remote_addr, req).await {
                            Ok(resp) => Ok::<_, Infallible>(resp),
                            Err(e) => {
                                error!("handle_request error from {}: {}", remote_addr, e);
                                Ok::<_, Infallible>(
                                    Response::builder()
                                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                                        .body(Body::empty())
                                        .unwrap(),
                                )
                            }
                        }
                    }
                }))
            }
        });

        let server = hyper::Server::try_bind(&addr)
            .with_context(|| format!("failed to bind http listener on {addr}"))?
            .serve(make_svc)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            });

        info!("http proxy listening on {addr}");
        server.await.with_context(|| format!("http server error on {addr}"))?;
        info!("http proxy on {addr} stopped after {} request(s)", stats.requests_served());
        Ok(())
    }
}

async fn forward(
    director: &Director,
    client: &HttpClient,
    client_ip: IpAddr,
    mut req: Request<Body>,
) -> Result<Response<Body>> {
    if !director.rewrite(&mut req, "http")? {
        warn!(
            "Received request from {} for unknown host {:?}",
            client_ip,
            director::request_host(&req).unwrap_or_default()
        );
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "text/plain")
            .body(Body::from("Not Found"))?);
    }

    prepare_proxy_headers(&mut req, client_ip);

    let target = req.uri().clone();
    match client.request(req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!("upstream request to {} failed: {}", target, e);
            Ok(Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .header("Content-Type", "text/plain")
                .body(Body::from("Bad Gateway"))?)
        }
    }
}

/// Strip hop-by-hop headers and record the caller in X-Forwarded-For.
fn prepare_proxy_headers(req: &mut Request<Body>, client_ip: IpAddr) {
    for name in HOP_BY_HOP_HEADERS {
        req.headers_mut().remove(name);
    }

    let forwarded = match req.headers().get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        req.headers_mut().insert("x-forwarded-for", value);
    }
}
