// ────────────────────────────────
// src/proxy/proxy.rs
// Single-host reverse proxy that forwards one exchange to a backend
// ────────────────────────────────

use futures::{stream, StreamExt};
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri, Version};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Shared outbound client; plain and TLS backends go through the same pool.
pub fn build_client() -> HttpClient {
    Client::builder().build::<_, Body>(HttpsConnector::new())
}

/// Peer address of the inbound connection, stored in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub struct ReverseProxy {
    target: Url,
    authority: String,
    client: HttpClient,
    timeout: Duration,
    idle_timeout: Duration,
}

impl ReverseProxy {
    pub fn new(target: Url, client: HttpClient, timeout: Duration, idle_timeout: Duration) -> Self {
        let host = target.host_str().unwrap_or_default();
        let authority = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Self {
            target,
            authority,
            client,
            timeout,
            idle_timeout,
        }
    }

    pub async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let outbound = self.rewrite_request(req)?;

        let response = timeout(self.timeout, self.client.request(outbound))
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(
            parts,
            idle_timeout_body(body, self.idle_timeout),
        ))
    }

    fn rewrite_request(&self, req: Request<Body>) -> Result<Request<Body>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = self.upstream_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);

        let host = HeaderValue::from_str(&self.authority)
            .map_err(|e| ProxyError::Upstream(format!("invalid host header: {e}")))?;
        parts.headers.insert(HOST, host);

        if let Some(ClientAddr(peer)) = parts.extensions.get::<ClientAddr>().copied() {
            append_forwarded_for(&mut parts.headers, peer);
        }

        Ok(Request::from_parts(parts, body))
    }

    fn upstream_uri(&self, original: &Uri) -> Result<Uri, ProxyError> {
        let path = join_paths(self.target.path(), original.path());

        let target_query = self.target.query().unwrap_or_default();
        let request_query = original.query().unwrap_or_default();
        let query = if target_query.is_empty() || request_query.is_empty() {
            format!("{target_query}{request_query}")
        } else {
            format!("{target_query}&{request_query}")
        };

        let mut uri = format!("{}://{}{}", self.target.scheme(), self.authority, path);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }

        uri.parse::<Uri>()
            .map_err(|e| ProxyError::Upstream(format!("invalid upstream uri {uri}: {e}")))
    }
}

pub(crate) fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Re-wraps the upstream body so a stalled backend cannot hold the
/// downstream connection open forever. Dropping the returned body drops the
/// upstream body with it, which releases the backend connection.
fn idle_timeout_body(body: Body, idle: Duration) -> Body {
    let chunks = stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(err))) => Some((Err(BodyError::from(err)), None)),
            Ok(None) => None,
            Err(_) => Some((Err(BodyError::from(ProxyError::Timeout)), None)),
        }
    });
    Body::wrap_stream(chunks)
}

type BodyError = Box<dyn std::error::Error + Send + Sync>;

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No available upstream")]
    NoAvailableUpstream,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream timeout")]
    Timeout,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoAvailableUpstream => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match &err {
            ProxyError::NoAvailableUpstream => "No available upstream",
            ProxyError::Upstream(_) => "Bad gateway",
            ProxyError::Timeout => "Gateway timeout",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy_for(target: &str) -> ReverseProxy {
        ReverseProxy::new(
            Url::parse(target).unwrap(),
            build_client(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn rewrites_uri_and_host() {
        let proxy = proxy_for("http://127.0.0.1:9001/api?key=1");
        let req = Request::builder()
            .method("POST")
            .uri("/users?page=2")
            .header(HOST, "lb.local")
            .body(Body::from("payload"))
            .unwrap();

        let out = proxy.rewrite_request(req).unwrap();
        assert_eq!(out.method(), "POST");
        assert_eq!(
            out.uri().to_string(),
            "http://127.0.0.1:9001/api/users?key=1&page=2"
        );
        assert_eq!(out.headers()[HOST], "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn default_port_is_omitted_from_host() {
        let proxy = proxy_for("https://github.com");
        let req = Request::get("/").body(Body::empty()).unwrap();
        let out = proxy.rewrite_request(req).unwrap();
        assert_eq!(out.uri().to_string(), "https://github.com/");
        assert_eq!(out.headers()[HOST], "github.com");
    }

    #[tokio::test]
    async fn strips_hop_by_hop_and_appends_forwarded_for() {
        let proxy = proxy_for("http://127.0.0.1:9001");
        let mut req = Request::get("/")
            .header(CONNECTION, "keep-alive, x-session")
            .header("keep-alive", "timeout=5")
            .header("x-session", "abc")
            .header("x-forwarded-for", "10.0.0.1")
            .header("x-custom", "kept")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ClientAddr("192.168.1.7:50000".parse().unwrap()));

        let out = proxy.rewrite_request(req).unwrap();
        let headers = out.headers();
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-session").is_none());
        assert_eq!(headers["x-custom"], "kept");
        assert_eq!(headers["x-forwarded-for"], "10.0.0.1, 192.168.1.7");
    }

    #[test]
    fn joins_paths_with_single_slash() {
        assert_eq!(join_paths("/", "/a"), "/a");
        assert_eq!(join_paths("/base/", "/a"), "/base/a");
        assert_eq!(join_paths("/base", "/a"), "/base/a");
        assert_eq!(join_paths("/base", "a"), "/base/a");
    }

    #[test]
    fn errors_map_to_gateway_statuses() {
        let resp: Response<Body> = ProxyError::NoAvailableUpstream.into();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp: Response<Body> = ProxyError::Upstream("refused".into()).into();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let resp: Response<Body> = ProxyError::Timeout.into();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
