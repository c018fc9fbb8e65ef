//! demos/test_backend.rs
//! Run: cargo run --example test_backend -- <port> [name]
//!
//! Echoes the method, headers and body it receives so forwarding through the
//! load balancer can be inspected by hand. `FAIL_PCT` injects 500s and
//! `DELAY_MS` adds latency; `/health` always answers immediately.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Clone)]
struct BackendState {
    name: String,
    req_counter: Arc<AtomicU64>,
    delay_ms: u64,
    fail_pct: f64,
}

async fn handle(req: Request<Body>, state: BackendState) -> Result<Response<Body>, Infallible> {
    if req.uri().path() == "/health" {
        return Ok(Response::new(Body::from("OK")));
    }

    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;

    if state.delay_ms > 0 {
        sleep(Duration::from_millis(state.delay_ms)).await;
    }

    if state.fail_pct > 0.0 && rand::thread_rng().gen_bool(state.fail_pct / 100.0) {
        let mut resp = Response::new(Body::from("Injected failure"));
        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(resp);
    }

    let (parts, body) = req.into_parts();
    let body = hyper::body::to_bytes(body).await.unwrap_or_default();

    let mut echo = format!("[{}] request #{}\n{} {}\n", state.name, n, parts.method, parts.uri);
    for (name, value) in &parts.headers {
        echo.push_str(&format!("{}: {}\n", name, value.to_str().unwrap_or("<binary>")));
    }
    echo.push('\n');
    echo.push_str(&String::from_utf8_lossy(&body));

    let mut resp = Response::new(Body::from(echo));
    resp.headers_mut().insert(
        "x-backend-name",
        hyper::header::HeaderValue::from_str(&state.name)
            .unwrap_or_else(|_| hyper::header::HeaderValue::from_static("backend")),
    );
    Ok(resp)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8001".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("backend-{port}"));

    let state = BackendState {
        name: name.clone(),
        req_counter: Arc::new(AtomicU64::new(0)),
        delay_ms: std::env::var("DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(0),
        fail_pct: std::env::var("FAIL_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.0),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, st.clone()))) }
    });

    println!("Echo backend '{}' on http://{}", name, addr);

    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
