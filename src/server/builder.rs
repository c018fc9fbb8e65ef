// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::proxy::ClientAddr;
use crate::server::listener::bind_tcp;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use hyper::{server::conn::Http, Body, Request, Response};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::{Service, ServiceExt};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Builder pattern so `main.rs` can inject its request handler.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    handler: Option<H>,
    shutdown: Option<BoxFuture<'static, ()>>,
    grace_period: Duration,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handler: None,
            shutdown: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Inject the request handler (usually `RequestHandler` over a `Dispatcher`).
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Stop accepting connections once `signal` resolves.
    pub fn with_shutdown<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(Box::pin(signal));
        self
    }

    /// Upper bound on how long open connections may keep running after shutdown.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Consume the builder, bind the TCP listener, spawn Hyper tasks.
    pub async fn serve(self) -> Result<()> {
        let listener = bind_tcp(self.addr).await?;
        tracing::info!("HTTP server listening on {}", self.addr);
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener. Returns once shutdown was signalled
    /// and open connections have finished or the grace period ran out.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;
        let mut shutdown = self
            .shutdown
            .unwrap_or_else(|| Box::pin(std::future::pending()));

        let (drain_tx, drain_rx) = watch::channel(());
        let mut connections = JoinSet::new();

        loop {
            let (stream, peer) = tokio::select! {
                conn = accept_with_backoff(|| listener.accept()) => conn,
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            };

            let svc = handler.clone().map_request(move |mut req: Request<Body>| {
                req.extensions_mut().insert(ClientAddr(peer));
                req
            });
            let mut drain = drain_rx.clone();

            // One Tokio task per connection.
            connections.spawn(async move {
                let conn = Http::new().serve_connection(stream, svc);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = drain.changed() => {
                        // Finish the in-flight exchange, then close instead of keeping alive.
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(err) = result {
                    tracing::warn!(%peer, %err, "connection error");
                }
            });
        }

        drop(listener);
        let _ = drain_tx.send(());

        let open = connections.len();
        if open > 0 {
            tracing::info!(open, "Waiting for open connections to finish");
        }
        let drained = tokio::time::timeout(self.grace_period, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Grace period elapsed, aborting open connections"
            );
            connections.shutdown().await;
        }
        Ok(())
    }
}

/// Accepts the next connection, logging and backing off on transient errors.
async fn accept_with_backoff<A, F, T>(mut accept: A) -> T
where
    A: FnMut() -> F,
    F: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(err) => {
                tracing::warn!(%err, "failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn accept_errors_back_off_before_retrying() {
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();

        let conn = accept_with_backoff(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(conn, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= ACCEPT_ERROR_BACKOFF * 3);
    }
}
