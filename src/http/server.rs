//! HTTP server hosting the SPARQL endpoint

use super::handler::{sparql_handler, EndpointState};
use crate::config::EndpointConfig;
use crate::sparql::QueryEngine;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Log every request with its outcome and latency
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    info!("[{}] {}", method, uri);

    let response = next.run(request).await;

    info!(
        "[{}] {} - {} ({}ms)",
        method,
        uri,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

/// HTTP server exposing `/sparql`
pub struct HttpServer {
    state: Arc<EndpointState>,
    config: EndpointConfig,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(engine: Arc<dyn QueryEngine>, config: EndpointConfig) -> Self {
        let state = Arc::new(EndpointState::new(engine, config.streaming.clone()));
        Self { state, config }
    }

    /// The application router, without a listener
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/sparql", any(sparql_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(middleware::from_fn(log_requests))
            .with_state(Arc::clone(&self.state));

        if self.config.cors {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind the configured address
    pub async fn bind(&self) -> std::io::Result<BoundServer> {
        let addr = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        Ok(BoundServer {
            listener,
            router: self.router(),
        })
    }

    /// Start the HTTP server and run until Ctrl-C
    pub async fn start(&self) -> std::io::Result<()> {
        let server = self.bind().await?;
        info!("SPARQL endpoint available at http://{}/sparql", server.local_addr()?);
        server
            .serve_with_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutting down");
            })
            .await
    }
}

/// A listener with its router, ready to serve
pub struct BoundServer {
    listener: TcpListener,
    router: Router,
}

impl BoundServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await
    }
}
