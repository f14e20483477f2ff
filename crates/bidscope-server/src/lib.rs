//! # Bidscope Server
//!
//! REST server for the Bidscope bid analytics engine.
//!
//! ## Features
//!
//! - Bid analytics endpoints under `/api/analytics/bids`
//! - Bid recording and status updates under `/api/bids`
//! - Health and cache statistics endpoints
//! - Configuration via TOML file
//!
//! ## Usage
//!
//! ```ignore
//! use bidscope_server::Server;
//!
//! let server = Server::new(config, engine, ledger);
//! server.start().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handlers;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use bidscope_engine::AnalyticsEngine;
use bidscope_ext_memory::InMemoryBidLedger;

pub use config::ServerConfig;

/// The Bidscope server.
pub struct Server {
    config: ServerConfig,
    engine: Arc<AnalyticsEngine>,
    ledger: Arc<InMemoryBidLedger>,
}

impl Server {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        engine: Arc<AnalyticsEngine>,
        ledger: Arc<InMemoryBidLedger>,
    ) -> Self {
        Self {
            config,
            engine,
            ledger,
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        routes::create_router(self.engine.clone(), self.ledger.clone())
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Start the server, running until `shutdown` resolves.
    pub async fn start(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        );

        info!("Starting Bidscope server on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
