//! Palisade Server - HTTP API in front of the analysis pipeline.
//!
//! ## Endpoints
//!
//! - `POST /api/analyze` - analyze a text and return the verdict
//! - `GET /api/stats` - gate, cache, and security event counters
//! - `GET /api/events` - recent security events
//! - `GET /api/health` - liveness and configured models
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use palisade_core::config::PipelineConfig;
//! use palisade_core::model::HttpModelClient;
//! use palisade_core::pipeline::AnalysisPipeline;
//! use palisade_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = HttpModelClient::new(
//!         "https://api.example.com/v1/chat/completions",
//!         None,
//!         Duration::from_secs(12),
//!     )
//!     .unwrap();
//!     let pipeline = Arc::new(AnalysisPipeline::new(
//!         PipelineConfig::default(),
//!         Arc::new(client),
//!     ));
//!     let server = Server::new(ServerConfig::default(), pipeline).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod session;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use palisade_core::pipeline::AnalysisPipeline;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 47831;

/// Default server host (localhost only for security).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server around an existing pipeline.
    pub fn new(
        config: ServerConfig,
        pipeline: Arc<AnalysisPipeline>,
    ) -> std::result::Result<Self, ServerError> {
        Self::with_state(config, AppState::new(pipeline))
    }

    /// Creates a server with custom application state.
    pub fn with_state(
        config: ServerConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        // CORS for the browser form client.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/api/analyze", post(handlers::analyze))
            .route("/api/stats", get(handlers::get_stats))
            .route("/api/events", get(handlers::get_events))
            .route("/api/health", get(handlers::health))
            .layer(cors)
            .with_state(state);

        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self { router, addr })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until shutdown.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        info!("Starting Palisade API server on {}", self.addr);

        // Create socket with SO_REUSEADDR to allow binding even when
        // sockets are lingering.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .listen(128)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Set non-blocking for tokio.
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
