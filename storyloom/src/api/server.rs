//! API server setup and configuration.

use axum::Router;
use axum::extract::Request;
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, MakeSpan, OnResponse, TraceLayer,
};
use tracing::{Level, Span};

use crate::api::routes;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::pipeline::GenerationManager;
use crate::storage::reclaimer::OrphanReclaimer;

/// URL prefix under which locally stored media is served.
pub const MEDIA_MOUNT: &str = "/media";

const HEALTH_PATH: &str = "/api/health";

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Local storage root served under `/media`, if any.
    pub media_dir: Option<PathBuf>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            media_dir: None,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub manager: Arc<GenerationManager>,
    pub reclaimer: Arc<OrphanReclaimer>,
    /// Runtime log filter, absent when logging was not installed by us.
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(manager: Arc<GenerationManager>, reclaimer: Arc<OrphanReclaimer>) -> Self {
        Self {
            start_time: Instant::now(),
            manager,
            reclaimer,
            logging_config: None,
        }
    }

    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

type HttpTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    fn(&Request) -> Span,
    DefaultOnRequest,
    fn(&Response, Duration, &Span),
>;

/// Request tracing at INFO, with health checks left out entirely.
fn http_trace_layer() -> HttpTraceLayer {
    fn make_span(req: &Request) -> Span {
        // No spans for health checks.
        if req.uri().path().starts_with(HEALTH_PATH) {
            return Span::none();
        }
        DefaultMakeSpan::new().level(Level::INFO).make_span(req)
    }

    fn on_response(res: &Response, latency: Duration, span: &Span) {
        if span.is_disabled() {
            return;
        }
        DefaultOnResponse::new()
            .level(Level::INFO)
            .on_response(res, latency, span);
    }

    TraceLayer::new_for_http()
        .make_span_with(make_span as fn(&Request) -> Span)
        .on_response(on_response as fn(&Response, Duration, &Span))
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if let Some(dir) = &self.config.media_dir {
            router = router.nest_service(MEDIA_MOUNT, ServeDir::new(dir));
        }

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(http_trace_layer())
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }
}
