//! HTTP API server exposing the router to remote UI processes

pub mod health;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::router::RouterHandle;

/// Shared state for API handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    pub router: RouterHandle,
}

pub struct ApiServerBuilder {
    router: RouterHandle,
    addr: SocketAddr,
    cors: bool,
}

impl ApiServerBuilder {
    #[must_use]
    pub fn new(router: RouterHandle, addr: SocketAddr) -> Self {
        Self {
            router,
            addr,
            cors: true,
        }
    }

    /// Allow cross-origin requests from browser UIs
    #[must_use]
    pub const fn cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(ApiState {
                router: self.router,
            }),
            addr: self.addr,
            cors: self.cors,
        }
    }
}

/// Remote UI endpoint
pub struct ApiServer {
    state: Arc<ApiState>,
    addr: SocketAddr,
    cors: bool,
}

impl ApiServer {
    /// Assemble the axum application
    #[must_use]
    pub fn app(&self) -> Router {
        let router = Router::new()
            .merge(websocket::router(self.state.clone()))
            .merge(health::router())
            .merge(health::status_router(self.state.clone()));

        let router = if self.cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        };

        router.layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| crate::Error::Transport(format!("failed to bind API server: {e}")))?;

        tracing::info!(addr = %self.addr, "API server listening");

        axum::serve(listener, self.app())
            .await
            .map_err(|e| crate::Error::Transport(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
