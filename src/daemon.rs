//! Daemon - the exchange service
//!
//! Starts the router and the remote UI endpoint, then waits for a shutdown
//! signal or for the router to stop on its own.

use tokio::task::JoinHandle;

use crate::api::ApiServerBuilder;
use crate::router::{Router, RouterHandle};
use crate::{Config, Result};

/// The exchange daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start the router without blocking
    ///
    /// Embedders use this to attach their own device, channel and
    /// persistence handlers before driving the daemon.
    #[must_use]
    pub fn start(&self) -> (RouterHandle, JoinHandle<()>) {
        tracing::info!(
            mailbox_capacity = self.config.router.mailbox_capacity,
            group_sweep_secs = self.config.router.group_sweep_secs,
            "starting router"
        );
        Router::spawn(self.config.router.router_config())
    }

    /// Run until ctrl-c or until the router stops
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails to start
    pub async fn run(self) -> Result<()> {
        let (router, task) = self.start();
        self.serve(router, task).await
    }

    /// Serve an already started router until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails to start
    pub async fn serve(self, router: RouterHandle, mut task: JoinHandle<()>) -> Result<()> {
        let mut api_handle = if self.config.api.enabled {
            let server = ApiServerBuilder::new(router.clone(), self.config.api.addr()).build();
            Some(server.spawn())
        } else {
            tracing::info!("remote UI endpoint disabled");
            None
        };

        let mut router_running = true;
        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("shutdown requested");
                Ok(())
            }
            _ = &mut task => {
                router_running = false;
                tracing::warn!("router stopped");
                Ok(())
            }
            Some(result) = wait_api(&mut api_handle) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(crate::Error::Transport(format!("API server task failed: {e}"))),
            },
        };

        if let Some(handle) = api_handle {
            handle.abort();
        }
        if router_running && router.shutdown().await.is_ok() {
            let _ = task.await;
        }

        tracing::info!("daemon stopped");
        outcome
    }
}

async fn wait_api(
    handle: &mut Option<JoinHandle<Result<()>>>,
) -> Option<std::result::Result<Result<()>, tokio::task::JoinError>> {
    match handle {
        Some(handle) => Some(handle.await),
        None => std::future::pending().await,
    }
}
