//! HTTP server lifecycle.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::routes::create_router;
use crate::shutdown::shutdown_signal;
use crate::state::AppState;

/// The auditor HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server over prepared state
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.state.config.server.bind_address();
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| ServerError::Address(address.clone()))?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Bind, serve, and stop on SIGINT/SIGTERM
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            shutdown_signal().await;
        })
        .await
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight
    /// requests for at most the configured shutdown timeout.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let drain_timeout: Duration = self.state.config.server.shutdown_timeout;
        let local_addr = listener.local_addr()?;
        let app = create_router(self.state);

        let stop = Arc::new(Notify::new());
        let graceful = {
            let stop = Arc::clone(&stop);
            async move { stop.notified().await }
        };

        let mut server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(graceful)
                .into_future(),
        );
        info!(address = %local_addr, "AI Cost Auditor listening");

        tokio::select! {
            joined = &mut server => return finish(joined),
            () = shutdown => {}
        }

        info!(timeout = ?drain_timeout, "Draining in-flight requests");
        stop.notify_one();

        match tokio::time::timeout(drain_timeout, &mut server).await {
            Ok(joined) => finish(joined)?,
            Err(_) => {
                warn!("Drain timeout elapsed; aborting remaining connections");
                server.abort();
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

fn finish(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(ServerError::Io(std::io::Error::other(e))),
    }
}
