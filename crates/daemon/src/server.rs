//! HTTP server wiring.
//!
//! [`DavServer`] builds the user registry and credential table from the
//! configuration, assembles the router (authorization gate in front of the
//! dispatcher), and serves until its shutdown token is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware::from_fn_with_state;
use axum::Router;
use davgate_vfs::{AuditSink, FileAuditSink, TracingAuditSink};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{require_basic_auth, AuthGate};
use crate::config::Config;
use crate::dispatcher::{self, Dispatcher};
use crate::users::{Credentials, UserRegistry};

/// Assemble the WebDAV router: every request passes the gate, then the
/// dispatcher.
pub fn build_router(credentials: Credentials, registry: Arc<UserRegistry>, realm: &str) -> Router {
    let gate = Arc::new(AuthGate::new(credentials, realm));
    let dispatcher = Dispatcher::new(registry);

    Router::new()
        .fallback(dispatcher::handle)
        .layer(from_fn_with_state(gate, require_basic_auth))
        .with_state(dispatcher)
}

/// The configured WebDAV server.
pub struct DavServer {
    config: Config,
    credentials: Credentials,
    registry: Arc<UserRegistry>,
    shutdown_token: CancellationToken,
}

impl DavServer {
    /// Build the server, auditing to `audit_log` when configured and to the
    /// log otherwise.
    pub fn new(config: Config) -> Result<Self> {
        let audit: Arc<dyn AuditSink> = match &config.audit_log {
            Some(path) => {
                let sink = FileAuditSink::open(path)
                    .with_context(|| format!("Failed to open audit log: {}", path.display()))?;
                info!("Writing audit records to {:?}", path);
                Arc::new(sink)
            }
            None => Arc::new(TracingAuditSink),
        };
        Ok(Self::with_audit_sink(config, audit))
    }

    /// Build the server with an explicit audit sink.
    pub fn with_audit_sink(config: Config, audit: Arc<dyn AuditSink>) -> Self {
        let credentials = Credentials::from_config(&config);
        let registry = Arc::new(UserRegistry::from_config(&config, audit));

        let roots = std::iter::once(registry.default_identity()).chain(registry.identities());
        for identity in roots {
            debug!(
                "user {}: root {:?}, modify {}",
                identity.name(),
                identity.root(),
                identity.can_modify()
            );
            if !identity.root().is_dir() {
                warn!(
                    "user {}: root {:?} is not an existing directory",
                    identity.name(),
                    identity.root()
                );
            }
        }

        Self {
            config,
            credentials,
            registry,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<UserRegistry> {
        &self.registry
    }

    /// A fresh router over this server's users.
    pub fn router(&self) -> Router {
        build_router(
            self.credentials.clone(),
            Arc::clone(&self.registry),
            &self.config.realm,
        )
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.listen_addr();
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))
    }

    /// Serve on `listener` until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let token = self.shutdown_token.clone();
        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("HTTP server failed")?;

        info!("Server stopped");
        Ok(())
    }

    /// Bind, log the bound address, and serve.
    pub async fn run(&self) -> Result<SocketAddr> {
        let listener = self.bind().await?;
        let addr = listener.local_addr().context("Failed to read bound address")?;
        info!("Listening on {}", addr);

        self.serve(listener).await?;
        Ok(addr)
    }

    /// Token that stops [`serve`](Self::serve) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        info!("Shutting down...");
        self.shutdown_token.cancel();
    }
}
