//! # davgate
//!
//! Multi-user WebDAV server. Each user is confined to a directory of their
//! own, may or may not modify it, and every change is audited.
//!
//! ## Architecture
//!
//! ```text
//! HTTP request
//!      │
//!      ▼
//! ┌──────────────────────┐
//! │  AuthGate (Basic)    │── 401 + WWW-Authenticate
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │  Dispatcher          │── 403 for read-only users
//! │  GET dir → PROPFIND  │
//! │  HEAD → empty body   │
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │  DavHandler per user │  dav-server engine + MemLs
//! ├──────────────────────┤
//! │  ScopedFs            │  root confinement + audit
//! └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use davgate::{Config, DavServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml")?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let server = DavServer::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, overrides and validation
//! - [`users`]: User identities, registry and credential table
//! - [`auth`]: Basic authorization gate
//! - [`dispatcher`]: Permission check and request rewriting
//! - [`server`]: Router assembly and listener lifecycle

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod server;
pub mod users;

pub use auth::{AuthError, AuthGate, AuthenticatedUser};
pub use config::{Config, ConfigError, ConfigFormat, UserConfig};
pub use dispatcher::Dispatcher;
pub use server::{build_router, DavServer};
pub use users::{Credentials, UserIdentity, UserRegistry};
