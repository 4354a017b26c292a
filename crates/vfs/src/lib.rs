//! # davgate VFS
//!
//! Scoped, audited filesystem handed to the WebDAV engine for each user.
//!
//! ## Overview
//!
//! - **Path scoping**: protocol paths are cleaned lexically and joined onto a
//!   per-user root, so no request can address anything outside it
//! - **Root protection**: the virtual root can never be removed, renamed, or
//!   overwritten
//! - **Audit trail**: each successful mutation yields one [`AuditRecord`]
//!
//! ```text
//! ┌──────────────────────────────┐
//! │     dav-server DavHandler    │  PROPFIND, LOCK, PUT, ...
//! ├──────────────────────────────┤
//! │           ScopedFs           │  resolve → validate → delegate → audit
//! ├──────────────────────────────┤
//! │           LocalFs            │  real filesystem
//! └──────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dav_server::{memls::MemLs, DavHandler};
//! use davgate_vfs::{ScopedFs, TracingAuditSink};
//!
//! let fs = ScopedFs::new("/srv/data", "alice", Arc::new(TracingAuditSink));
//! let handler = DavHandler::builder()
//!     .filesystem(Box::new(fs))
//!     .locksystem(MemLs::new())
//!     .build_handler();
//! ```
//!
//! ## Modules
//!
//! - [`path`]: root-confined path resolution
//! - [`scoped`]: the `DavFileSystem` implementation
//! - [`audit`]: audit records and sinks
//! - [`error`]: error types

pub mod audit;
pub mod error;
pub mod path;
pub mod scoped;

pub use audit::{AuditOp, AuditRecord, AuditSink, FileAuditSink, MemoryAuditSink, TracingAuditSink};
pub use error::{Result, VfsError};
pub use path::{slash_clean, ScopeRoot};
pub use scoped::{coalesce_removals, ScopedFs};
