//! Per-user scoped filesystem for the WebDAV engine.
//!
//! [`ScopedFs`] implements the engine's [`DavFileSystem`] capability set on
//! top of [`LocalFs`]. Every call first resolves the protocol path against
//! the user's [`ScopeRoot`]; rejected paths surface as "not found", and the
//! root itself can never be removed, renamed, or overwritten. Successful
//! mutations are reported to the injected [`AuditSink`].

use std::fmt;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use dav_server::localfs::LocalFs;
use tracing::debug;

use crate::audit::{AuditOp, AuditRecord, AuditSink};
use crate::error::{Result, VfsError};
use crate::path::{slash_clean, ScopeRoot};

tokio::task_local! {
    static COALESCE_REMOVALS: ();
}

/// Run `fut` with per-member removal records suppressed.
pub async fn coalesce_removals<F: Future>(fut: F) -> F::Output {
    COALESCE_REMOVALS.scope((), fut).await
}

fn removals_coalesced() -> bool {
    COALESCE_REMOVALS.try_with(|_| ()).is_ok()
}

/// A user's view of the real filesystem, confined to one directory.
#[derive(Clone)]
pub struct ScopedFs {
    root: ScopeRoot,
    user: String,
    inner: LocalFs,
    audit: Arc<dyn AuditSink>,
}

impl ScopedFs {
    /// Create a filesystem rooted at `root`, acting on behalf of `user`.
    pub fn new<P: AsRef<Path>>(root: P, user: impl Into<String>, audit: Arc<dyn AuditSink>) -> Self {
        let root = ScopeRoot::new(root);
        let inner = *LocalFs::new(root.path(), true, false, false);
        Self {
            root,
            user: user.into(),
            inner,
            audit,
        }
    }

    /// The directory this filesystem is confined to.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// The username recorded in audit records.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Stat a protocol path (percent-decoded bytes).
    ///
    /// Rejected paths report [`io::ErrorKind::NotFound`].
    pub async fn stat(&self, name: &[u8]) -> io::Result<std::fs::Metadata> {
        let resolved = self.resolve(name)?;
        tokio::fs::metadata(resolved).await
    }

    /// Record one removal of `name` (percent-decoded protocol path).
    ///
    /// Used after a request run under [`coalesce_removals`] succeeded.
    pub fn record_removal(&self, name: &[u8]) {
        self.audit(AuditOp::Remove, name, None);
    }

    fn resolve(&self, name: &[u8]) -> Result<PathBuf> {
        self.root.resolve(name).inspect_err(|e| {
            debug!("{}: {}", self.user, e);
        })
    }

    /// Resolve a path that must not be the virtual root.
    fn resolve_below_root(&self, name: &[u8]) -> Result<PathBuf> {
        let resolved = self.resolve(name)?;
        if self.root.is_root(&resolved) {
            debug!("{}: refusing to touch virtual root {:?}", self.user, resolved);
            return Err(VfsError::RootProtected(resolved));
        }
        Ok(resolved)
    }

    fn audit(&self, op: AuditOp, path: &[u8], destination: Option<&[u8]>) {
        let mut record = AuditRecord::new(op, display_path(path), self.user.as_str());
        if let Some(dest) = destination {
            record = record.with_destination(display_path(dest));
        }
        self.audit.record(&record);
    }
}

impl fmt::Debug for ScopedFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedFs")
            .field("root", &self.root)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

fn display_path(name: &[u8]) -> String {
    slash_clean(&String::from_utf8_lossy(name))
}

fn is_write(options: &OpenOptions) -> bool {
    options.write || options.append || options.truncate || options.create || options.create_new
}

/// A file opened for writing. Records one `write` on the first successful
/// flush, or on drop when the open created the file and nothing was written
/// (a lock-null resource).
struct AuditedFile {
    inner: Box<dyn DavFile>,
    fs: ScopedFs,
    path: Vec<u8>,
    created: bool,
    wrote: bool,
    recorded: bool,
}

impl AuditedFile {
    fn record(&mut self) {
        if !self.recorded {
            self.recorded = true;
            self.fs.audit(AuditOp::Write, &self.path, None);
        }
    }
}

impl fmt::Debug for AuditedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditedFile")
            .field("path", &display_path(&self.path))
            .field("created", &self.created)
            .field("wrote", &self.wrote)
            .field("recorded", &self.recorded)
            .finish_non_exhaustive()
    }
}

impl DavFile for AuditedFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        self.inner.metadata()
    }

    fn write_buf(&mut self, buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        self.wrote = true;
        self.inner.write_buf(buf)
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        self.wrote = true;
        self.inner.write_bytes(buf)
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        self.inner.read_bytes(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        self.inner.seek(pos)
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            self.inner.flush().await?;
            self.record();
            Ok(())
        })
    }

    fn redirect_url(&mut self) -> FsFuture<'_, Option<String>> {
        self.inner.redirect_url()
    }
}

impl Drop for AuditedFile {
    fn drop(&mut self) {
        if self.created && !self.wrote {
            self.record();
        }
    }
}

impl DavFileSystem for ScopedFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let resolved = self.resolve(path.as_bytes())?;
            if !is_write(&options) {
                return self.inner.open(path, options).await;
            }

            let creates = options.create || options.create_new;
            let existed = tokio::fs::symlink_metadata(&resolved).await.is_ok();
            let file = self.inner.open(path, options).await?;
            Ok(Box::new(AuditedFile {
                inner: file,
                fs: self.clone(),
                path: path.as_bytes().to_vec(),
                created: creates && !existed,
                wrote: false,
                recorded: false,
            }) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            self.resolve(path.as_bytes())?;
            self.inner.read_dir(path, meta).await
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            self.resolve(path.as_bytes())?;
            self.inner.metadata(path).await
        })
    }

    fn symlink_metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            self.resolve(path.as_bytes())?;
            self.inner.symlink_metadata(path).await
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.resolve(path.as_bytes())?;
            self.inner.create_dir(path).await?;
            self.audit(AuditOp::Mkdir, path.as_bytes(), None);
            Ok(())
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.resolve_below_root(path.as_bytes())?;
            self.inner.remove_dir(path).await?;
            if !removals_coalesced() {
                self.audit(AuditOp::Remove, path.as_bytes(), None);
            }
            Ok(())
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.resolve_below_root(path.as_bytes())?;
            self.inner.remove_file(path).await?;
            if !removals_coalesced() {
                self.audit(AuditOp::Remove, path.as_bytes(), None);
            }
            Ok(())
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.resolve_below_root(from.as_bytes())?;
            self.resolve_below_root(to.as_bytes())?;
            self.inner.rename(from, to).await?;
            self.audit(AuditOp::Rename, from.as_bytes(), Some(to.as_bytes()));
            Ok(())
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.resolve(from.as_bytes())?;
            self.resolve_below_root(to.as_bytes())?;
            self.inner.copy(from, to).await?;
            self.audit(AuditOp::Copy, from.as_bytes(), Some(to.as_bytes()));
            Ok(())
        })
    }
}
