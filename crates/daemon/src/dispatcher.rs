//! Per-request dispatch to the right user's WebDAV engine.
//!
//! Runs after the authorization gate. It picks the effective identity,
//! enforces the modify permission, turns GET and HEAD on a collection into
//! a PROPFIND listing, and strips HEAD bodies. A DELETE is audited once for
//! the whole request, however many members the engine removes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use davgate_vfs::{coalesce_removals, slash_clean};
use http::header::HeaderValue;
use http::{Method, StatusCode, Uri};

use crate::auth::AuthenticatedUser;
use crate::users::{UserIdentity, UserRegistry};

/// Methods that require modify permission.
const MUTATING_METHODS: &[&str] = &["PUT", "POST", "MKCOL", "DELETE", "COPY", "MOVE"];

/// Whether `method` changes the filesystem.
pub fn is_mutating(method: &Method) -> bool {
    MUTATING_METHODS.contains(&method.as_str())
}

/// Routes authenticated requests to the resolved user's handler.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<UserRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<UserRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    /// Handle one request on behalf of `username` (or the default identity).
    pub async fn dispatch(&self, username: Option<&str>, mut request: Request) -> Response {
        let user = self.registry.resolve(username);
        tracing::debug!(
            "{}: {} {}",
            user.name(),
            request.method(),
            request.uri().path()
        );

        if is_mutating(request.method()) && !user.can_modify() {
            tracing::debug!(
                "{}: {} refused, no modify permission",
                user.name(),
                request.method()
            );
            return forbidden();
        }

        // the engine removes collections member by member, so the root has
        // to be refused before it starts emptying it
        if touches_root(&request) {
            tracing::debug!(
                "{}: {} on the virtual root refused",
                user.name(),
                request.method()
            );
            return forbidden();
        }

        let method = request.method().clone();
        let path = decoded_path(&request);

        // LOCK on an unmapped URL creates an empty file
        if method.as_str() == "LOCK"
            && !user.can_modify()
            && user.fs().stat(&path).await.is_err()
        {
            tracing::debug!(
                "{}: lock-null LOCK refused, no modify permission",
                user.name()
            );
            return forbidden();
        }

        let is_retrieval = method == Method::GET || method == Method::HEAD;
        if is_retrieval && is_collection(user, &path).await {
            rewrite_to_propfind(&mut request);
        }

        let response = if method == Method::DELETE {
            let response = coalesce_removals(user.handler().handle(request)).await;
            if matches!(response.status(), StatusCode::NO_CONTENT | StatusCode::OK) {
                user.fs().record_removal(&path);
            }
            response
        } else {
            user.handler().handle(request).await
        };
        let response = response.map(Body::new);

        if method == Method::HEAD {
            let (parts, _) = response.into_parts();
            return Response::from_parts(parts, Body::empty());
        }
        response
    }
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

/// Percent-decoded request path.
fn decoded_path(request: &Request) -> Vec<u8> {
    urlencoding::decode_binary(request.uri().path().as_bytes()).into_owned()
}

fn is_root_path(path: &str) -> bool {
    let decoded = urlencoding::decode_binary(path.as_bytes());
    slash_clean(&String::from_utf8_lossy(&decoded)) == "/"
}

/// Whether the request would delete, move, or overwrite the virtual root.
fn touches_root(request: &Request) -> bool {
    let method = request.method().as_str();

    if matches!(method, "DELETE" | "MOVE") && is_root_path(request.uri().path()) {
        return true;
    }

    if matches!(method, "COPY" | "MOVE") {
        let destination = request
            .headers()
            .get("destination")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Uri>().ok());
        if let Some(destination) = destination {
            return is_root_path(destination.path());
        }
    }

    false
}

/// Whether `path` names a directory in the user's scope.
///
/// Any stat failure counts as "not a collection".
async fn is_collection(user: &UserIdentity, path: &[u8]) -> bool {
    match user.fs().stat(path).await {
        Ok(metadata) => metadata.is_dir(),
        Err(e) => {
            tracing::trace!(
                "{}: stat {:?} failed: {}",
                user.name(),
                String::from_utf8_lossy(path),
                e
            );
            false
        }
    }
}

/// Turn a GET or HEAD into a one-level PROPFIND listing.
fn rewrite_to_propfind(request: &mut Request) {
    let Ok(propfind) = Method::from_bytes(b"PROPFIND") else {
        return;
    };
    *request.method_mut() = propfind;
    request
        .headers_mut()
        .entry("depth")
        .or_insert(HeaderValue::from_static("1"));
}

/// Fallback handler wired behind the authorization gate.
pub async fn handle(State(dispatcher): State<Dispatcher>, request: Request) -> Response {
    let username = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone());
    dispatcher.dispatch(username.as_deref(), request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UserConfig};
    use davgate_vfs::{AuditSink, MemoryAuditSink};
    use tempfile::TempDir;

    fn dispatcher(root: &std::path::Path, modify: bool) -> (Dispatcher, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let config = Config {
            scope: root.to_path_buf(),
            modify,
            users: vec![UserConfig::new("writer", "pw").with_modify(true)],
            ..Config::default()
        };
        let audit: Arc<dyn AuditSink> = sink.clone();
        let registry = UserRegistry::from_config(&config, audit);
        (Dispatcher::new(Arc::new(registry)), sink)
    }

    fn request(method: &str, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_is_mutating() {
        for name in ["PUT", "POST", "MKCOL", "DELETE", "COPY", "MOVE"] {
            assert!(is_mutating(&Method::from_bytes(name.as_bytes()).unwrap()), "{}", name);
        }
        for name in ["GET", "HEAD", "OPTIONS", "PROPFIND", "PROPPATCH", "LOCK", "UNLOCK"] {
            assert!(!is_mutating(&Method::from_bytes(name.as_bytes()).unwrap()), "{}", name);
        }
    }

    #[test]
    fn test_rewrite_inserts_depth() {
        let mut req = request("GET", "/docs");
        rewrite_to_propfind(&mut req);
        assert_eq!(req.method().as_str(), "PROPFIND");
        assert_eq!(req.headers().get("depth").unwrap(), "1");
    }

    #[test]
    fn test_rewrite_keeps_existing_depth() {
        let mut req = http::Request::builder()
            .method("GET")
            .uri("/docs")
            .header("Depth", "0")
            .body(Body::empty())
            .unwrap();
        rewrite_to_propfind(&mut req);
        assert_eq!(req.headers().get("depth").unwrap(), "0");
    }

    fn with_destination(method: &str, uri: &str, destination: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .header("Destination", destination)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_touches_root() {
        assert!(touches_root(&request("DELETE", "/")));
        assert!(touches_root(&request("DELETE", "/docs/..")));
        assert!(touches_root(&request("DELETE", "//")));
        assert!(touches_root(&request("MOVE", "/")));
        assert!(touches_root(&with_destination("COPY", "/a", "http://host/")));
        assert!(touches_root(&with_destination("MOVE", "/a", "http://host/x/%2e%2e/")));

        assert!(!touches_root(&request("DELETE", "/docs")));
        assert!(!touches_root(&request("COPY", "/")));
        assert!(!touches_root(&request("GET", "/")));
        assert!(!touches_root(&with_destination("COPY", "/", "http://host/backup")));
        assert!(!touches_root(&with_destination("MOVE", "/a", "http://host/b")));
    }

    #[tokio::test]
    async fn test_delete_root_refused_before_engine() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("keep.txt"), b"x").unwrap();
        let (dispatcher, sink) = dispatcher(temp_dir.path(), true);

        let response = dispatcher.dispatch(None, request("DELETE", "/")).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(temp_dir.path().join("keep.txt").exists());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_is_collection() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("my docs")).unwrap();
        std::fs::write(temp_dir.path().join("file.txt"), b"x").unwrap();
        let (dispatcher, _) = dispatcher(temp_dir.path(), true);
        let user = dispatcher.registry().resolve(None);

        let path = |uri: &str| decoded_path(&request("GET", uri));
        assert!(is_collection(user, &path("/")).await);
        assert!(is_collection(user, &path("/my%20docs")).await);
        assert!(!is_collection(user, &path("/file.txt")).await);
        assert!(!is_collection(user, &path("/missing")).await);
        assert!(!is_collection(user, &path("/bad%00name")).await);
    }

    #[test]
    fn test_dispatch_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let temp_dir = TempDir::new().unwrap();
        let (dispatcher, _) = dispatcher(temp_dir.path(), true);
        let future = dispatcher.dispatch(None, request("GET", "/"));
        assert_send(&future);
    }

    #[tokio::test]
    async fn test_head_directory_lists_without_body() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("docs")).unwrap();
        let (dispatcher, _) = dispatcher(temp_dir.path(), true);

        let response = dispatcher.dispatch(None, request("HEAD", "/docs")).await;

        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_delete_collection_audited_once() {
        let temp_dir = TempDir::new().unwrap();
        let docs = temp_dir.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("a.txt"), b"a").unwrap();
        std::fs::write(docs.join("b.txt"), b"b").unwrap();
        let (dispatcher, sink) = dispatcher(temp_dir.path(), true);

        let response = dispatcher.dispatch(None, request("DELETE", "/docs")).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!docs.exists());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "/docs");
    }

    #[tokio::test]
    async fn test_read_only_lock_null_refused() {
        let temp_dir = TempDir::new().unwrap();
        let (dispatcher, sink) = dispatcher(temp_dir.path(), false);

        let response = dispatcher.dispatch(None, request("LOCK", "/ghost.txt")).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!temp_dir.path().join("ghost.txt").exists());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_read_only_default_refuses_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let (dispatcher, sink) = dispatcher(temp_dir.path(), false);

        let response = dispatcher.dispatch(None, request("MKCOL", "/new")).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!temp_dir.path().join("new").exists());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_named_user_overrides_default_permission() {
        let temp_dir = TempDir::new().unwrap();
        let (dispatcher, sink) = dispatcher(temp_dir.path(), false);

        let response = dispatcher
            .dispatch(Some("writer"), request("MKCOL", "/new"))
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(temp_dir.path().join("new").is_dir());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].user, "writer");
    }

    #[tokio::test]
    async fn test_get_directory_lists() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();
        let (dispatcher, _) = dispatcher(temp_dir.path(), true);

        let response = dispatcher.dispatch(None, request("GET", "/")).await;

        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    }
}
