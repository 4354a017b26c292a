//! User identities, the registry that resolves them, and the credential table.
//!
//! Both structures are built once from [`Config`] and shared read-only behind
//! `Arc` for the lifetime of the server.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dav_server::memls::MemLs;
use dav_server::DavHandler;
use davgate_vfs::{AuditSink, ScopedFs};
use subtle::ConstantTimeEq;

use crate::config::{Config, DEFAULT_USERNAME};

/// One user's root, permission, and WebDAV engine.
#[derive(Clone)]
pub struct UserIdentity {
    name: String,
    root: PathBuf,
    can_modify: bool,
    fs: ScopedFs,
    handler: DavHandler,
}

impl UserIdentity {
    /// Build an identity whose engine is bound to a [`ScopedFs`] over `root`
    /// and to a private in-memory lock registry.
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        can_modify: bool,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let name = name.into();
        let root = root.into();
        let fs = ScopedFs::new(&root, name.clone(), audit);
        let handler = DavHandler::builder()
            .filesystem(Box::new(fs.clone()))
            .locksystem(MemLs::new())
            .build_handler();

        Self {
            name,
            root,
            can_modify,
            fs,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn can_modify(&self) -> bool {
        self.can_modify
    }

    /// The scoped filesystem the engine is bound to.
    pub fn fs(&self) -> &ScopedFs {
        &self.fs
    }

    pub fn handler(&self) -> &DavHandler {
        &self.handler
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("can_modify", &self.can_modify)
            .finish_non_exhaustive()
    }
}

/// Username to identity map with a fallback default identity.
#[derive(Debug)]
pub struct UserRegistry {
    default: UserIdentity,
    users: HashMap<String, UserIdentity>,
}

impl UserRegistry {
    /// Create a registry holding only the default identity.
    pub fn new(default: UserIdentity) -> Self {
        Self {
            default,
            users: HashMap::new(),
        }
    }

    /// Add or replace a named identity.
    pub fn insert(&mut self, identity: UserIdentity) {
        self.users.insert(identity.name.clone(), identity);
    }

    /// Build the registry from configuration.
    ///
    /// Users without their own scope or modify setting inherit the top-level
    /// values, which also define the default identity.
    pub fn from_config(config: &Config, audit: Arc<dyn AuditSink>) -> Self {
        let default = UserIdentity::new(
            DEFAULT_USERNAME,
            config.scope.clone(),
            config.modify,
            audit.clone(),
        );
        let mut registry = Self::new(default);

        for user in &config.users {
            let root = user.scope.clone().unwrap_or_else(|| config.scope.clone());
            let can_modify = user.modify.unwrap_or(config.modify);
            registry.insert(UserIdentity::new(
                user.username.as_str(),
                root,
                can_modify,
                audit.clone(),
            ));
        }

        registry
    }

    /// Look up a named identity.
    pub fn get(&self, name: &str) -> Option<&UserIdentity> {
        self.users.get(name)
    }

    /// The named identity if it exists, else the default.
    pub fn resolve(&self, name: Option<&str>) -> &UserIdentity {
        name.and_then(|n| self.users.get(n))
            .unwrap_or(&self.default)
    }

    pub fn default_identity(&self) -> &UserIdentity {
        &self.default
    }

    /// Named identities, sorted by name.
    pub fn identities(&self) -> Vec<&UserIdentity> {
        let mut identities: Vec<_> = self.users.values().collect();
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        identities
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Username to secret table used by the authorization gate.
#[derive(Clone, Default)]
pub struct Credentials {
    secrets: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let mut credentials = Self::new();
        for user in &config.users {
            credentials.insert(user.username.as_str(), user.password.as_str());
        }
        credentials
    }

    pub fn insert(&mut self, username: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(username.into(), secret.into());
    }

    /// Check a credential pair.
    ///
    /// The secret comparison runs in constant time; unknown users are
    /// rejected without comparing anything.
    pub fn verify(&self, username: &str, secret: &str) -> bool {
        match self.secrets.get(username) {
            Some(expected) => bool::from(expected.as_bytes().ct_eq(secret.as_bytes())),
            None => false,
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.secrets.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.secrets.keys().collect();
        names.sort();
        f.debug_struct("Credentials").field("users", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use davgate_vfs::MemoryAuditSink;

    fn sink() -> Arc<dyn AuditSink> {
        Arc::new(MemoryAuditSink::new())
    }

    fn sample_config() -> Config {
        Config {
            scope: PathBuf::from("/srv/shared"),
            modify: false,
            users: vec![
                UserConfig::new("admin", "admin-pw")
                    .with_scope("/srv/admin")
                    .with_modify(true),
                UserConfig::new("guest", "guest-pw"),
            ],
            ..Config::default()
        }
    }

    #[test]
    fn test_registry_inherits_defaults() {
        let registry = UserRegistry::from_config(&sample_config(), sink());

        assert_eq!(registry.len(), 2);

        let admin = registry.get("admin").unwrap();
        assert_eq!(admin.root(), Path::new("/srv/admin"));
        assert!(admin.can_modify());
        assert_eq!(admin.fs().user(), "admin");

        let guest = registry.get("guest").unwrap();
        assert_eq!(guest.root(), Path::new("/srv/shared"));
        assert!(!guest.can_modify());
    }

    #[test]
    fn test_default_identity() {
        let registry = UserRegistry::from_config(&sample_config(), sink());
        let default = registry.default_identity();

        assert_eq!(default.name(), DEFAULT_USERNAME);
        assert_eq!(default.root(), Path::new("/srv/shared"));
        assert!(!default.can_modify());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let registry = UserRegistry::from_config(&sample_config(), sink());

        assert_eq!(registry.resolve(Some("admin")).name(), "admin");
        assert_eq!(registry.resolve(Some("nobody")).name(), DEFAULT_USERNAME);
        assert_eq!(registry.resolve(None).name(), DEFAULT_USERNAME);
    }

    #[test]
    fn test_identities_sorted() {
        let registry = UserRegistry::from_config(&sample_config(), sink());
        let names: Vec<_> = registry.identities().iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["admin", "guest"]);
    }

    #[test]
    fn test_insert_replaces() {
        let mut registry = UserRegistry::new(UserIdentity::new("default", "/tmp", true, sink()));
        assert!(registry.is_empty());

        registry.insert(UserIdentity::new("bob", "/a", true, sink()));
        registry.insert(UserIdentity::new("bob", "/b", false, sink()));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("bob").unwrap().root(), Path::new("/b"));
    }

    #[test]
    fn test_credentials_verify() {
        let credentials = Credentials::from_config(&sample_config());

        assert_eq!(credentials.len(), 2);
        assert!(credentials.verify("admin", "admin-pw"));
        assert!(!credentials.verify("admin", "guest-pw"));
        assert!(!credentials.verify("admin", "admin-pw "));
        assert!(!credentials.verify("admin", ""));
        assert!(!credentials.verify("nobody", "admin-pw"));
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let credentials = Credentials::from_config(&sample_config());
        let debug = format!("{:?}", credentials);

        assert!(debug.contains("admin"));
        assert!(!debug.contains("admin-pw"));
    }

    #[test]
    fn test_credentials_empty() {
        let credentials = Credentials::new();
        assert!(credentials.is_empty());
        assert!(!credentials.contains("admin"));
        assert!(!credentials.verify("", ""));
    }
}
