//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Every table operation is answered under one lock, so the "at most one
//! exclusive lock covers a resource" rule holds no matter how many
//! requests race.
//!
//! Included is [`MemLs`](memls::MemLs), an ephemeral in-memory locksystem
//! that also keeps the [`LockedResource`](session::LockedResource) session
//! for every exclusively locked file.
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use xmltree::Element;

use crate::errors::LockError;
use crate::fs::DavResource;
use crate::locktoken::{scope_str, LockDepth, LockTimeout};

pub mod memls;
pub mod session;

use self::session::LockedResource;

/// Future returned by the lock system methods.
pub type LsFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

bitflags! {
    /// Lock types a resource accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockSupport: u32 {
        const EXCLUSIVE = 0x01;
        const SHARED = 0x02;
    }
}

/// The authenticated user a lock belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Principal {
        Principal(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a client asks for when it locks a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct LockInfo {
    pub exclusive: bool,
    /// The `<D:owner>` element from the request, passed through untouched.
    pub owner: Option<Element>,
    pub depth: LockDepth,
    pub timeout: LockTimeout,
}

impl LockInfo {
    pub fn exclusive() -> LockInfo {
        LockInfo {
            exclusive: true,
            owner: None,
            depth: LockDepth::ResourceOnly,
            timeout: LockTimeout::Unspecified,
        }
    }

    pub fn shared() -> LockInfo {
        LockInfo {
            exclusive: false,
            ..LockInfo::exclusive()
        }
    }

    pub fn depth(self, depth: LockDepth) -> Self {
        let mut this = self;
        this.depth = depth;
        this
    }

    pub fn timeout(self, timeout: LockTimeout) -> Self {
        let mut this = self;
        this.timeout = timeout;
        this
    }

    pub fn owner(self, owner: Element) -> Self {
        let mut this = self;
        this.owner = Some(owner);
        this
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "scope: {}; depth: {}; timeout: {}",
            scope_str(self.exclusive),
            self.depth,
            match self.timeout {
                LockTimeout::Unspecified => "default".to_string(),
                t => t.to_string(),
            }
        )
    }
}

/// A granted lock.
#[derive(Debug, Clone, PartialEq)]
pub struct DavLock {
    /// `opaquelocktoken:<uuid>`
    pub token: String,
    pub principal: Option<Principal>,
    /// Canonical path of the locked resource.
    pub resource: String,
    /// The lock parameters, with the timeout as it was resolved.
    pub info: LockInfo,
}

impl DavLock {
    /// Does this lock cover `path`?
    ///
    /// Yes if it is the locked resource itself, or, for an infinite-depth
    /// lock, anything below it. "Below" means the path continues with a
    /// `/` right after the lock path: `/share/foo` covers `/share/foo/bar`
    /// but never `/share/foobar`.
    pub fn covers(&self, path: &str) -> bool {
        covers(&self.resource, self.info.depth == LockDepth::Infinite, path)
    }

    /// Is this lock held by `principal`?
    pub fn is_owned_by(&self, principal: Option<&Principal>) -> bool {
        match (&self.principal, principal) {
            (Some(a), Some(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

impl fmt::Display for DavLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} on {} ({})", self.token, self.resource, self.info)
    }
}

pub(crate) fn covers(lock_path: &str, infinite: bool, path: &str) -> bool {
    if path == lock_path {
        return true;
    }
    if !infinite {
        return false;
    }
    match path.strip_prefix(lock_path) {
        Some(rest) => lock_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// What a write-performing handler should operate on.
#[derive(Debug, Clone)]
pub enum ResourceHandle {
    /// The resource as the filesystem handed it out.
    Resource(Arc<dyn DavResource>),
    /// The session that holds the resource open for its exclusive lock.
    Locked(Arc<LockedResource>),
}

impl ResourceHandle {
    pub fn resource(&self) -> Arc<dyn DavResource> {
        match self {
            ResourceHandle::Resource(r) => r.clone(),
            ResourceHandle::Locked(s) => s.clone(),
        }
    }

    pub fn is_locked_session(&self) -> bool {
        matches!(self, ResourceHandle::Locked(_))
    }
}

/// Lock system configuration.
#[derive(Debug, Clone)]
pub struct LsConfig {
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) maximum_timeout: Option<Duration>,
    pub(crate) shared_locks: bool,
    pub(crate) transport_timeout: Duration,
}

impl Default for LsConfig {
    fn default() -> LsConfig {
        LsConfig {
            default_timeout: None,
            maximum_timeout: None,
            shared_locks: true,
            transport_timeout: Duration::from_secs(300),
        }
    }
}

impl LsConfig {
    pub fn new() -> LsConfig {
        LsConfig::default()
    }

    /// Timeout for lock requests that do not ask for one. `None` means infinite.
    pub fn default_timeout(self, timeout: Option<Duration>) -> Self {
        let mut this = self;
        this.default_timeout = timeout;
        this
    }

    /// Upper bound for any lock timeout. `None` means unbounded.
    pub fn maximum_timeout(self, timeout: Option<Duration>) -> Self {
        let mut this = self;
        this.maximum_timeout = timeout;
        this
    }

    /// Accept shared locks (default `true`).
    pub fn shared_locks(self, shared: bool) -> Self {
        let mut this = self;
        this.shared_locks = shared;
        this
    }

    /// Idle timeout of the backend transport. Lock sessions refresh their
    /// handle well within it.
    pub fn transport_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.transport_timeout = timeout;
        this
    }

    /// Turn a requested timeout into the one that is stored and scheduled.
    /// `None` is an infinite lock.
    pub fn resolve_timeout(&self, requested: LockTimeout) -> Option<Duration> {
        let wanted = match requested {
            LockTimeout::Unspecified => self.default_timeout,
            LockTimeout::Finite(d) if d.is_zero() => self.default_timeout,
            LockTimeout::Finite(d) => Some(d),
            LockTimeout::Infinite => None,
        };
        match (wanted, self.maximum_timeout) {
            (None, max) => max,
            (Some(d), Some(max)) => Some(d.min(max)),
            (Some(d), None) => Some(d),
        }
    }

    pub fn lock_support(&self) -> LockSupport {
        if self.shared_locks {
            LockSupport::EXCLUSIVE | LockSupport::SHARED
        } else {
            LockSupport::EXCLUSIVE
        }
    }
}

/// The trait that defines a locksystem.
pub trait DavLockManager: Debug + Send + Sync {
    /// Lock types `resource` accepts.
    fn lock_support(&self, resource: &dyn DavResource) -> LockSupport;

    /// Does the lock `token` exist and cover `resource`?
    fn is_locked<'a>(&'a self, resource: &'a dyn DavResource, token: &'a str) -> LsFuture<'a, bool>;

    /// All locks covering `resource`.
    fn active_locks<'a>(&'a self, resource: &'a dyn DavResource) -> LsFuture<'a, Vec<DavLock>>;

    /// The lock session for `resource` if `principal` holds its exclusive
    /// lock, otherwise `resource` itself.
    fn locked_resource<'a>(
        &'a self,
        resource: Arc<dyn DavResource>,
        principal: Option<&'a Principal>,
    ) -> LsFuture<'a, ResourceHandle>;

    /// Grant a new lock.
    fn lock<'a>(
        &'a self,
        resource: Arc<dyn DavResource>,
        principal: Option<&'a Principal>,
        info: LockInfo,
    ) -> LsFuture<'a, Result<DavLock, LockError>>;

    /// Refresh the locks on `resource` named by `tokens`. All or nothing.
    fn refresh<'a>(
        &'a self,
        resource: &'a dyn DavResource,
        principal: Option<&'a Principal>,
        tokens: &'a [String],
        timeout: LockTimeout,
    ) -> LsFuture<'a, Result<Vec<DavLock>, LockError>>;

    /// Remove the lock `token`, which must cover `resource`.
    fn unlock<'a>(
        &'a self,
        resource: &'a dyn DavResource,
        principal: Option<&'a Principal>,
        token: &'a str,
    ) -> LsFuture<'a, Result<(), LockError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_on(path: &str, depth: LockDepth) -> DavLock {
        DavLock {
            token: "opaquelocktoken:t".to_string(),
            principal: Some(Principal::new("alice")),
            resource: path.to_string(),
            info: LockInfo::exclusive().depth(depth),
        }
    }

    #[test]
    fn coverage_boundary() {
        let l = lock_on("/share/foo", LockDepth::ResourceOnly);
        assert!(l.covers("/share/foo"));
        assert!(!l.covers("/share/foo/bar"));
        assert!(!l.covers("/share/foobar"));

        let l = lock_on("/share/foo", LockDepth::Infinite);
        assert!(l.covers("/share/foo"));
        assert!(l.covers("/share/foo/bar"));
        assert!(l.covers("/share/foo/bar/baz"));
        assert!(!l.covers("/share/foobar"));
        assert!(!l.covers("/share"));

        let l = lock_on("/", LockDepth::Infinite);
        assert!(l.covers("/anything"));
        assert!(covers("/share/", true, "/share/x"));
    }

    #[test]
    fn ownership() {
        let l = lock_on("/a", LockDepth::ResourceOnly);
        assert!(l.is_owned_by(Some(&Principal::new("alice"))));
        assert!(!l.is_owned_by(Some(&Principal::new("bob"))));
        assert!(!l.is_owned_by(None));
    }

    #[test]
    fn timeout_resolution() {
        let cfg = LsConfig::new()
            .default_timeout(Some(Duration::from_millis(60000)))
            .maximum_timeout(Some(Duration::from_millis(120000)));
        assert_eq!(
            cfg.resolve_timeout(LockTimeout::Unspecified),
            Some(Duration::from_millis(60000))
        );
        assert_eq!(
            cfg.resolve_timeout(LockTimeout::Infinite),
            Some(Duration::from_millis(120000))
        );
        assert_eq!(
            cfg.resolve_timeout(LockTimeout::Finite(Duration::from_millis(300000))),
            Some(Duration::from_millis(120000))
        );
        assert_eq!(
            cfg.resolve_timeout(LockTimeout::Finite(Duration::from_millis(90000))),
            Some(Duration::from_millis(90000))
        );
        assert_eq!(
            cfg.resolve_timeout(LockTimeout::Finite(Duration::ZERO)),
            Some(Duration::from_millis(60000))
        );

        let unbounded = LsConfig::new();
        assert_eq!(unbounded.resolve_timeout(LockTimeout::Infinite), None);
        assert_eq!(unbounded.resolve_timeout(LockTimeout::Unspecified), None);
    }

    #[test]
    fn lock_support_mask() {
        assert!(LsConfig::new().lock_support().contains(LockSupport::SHARED));
        assert_eq!(
            LsConfig::new().shared_locks(false).lock_support(),
            LockSupport::EXCLUSIVE
        );
    }

    #[test]
    fn lockinfo_display() {
        let info = LockInfo::exclusive()
            .depth(LockDepth::Infinite)
            .timeout(LockTimeout::Finite(Duration::from_secs(60)));
        assert_eq!(info.to_string(), "scope: exclusive; depth: infinity; timeout: Second-60");
        assert_eq!(
            LockInfo::shared().to_string(),
            "scope: shared; depth: 0; timeout: default"
        );
    }
}
