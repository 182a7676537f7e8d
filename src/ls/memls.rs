//! Simple in-memory locksystem.
//!
//! This implementation has state: the lock table, the expiry timers and
//! the lock sessions. If you create multiple handlers that share a
//! backend, they must share one `MemLs` too, otherwise locks taken
//! through one are invisible to the other.
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::errors::LockError;
use crate::fs::{DavResource, FsError};
use crate::locktoken::{new_token, LockDepth, LockTimeout};
use crate::ls::session::LockedResource;
use crate::ls::*;
use crate::scheduler::{Scheduler, TaskFuture, TaskHandle};

/// Ephemeral in-memory locksystem.
#[derive(Debug, Clone)]
pub struct MemLs {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: LsConfig,
    scheduler: Arc<dyn Scheduler>,
    table: tokio::sync::Mutex<LockTable>,
}

#[derive(Debug, Default)]
struct LockTable {
    // token -> lock
    locks: HashMap<String, Entry>,
    // canonical path -> session of the exclusive lock on it
    sessions: HashMap<String, SessionSlot>,
}

#[derive(Debug)]
struct Entry {
    lock: DavLock,
    timer: Option<TaskHandle>,
}

#[derive(Debug)]
struct SessionSlot {
    token: String,
    session: Arc<LockedResource>,
}

impl LockTable {
    fn active(&self, path: &str) -> impl Iterator<Item = &DavLock> + '_ {
        let path = path.to_string();
        self.locks
            .values()
            .map(|e| &e.lock)
            .filter(move |l| l.covers(&path))
    }

    // Remove a lock together with its session, if it has one.
    fn remove(&mut self, token: &str) -> Option<(Entry, Option<Arc<LockedResource>>)> {
        let entry = self.locks.remove(token)?;
        let owns_session = self
            .sessions
            .get(&entry.lock.resource)
            .map(|s| s.token == token)
            .unwrap_or(false);
        let session = if owns_session {
            self.sessions.remove(&entry.lock.resource).map(|s| s.session)
        } else {
            None
        };
        Some((entry, session))
    }
}

impl MemLs {
    /// Create a new lock system. Expiry timers and session keep-alives run
    /// on `scheduler`.
    pub fn new(config: LsConfig, scheduler: Arc<dyn Scheduler>) -> Arc<MemLs> {
        Arc::new(MemLs {
            inner: Arc::new(Inner {
                config,
                scheduler,
                table: tokio::sync::Mutex::new(LockTable::default()),
            }),
        })
    }

    pub fn config(&self) -> &LsConfig {
        &self.inner.config
    }

    fn schedule_expiry(&self, timeout: Duration, token: &str) -> TaskHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let token = token.to_string();
        self.inner.scheduler.schedule(
            timeout,
            Box::new(move || -> TaskFuture {
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.expire(&token).await;
                    }
                })
            }),
        )
    }

    async fn do_lock(
        &self,
        resource: Arc<dyn DavResource>,
        principal: Option<&Principal>,
        info: LockInfo,
    ) -> Result<DavLock, LockError> {
        let path = resource.canonical_path();
        if !info.exclusive && !self.inner.config.shared_locks {
            debug!("lock {}: shared locks are not supported", path);
            return Err(LockError::BadRequest);
        }

        let mut table = self.inner.table.lock().await;

        // An exclusive request conflicts with any lock covering the resource,
        // a shared one only with exclusive locks. An infinite-depth request
        // also covers, and so conflicts with, locks further down.
        let infinite = info.depth == LockDepth::Infinite;
        let conflict = table.locks.values().map(|e| &e.lock).find(|l| {
            (info.exclusive || l.info.exclusive)
                && (l.covers(&path) || covers(&path, infinite, &l.resource))
        });
        if let Some(l) = conflict {
            debug!("lock {} ({}) refused: conflicts with {}", path, info, l);
            return Err(LockError::Locked);
        }

        // locking an unmapped url creates an empty resource.
        let is_file = match resource.metadata().await {
            Ok(meta) => meta.is_file(),
            Err(FsError::NotFound) => {
                debug!("lock {}: creating lock-null resource", path);
                match resource.create().await {
                    Ok(()) | Err(FsError::Exists) => true,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let session = if info.exclusive && is_file {
            let sched = &*self.inner.scheduler;
            match LockedResource::acquire(resource.clone(), sched, self.inner.config.transport_timeout).await {
                Ok(s) => Some(s),
                Err(FsError::Locked) => {
                    debug!("lock {}: resource appears to be locked externally", path);
                    return Err(LockError::Locked);
                }
                Err(e) => {
                    warn!("lock {}: cannot open lock session: {}", path, e);
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let timeout = self.inner.config.resolve_timeout(info.timeout);
        let lock = DavLock {
            token: new_token(),
            principal: principal.cloned(),
            resource: path.clone(),
            info: LockInfo {
                timeout: timeout.into(),
                ..info
            },
        };
        let timer = timeout.map(|d| self.schedule_expiry(d, &lock.token));

        if let Some(session) = session {
            table.sessions.insert(
                path,
                SessionSlot {
                    token: lock.token.clone(),
                    session,
                },
            );
        }
        table.locks.insert(
            lock.token.clone(),
            Entry {
                lock: lock.clone(),
                timer,
            },
        );
        debug!("lock granted: {}", lock);
        Ok(lock)
    }

    async fn do_refresh(
        &self,
        resource: &dyn DavResource,
        tokens: &[String],
        timeout: LockTimeout,
    ) -> Result<Vec<DavLock>, LockError> {
        let path = resource.canonical_path();
        let mut table = self.inner.table.lock().await;

        let active: Vec<String> = table.active(&path).map(|l| l.token.clone()).collect();
        if active.is_empty() {
            debug!("refresh {}: no active locks", path);
            return Err(LockError::PreconditionFailed);
        }
        if let Some(t) = tokens.iter().find(|t| !active.contains(t)) {
            debug!("refresh {}: {} is not an active lock", path, t);
            return Err(LockError::PreconditionFailed);
        }

        let resolved = self.inner.config.resolve_timeout(timeout);
        let mut refreshed: Vec<DavLock> = Vec::new();
        for token in tokens {
            if refreshed.iter().any(|l| &l.token == token) {
                continue;
            }
            let timer = resolved.map(|d| self.schedule_expiry(d, token));
            if let Some(entry) = table.locks.get_mut(token) {
                if let Some(old) = std::mem::replace(&mut entry.timer, timer) {
                    old.cancel();
                }
                entry.lock.info.timeout = resolved.into();
                debug!("lock refreshed: {}", entry.lock);
                refreshed.push(entry.lock.clone());
            }
        }
        Ok(refreshed)
    }

    async fn do_unlock(&self, resource: &dyn DavResource, token: &str) -> Result<(), LockError> {
        let path = resource.canonical_path();
        let mut table = self.inner.table.lock().await;
        let covered = table
            .locks
            .get(token)
            .map(|e| e.lock.covers(&path))
            .unwrap_or(false);
        if !covered {
            debug!("unlock {}: {} does not cover it", path, token);
            return Err(LockError::PreconditionFailed);
        }
        let removed = table.remove(token);
        drop(table);

        if let Some((entry, session)) = removed {
            debug!("lock released: {}", entry.lock);
            if let Some(timer) = entry.timer {
                timer.cancel();
            }
            if let Some(session) = session {
                session.release().await;
            }
        }
        Ok(())
    }
}

impl Inner {
    // Timer callback. A lock that is gone, or whose timer was replaced by
    // a refresh after this one fired, is left alone.
    async fn expire(&self, token: &str) {
        let mut table = self.table.lock().await;
        let current = table
            .locks
            .get(token)
            .and_then(|e| e.timer.as_ref())
            .map(|t| t.has_fired())
            .unwrap_or(false);
        if !current {
            trace!("expire {}: already gone", token);
            return;
        }
        let removed = table.remove(token);
        drop(table);

        if let Some((entry, session)) = removed {
            debug!("lock expired: {}", entry.lock);
            if let Some(session) = session {
                session.release().await;
            }
        }
    }
}

impl DavLockManager for MemLs {
    fn lock_support(&self, _resource: &dyn DavResource) -> LockSupport {
        self.inner.config.lock_support()
    }

    fn is_locked<'a>(&'a self, resource: &'a dyn DavResource, token: &'a str) -> LsFuture<'a, bool> {
        Box::pin(async move {
            let path = resource.canonical_path();
            let table = self.inner.table.lock().await;
            table
                .locks
                .get(token)
                .map(|e| e.lock.covers(&path))
                .unwrap_or(false)
        })
    }

    fn active_locks<'a>(&'a self, resource: &'a dyn DavResource) -> LsFuture<'a, Vec<DavLock>> {
        Box::pin(async move {
            let path = resource.canonical_path();
            let table = self.inner.table.lock().await;
            table.active(&path).cloned().collect()
        })
    }

    fn locked_resource<'a>(
        &'a self,
        resource: Arc<dyn DavResource>,
        principal: Option<&'a Principal>,
    ) -> LsFuture<'a, ResourceHandle> {
        Box::pin(async move {
            let path = resource.canonical_path();
            let table = self.inner.table.lock().await;
            let slot = match table.sessions.get(&path) {
                Some(slot) => slot,
                None => return ResourceHandle::Resource(resource),
            };
            let owned = table
                .locks
                .get(&slot.token)
                .map(|e| e.lock.is_owned_by(principal))
                .unwrap_or(false);
            if owned {
                ResourceHandle::Locked(slot.session.clone())
            } else {
                debug!(
                    "locked_resource {}: {:?} does not hold {}",
                    path,
                    principal.map(|p| p.name()),
                    slot.token
                );
                ResourceHandle::Resource(resource)
            }
        })
    }

    fn lock<'a>(
        &'a self,
        resource: Arc<dyn DavResource>,
        principal: Option<&'a Principal>,
        info: LockInfo,
    ) -> LsFuture<'a, Result<DavLock, LockError>> {
        Box::pin(self.do_lock(resource, principal, info))
    }

    fn refresh<'a>(
        &'a self,
        resource: &'a dyn DavResource,
        _principal: Option<&'a Principal>,
        tokens: &'a [String],
        timeout: LockTimeout,
    ) -> LsFuture<'a, Result<Vec<DavLock>, LockError>> {
        Box::pin(self.do_refresh(resource, tokens, timeout))
    }

    fn unlock<'a>(
        &'a self,
        resource: &'a dyn DavResource,
        _principal: Option<&'a Principal>,
        token: &'a str,
    ) -> LsFuture<'a, Result<(), LockError>> {
        Box::pin(self.do_unlock(resource, token))
    }
}
