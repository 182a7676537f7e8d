//! The open handle that keeps an exclusively locked file locked.
//!
//! Backends close a file as soon as a client is done with it, which would
//! end the share-level lock along with it. A [`LockedResource`] opens the
//! file once when the lock is granted and hands out views on that one
//! handle instead. Closing a view does nothing; only [`LockedResource::release`],
//! called by the lock system when the lock goes away, really closes it.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::fs::*;
use crate::scheduler::{Scheduler, TaskFuture, TaskHandle};

/// Time left between a keep-alive and the transport's idle timeout.
const KEEPALIVE_MARGIN: Duration = Duration::from_secs(10);

type Slot = Arc<tokio::sync::Mutex<Option<Box<dyn DavFile>>>>;

/// A resource held open for the duration of an exclusive lock.
#[derive(Debug)]
pub struct LockedResource {
    resource: Arc<dyn DavResource>,
    // empty after release, or while a dropped handle waits to be re-opened.
    file: Slot,
    released: AtomicBool,
    keepalive: Mutex<Option<TaskHandle>>,
}

// A view on the session's handle, returned by `open`.
#[derive(Debug)]
struct SessionFile {
    path: String,
    file: Slot,
}

/// How often to re-open the handle for a transport with the given idle
/// timeout. `None` if the timeout leaves no room for a margin.
pub(crate) fn keepalive_period(transport_timeout: Duration) -> Option<Duration> {
    if transport_timeout < KEEPALIVE_MARGIN * 2 {
        return None;
    }
    Some(transport_timeout - KEEPALIVE_MARGIN)
}

impl LockedResource {
    /// Open `resource` (create if absent, read-write, append) and keep it
    /// open, re-opening it periodically so the transport does not drop it.
    pub async fn acquire(
        resource: Arc<dyn DavResource>,
        scheduler: &dyn Scheduler,
        transport_timeout: Duration,
    ) -> FsResult<Arc<LockedResource>> {
        let path = resource.canonical_path();
        trace!("session: open {}", path);
        let file = resource.open(OpenOptions::locked()).await?;
        let session = Arc::new(LockedResource {
            resource,
            file: Arc::new(tokio::sync::Mutex::new(Some(file))),
            released: AtomicBool::new(false),
            keepalive: Mutex::new(None),
        });

        let period = match keepalive_period(transport_timeout) {
            Some(p) => p,
            None => {
                debug!(
                    "session: transport timeout {:?} too short to keep {} alive",
                    transport_timeout, path
                );
                return Ok(session);
            }
        };
        let weak = Arc::downgrade(&session);
        let task = scheduler.schedule_repeating(
            period,
            Box::new(move || -> TaskFuture {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(session) = weak.upgrade() {
                        session.keep_alive().await;
                    }
                })
            }),
        );
        *session.keepalive.lock() = Some(task);
        Ok(session)
    }

    pub fn path(&self) -> String {
        self.resource.canonical_path()
    }

    /// Has the real close happened yet?
    pub async fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    // Ping the share through the handle we hold. Only when that fails is
    // the handle closed and opened again, so there is never a second handle.
    async fn keep_alive(&self) {
        let path = self.path();
        let mut slot = self.file.lock().await;
        if self.released.load(Ordering::Acquire) {
            return;
        }
        if let Some(file) = slot.as_mut() {
            trace!("session: keep-alive {}", path);
            match file.metadata().await {
                Ok(_) => return,
                Err(e) => warn!("session: keep-alive for {} failed: {}", path, e),
            }
        }
        if let Some(mut stale) = slot.take() {
            if let Err(e) = stale.close().await {
                debug!("session: closing stale handle on {} failed: {}", path, e);
            }
        }
        match self.resource.open(OpenOptions::locked()).await {
            Ok(file) => {
                debug!("session: re-opened {}", path);
                *slot = Some(file);
            }
            Err(e) => warn!("session: re-open of {} failed: {}", path, e),
        }
    }

    /// Close as seen by clients of the lock: nothing happens, the handle
    /// stays open until [`release`](Self::release).
    pub fn close(&self) {
        trace!("session: close of {} ignored while locked", self.path());
    }

    /// Stop the keep-alive task and close the handle for real. Calling it
    /// again is harmless. The session must not be used afterwards.
    pub async fn release(&self) {
        let task = self.keepalive.lock().take();
        if let Some(task) = task {
            task.cancel();
        }
        let mut slot = self.file.lock().await;
        self.released.store(true, Ordering::Release);
        let file = slot.take();
        drop(slot);
        if let Some(mut file) = file {
            trace!("session: release {}", self.path());
            if let Err(e) = file.close().await {
                warn!("session: closing {} failed: {}", self.path(), e);
            }
        }
    }
}

impl Drop for LockedResource {
    // A session dropped without `release` still stops its keep-alive.
    fn drop(&mut self) {
        if let Some(task) = self.keepalive.get_mut().take() {
            task.cancel();
        }
    }
}

impl DavResource for LockedResource {
    fn canonical_path(&self) -> String {
        self.resource.canonical_path()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        self.resource.metadata()
    }

    // Every open is a view on the one locked handle.
    fn open(&self, _options: OpenOptions) -> FsFuture<'_, Box<dyn DavFile>> {
        Box::pin(async move {
            if self.released.load(Ordering::Acquire) {
                return Err(FsError::GeneralFailure);
            }
            Ok(Box::new(SessionFile {
                path: self.path(),
                file: self.file.clone(),
            }) as Box<dyn DavFile>)
        })
    }

    fn create(&self) -> FsFuture<'_, ()> {
        self.resource.create()
    }

    fn delete(&self) -> FsFuture<'_, ()> {
        self.resource.delete()
    }
}

impl DavFile for SessionFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let mut slot = self.file.lock().await;
            match slot.as_mut() {
                Some(f) => f.metadata().await,
                None => Err(FsError::GeneralFailure),
            }
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let mut slot = self.file.lock().await;
            match slot.as_mut() {
                Some(f) => f.write_bytes(buf).await,
                None => Err(FsError::GeneralFailure),
            }
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let mut slot = self.file.lock().await;
            match slot.as_mut() {
                Some(f) => f.read_bytes(count).await,
                None => Err(FsError::GeneralFailure),
            }
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let mut slot = self.file.lock().await;
            match slot.as_mut() {
                Some(f) => f.seek(pos).await,
                None => Err(FsError::GeneralFailure),
            }
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let mut slot = self.file.lock().await;
            match slot.as_mut() {
                Some(f) => f.flush().await,
                None => Err(FsError::GeneralFailure),
            }
        })
    }

    fn close(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            trace!("session: close of {} ignored while locked", self.path);
            Ok(())
        })
    }
}
