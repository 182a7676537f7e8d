//! ## Lock coordination for a WebDAV gateway
//!
//! A WebDAV gateway translates [`Webdav`] (RFC4918) requests into operations on a
//! session-oriented file share. The share knows nothing about WebDAV locks, so the
//! gateway keeps them itself, and for every exclusive lock on a file it holds the
//! file open on the share. That keeps clients that talk to the share directly
//! out of a file a WebDAV client has locked.
//!
//! This library is that core:
//!
//! - a [lock manager][DavLockManager] with an in-memory implementation ([`MemLs`])
//!   that grants, refreshes, expires and releases locks and enforces the
//!   exclusive/shared conflict rules over whole subtrees.
//! - the [locked-resource session][LockedResource] that keeps the backend handle of
//!   an exclusively locked file open, and reopens it periodically so the share does
//!   not time it out.
//! - a [conditional request evaluator][Preconditions] for `If-Match`,
//!   `If-None-Match`, `If-Modified-Since`, `If-Unmodified-Since` and the WebDAV
//!   `If` header, including tagged lists that name other resources.
//! - a parser for the `If` header grammar, and the lock token format.
//! - a [handler][DavHandler] that answers `OPTIONS`, `LOCK` and `UNLOCK`, and
//!   hands write-performing handlers the resource they should use
//!   ([`DavHandler::resource_for_write`]).
//!
//! ## Backend interfaces.
//!
//! - you supply a [filesystem][DavFileSystem] that resolves paths on the share to
//!   [resources][DavResource].
//! - you supply a [locksystem][DavLockManager], or use [`MemLs`].
//!
//! Included are two filesystems:
//!
//! - [`LocalFs`]: serves a directory on the local filesystem
//! - [`MemFs`]: ephemeral in-memory filesystem.
//!
//! ## Example.
//!
//! ```no_run
//! use std::time::Duration;
//! use davgate::{DavHandler, FileSystem, LockSystem, LsConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LsConfig::new()
//!         .default_timeout(Some(Duration::from_secs(600)))
//!         .maximum_timeout(Some(Duration::from_secs(3600)));
//!
//!     let dav = DavHandler::builder(FileSystem::local("/srv/share", false))
//!         .strip_prefix("/dav")
//!         .locksystem(LockSystem::Mem(config))
//!         .build();
//!
//!     let req = http::Request::builder()
//!         .method("UNLOCK")
//!         .uri("/dav/report.txt")
//!         .header("Lock-Token", "<opaquelocktoken:x>")
//!         .body(http_body::Empty::<bytes::Bytes>::new())
//!         .unwrap();
//!     let resp = dav.handle_with(req, None, Some("alice".to_string())).await;
//!     println!("{}", resp.status());
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod davhandler;
mod errors;
mod util;

pub mod body;
pub mod conditional;
pub mod davheaders;
pub mod fs;
pub mod ifheader;
pub mod locktoken;
pub mod ls;
pub mod scheduler;

pub use crate::conditional::{check_lock_ownership, Outcome, Preconditions};
pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem, LockSystem, MAX_XML_REQUEST};
pub use crate::errors::LockError;
pub use crate::fs::{DavFile, DavFileSystem, DavMetaData, DavResource, FsError, FsResult, OpenOptions};
#[cfg(any(docsrs, feature = "localfs"))]
pub use crate::fs::localfs::LocalFs;
#[cfg(any(docsrs, feature = "memfs"))]
pub use crate::fs::memfs::MemFs;
pub use crate::locktoken::{LockDepth, LockTimeout};
pub use crate::ls::memls::MemLs;
pub use crate::ls::session::LockedResource;
pub use crate::ls::{DavLock, DavLockManager, LockInfo, LsConfig, Principal, ResourceHandle};
pub use crate::scheduler::{Scheduler, TokioScheduler};
pub use crate::util::DavMethod;
