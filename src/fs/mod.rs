//! Contains the structs and traits that define a backend share.
//!
//! The lock system never does file I/O of its own beyond holding one handle
//! open per exclusively locked file. Everything else it needs to know about a
//! resource (does it exist, is it a file, when was it modified, what is its
//! ETag) comes through the [`DavResource`] trait.
//!
//! Two backends are included: [`MemFs`](memfs::MemFs), an ephemeral in-memory
//! tree, and [`LocalFs`](localfs::LocalFs), which serves a local directory.
use std::error::Error;
use std::fmt::Debug;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

#[cfg(any(docsrs, feature = "localfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "localfs")))]
pub mod localfs;
#[cfg(any(docsrs, feature = "memfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;

pub use std::io::SeekFrom;

/// Errors generated by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Operation not implemented (501)
    NotImplemented,
    /// Something went wrong (500)
    GeneralFailure,
    /// tried to create something, but it existed (405 / 412)
    Exists,
    /// File / Directory not found (404)
    NotFound,
    /// Not allowed (403)
    Forbidden,
    /// Out of space (507)
    InsufficientStorage,
    /// The backend refused access because someone else holds the file (423)
    Locked,
    /// Resource too large (413)
    TooLarge,
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the backend methods.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

/// Resolves request paths to resource handles.
pub trait DavFileSystem: Send + Sync {
    /// Return a handle for the (percent-decoded, share-relative) path.
    ///
    /// This does not touch the backend; the resource need not exist.
    fn resource(&self, path: &str) -> FsResult<Arc<dyn DavResource>>;
}

/// A single resource on the backend share.
pub trait DavResource: Debug + Send + Sync {
    /// The normalized path that identifies this resource. Lock coverage
    /// and the session registry are keyed on it.
    fn canonical_path(&self) -> String;

    /// Metadata of the resource. `FsError::NotFound` if it does not exist.
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>>;

    /// Open the resource.
    fn open(&self, options: OpenOptions) -> FsFuture<'_, Box<dyn DavFile>>;

    /// Create an empty file. Fails with `FsError::Exists` if it is already there.
    fn create(&self) -> FsFuture<'_, ()>;

    /// Remove the file or (empty) collection.
    fn delete(&self) -> FsFuture<'_, ()>;

    fn exists(&self) -> FsFuture<'_, bool> {
        Box::pin(async move {
            match self.metadata().await {
                Ok(_) => Ok(true),
                Err(FsError::NotFound) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }
}

/// An open handle on a resource.
pub trait DavFile: Debug + Send + Sync {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>>;
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()>;
    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes>;
    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64>;
    fn flush(&mut self) -> FsFuture<'_, ()>;
    /// Give the handle back to the backend.
    fn close(&mut self) -> FsFuture<'_, ()>;
}

/// Resource metadata.
pub trait DavMetaData: Debug + Send + Sync {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    /// Content + modification time fingerprint, quoted, ready to be
    /// compared with `If-Match` style header values.
    fn etag(&self) -> Option<String> {
        None
    }

    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// OpenOptions for `open()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    /// open for reading
    pub read: bool,
    /// open for writing
    pub write: bool,
    /// open in write-append mode
    pub append: bool,
    /// truncate file first when writing
    pub truncate: bool,
    /// create file if it doesn't exist
    pub create: bool,
    /// must create new file, fail if it already exists.
    pub create_new: bool,
}

impl OpenOptions {
    pub fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            ..Default::default()
        }
    }

    pub fn write() -> OpenOptions {
        OpenOptions {
            write: true,
            ..Default::default()
        }
    }

    /// The mode a lock session holds its file in: create if absent,
    /// read-write, append.
    pub fn locked() -> OpenOptions {
        OpenOptions {
            read: true,
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }
}

impl std::error::Error for FsError {
    fn description(&self) -> &str {
        "DavFileSystem error"
    }
    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&io::Error> for FsError {
    fn from(e: &io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::Forbidden,
            ErrorKind::AlreadyExists => FsError::Exists,
            _ => FsError::GeneralFailure,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        (&e).into()
    }
}

/// Normalize a share-relative path: one leading slash, no empty or `.`
/// segments, no trailing slash (except for the root itself).
///
/// `..` is refused rather than resolved.
pub(crate) fn normalize_path(path: &str) -> FsResult<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(FsError::Forbidden),
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}
