//! Local filesystem access.
//!
//! This implementation is stateless. Resource handles are cheap; each one
//! just remembers the absolute path it maps to.

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, TryFutureExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::fs::*;

/// Local Filesystem implementation.
#[derive(Debug)]
pub struct LocalFs {
    basedir: PathBuf,
    public: bool,
}

#[derive(Debug)]
struct LocalResource {
    path: String,
    abs: PathBuf,
    public: bool,
}

#[derive(Debug)]
struct LocalFsFile(Option<tokio::fs::File>);

impl LocalFs {
    /// Create a new LocalFs, serving "base".
    ///
    /// If "public" is set to true, all files created will be publically
    /// readable (mode 644), otherwise they will be private (mode 600).
    /// Umask still overrides this.
    pub fn new(base: impl Into<PathBuf>, public: bool) -> Arc<LocalFs> {
        Arc::new(LocalFs {
            basedir: base.into(),
            public,
        })
    }
}

impl DavFileSystem for LocalFs {
    fn resource(&self, path: &str) -> FsResult<Arc<dyn DavResource>> {
        let path = normalize_path(path)?;
        let mut abs = self.basedir.clone();
        abs.push(path.trim_start_matches('/'));
        Ok(Arc::new(LocalResource {
            path,
            abs,
            public: self.public,
        }))
    }
}

impl LocalResource {
    fn open_options(&self, options: OpenOptions) -> tokio::fs::OpenOptions {
        let mut opt = tokio::fs::OpenOptions::new();
        opt.read(options.read)
            .write(options.write)
            .append(options.append)
            .truncate(options.truncate)
            .create(options.create)
            .create_new(options.create_new);
        #[cfg(unix)]
        if self.public {
            opt.mode(0o644);
        } else {
            opt.mode(0o600);
        }
        opt
    }
}

impl DavResource for LocalResource {
    fn canonical_path(&self) -> String {
        self.path.clone()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        async move {
            let meta = tokio::fs::metadata(&self.abs).await?;
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn open(&self, options: OpenOptions) -> FsFuture<'_, Box<dyn DavFile>> {
        async move {
            trace!("FS: open {:?} {:?}", self.abs, options);
            match self.open_options(options).open(&self.abs).await {
                Ok(file) => Ok(Box::new(LocalFsFile(Some(file))) as Box<dyn DavFile>),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn create(&self) -> FsFuture<'_, ()> {
        async move {
            trace!("FS: create {:?}", self.abs);
            let options = OpenOptions {
                write: true,
                create_new: true,
                ..Default::default()
            };
            let file = self.open_options(options).open(&self.abs).await?;
            drop(file);
            Ok(())
        }
        .boxed()
    }

    fn delete(&self) -> FsFuture<'_, ()> {
        async move {
            trace!("FS: delete {:?}", self.abs);
            let meta = tokio::fs::symlink_metadata(&self.abs).await?;
            if meta.is_dir() {
                Ok(tokio::fs::remove_dir(&self.abs).await?)
            } else {
                Ok(tokio::fs::remove_file(&self.abs).await?)
            }
        }
        .boxed()
    }
}

impl LocalFsFile {
    fn file(&mut self) -> FsResult<&mut tokio::fs::File> {
        self.0.as_mut().ok_or(FsError::GeneralFailure)
    }
}

impl DavFile for LocalFsFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        async move {
            let meta = self.file()?.metadata().await?;
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        async move { Ok(self.file()?.write_all(&buf).await?) }.boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        async move {
            let file = self.file()?;
            let mut buf = BytesMut::with_capacity(count);
            while buf.len() < count {
                if file.read_buf(&mut buf).await? == 0 {
                    break;
                }
            }
            buf.truncate(count);
            Ok(buf.freeze())
        }
        .boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        async move { self.file()?.seek(pos).map_err(Into::into).await }.boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        async move { self.file()?.sync_all().map_err(Into::into).await }.boxed()
    }

    fn close(&mut self) -> FsFuture<'_, ()> {
        async move {
            if let Some(mut file) = self.0.take() {
                file.flush().await?;
            }
            Ok(())
        }
        .boxed()
    }
}

impl DavMetaData for std::fs::Metadata {
    fn len(&self) -> u64 {
        self.len()
    }
    fn modified(&self) -> FsResult<SystemTime> {
        self.modified().map_err(|e| e.into())
    }
    fn is_dir(&self) -> bool {
        self.is_dir()
    }
    fn is_file(&self) -> bool {
        self.is_file()
    }

    // same as the default apache etag.
    fn etag(&self) -> Option<String> {
        let modified = self.modified().ok()?;
        let t = modified.duration_since(UNIX_EPOCH).ok()?;
        let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
        #[cfg(unix)]
        if self.is_file() {
            Some(format!("\"{:x}-{:x}-{:x}\"", self.ino(), self.len(), t))
        } else {
            Some(format!("\"{:x}-{:x}\"", self.ino(), t))
        }
        #[cfg(not(unix))]
        if self.is_file() {
            Some(format!("\"{:x}-{:x}\"", self.len(), t))
        } else {
            Some(format!("\"{:x}\"", t))
        }
    }
}
