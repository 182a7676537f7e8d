//! Simple in-memory filesystem.
//!
//! Ephemeral: nothing survives the `MemFs` instance. Meant for tests and
//! for setups that just want a throwaway share behind the lock system.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::fs::*;

#[derive(Debug, Clone)]
struct MemNode {
    data: Vec<u8>,
    modified: SystemTime,
    is_dir: bool,
}

type Tree = Arc<Mutex<HashMap<String, MemNode>>>;

/// Ephemeral in-memory filesystem.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Tree,
}

#[derive(Debug)]
struct MemResource {
    path: String,
    tree: Tree,
}

#[derive(Debug)]
struct MemFile {
    path: String,
    tree: Tree,
    pos: usize,
    append: bool,
}

#[derive(Debug, Clone)]
struct MemMetaData {
    len: u64,
    modified: SystemTime,
    is_dir: bool,
}

impl MemFs {
    /// Create a new, empty in-memory filesystem. Only the root collection exists.
    pub fn new() -> Arc<MemFs> {
        let mut tree = HashMap::new();
        tree.insert("/".to_string(), MemNode::dir());
        Arc::new(MemFs {
            tree: Arc::new(Mutex::new(tree)),
        })
    }

    /// Create a collection. The parent must exist.
    pub fn create_dir(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path)?;
        let mut tree = self.tree.lock();
        if tree.contains_key(&path) {
            return Err(FsError::Exists);
        }
        check_parent(&tree, &path)?;
        tree.insert(path, MemNode::dir());
        Ok(())
    }

    /// Contents of a file, if there is one at `path`.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let path = normalize_path(path).ok()?;
        let tree = self.tree.lock();
        tree.get(&path).filter(|n| !n.is_dir).map(|n| n.data.clone())
    }
}

impl MemNode {
    fn dir() -> MemNode {
        MemNode {
            data: Vec::new(),
            modified: SystemTime::now(),
            is_dir: true,
        }
    }

    fn file() -> MemNode {
        MemNode {
            data: Vec::new(),
            modified: SystemTime::now(),
            is_dir: false,
        }
    }

    fn meta(&self) -> MemMetaData {
        MemMetaData {
            len: self.data.len() as u64,
            modified: self.modified,
            is_dir: self.is_dir,
        }
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn check_parent(tree: &HashMap<String, MemNode>, path: &str) -> FsResult<()> {
    match tree.get(parent_of(path)) {
        Some(node) if node.is_dir => Ok(()),
        Some(_) => Err(FsError::Forbidden),
        None => Err(FsError::NotFound),
    }
}

impl DavFileSystem for MemFs {
    fn resource(&self, path: &str) -> FsResult<Arc<dyn DavResource>> {
        Ok(Arc::new(MemResource {
            path: normalize_path(path)?,
            tree: self.tree.clone(),
        }))
    }
}

impl DavResource for MemResource {
    fn canonical_path(&self) -> String {
        self.path.clone()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let tree = self.tree.lock();
            match tree.get(&self.path) {
                Some(node) => Ok(Box::new(node.meta()) as Box<dyn DavMetaData>),
                None => Err(FsError::NotFound),
            }
        })
    }

    fn open(&self, options: OpenOptions) -> FsFuture<'_, Box<dyn DavFile>> {
        Box::pin(async move {
            trace!("FS: open {} {:?}", self.path, options);
            let mut tree = self.tree.lock();
            match tree.get_mut(&self.path) {
                Some(node) => {
                    if node.is_dir {
                        return Err(FsError::Forbidden);
                    }
                    if options.create_new {
                        return Err(FsError::Exists);
                    }
                    if options.truncate && options.write {
                        node.data.clear();
                        node.modified = SystemTime::now();
                    }
                }
                None => {
                    if !(options.create || options.create_new) {
                        return Err(FsError::NotFound);
                    }
                    check_parent(&tree, &self.path)?;
                    tree.insert(self.path.clone(), MemNode::file());
                }
            }
            Ok(Box::new(MemFile {
                path: self.path.clone(),
                tree: self.tree.clone(),
                pos: 0,
                append: options.append,
            }) as Box<dyn DavFile>)
        })
    }

    fn create(&self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            trace!("FS: create {}", self.path);
            let mut tree = self.tree.lock();
            if tree.contains_key(&self.path) {
                return Err(FsError::Exists);
            }
            check_parent(&tree, &self.path)?;
            tree.insert(self.path.clone(), MemNode::file());
            Ok(())
        })
    }

    fn delete(&self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            trace!("FS: delete {}", self.path);
            let mut tree = self.tree.lock();
            let is_dir = match tree.get(&self.path) {
                Some(node) => node.is_dir,
                None => return Err(FsError::NotFound),
            };
            if is_dir {
                let prefix = format!("{}/", self.path.trim_end_matches('/'));
                if self.path == "/" || tree.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(FsError::Forbidden);
                }
            }
            tree.remove(&self.path);
            Ok(())
        })
    }
}

impl MemFile {
    fn with_node<T>(&self, f: impl FnOnce(&mut MemNode) -> T) -> FsResult<T> {
        let mut tree = self.tree.lock();
        match tree.get_mut(&self.path) {
            Some(node) => Ok(f(node)),
            None => Err(FsError::NotFound),
        }
    }
}

impl DavFile for MemFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let meta = self.with_node(|node| node.meta())?;
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let append = self.append;
            let pos = self.pos;
            let end = self.with_node(|node| {
                let start = if append { node.data.len() } else { pos };
                if node.data.len() < start {
                    node.data.resize(start, 0);
                }
                let overlap = std::cmp::min(buf.len(), node.data.len() - start);
                node.data[start..start + overlap].copy_from_slice(&buf[..overlap]);
                node.data.extend_from_slice(&buf[overlap..]);
                node.modified = SystemTime::now();
                start + buf.len()
            })?;
            self.pos = end;
            Ok(())
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let pos = self.pos;
            let chunk = self.with_node(|node| {
                let start = std::cmp::min(pos, node.data.len());
                let end = std::cmp::min(start + count, node.data.len());
                Bytes::copy_from_slice(&node.data[start..end])
            })?;
            self.pos = pos + chunk.len();
            Ok(chunk)
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let len = self.with_node(|node| node.data.len() as i64)?;
            let new = match pos {
                SeekFrom::Start(n) => n as i64,
                SeekFrom::Current(n) => self.pos as i64 + n,
                SeekFrom::End(n) => len + n,
            };
            if new < 0 {
                return Err(FsError::GeneralFailure);
            }
            self.pos = new as usize;
            Ok(new as u64)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn close(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            trace!("FS: close {}", self.path);
            Ok(())
        })
    }
}

impl DavMetaData for MemMetaData {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn etag(&self) -> Option<String> {
        if self.is_dir {
            return None;
        }
        let t = self.modified.duration_since(UNIX_EPOCH).ok()?;
        let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
        Some(format!("\"{:x}-{:x}\"", self.len, t))
    }
}
