//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
#[cfg(any(docsrs, feature = "localfs"))]
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{self, buf::Buf};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional::{check_lock_ownership, Outcome, Preconditions};
use crate::errors::{DavError, DavResult};
use crate::fs::*;
use crate::ls::memls::MemLs;
use crate::ls::*;
use crate::scheduler::TokioScheduler;
use crate::util::{dav_method, uri_to_path, DavMethod};

pub mod handle_lock;
pub mod handle_options;

/// Default limit on the size of a LOCK request body.
pub const MAX_XML_REQUEST: usize = 20000;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Locksystem backend.
    ls: Option<LockSystem>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethod,
    /// Principal is webdav speak for "user", used to give locks an owner (if a locksystem is
    /// active).
    principal: Option<String>,
    /// Largest LOCK request body we accept.
    max_xml_request: usize,
}

/// File system backend.
#[derive(Clone)]
pub enum FileSystem {
    #[cfg(any(docsrs, feature = "memfs"))]
    Mem,
    #[cfg(any(docsrs, feature = "localfs"))]
    Local {
        /// Path to the root directory.
        base: PathBuf,
        public: bool,
    },
    /// A backend supplied by the caller.
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    /// Serve a local directory
    #[cfg(any(docsrs, feature = "localfs"))]
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        FileSystem::Local {
            base: path.into(),
            public,
        }
    }

    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            #[cfg(any(docsrs, feature = "memfs"))]
            FileSystem::Mem => crate::fs::memfs::MemFs::new(),
            #[cfg(any(docsrs, feature = "localfs"))]
            FileSystem::Local { base, public } => crate::fs::localfs::LocalFs::new(base, public),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Lock system backend.
#[derive(Clone)]
pub enum LockSystem {
    /// In-memory lock table, with timers on the current tokio runtime.
    Mem(LsConfig),
    /// A lock manager supplied by the caller.
    Custom(Arc<dyn DavLockManager>),
}

impl Default for LockSystem {
    fn default() -> Self {
        LockSystem::Mem(LsConfig::default())
    }
}

impl LockSystem {
    // Mem needs a tokio runtime for its timers.
    fn build(self) -> Arc<dyn DavLockManager> {
        match self {
            LockSystem::Mem(config) => MemLs::new(config, Arc::new(TokioScheduler::current())),
            LockSystem::Custom(ls) => ls,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            ls: None,
            allow: DavMethod::all(),
            principal: None,
            max_xml_request: MAX_XML_REQUEST,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    ///
    /// With `LockSystem::Mem` this must run inside a tokio runtime.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the filesystem to use.
    pub fn filesystem(self, fs: FileSystem) -> Self {
        let mut this = self;
        this.fs = fs;
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethod) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Maximum size of a LOCK request body in bytes.
    pub fn max_xml_request(self, size: usize) -> Self {
        let mut this = self;
        this.max_xml_request = size;
        this
    }
}

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Option<Arc<dyn DavLockManager>>,
    pub(crate) allow: DavMethod,
    pub(crate) principal: Option<Principal>,
    pub(crate) max_xml_request: usize,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(),
            ls: cfg.ls.map(|ls| ls.build()),
            allow: cfg.allow,
            principal: cfg.principal.map(Principal::new),
            max_xml_request: cfg.max_xml_request,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// Typically the `principal` is set per request, after the
    /// surrounding server has authenticated the client.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Principal::new(principal));
        }
        this.handle_inner(req).await
    }

    /// The resource a write-performing handler (PUT, DELETE, ...) should
    /// operate on.
    ///
    /// Runs the lock ownership check and the preconditions first; a
    /// refusal comes back as the status code to answer with. When the
    /// request principal holds the exclusive lock on the resource, the
    /// handle is the lock session that keeps the file open.
    pub async fn resource_for_write(&self, req: &Request<()>) -> Result<ResourceHandle, StatusCode> {
        self.resource_for_write2(req)
            .await
            .map_err(|e| e.statuscode())
    }

    async fn resource_for_write2(&self, req: &Request<()>) -> DavResult<ResourceHandle> {
        let res = self.resource(req)?;
        let principal = self.principal.as_ref();
        let ls = self.ls.as_deref();
        if let Some(ls) = ls {
            refused(check_lock_ownership(ls, &*res, principal).await)?;
        }
        refused(self.preconditions(ls).evaluate(req.headers(), &*res).await)?;
        match ls {
            Some(ls) => Ok(ls.locked_resource(res, principal).await),
            None => Ok(ResourceHandle::Resource(res)),
        }
    }
}

// anything but Proceed ends the request with that status.
pub(crate) fn refused(outcome: Outcome) -> DavResult<()> {
    match outcome {
        Outcome::Proceed => Ok(()),
        o => Err(DavError::Status(o.statuscode())),
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<String> {
        uri_to_path(req.uri(), &self.prefix)
    }

    // helper.
    pub(crate) fn resource(&self, req: &Request<()>) -> DavResult<Arc<dyn DavResource>> {
        let path = self.path(req)?;
        Ok(self.fs.resource(&path)?)
    }

    // helper.
    pub(crate) fn preconditions<'a>(&'a self, ls: Option<&'a dyn DavLockManager>) -> Preconditions<'a> {
        Preconditions::new(&*self.fs, ls).prefix(&self.prefix)
    }

    // drain request body and return length.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                let h = resp.headers_mut();
                h.insert(http::header::CONTENT_LENGTH, http::HeaderValue::from_static("0"));
                if err.must_close() {
                    h.insert(http::header::CONNECTION, http::HeaderValue::from_static("close"));
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = if method == DavMethod::OPTIONS && req.uri().path() == "*" {
            "*".to_string()
        } else {
            self.path(&req)?
        };

        // the other verbs belong to handlers outside of this crate.
        if !(method == DavMethod::OPTIONS || DavMethod::WEBDAV_LOCKING.contains(method)) {
            debug!("no handler for {:?} {}", method, path);
            return Err(DavError::Status(StatusCode::NOT_IMPLEMENTED));
        }

        let body_data = self.read_request(body, self.max_xml_request).await?;

        // Only LOCK accepts a body.
        if method != DavMethod::LOCK && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        if method == DavMethod::OPTIONS {
            self.handle_options(&req).await
        } else if method == DavMethod::LOCK {
            self.handle_lock(&req, &body_data).await
        } else {
            self.handle_unlock(&req).await
        }
    }
}
