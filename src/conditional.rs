//! HTTP and WebDAV preconditions.
//!
//! First the cache validators (`If-None-Match`, `If-Match`,
//! `If-Modified-Since`, `If-Unmodified-Since`), then, if there is a lock
//! system, the WebDAV `If` header.
use std::time::SystemTime;

use headers::HeaderMapExt;
use http::{HeaderMap, StatusCode};

use crate::davheaders;
use crate::fs::{DavFileSystem, DavResource};
use crate::ifheader::{self, IfHeader, IfItem, IfList};
use crate::ls::{DavLockManager, Principal};
use crate::util::href_to_path;

/// Result of a precondition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    NotModified,
    BadRequest,
    PreconditionFailed,
    Locked,
}

impl Outcome {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            Outcome::Proceed => StatusCode::OK,
            Outcome::NotModified => StatusCode::NOT_MODIFIED,
            Outcome::BadRequest => StatusCode::BAD_REQUEST,
            Outcome::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Outcome::Locked => StatusCode::LOCKED,
        }
    }

    pub fn is_proceed(&self) -> bool {
        *self == Outcome::Proceed
    }
}

/// Evaluates the precondition headers of a request.
pub struct Preconditions<'a> {
    fs: &'a dyn DavFileSystem,
    ls: Option<&'a dyn DavLockManager>,
    prefix: &'a str,
}

// what the validators need to know about a resource.
struct Validators {
    etag: Option<String>,
    modified: Option<SystemTime>,
}

async fn validators(res: &dyn DavResource) -> Validators {
    match res.metadata().await {
        Ok(meta) => Validators {
            etag: meta.etag(),
            modified: meta.modified().ok(),
        },
        Err(_) => Validators {
            etag: None,
            modified: None,
        },
    }
}

impl<'a> Preconditions<'a> {
    /// `fs` resolves the resources named in tagged `If` lists.
    pub fn new(fs: &'a dyn DavFileSystem, ls: Option<&'a dyn DavLockManager>) -> Preconditions<'a> {
        Preconditions { fs, ls, prefix: "" }
    }

    /// URL prefix to strip from resource tags before resolving them.
    pub fn prefix(self, prefix: &'a str) -> Self {
        let mut this = self;
        this.prefix = prefix;
        this
    }

    pub async fn evaluate(&self, headers: &HeaderMap, res: &dyn DavResource) -> Outcome {
        let v = validators(res).await;

        if let Some(davheaders::IfNoneMatch(list)) = headers.typed_get::<davheaders::IfNoneMatch>() {
            if list.matches(v.etag.as_deref()) {
                let modified = match (headers.typed_get::<headers::IfModifiedSince>(), v.modified) {
                    (Some(since), Some(mtime)) => since.is_modified(mtime),
                    _ => false,
                };
                if !modified {
                    info!("If-None-Match: {} matches {}: not modified", list, res.canonical_path());
                    return Outcome::NotModified;
                }
                debug!("If-None-Match: matched but modified since - proceed");
            } else {
                debug!("If-None-Match: {} does not match {:?} - proceed", list, v.etag);
            }
        } else {
            if let Some(davheaders::IfMatch(list)) = headers.typed_get::<davheaders::IfMatch>() {
                if !list.matches(v.etag.as_deref()) {
                    info!(
                        "If-Match: {} does not match {:?} on {}",
                        list,
                        v.etag,
                        res.canonical_path()
                    );
                    return Outcome::PreconditionFailed;
                }
            }
            if let Some(since) = headers.typed_get::<headers::IfUnmodifiedSince>() {
                if let Some(mtime) = v.modified {
                    if !since.precondition_passes(mtime) {
                        info!("If-Unmodified-Since: {} was modified", res.canonical_path());
                        return Outcome::PreconditionFailed;
                    }
                }
            } else if let Some(since) = headers.typed_get::<headers::IfModifiedSince>() {
                if let Some(mtime) = v.modified {
                    if !since.is_modified(mtime) {
                        info!("If-Modified-Since: {} not modified", res.canonical_path());
                        return Outcome::NotModified;
                    }
                }
            }
        }

        match self.ls {
            Some(ls) => self.if_header(headers, res, ls, &v).await,
            None => Outcome::Proceed,
        }
    }

    async fn if_header(
        &self,
        headers: &HeaderMap,
        res: &dyn DavResource,
        ls: &dyn DavLockManager,
        v: &Validators,
    ) -> Outcome {
        let values = match headers.typed_try_get::<davheaders::If>() {
            Ok(Some(davheaders::If(values))) => values,
            Ok(None) => return Outcome::Proceed,
            Err(_) => {
                info!("If: header is not valid text");
                return Outcome::BadRequest;
            }
        };

        for value in &values {
            let parsed = match ifheader::parse(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    info!("If: {:?}: {}", value, e);
                    return Outcome::BadRequest;
                }
            };
            let holds = match parsed {
                IfHeader::NoTag(lists) => self.any_list(&lists, res, ls, v).await,
                IfHeader::Tagged(tags) => {
                    let mut holds = true;
                    for tag in &tags {
                        if !self.tagged(&tag.resource, &tag.lists, ls).await {
                            debug!("If: no list holds for {}", tag.resource);
                            holds = false;
                            break;
                        }
                    }
                    holds
                }
            };
            if holds {
                debug!("If: {} holds - proceed", value);
                return Outcome::Proceed;
            }
        }
        info!("If: no condition holds on {}", res.canonical_path());
        Outcome::PreconditionFailed
    }

    async fn tagged(&self, href: &str, lists: &[IfList], ls: &dyn DavLockManager) -> bool {
        let res = match href_to_path(href, self.prefix).and_then(|p| self.fs.resource(&p).ok()) {
            Some(res) => res,
            None => {
                debug!("If: cannot resolve resource tag {}", href);
                return false;
            }
        };
        let v = validators(&*res).await;
        self.any_list(lists, &*res, ls, &v).await
    }

    async fn any_list(
        &self,
        lists: &[IfList],
        res: &dyn DavResource,
        ls: &dyn DavLockManager,
        v: &Validators,
    ) -> bool {
        for list in lists {
            if self.list_holds(list, res, ls, v).await {
                return true;
            }
        }
        false
    }

    async fn list_holds(
        &self,
        list: &IfList,
        res: &dyn DavResource,
        ls: &dyn DavLockManager,
        v: &Validators,
    ) -> bool {
        for cond in &list.0 {
            let matched = match &cond.item {
                IfItem::ETag(tag) => {
                    let m = v.etag.as_deref().map_or(false, |e| tag == "*" || tag == e);
                    trace!("If: etag {} against {:?}: {}", tag, v.etag, m);
                    m
                }
                IfItem::Token(token) => {
                    let m = ls.is_locked(res, token).await;
                    trace!("If: token {} on {}: {}", token, res.canonical_path(), m);
                    m
                }
            };
            if matched == cond.not {
                return false;
            }
        }
        true
    }
}

/// Either nobody holds a lock on `res`, or `principal` holds one of them.
pub async fn check_lock_ownership(
    ls: &dyn DavLockManager,
    res: &dyn DavResource,
    principal: Option<&Principal>,
) -> Outcome {
    let locks = ls.active_locks(res).await;
    if locks.is_empty() {
        return Outcome::Proceed;
    }
    let principal = match principal {
        Some(p) => p,
        None => {
            debug!("{}: locked, and the requestor is anonymous", res.canonical_path());
            return Outcome::Locked;
        }
    };
    match locks.iter().find(|l| l.is_owned_by(Some(principal))) {
        Some(l) => {
            debug!("{}: requestor holds {}", res.canonical_path(), l.token);
            Outcome::Proceed
        }
        None => {
            debug!(
                "{}: {} locks, none held by {}",
                res.canonical_path(),
                locks.len(),
                principal
            );
            Outcome::Locked
        }
    }
}

#[cfg(all(test, feature = "memfs"))]
mod tests {
    use super::*;
    use crate::fs::memfs::MemFs;
    use crate::ls::memls::MemLs;
    use crate::ls::{LockInfo, LsConfig};
    use crate::scheduler::TokioScheduler;
    use http::header::HeaderValue;
    use std::sync::Arc;
    use std::time::Duration;

    struct Setup {
        fs: Arc<MemFs>,
        ls: Arc<MemLs>,
        file: Arc<dyn DavResource>,
        etag: String,
        mtime: SystemTime,
    }

    async fn setup() -> Setup {
        let fs = MemFs::new();
        fs.create_dir("/share").unwrap();
        let file = fs.resource("/share/file").unwrap();
        file.create().await.unwrap();
        fs.resource("/share/other").unwrap().create().await.unwrap();
        let meta = file.metadata().await.unwrap();
        let ls = MemLs::new(LsConfig::new(), Arc::new(TokioScheduler::current()));
        Setup {
            etag: meta.etag().unwrap(),
            mtime: meta.modified().unwrap(),
            fs,
            ls,
            file,
        }
    }

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.append(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    impl Setup {
        async fn eval(&self, h: &HeaderMap) -> Outcome {
            Preconditions::new(&*self.fs, Some(&*self.ls))
                .evaluate(h, &*self.file)
                .await
        }
    }

    #[tokio::test]
    async fn if_none_match() {
        let s = setup().await;
        let h = headers(&[("if-none-match", s.etag.clone())]);
        assert_eq!(s.eval(&h).await, Outcome::NotModified);

        let h = headers(&[("if-none-match", "\"other\", *".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::NotModified);

        let h = headers(&[("if-none-match", "\"other\"".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);

        let mut h = headers(&[("if-none-match", s.etag.clone())]);
        h.typed_insert(headers::IfModifiedSince::from(s.mtime - Duration::from_secs(3600)));
        assert_eq!(s.eval(&h).await, Outcome::Proceed);

        let mut h = headers(&[("if-none-match", s.etag.clone())]);
        h.typed_insert(headers::IfModifiedSince::from(s.mtime));
        assert_eq!(s.eval(&h).await, Outcome::NotModified);
    }

    #[tokio::test]
    async fn if_match_and_dates() {
        let s = setup().await;
        let h = headers(&[("if-match", s.etag.clone())]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);
        let h = headers(&[("if-match", "*".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);
        let h = headers(&[("if-match", "\"nope\"".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);

        // collections have no etag in the memory backend.
        let dir = s.fs.resource("/share").unwrap();
        let h = headers(&[("if-match", "*".to_string())]);
        let pre = Preconditions::new(&*s.fs, None);
        assert_eq!(pre.evaluate(&h, &*dir).await, Outcome::PreconditionFailed);

        let mut h = HeaderMap::new();
        h.typed_insert(headers::IfUnmodifiedSince::from(s.mtime - Duration::from_secs(3600)));
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);

        let mut h = HeaderMap::new();
        h.typed_insert(headers::IfUnmodifiedSince::from(s.mtime + Duration::from_secs(3600)));
        assert_eq!(s.eval(&h).await, Outcome::Proceed);

        let mut h = HeaderMap::new();
        h.typed_insert(headers::IfModifiedSince::from(s.mtime + Duration::from_secs(3600)));
        assert_eq!(s.eval(&h).await, Outcome::NotModified);

        let mut h = HeaderMap::new();
        h.typed_insert(headers::IfModifiedSince::from(s.mtime - Duration::from_secs(3600)));
        assert_eq!(s.eval(&h).await, Outcome::Proceed);
    }

    #[tokio::test]
    async fn no_lock_manager_ignores_if() {
        let s = setup().await;
        let h = headers(&[("if", "this is not a list".to_string())]);
        let pre = Preconditions::new(&*s.fs, None);
        assert_eq!(pre.evaluate(&h, &*s.file).await, Outcome::Proceed);
        assert_eq!(s.eval(&h).await, Outcome::BadRequest);
    }

    #[tokio::test]
    async fn no_tag_lists_are_alternatives() {
        let s = setup().await;
        let h = headers(&[("if", r#"(<urn:x> [W/"abc"]) (<urn:y>)"#.to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);

        let lock = s.ls.lock(s.file.clone(), None, LockInfo::shared()).await.unwrap();
        let value = format!("(<urn:x> [{}]) (<{}>)", s.etag, lock.token);
        let h = headers(&[("if", value.clone())]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);

        // etag and token in one list must both hold.
        let h = headers(&[("if", format!("([{}] <{}>)", s.etag, lock.token))]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);
        let h = headers(&[("if", format!("([\"stale\"] <{}>)", lock.token))]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);

        s.ls.unlock(&*s.file, None, &lock.token).await.unwrap();
        let h = headers(&[("if", value)]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);
    }

    #[tokio::test]
    async fn not_conditions() {
        let s = setup().await;
        let h = headers(&[("if", "(Not <urn:x>)".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);
        let h = headers(&[("if", format!("(Not [{}])", s.etag))]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);
    }

    #[tokio::test]
    async fn tagged_lists_apply_to_their_resource() {
        let s = setup().await;
        let other = s.fs.resource("/share/other").unwrap();
        let lock = s.ls.lock(other.clone(), None, LockInfo::shared()).await.unwrap();

        let h = headers(&[(
            "if",
            format!("<http://example.com/share/other> (<{}>)", lock.token),
        )]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);

        // every tag must hold.
        let h = headers(&[(
            "if",
            format!("</share/other> (<{0}>) </share/file> (<{0}>)", lock.token),
        )]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);

        let h = headers(&[("if", format!("</share/file> (<{}>)", lock.token))]);
        assert_eq!(s.eval(&h).await, Outcome::PreconditionFailed);

        // with a prefix, tags outside of it do not resolve.
        let h = headers(&[("if", format!("</dav/share/other> (<{}>)", lock.token))]);
        let pre = Preconditions::new(&*s.fs, Some(&*s.ls)).prefix("/dav");
        assert_eq!(pre.evaluate(&h, &*s.file).await, Outcome::Proceed);
        let h = headers(&[("if", format!("</share/other> (<{}>)", lock.token))]);
        assert_eq!(pre.evaluate(&h, &*s.file).await, Outcome::PreconditionFailed);
    }

    #[tokio::test]
    async fn multiple_if_values() {
        let s = setup().await;
        let h = headers(&[
            ("if", "(<urn:x>)".to_string()),
            ("if", format!("([{}])", s.etag)),
        ]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);

        let h = headers(&[("if", "(<urn:x>)".to_string()), ("if", "(<urn:y>".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::BadRequest);

        let h = headers(&[("if", format!("([{}])", s.etag)), ("if", "(<urn:y>".to_string())]);
        assert_eq!(s.eval(&h).await, Outcome::Proceed);
    }

    #[tokio::test]
    async fn lock_ownership() {
        let s = setup().await;
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        let ls: &dyn DavLockManager = &*s.ls;
        assert_eq!(check_lock_ownership(ls, &*s.file, None).await, Outcome::Proceed);

        s.ls.lock(s.file.clone(), Some(&alice), LockInfo::exclusive()).await.unwrap();
        assert_eq!(check_lock_ownership(ls, &*s.file, Some(&alice)).await, Outcome::Proceed);
        assert_eq!(check_lock_ownership(ls, &*s.file, Some(&bob)).await, Outcome::Locked);
        assert_eq!(check_lock_ownership(ls, &*s.file, None).await, Outcome::Locked);
        assert_eq!(Outcome::Locked.statuscode().as_u16(), 423);
    }
}
