use std::io;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use xml::writer::EmitterConfig;
use xmltree::{Element, Namespace, XMLNode};

use crate::body::Body;
use crate::conditional::check_lock_ownership;
use crate::davhandler::refused;
use crate::davheaders::{self, Depth, LockToken, Timeout};
use crate::errors::{DavError, DavResult, LockError};
use crate::ifheader::parse_lock_tokens;
use crate::locktoken::{scope_str, LockDepth, LockTimeout};
use crate::ls::{DavLock, DavLockManager, LockInfo};
use crate::util::{dav_xml_error, MemBuffer};

impl crate::DavHandler {
    fn lockmanager(&self) -> DavResult<&dyn DavLockManager> {
        match self.ls.as_deref() {
            Some(ls) => Ok(ls),
            None => {
                debug!("LOCK/UNLOCK without a locksystem");
                Err(StatusCode::METHOD_NOT_ALLOWED.into())
            }
        }
    }

    pub(crate) async fn handle_lock(&self, req: &Request<()>, xmldata: &[u8]) -> DavResult<Response<Body>> {
        let ls = self.lockmanager()?;
        let res = self.resource(req)?;
        let principal = self.principal.as_ref();
        debug!("LOCK request for {}", res.canonical_path());

        refused(check_lock_ownership(ls, &*res, principal).await)?;
        refused(self.preconditions(Some(ls)).evaluate(req.headers(), &*res).await)?;

        let timeout = req
            .headers()
            .typed_get::<Timeout>()
            .map(|t| t.0)
            .unwrap_or(LockTimeout::Unspecified);

        // no body means refresh.
        if xmldata.iter().all(|b| b.is_ascii_whitespace()) {
            debug!("LOCK with empty body: refresh");
            let tokens = match req.headers().typed_try_get::<davheaders::If>() {
                Ok(Some(davheaders::If(values))) => match parse_lock_tokens(&values) {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        info!("LOCK refresh: bad If header: {}", e);
                        return Err(StatusCode::BAD_REQUEST.into());
                    }
                },
                Ok(None) => Vec::new(),
                Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
            };
            ls.refresh(&*res, principal, &tokens, timeout).await?;
            let locks = ls.active_locks(&*res).await;
            return lockdiscovery_response(StatusCode::OK, &locks);
        }

        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(None) => LockDepth::Infinite,
            Ok(Some(d)) => match d.lock_depth() {
                Some(depth) => depth,
                None => {
                    debug!("LOCK with Depth: 1");
                    return Err(StatusCode::BAD_REQUEST.into());
                }
            },
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let info = parse_lockinfo(xmldata)?.depth(depth).timeout(timeout);
        let existed = res.exists().await.unwrap_or(true);

        let lock = match ls.lock(res.clone(), principal, info).await {
            Ok(lock) => lock,
            Err(LockError::Locked) => {
                let mut resp = Response::new(dav_xml_error("<D:no-conflicting-lock/>"));
                *resp.status_mut() = StatusCode::LOCKED;
                resp.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/xml; charset=utf-8"),
                );
                return Ok(resp);
            }
            Err(e) => return Err(e.into()),
        };

        let status = if existed {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };
        let locks = ls.active_locks(&*res).await;
        let mut resp = lockdiscovery_response(status, &locks)?;
        resp.headers_mut().typed_insert(LockToken(lock.token));
        Ok(resp)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let ls = self.lockmanager()?;
        let res = self.resource(req)?;
        let principal = self.principal.as_ref();
        debug!("UNLOCK request for {}", res.canonical_path());

        refused(check_lock_ownership(ls, &*res, principal).await)?;
        refused(self.preconditions(Some(ls)).evaluate(req.headers(), &*res).await)?;

        let token = match req.headers().typed_try_get::<LockToken>() {
            Ok(Some(LockToken(token))) => token,
            _ => {
                info!(
                    "UNLOCK: invalid lock token {:?}",
                    req.headers().get("lock-token")
                );
                return Err(StatusCode::BAD_REQUEST.into());
            }
        };
        ls.unlock(&*res, principal, &token).await?;

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::NO_CONTENT;
        Ok(resp)
    }
}

// <D:lockinfo> -> LockInfo. Exclusive unless <D:lockscope><D:shared/>.
fn parse_lockinfo(xmldata: &[u8]) -> DavResult<LockInfo> {
    let root = Element::parse(xmldata)?;
    if root.name != "lockinfo" {
        debug!("LOCK: body is a <{}>, not a <lockinfo>", root.name);
        return Err(DavError::XmlParseError);
    }
    let mut info = LockInfo::exclusive();
    for elem in root.children.iter().filter_map(|n| n.as_element()) {
        match elem.name.as_str() {
            "lockscope" => {
                if elem.get_child("shared").is_some() {
                    info.exclusive = false;
                }
            }
            "owner" => info = info.owner(elem.clone()),
            _ => {}
        }
    }
    Ok(info)
}

fn dav_elem(name: &str) -> Element {
    let mut e = Element::new(name);
    e.prefix = Some("D".to_string());
    e.namespace = Some("DAV:".to_string());
    e
}

fn dav_text(name: &str, text: &str) -> Element {
    let mut e = dav_elem(name);
    e.children.push(XMLNode::Text(text.to_string()));
    e
}

fn dav_parent(name: &str, child: Element) -> Element {
    let mut e = dav_elem(name);
    e.children.push(XMLNode::Element(child));
    e
}

fn activelock(lock: &DavLock) -> Element {
    let mut e = dav_elem("activelock");
    let mut push = |c: Element| e.children.push(XMLNode::Element(c));
    push(dav_parent("locktype", dav_elem("write")));
    push(dav_parent("lockscope", dav_elem(scope_str(lock.info.exclusive))));
    push(dav_text("depth", lock.info.depth.as_str()));
    if let Some(owner) = &lock.info.owner {
        push(owner.clone());
    }
    if lock.info.timeout != LockTimeout::Unspecified {
        push(dav_text("timeout", &lock.info.timeout.to_string()));
    }
    push(dav_parent("locktoken", dav_text("href", &lock.token)));
    e
}

fn lockdiscovery(locks: &[DavLock]) -> DavResult<Bytes> {
    let mut discovery = dav_elem("lockdiscovery");
    for lock in locks {
        discovery.children.push(XMLNode::Element(activelock(lock)));
    }
    let mut prop = dav_parent("prop", discovery);
    let mut ns = Namespace::empty();
    ns.put("D", "DAV:");
    prop.namespaces = Some(ns);

    let mut buf = MemBuffer::new();
    prop.write_with_config(&mut buf, EmitterConfig::new().perform_indent(false))
        .map_err(|e| DavError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    Ok(buf.take())
}

fn lockdiscovery_response(status: StatusCode, locks: &[DavLock]) -> DavResult<Response<Body>> {
    let body = lockdiscovery(locks)?;
    if log_enabled!(log::Level::Trace) {
        trace!("LOCK response body: {}", String::from_utf8_lossy(&body));
    }
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    let h = resp.headers_mut();
    h.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    h.typed_insert(headers::ContentLength(body.len() as u64));
    *resp.body_mut() = Body::from(body);
    Ok(resp)
}
