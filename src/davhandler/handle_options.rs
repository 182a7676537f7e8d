use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response};

use crate::body::Body;
use crate::errors::DavResult;
use crate::util::DavMethod;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();

        // class 2 means we do locking.
        let dav = if self.ls.is_some() { "1,2" } else { "1" };
        h.insert("dav", HeaderValue::from_static(dav));
        h.insert("ms-author-via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact
        // allowed. LOCK/UNLOCK only with a locksystem.
        let mm = |v: &mut Vec<&'static str>, m: &'static str, y: DavMethod| {
            if (!DavMethod::WEBDAV_LOCKING.contains(y) || self.ls.is_some()) && self.allow.contains(y) {
                v.push(m);
            }
        };

        let is_star = req.uri().path() == "*";
        let is_unmapped = if is_star {
            false
        } else {
            match self.resource(req) {
                Ok(r) => !r.exists().await.unwrap_or(false),
                Err(_) => true,
            }
        };

        let mut v = Vec::new();
        mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
        // an unmapped url can be locked, which creates it.
        mm(&mut v, "LOCK", DavMethod::LOCK);
        if !is_unmapped {
            mm(&mut v, "UNLOCK", DavMethod::UNLOCK);
        }

        if let Ok(a) = HeaderValue::from_str(&v.join(",")) {
            res.headers_mut().insert("allow", a);
        }

        Ok(res)
    }
}
