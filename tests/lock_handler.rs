#![cfg(feature = "memfs")]

use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body::Body as _;

use davgate::body::Body;
use davgate::{
    DavHandler, DavLockManager, DavResource, FileSystem, LockSystem, LsConfig, MemFs, MemLs,
    TokioScheduler,
};

const EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
</D:lockinfo>"#;

const SHARED: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

struct Share {
    fs: Arc<MemFs>,
    ls: Arc<MemLs>,
}

impl Share {
    fn new() -> Share {
        let _ = env_logger::builder().is_test(true).try_init();
        let fs = MemFs::new();
        fs.create_dir("/share").unwrap();
        let ls = MemLs::new(LsConfig::new(), Arc::new(TokioScheduler::current()));
        Share { fs, ls }
    }

    fn handler(&self, principal: &str) -> DavHandler {
        DavHandler::builder(FileSystem::Custom(self.fs.clone()))
            .strip_prefix("/dav")
            .locksystem(LockSystem::Custom(self.ls.clone()))
            .principal(principal)
            .build()
    }

    fn resource(&self, path: &str) -> Arc<dyn DavResource> {
        use davgate::DavFileSystem;
        self.fs.resource(path).unwrap()
    }
}

fn request(method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Request<http_body::Full<Bytes>> {
    let mut req = Request::builder().method(method).uri(format!("http://localhost/dav{}", path));
    for &(k, v) in headers {
        req = req.header(k, v);
    }
    req.body(http_body::Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn body_string(resp: Response<Body>) -> String {
    let mut body = resp.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.data().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    String::from_utf8(out).unwrap()
}

fn lock_token(resp: &Response<Body>) -> String {
    let v = resp.headers().get("lock-token").unwrap().to_str().unwrap();
    assert!(v.starts_with("<opaquelocktoken:") && v.ends_with('>'));
    v[1..v.len() - 1].to_string()
}

#[tokio::test]
async fn options_advertises_locking() {
    let share = Share::new();
    let resp = share
        .handler("alice")
        .handle(request("OPTIONS", "/share", &[], ""))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("dav").unwrap(), "1,2");
    assert_eq!(resp.headers().get("allow").unwrap(), "OPTIONS,LOCK,UNLOCK");

    let resp = share
        .handler("alice")
        .handle(request("OPTIONS", "/share/missing", &[], ""))
        .await;
    assert_eq!(resp.headers().get("allow").unwrap(), "OPTIONS,LOCK");

    let plain = DavHandler::builder(FileSystem::Custom(share.fs.clone())).build();
    let resp = plain.handle(request("OPTIONS", "/share", &[], "")).await;
    assert_eq!(resp.headers().get("dav").unwrap(), "1");
    assert_eq!(resp.headers().get("allow").unwrap(), "OPTIONS");
    let resp = plain.handle(request("LOCK", "/share/f", &[], EXCLUSIVE)).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn lock_creates_and_unlock_releases() {
    let share = Share::new();
    let alice = share.handler("alice");

    let resp = alice
        .handle(request("LOCK", "/share/new.txt", &[("Depth", "0")], EXCLUSIVE))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let token = lock_token(&resp);
    let body = body_string(resp).await;
    assert!(body.contains("lockdiscovery"));
    assert!(body.contains(&token));
    assert!(body.contains("mailto:alice@example.com"));
    assert!(body.contains("Infinite"));
    assert_eq!(share.fs.contents("/share/new.txt"), Some(Vec::new()));

    // a second exclusive lock conflicts.
    let resp = alice
        .handle(request("LOCK", "/share/new.txt", &[("Depth", "0")], EXCLUSIVE))
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
    assert!(body_string(resp).await.contains("no-conflicting-lock"));

    let resp = alice.handle(request("UNLOCK", "/share/new.txt", &[], "")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = alice
        .handle(request(
            "UNLOCK",
            "/share/new.txt",
            &[("Lock-Token", "<opaquelocktoken:nope>")],
            "",
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let hdr = format!("<{}>", token);
    let resp = alice
        .handle(request("UNLOCK", "/share/new.txt", &[("Lock-Token", &hdr)], ""))
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(share.ls.active_locks(&*share.resource("/share/new.txt")).await.is_empty());

    // the resource exists now.
    let resp = alice
        .handle(request("LOCK", "/share/new.txt", &[], EXCLUSIVE))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn other_principals_are_locked_out() {
    let share = Share::new();
    let alice = share.handler("alice");
    let bob = share.handler("bob");

    let resp = alice.handle(request("LOCK", "/share/f", &[], EXCLUSIVE)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let hdr = format!("<{}>", lock_token(&resp));

    let resp = bob.handle(request("LOCK", "/share/f", &[], SHARED)).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
    let resp = bob
        .handle(request("UNLOCK", "/share/f", &[("Lock-Token", &hdr)], ""))
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // principal supplied per request.
    let anon = DavHandler::builder(FileSystem::Custom(share.fs.clone()))
        .strip_prefix("/dav")
        .locksystem(LockSystem::Custom(share.ls.clone()))
        .build();
    let resp = anon
        .handle(request("UNLOCK", "/share/f", &[("Lock-Token", &hdr)], ""))
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
    let resp = anon
        .handle_with(
            request("UNLOCK", "/share/f", &[("Lock-Token", &hdr)], ""),
            None,
            Some("alice".to_string()),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn refresh_with_empty_body() {
    let share = Share::new();
    let alice = share.handler("alice");
    let resp = alice
        .handle(request("LOCK", "/share/f", &[("Timeout", "Second-60")], SHARED))
        .await;
    let token = lock_token(&resp);
    assert!(body_string(resp).await.contains("Second-60"));

    let cond = format!("(<{}>)", token);
    let resp = alice
        .handle(request(
            "LOCK",
            "/share/f",
            &[("If", &cond), ("Timeout", "Second-600")],
            "",
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("lock-token").is_none());
    assert!(body_string(resp).await.contains("Second-600"));

    // the If header is checked before the refresh happens.
    let resp = alice
        .handle(request("LOCK", "/share/f", &[("If", "(<urn:nope>)")], ""))
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    let resp = alice
        .handle(request("LOCK", "/share/f", &[("If", "(<urn:nope>")], ""))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // nothing to refresh.
    let resp = alice.handle(request("LOCK", "/share/g", &[], "")).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn bad_requests() {
    let share = Share::new();
    let alice = share.handler("alice");

    let resp = alice
        .handle(request("LOCK", "/share/f", &[("Depth", "1")], EXCLUSIVE))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = alice
        .handle(request("LOCK", "/share/f", &[], "<D:lockinfo xmlns:D=\"DAV:\">"))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let big = format!("{}{}", EXCLUSIVE, " ".repeat(davgate::MAX_XML_REQUEST));
    let resp = alice.handle(request("LOCK", "/share/f", &[], &big)).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let resp = alice.handle(request("PROPFIND", "/share", &[], "")).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

    let resp = alice.handle(request("BREW", "/share", &[], "")).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

    let req = Request::builder()
        .method("LOCK")
        .uri("http://localhost/elsewhere/f")
        .body(http_body::Full::new(Bytes::from(EXCLUSIVE)))
        .unwrap();
    assert_eq!(alice.handle(req).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn write_handlers_get_the_lock_session() {
    let share = Share::new();
    let alice = share.handler("alice");
    let bob = share.handler("bob");

    let resp = alice.handle(request("LOCK", "/share/f", &[], EXCLUSIVE)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let put = |headers: &[(&str, &str)]| {
        let mut req = Request::builder().method("PUT").uri("/dav/share/f");
        for &(k, v) in headers {
            req = req.header(k, v);
        }
        req.body(()).unwrap()
    };

    let handle = alice.resource_for_write(&put(&[])).await.unwrap();
    assert!(handle.is_locked_session());
    assert_eq!(handle.resource().canonical_path(), "/share/f");

    assert_eq!(
        bob.resource_for_write(&put(&[])).await.unwrap_err(),
        StatusCode::LOCKED
    );
    assert_eq!(
        alice
            .resource_for_write(&put(&[("If-Match", "\"stale\"")]))
            .await
            .unwrap_err(),
        StatusCode::PRECONDITION_FAILED
    );

    // unlocked files come back as they are.
    let handle = bob.resource_for_write(&put(&[])).await;
    assert!(handle.is_err());
    let req = Request::builder()
        .method("PUT")
        .uri("/dav/share/other")
        .body(())
        .unwrap();
    let handle = bob.resource_for_write(&req).await.unwrap();
    assert!(!handle.is_locked_session());
}
