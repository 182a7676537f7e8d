use std::io::{Cursor, Write};

use bitflags::bitflags;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::body::Body;
use crate::errors::{DavError, DavResult};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const PATCH = 0x0008;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        const WEBDAV_LOCKING = Self::LOCK.bits() | Self::UNLOCK.bits();
    }
}

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::PATCH => DavMethod::PATCH,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

pub fn dav_xml_error(body: &str) -> Body {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n\
        <D:error xmlns:D=\"DAV:\">\n\
        {body}\n\
        </D:error>\n"
    );
    Body::from(xml)
}

// strip the mount prefix. "/dav" strips "/dav/x" and "/dav", not "/davx".
fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path.to_string());
    }
    match path.strip_prefix(prefix) {
        Some("") => Some("/".to_string()),
        Some(rest) if rest.starts_with('/') => Some(rest.to_string()),
        _ => None,
    }
}

fn decode(path: &str) -> Option<String> {
    percent_decode_str(path)
        .decode_utf8()
        .ok()
        .map(|p| p.into_owned())
}

/// Resolve a request URI to a share-relative, decoded path.
pub(crate) fn uri_to_path(uri: &http::Uri, prefix: &str) -> DavResult<String> {
    let path = decode(uri.path()).ok_or(DavError::InvalidPath)?;
    if !path.starts_with('/') {
        return Err(DavError::InvalidPath);
    }
    strip_prefix(&path, prefix).ok_or(DavError::InvalidPath)
}

/// Resolve a resource tag from an `If` header (absolute URL or absolute
/// path) to a share-relative, decoded path. `None` if it is not a valid
/// reference or lies outside of `prefix`.
pub(crate) fn href_to_path(href: &str, prefix: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(href).ok()?;
    let path = decode(url.path())?;
    strip_prefix(&path, prefix)
}

// A buffer that implements "Write".
#[derive(Clone)]
pub struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods() {
        let lock = http::Method::from_bytes(b"LOCK").unwrap();
        assert_eq!(dav_method(&lock).unwrap(), DavMethod::LOCK);
        let bogus = http::Method::from_bytes(b"BREW").unwrap();
        assert!(dav_method(&bogus).is_err());
        assert!(DavMethod::WEBDAV_RW.contains(DavMethod::WEBDAV_LOCKING));
    }

    #[test]
    fn hrefs() {
        assert_eq!(
            href_to_path("http://example.com/share/a%20b", "").as_deref(),
            Some("/share/a b")
        );
        assert_eq!(href_to_path("/dav/x", "/dav").as_deref(), Some("/x"));
        assert_eq!(href_to_path("/dav", "/dav/").as_deref(), Some("/"));
        assert_eq!(href_to_path("/davx", "/dav"), None);
        assert_eq!(href_to_path("/x/%ff", ""), None);
    }

    #[test]
    fn request_paths() {
        let uri: http::Uri = "http://host/dav/share/f%C3%A9?x=1".parse().unwrap();
        assert_eq!(uri_to_path(&uri, "/dav").unwrap(), "/share/fé");
        let uri: http::Uri = "/other".parse().unwrap();
        assert!(uri_to_path(&uri, "/dav").is_err());
    }
}
