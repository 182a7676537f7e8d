use std::fmt;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

use crate::ifheader;
use crate::locktoken::{LockDepth, LockTimeout};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        Err(invalid())
    } else {
        Ok(v)
    }
}

fn push<E>(values: &mut E, s: &str)
where
    E: Extend<HeaderValue>,
{
    if let Ok(value) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(value));
    }
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    /// The lock depth this header asks for. `Depth: 1` has no meaning
    /// for a lock.
    pub fn lock_depth(&self) -> Option<LockDepth> {
        match self {
            Depth::Zero => Some(LockDepth::ResourceOnly),
            Depth::One => None,
            Depth::Infinity => Some(LockDepth::Infinite),
        }
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            v if v.eq_ignore_ascii_case(b"infinity") => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Timeout: header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub LockTimeout);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        for value in values {
            let value = value.to_str().map_err(|_| invalid())?;
            match LockTimeout::parse(value) {
                LockTimeout::Unspecified => continue,
                t => return Ok(Timeout(t)),
            }
        }
        Ok(Timeout(LockTimeout::Unspecified))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if self.0 != LockTimeout::Unspecified {
            push(values, &self.0.to_string());
        }
    }
}

/// Lock-Token: header. The token is stored without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(|_| invalid())?;
        ifheader::parse_coded_url(value)
            .map(LockToken)
            .map_err(|_| invalid())
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        push(values, &format!("<{}>", self.0));
    }
}

/// If: header, one entry per field value. Parsing is left to the caller so
/// that a malformed value can be told apart from an absent header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<String>);

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            v.push(value.to_str().map_err(|_| invalid())?.to_string());
        }
        Ok(If(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        for v in &self.0 {
            push(values, v);
        }
    }
}

/// Value of If-Match / If-None-Match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETagList {
    Star,
    Tags(Vec<String>),
}

impl ETagList {
    /// True if the list names `etag` or is `*`. A resource without an
    /// ETag never matches.
    pub fn matches(&self, etag: Option<&str>) -> bool {
        let etag = match etag {
            Some(etag) => etag,
            None => return false,
        };
        match self {
            ETagList::Star => true,
            ETagList::Tags(tags) => tags.iter().any(|t| t == etag),
        }
    }

    fn decode<'i, I>(values: &mut I) -> Result<ETagList, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut tags = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| invalid())?;
            for tag in split_etags(value) {
                if tag == "*" {
                    return Ok(ETagList::Star);
                }
                tags.push(tag.to_string());
            }
        }
        if tags.is_empty() {
            return Err(invalid());
        }
        Ok(ETagList::Tags(tags))
    }
}

impl fmt::Display for ETagList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ETagList::Star => f.write_str("*"),
            ETagList::Tags(tags) => f.write_str(&tags.join(", ")),
        }
    }
}

// Split on commas that are not inside a quoted string.
fn split_etags(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                out.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(value[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}

/// If-Match: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfMatch(pub ETagList);

impl Header for IfMatch {
    fn name() -> &'static HeaderName {
        &http::header::IF_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfMatch(ETagList::decode(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        push(values, &self.0.to_string());
    }
}

/// If-None-Match: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfNoneMatch(pub ETagList);

impl Header for IfNoneMatch {
    fn name() -> &'static HeaderName {
        &http::header::IF_NONE_MATCH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(IfNoneMatch(ETagList::decode(values)?))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        push(values, &self.0.to_string());
    }
}
