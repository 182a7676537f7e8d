//! Lock tokens and the wire forms of the depth, scope and timeout fields.
use std::fmt;
use std::time::Duration;

use regex::Regex;
use uuid::Uuid;

/// URI scheme of every token minted here.
pub const TOKEN_SCHEME: &str = "opaquelocktoken:";

/// Largest timeout that can be expressed on the wire, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 0xFFFF_FFFF;

lazy_static! {
    static ref RE_SECONDS: Regex = Regex::new(r"^(?i)second-(\d+)$").unwrap();
}

/// Mint a new lock token: `opaquelocktoken:` followed by a random (version 4)
/// UUID in its 36-character hyphenated form.
pub fn new_token() -> String {
    format!("{}{}", TOKEN_SCHEME, Uuid::new_v4().hyphenated())
}

/// Depth of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    /// Only the resource itself.
    ResourceOnly,
    /// The resource and everything below it.
    Infinite,
}

impl LockDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockDepth::ResourceOnly => "0",
            LockDepth::Infinite => "infinity",
        }
    }
}

impl fmt::Display for LockDepth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeout of a lock, as requested by a client or as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    /// No preference; the lock system default applies.
    Unspecified,
    Infinite,
    Finite(Duration),
}

impl LockTimeout {
    /// Parse a `Timeout` header value: a comma and/or space separated list of
    /// `Infinite` and `Second-<n>` alternatives. The first one recognized wins;
    /// seconds are clamped to [`MAX_TIMEOUT_SECS`].
    pub fn parse(value: &str) -> LockTimeout {
        for word in value.split(|c: char| c == ',' || c.is_whitespace()) {
            if word.eq_ignore_ascii_case("infinite") {
                return LockTimeout::Infinite;
            }
            let secs = match RE_SECONDS.captures(word) {
                Some(caps) => caps[1].parse::<u64>().unwrap_or(MAX_TIMEOUT_SECS),
                None => continue,
            };
            return LockTimeout::Finite(Duration::from_secs(secs.min(MAX_TIMEOUT_SECS)));
        }
        LockTimeout::Unspecified
    }
}

impl From<Option<Duration>> for LockTimeout {
    fn from(d: Option<Duration>) -> LockTimeout {
        match d {
            Some(d) => LockTimeout::Finite(d),
            None => LockTimeout::Infinite,
        }
    }
}

/// Wire form: `Infinite` or `Second-<n>`. `Unspecified` renders empty.
impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockTimeout::Unspecified => Ok(()),
            LockTimeout::Infinite => f.write_str("Infinite"),
            LockTimeout::Finite(d) => {
                write!(f, "Second-{}", d.as_secs().min(MAX_TIMEOUT_SECS))
            }
        }
    }
}

pub(crate) fn scope_str(exclusive: bool) -> &'static str {
    if exclusive {
        "exclusive"
    } else {
        "shared"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let token = new_token();
        let uuid = token.strip_prefix(TOKEN_SCHEME).unwrap();
        assert_eq!(uuid.len(), 36);
        let b = uuid.as_bytes();
        assert_eq!((b[8], b[13], b[18], b[23]), (b'-', b'-', b'-', b'-'));
        // version nibble
        assert_eq!(b[14], b'4');
        // variant bits 10xx
        assert!(matches!(b[19], b'8' | b'9' | b'a' | b'b'));
        assert_ne!(new_token(), token);
    }

    #[test]
    fn parse_timeout() {
        assert_eq!(LockTimeout::parse("Infinite"), LockTimeout::Infinite);
        assert_eq!(
            LockTimeout::parse("Second-60"),
            LockTimeout::Finite(Duration::from_secs(60))
        );
        assert_eq!(
            LockTimeout::parse("Extended-1, second-4100000000"),
            LockTimeout::Finite(Duration::from_secs(4100000000))
        );
        assert_eq!(
            LockTimeout::parse("Second-99999999999, Infinite"),
            LockTimeout::Finite(Duration::from_secs(MAX_TIMEOUT_SECS))
        );
        assert_eq!(
            LockTimeout::parse("Second-x Infinite"),
            LockTimeout::Infinite
        );
        assert_eq!(LockTimeout::parse("bogus"), LockTimeout::Unspecified);
        assert_eq!(LockTimeout::parse(""), LockTimeout::Unspecified);
    }

    #[test]
    fn format_timeout() {
        assert_eq!(LockTimeout::Infinite.to_string(), "Infinite");
        assert_eq!(
            LockTimeout::Finite(Duration::from_millis(61500)).to_string(),
            "Second-61"
        );
        assert_eq!(
            LockTimeout::Finite(Duration::from_secs(u64::MAX)).to_string(),
            "Second-4294967295"
        );
        assert_eq!(LockTimeout::Unspecified.to_string(), "");
    }

    #[test]
    fn depth_and_scope() {
        assert_eq!(LockDepth::Infinite.to_string(), "infinity");
        assert_eq!(LockDepth::ResourceOnly.as_str(), "0");
        assert_eq!(scope_str(true), "exclusive");
        assert_eq!(scope_str(false), "shared");
    }
}
