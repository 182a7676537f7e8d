//! Parser for the WebDAV `If` header (RFC 4918, section 10.4) and for
//! the coded-URL form of the `Lock-Token` header.
//!
//! ```text
//! If = ( 1*No-tag-list | 1*Tagged-list )
//! No-tag-list = List
//! Tagged-list = Resource-Tag 1*List
//! List = "(" 1*Condition ")"
//! Condition = ["Not"] (State-token | "[" entity-tag "]")
//! ```
//!
//! The parser is a small state machine that walks the value one character
//! at a time. Whitespace is insignificant except inside a quoted entity-tag.
use std::fmt;

/// One condition inside a list: a state token or an entity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    /// `<opaquelocktoken:...>`, without the angle brackets.
    Token(String),
    /// `["etag"]`, without the square brackets but with the quotes.
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

/// A parenthesized list. Satisfied when all of its conditions are.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IfList(pub Vec<IfCondition>);

/// A resource tag followed by its lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedList {
    pub resource: String,
    pub lists: Vec<IfList>,
}

/// One parsed `If` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfHeader {
    /// Lists that apply to the request resource. Any one must hold.
    NoTag(Vec<IfList>),
    /// Lists per named resource. Every resource must have a list that holds.
    Tagged(Vec<TaggedList>),
}

/// Malformed `If` or `Lock-Token` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxError {
    /// byte offset in the header value.
    pub pos: usize,
    pub reason: &'static str,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "syntax error at {}: {}", self.pos, self.reason)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between lists, or before the first one.
    Idle,
    /// Inside `<...>` at the top level.
    ResourceTag,
    /// Inside `(...)`, between conditions.
    List,
    /// Inside `<...>` within a list.
    LockToken,
    /// Inside `[...]`.
    ETag,
    /// Inside a quoted string within `[...]`.
    ETagQuoted,
}

fn err<T>(pos: usize, reason: &'static str) -> Result<T, SyntaxError> {
    Err(SyntaxError { pos, reason })
}

struct Parser {
    state: State,
    tagged: bool,
    untagged: Vec<IfList>,
    tags: Vec<TaggedList>,
    list: IfList,
    not: bool,
    buf: String,
}

impl Parser {
    fn new(tagged: bool) -> Parser {
        Parser {
            state: State::Idle,
            tagged,
            untagged: Vec::new(),
            tags: Vec::new(),
            list: IfList::default(),
            not: false,
            buf: String::new(),
        }
    }

    fn push_condition(&mut self, item: IfItem) {
        let not = std::mem::replace(&mut self.not, false);
        self.list.0.push(IfCondition { not, item });
    }

    fn close_list(&mut self, pos: usize) -> Result<(), SyntaxError> {
        if self.list.0.is_empty() {
            return err(pos, "empty list");
        }
        if self.not {
            return err(pos, "Not without a condition");
        }
        let list = std::mem::take(&mut self.list);
        if self.tagged {
            match self.tags.last_mut() {
                Some(tag) => tag.lists.push(list),
                None => return err(pos, "list before resource tag"),
            }
        } else {
            self.untagged.push(list);
        }
        Ok(())
    }

    fn idle(&mut self, pos: usize, c: char) -> Result<(), SyntaxError> {
        match c {
            '(' => {
                if self.tagged && self.tags.is_empty() {
                    return err(pos, "list before resource tag");
                }
                self.state = State::List;
            }
            '<' => {
                if !self.tagged {
                    return err(pos, "resource tag in untagged header");
                }
                if self.tags.last().map(|t| t.lists.is_empty()).unwrap_or(false) {
                    return err(pos, "resource tag without lists");
                }
                self.state = State::ResourceTag;
            }
            _ => return err(pos, "unexpected character"),
        }
        Ok(())
    }

    fn finish(mut self, pos: usize) -> Result<IfHeader, SyntaxError> {
        if self.state != State::Idle {
            return err(pos, "unexpected end of header");
        }
        if self.tagged {
            match self.tags.last() {
                None => err(pos, "empty header"),
                Some(t) if t.lists.is_empty() => err(pos, "resource tag without lists"),
                Some(_) => Ok(IfHeader::Tagged(std::mem::take(&mut self.tags))),
            }
        } else if self.untagged.is_empty() {
            err(pos, "empty header")
        } else {
            Ok(IfHeader::NoTag(self.untagged))
        }
    }
}

/// Parse one `If` header value.
pub fn parse(value: &str) -> Result<IfHeader, SyntaxError> {
    let tagged = match value.trim_start().chars().next() {
        Some('<') => true,
        Some('(') => false,
        Some(_) => return err(value.len() - value.trim_start().len(), "expected '(' or '<'"),
        None => return err(0, "empty header"),
    };

    let mut p = Parser::new(tagged);
    let mut chars = value.char_indices();
    while let Some((pos, c)) = chars.next() {
        if c.is_whitespace() && p.state != State::ETagQuoted {
            continue;
        }
        match p.state {
            State::Idle => p.idle(pos, c)?,
            State::ResourceTag => match c {
                '>' => {
                    if p.buf.is_empty() {
                        return err(pos, "empty resource tag");
                    }
                    let resource = std::mem::take(&mut p.buf);
                    p.tags.push(TaggedList {
                        resource,
                        lists: Vec::new(),
                    });
                    p.state = State::Idle;
                }
                '<' | '(' | ')' | '[' | ']' | '"' => return err(pos, "unexpected character in resource tag"),
                c => p.buf.push(c),
            },
            State::List => match c {
                '<' => p.state = State::LockToken,
                '[' => p.state = State::ETag,
                ')' => {
                    p.close_list(pos)?;
                    p.state = State::Idle;
                }
                'N' if !p.not && value[pos..].starts_with("Not") => {
                    p.not = true;
                    chars.next();
                    chars.next();
                }
                _ => return err(pos, "unexpected character in list"),
            },
            State::LockToken => match c {
                '>' => {
                    if p.buf.is_empty() {
                        return err(pos, "empty state token");
                    }
                    let token = std::mem::take(&mut p.buf);
                    p.push_condition(IfItem::Token(token));
                    p.state = State::List;
                }
                '<' | '(' | ')' | '[' | ']' | '"' => return err(pos, "unexpected character in state token"),
                c => p.buf.push(c),
            },
            State::ETag => match c {
                '"' => {
                    p.buf.push(c);
                    p.state = State::ETagQuoted;
                }
                ']' => {
                    if p.buf.is_empty() {
                        return err(pos, "empty entity tag");
                    }
                    let etag = std::mem::take(&mut p.buf);
                    p.push_condition(IfItem::ETag(etag));
                    p.state = State::List;
                }
                '<' | '>' | '(' | ')' | '[' => return err(pos, "unexpected character in entity tag"),
                c => p.buf.push(c),
            },
            State::ETagQuoted => {
                p.buf.push(c);
                if c == '"' {
                    p.state = State::ETag;
                }
            }
        }
    }
    p.finish(value.len())
}

/// Collect the state tokens named in one or more `If` header values, in
/// order of appearance, without duplicates. Negated tokens are skipped.
///
/// A LOCK request without a body uses these to decide which locks to refresh.
pub fn parse_lock_tokens(values: &[String]) -> Result<Vec<String>, SyntaxError> {
    let mut tokens: Vec<String> = Vec::new();
    for value in values {
        let lists: Vec<IfList> = match parse(value)? {
            IfHeader::NoTag(lists) => lists,
            IfHeader::Tagged(tags) => tags.into_iter().flat_map(|t| t.lists).collect(),
        };
        for cond in lists.into_iter().flat_map(|l| l.0) {
            if let IfItem::Token(t) = cond.item {
                if !cond.not && !tokens.contains(&t) {
                    tokens.push(t);
                }
            }
        }
    }
    Ok(tokens)
}

/// Parse a Coded-URL, `<` URI `>`, as found in the `Lock-Token` header.
pub fn parse_coded_url(value: &str) -> Result<String, SyntaxError> {
    let offset = value.len() - value.trim_start().len();
    let v = value.trim();
    let inner = match v.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
        Some(inner) => inner,
        None => return err(offset, "expected <coded-url>"),
    };
    if inner.is_empty() {
        return err(offset + 1, "empty coded-url");
    }
    if let Some(p) = inner.find(|c: char| c == '<' || c == '>' || c.is_whitespace()) {
        return err(offset + 1 + p, "unexpected character in coded-url");
    }
    Ok(inner.to_string())
}
