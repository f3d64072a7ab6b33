//! Topic selectors
//!
//! A selector is what a subscriber asks for, or what a JWT scope grants. It
//! is one of:
//! - `*`, matching every topic
//! - an exact topic IRI
//! - an RFC 6570 URI template (`/books/{id}`, `{+base}/reviews`, `/a{/path*}`)
//! - a glob, where a bare `*` outside braces matches any run of characters
//!   (`/users/42/*`)
//!
//! Templates and globs are compiled into an anchored regex once, when the
//! selector is built. A selector that does not parse as a template falls back
//! to exact matching, so compilation never fails.
//!
//! Compiled selectors are immutable and can be shared between dispatch
//! threads without locking.

use regex::Regex;

#[derive(Debug, Clone)]
pub enum TopicSelector {
    Any,
    Exact(String),
    Pattern { raw: String, regex: Regex },
}

impl TopicSelector {
    /// Compile a raw selector string.
    pub fn compile(raw: &str) -> Self {
        if raw == "*" {
            return TopicSelector::Any;
        }

        match translate(raw).map(|pattern| Regex::new(&pattern)) {
            Some(Ok(regex)) => TopicSelector::Pattern {
                raw: raw.to_string(),
                regex,
            },
            Some(Err(err)) => {
                tracing::debug!(selector = raw, error = %err, "selector regex rejected, matching literally");
                TopicSelector::Exact(raw.to_string())
            }
            None => TopicSelector::Exact(raw.to_string()),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicSelector::Any => true,
            TopicSelector::Exact(raw) => raw == topic,
            TopicSelector::Pattern { raw, regex } => raw == topic || regex.is_match(topic),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TopicSelector::Any => "*",
            TopicSelector::Exact(raw) | TopicSelector::Pattern { raw, .. } => raw,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TopicSelector::Any)
    }
}

impl From<&str> for TopicSelector {
    fn from(raw: &str) -> Self {
        TopicSelector::compile(raw)
    }
}

/// Compile `selector` and test it against `topic` in one go.
pub fn matches(selector: &str, topic: &str) -> bool {
    selector == topic || TopicSelector::compile(selector).matches(topic)
}

/// Translate a template or glob into an anchored regex.
///
/// Returns `None` when the selector has no dynamic part or is malformed.
fn translate(raw: &str) -> Option<String> {
    let mut pattern = String::with_capacity(raw.len() * 2 + 2);
    pattern.push('^');

    let mut dynamic = false;
    let mut rest = raw;
    while let Some(pos) = rest.find(&['{', '}', '*'][..]) {
        pattern.push_str(&regex::escape(&rest[..pos]));
        match rest.as_bytes()[pos] {
            b'*' => {
                pattern.push_str(".*");
                rest = &rest[pos + 1..];
            }
            b'{' => {
                let end = pos + rest[pos..].find('}')?;
                pattern.push_str(expression(&rest[pos + 1..end])?);
                rest = &rest[end + 1..];
            }
            _ => return None,
        }
        dynamic = true;
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    dynamic.then_some(pattern)
}

/// Regex fragment for the body of one `{...}` expression.
fn expression(body: &str) -> Option<&'static str> {
    let (operator, variables) = match body.chars().next()? {
        op @ ('+' | '#' | '.' | '/' | ';' | '?' | '&') => (Some(op), &body[1..]),
        // reserved for future RFC 6570 extensions
        '=' | ',' | '!' | '@' | '|' => return None,
        _ => (None, body),
    };

    let mut count = 0;
    let mut explode = false;
    for spec in variables.split(',') {
        let name = if let Some(name) = spec.strip_suffix('*') {
            explode = true;
            name
        } else if let Some((name, length)) = spec.split_once(':') {
            let valid_length = !length.is_empty()
                && length.len() <= 4
                && length.bytes().all(|b| b.is_ascii_digit())
                && !length.starts_with('0');
            if !valid_length {
                return None;
            }
            name
        } else {
            spec
        };
        if !is_variable_name(name) {
            return None;
        }
        count += 1;
    }
    let multiple = explode || count > 1;

    Some(match operator {
        None => "[^/?#]*",
        Some('+') => ".*",
        Some('#') => "(?:#.*)?",
        Some('.') if multiple => r"(?:\.[^/?#]*)?",
        Some('.') => r"(?:\.[^/?#.]*)?",
        Some('/') if multiple => "(?:/[^?#]*)?",
        Some('/') => "(?:/[^/?#]*)?",
        Some(';') => "(?:;[^/?#]*)?",
        Some('?') => r"(?:\?[^#]*)?",
        Some('&') => "(?:&[^#]*)?",
        Some(_) => return None,
    })
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '%')
}
