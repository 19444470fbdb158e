//! Path allow-list and ignore-list authorizers
//!
//! Entries and request paths are compared without their leading `/`. Entries
//! containing `*` are shell patterns matched one path segment at a time, so
//! no wildcard (`*`, `**`, `?` or a class) ever crosses a `/`. All other
//! entries are matched exactly.
//!
//! Pattern syntax per segment: `*` any run of characters, `?` one character,
//! `[abc]`, `[a-z]` and `[^a]` classes, `\` escapes the next character.

use super::{Attributes, Authorizer, AuthzError, Decision, RequestContext};
use async_trait::async_trait;
use glob::Pattern;
use std::collections::HashSet;

/// A path pattern with one glob per `/`-separated segment
#[derive(Debug)]
struct SegmentPattern {
    segments: Vec<Pattern>,
}

impl SegmentPattern {
    fn new(pattern: &str) -> Result<Self, String> {
        let segments = pattern
            .split('/')
            .map(|segment| {
                let glob = glob_segment(segment)?;
                Pattern::new(&glob).map_err(|e| e.to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/');
        self.segments
            .iter()
            .all(|segment| parts.next().is_some_and(|part| segment.matches(part)))
            && parts.next().is_none()
    }
}

/// Rewrite one segment into `glob` syntax.
///
/// Runs of `*` collapse into one, `[^` becomes `[!` and `\x` becomes a
/// bracketed literal.
fn glob_segment(segment: &str) -> Result<String, String> {
    let mut out = String::with_capacity(segment.len() + 4);
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('*' | '?' | '[' | ']')) => {
                    out.push('[');
                    out.push(escaped);
                    out.push(']');
                }
                Some(escaped) => out.push(escaped),
                None => return Err("trailing escape".into()),
            },
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push('*');
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('!');
                }
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => out.push(escaped),
                            None => return Err("trailing escape".into()),
                        },
                        Some(']') => {
                            out.push(']');
                            break;
                        }
                        Some(other) => out.push(other),
                        None => return Err("unclosed character class".into()),
                    }
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Which list a [`PathAuthorizer`] was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Listed paths pass on to later authorizers, others are denied
    Allow,
    /// Listed paths are allowed outright, others pass on
    Ignore,
}

impl PathMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathMode::Allow => "allow_paths",
            PathMode::Ignore => "ignore_paths",
        }
    }
}

/// Matches the raw request path against configured paths.
#[derive(Debug)]
pub struct PathAuthorizer {
    mode: PathMode,
    paths: HashSet<String>,
    patterns: Vec<SegmentPattern>,
}

impl PathAuthorizer {
    /// Deny every path that is not listed.
    ///
    /// An empty list has no opinion on anything.
    pub fn allow_list<S: AsRef<str>>(paths: &[S]) -> Result<Self, AuthzError> {
        Self::new(PathMode::Allow, paths)
    }

    /// Allow every listed path without consulting later authorizers.
    pub fn ignore_list<S: AsRef<str>>(paths: &[S]) -> Result<Self, AuthzError> {
        Self::new(PathMode::Ignore, paths)
    }

    fn new<S: AsRef<str>>(mode: PathMode, input: &[S]) -> Result<Self, AuthzError> {
        let mut paths = HashSet::new();
        let mut patterns = Vec::new();

        for entry in input {
            let entry = entry.as_ref();
            let trimmed = entry.strip_prefix('/').unwrap_or(entry);
            if trimmed.contains('*') {
                let pattern = SegmentPattern::new(trimmed).map_err(|e| {
                    AuthzError::Config(format!("invalid path pattern '{}': {}", entry, e))
                })?;
                patterns.push(pattern);
            } else {
                // "/" becomes "" and is looked up like any other path
                paths.insert(trimmed.to_string());
            }
        }

        Ok(Self {
            mode,
            paths,
            patterns,
        })
    }

    pub fn mode(&self) -> PathMode {
        self.mode
    }

    fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.patterns.is_empty()
    }

    /// Whether `path` is covered by the configured entries
    pub fn matches(&self, path: &str) -> bool {
        let path = path.strip_prefix('/').unwrap_or(path);
        if self.paths.contains(path) {
            return true;
        }
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }
}

#[async_trait]
impl Authorizer for PathAuthorizer {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        if self.is_empty() {
            return Ok(Decision::no_opinion());
        }

        let matched = self.matches(&attributes.path);
        let decision = match (self.mode, matched) {
            (PathMode::Allow, true) | (PathMode::Ignore, false) => Decision::no_opinion(),
            (PathMode::Allow, false) => Decision::deny(format!(
                "Forbidden ({}): path not in allowed paths",
                attributes
            )),
            (PathMode::Ignore, true) => Decision::allow(format!(
                "path {} is in the ignored paths",
                attributes.path
            )),
        };
        Ok(decision)
    }
}
