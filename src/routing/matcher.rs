//! # Path Matcher
//!
//! Compiles route patterns at registration time and matches concrete request
//! paths against them, extracting named parameters.
//!
//! Pattern grammar:
//! - a literal segment matches itself exactly
//! - `{name}` matches exactly one non-empty, non-`/` segment and binds `name`
//! - a trailing `*` matches any remaining suffix, including `/` separators
//!
//! Matching is anchored: the whole path must be consumed. There is no
//! partial-prefix matching here; prefix transforms are applied by the route
//! after a successful match. Ties among equally-specific patterns are broken
//! by route priority in the router, never by the matcher.

use crate::core::error::{GatewayError, GatewayResult};
use std::collections::HashMap;

/// One compiled pattern segment
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Matches this segment text exactly
    Literal(String),
    /// Matches any single non-empty segment, binding it to the name
    Param(String),
    /// Matches the entire remaining suffix; only valid in last position
    Wildcard,
}

/// A route pattern compiled for repeated matching
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern, validating it up front
    ///
    /// Registration uses this so malformed patterns are rejected
    /// synchronously and never surface mid-request.
    pub fn compile(pattern: &str) -> GatewayResult<Self> {
        if !pattern.starts_with('/') {
            return Err(GatewayError::config(format!(
                "route pattern must start with '/': {pattern}"
            )));
        }

        let parts: Vec<&str> = pattern[1..].split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let is_last = index == parts.len() - 1;
            if *part == "*" {
                if !is_last {
                    return Err(GatewayError::config(format!(
                        "wildcard '*' is only allowed as the final segment: {pattern}"
                    )));
                }
                segments.push(Segment::Wildcard);
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(GatewayError::config(format!(
                        "empty parameter name in pattern: {pattern}"
                    )));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains('{') || part.contains('}') {
                return Err(GatewayError::config(format!(
                    "malformed parameter segment '{part}' in pattern: {pattern}"
                )));
            } else {
                segments.push(Segment::Literal((*part).to_string()));
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The original pattern text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a concrete path, extracting bound parameters
    ///
    /// Returns `None` when the path does not match; an empty parameter map
    /// is a valid successful match.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path = path.strip_prefix('/')?;
        let mut params = HashMap::new();
        let mut remaining = path;

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    // Consumes everything left, separators included.
                    return Some(params);
                }
                Segment::Literal(text) => {
                    let (head, rest) = split_segment(remaining);
                    if head != text {
                        return None;
                    }
                    remaining = rest;
                }
                Segment::Param(name) => {
                    let (head, rest) = split_segment(remaining);
                    if head.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), head.to_string());
                    remaining = rest;
                }
            }

            let is_last = index == self.segments.len() - 1;
            if is_last && !remaining.is_empty() {
                // Anchored match: leftover path segments mean no match.
                return None;
            }
            if !is_last && remaining.is_empty() {
                // Pattern expects more segments than the path has, unless the
                // only thing left is a trailing wildcard.
                let trailing_wildcard = self.segments[index + 1..]
                    .first()
                    .map(|s| *s == Segment::Wildcard)
                    .unwrap_or(false);
                if !trailing_wildcard {
                    return None;
                }
            }
        }

        Some(params)
    }
}

/// Split off the first path segment, returning (segment, rest-after-slash)
fn split_segment(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((head, rest)) => (head, rest),
        None => (path, ""),
    }
}
