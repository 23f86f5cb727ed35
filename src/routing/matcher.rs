//! Path pattern parsing and matching.
//!
//! # Responsibilities
//! - Split patterns and paths into `/`-delimited segments
//! - Bind `:name` segments to the corresponding path segment
//! - Require every other segment to match literally
//!
//! # Design Decisions
//! - Empty segments (leading, trailing, doubled slashes) are dropped
//! - Segment counts must be equal; there are no wildcards
//! - Matching is case-sensitive
//! - No regex, so matching is linear in the segment count

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Path parameters bound by a successful match.
pub type Params = HashMap<String, String>;

/// Split a path into its non-empty `/`-delimited segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled route pattern such as `/users/:id/posts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern, rejecting empty or repeated parameter names.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in split_path(raw) {
            match segment.strip_prefix(':') {
                Some("") => {
                    return Err(Error::Parse {
                        pattern: raw.to_string(),
                        reason: "parameter segment without a name".into(),
                    })
                }
                Some(name) => {
                    if segments.contains(&Segment::Param(name.to_string())) {
                        return Err(Error::Parse {
                            pattern: raw.to_string(),
                            reason: format!("parameter {name:?} appears twice"),
                        });
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(segment.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern exactly as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter names in the order they appear.
    pub fn param_names(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Match a request path, returning the bound parameters.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
            }
        }
        Some(params)
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_drops_empty_segments() {
        let parts: Vec<&str> = split_path("//a///b/").collect();
        assert_eq!(parts, vec!["a", "b"]);
        assert_eq!(split_path("/").count(), 0);
    }

    #[test]
    fn test_named_segment_binds() {
        let pattern = PathPattern::parse("/hello/:name").unwrap();
        let params = pattern.matches("/hello/world").unwrap();
        assert_eq!(params.get("name").map(String::as_str), Some("world"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_segment_count_mismatch() {
        let pattern = PathPattern::parse("/hello/:name").unwrap();
        assert!(pattern.matches("/hello").is_none());
        assert!(pattern.matches("/hello/world/again").is_none());
    }

    #[test]
    fn test_literal_mismatch() {
        let pattern = PathPattern::parse("/hello/:name").unwrap();
        assert!(pattern.matches("/goodbye/world").is_none());
        // Case sensitive
        assert!(pattern.matches("/Hello/world").is_none());
    }

    #[test]
    fn test_slashes_are_normalized() {
        let pattern = PathPattern::parse("api//users/:id/").unwrap();
        let params = pattern.matches("/api/users/7").unwrap();
        assert_eq!(params["id"], "7");
        assert!(PathPattern::parse("/").unwrap().matches("").is_some());
    }

    #[test]
    fn test_param_names_in_order() {
        let pattern = PathPattern::parse("/a/:x/b/:y").unwrap();
        assert_eq!(pattern.param_names(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(matches!(PathPattern::parse("/a/:"), Err(Error::Parse { .. })));
        assert!(matches!(PathPattern::parse("/:id/:id"), Err(Error::Parse { .. })));
    }
}
