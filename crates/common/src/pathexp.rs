//! Path expressions
//!
//! Credentials live at `/org/project/env/service/identity/instance`. The org
//! and project segments are always literal; the remaining four admit a full
//! wildcard (`*`), a prefix glob (`db-*`), or an alternation (`[dev|staging]`).
//! A trailing `**` stands for the remaining segments.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SEGMENTS: usize = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathExpError {
    #[error("path expression must start with '/'")]
    MissingLeadingSlash,
    #[error("path expression must have {SEGMENTS} segments, got {0}")]
    WrongSegmentCount(usize),
    #[error("invalid segment: {0:?}")]
    InvalidSegment(String),
    #[error("segment {0:?} must be a literal")]
    LiteralRequired(String),
}

/// One segment of a path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    /// `*` — matches any value
    Wildcard,
    /// `foo*` — matches values starting with the prefix
    Prefix(String),
    /// `[a|b]` — matches any of the listed values
    Alternation(Vec<String>),
}

impl Segment {
    fn parse(raw: &str, literal_only: bool) -> Result<Self, PathExpError> {
        if raw == "*" {
            if literal_only {
                return Err(PathExpError::LiteralRequired(raw.to_string()));
            }
            return Ok(Segment::Wildcard);
        }

        if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            if literal_only {
                return Err(PathExpError::LiteralRequired(raw.to_string()));
            }
            let options: Vec<String> = inner.split('|').map(str::to_string).collect();
            if options.is_empty() || !options.iter().all(|o| is_literal(o)) {
                return Err(PathExpError::InvalidSegment(raw.to_string()));
            }
            return Ok(Segment::Alternation(options));
        }

        if let Some(prefix) = raw.strip_suffix('*') {
            if literal_only {
                return Err(PathExpError::LiteralRequired(raw.to_string()));
            }
            if !is_literal(prefix) {
                return Err(PathExpError::InvalidSegment(raw.to_string()));
            }
            return Ok(Segment::Prefix(prefix.to_string()));
        }

        if !is_literal(raw) {
            return Err(PathExpError::InvalidSegment(raw.to_string()));
        }
        Ok(Segment::Literal(raw.to_string()))
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == value,
            Segment::Wildcard => true,
            Segment::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Segment::Alternation(options) => options.iter().any(|o| o == value),
        }
    }

    fn is_literal(&self) -> bool {
        matches!(self, Segment::Literal(_))
    }
}

fn is_literal(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.')
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(literal) => f.write_str(literal),
            Segment::Wildcard => f.write_str("*"),
            Segment::Prefix(prefix) => write!(f, "{prefix}*"),
            Segment::Alternation(options) => write!(f, "[{}]", options.join("|")),
        }
    }
}

/// A parsed path expression over all six address segments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExp([Segment; SEGMENTS]);

impl PathExp {
    pub fn parse(raw: &str) -> Result<Self, PathExpError> {
        let rest = raw
            .strip_prefix('/')
            .ok_or(PathExpError::MissingLeadingSlash)?;

        let mut parts: Vec<&str> = rest.split('/').collect();

        // A trailing ** stands for the remaining segments.
        if parts.last() == Some(&"**") {
            parts.pop();
            if parts.len() >= SEGMENTS {
                return Err(PathExpError::WrongSegmentCount(parts.len() + 1));
            }
            while parts.len() < SEGMENTS {
                parts.push("*");
            }
        }

        if parts.len() != SEGMENTS {
            return Err(PathExpError::WrongSegmentCount(parts.len()));
        }

        let mut segments = Vec::with_capacity(SEGMENTS);
        for (i, part) in parts.iter().enumerate() {
            // org and project scope registry lookups and must stay concrete
            segments.push(Segment::parse(part, i < 2)?);
        }

        let segments: [Segment; SEGMENTS] = segments
            .try_into()
            .expect("segment count checked above");
        Ok(PathExp(segments))
    }

    pub fn org(&self) -> &str {
        match &self.0[0] {
            Segment::Literal(literal) => literal,
            _ => unreachable!("org segment is always literal"),
        }
    }

    pub fn project(&self) -> &str {
        match &self.0[1] {
            Segment::Literal(literal) => literal,
            _ => unreachable!("project segment is always literal"),
        }
    }

    /// True when every segment is a literal value.
    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(Segment::is_literal)
    }

    /// Whether this expression covers the given concrete path.
    ///
    /// Non-literal segments in `concrete` never match.
    pub fn matches(&self, concrete: &PathExp) -> bool {
        self.0.iter().zip(concrete.0.iter()).all(|(exp, seg)| {
            matches!(seg, Segment::Literal(value) if exp.matches(value))
        })
    }
}

impl fmt::Display for PathExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for PathExp {
    type Err = PathExpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExp::parse(s)
    }
}

impl Serialize for PathExp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PathExp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_concrete_roundtrip() {
        let exp = PathExp::parse("/o/p/dev/svc/ci/1").unwrap();
        assert!(exp.is_concrete());
        assert_eq!(exp.to_string(), "/o/p/dev/svc/ci/1");
        assert_eq!(exp.org(), "o");
        assert_eq!(exp.project(), "p");
    }

    #[test]
    fn test_double_star_expands() {
        let exp = PathExp::parse("/o/p/dev/svc/**").unwrap();
        assert_eq!(exp.to_string(), "/o/p/dev/svc/*/*");

        let concrete = PathExp::parse("/o/p/dev/svc/ci/1").unwrap();
        assert!(exp.matches(&concrete));
    }

    #[test]
    fn test_wildcard_and_alternation_matching() {
        let exp = PathExp::parse("/o/p/[dev|staging]/db-*/*/1").unwrap();

        let hit = PathExp::parse("/o/p/staging/db-primary/ci/1").unwrap();
        assert!(exp.matches(&hit));

        let wrong_env = PathExp::parse("/o/p/prod/db-primary/ci/1").unwrap();
        assert!(!exp.matches(&wrong_env));

        let wrong_service = PathExp::parse("/o/p/dev/cache/ci/1").unwrap();
        assert!(!exp.matches(&wrong_service));

        let wrong_instance = PathExp::parse("/o/p/dev/db-x/ci/2").unwrap();
        assert!(!exp.matches(&wrong_instance));
    }

    #[test]
    fn test_org_must_be_literal() {
        assert_eq!(
            PathExp::parse("/*/p/dev/svc/ci/1"),
            Err(PathExpError::LiteralRequired("*".to_string()))
        );
    }

    #[test]
    fn test_segment_count_enforced() {
        assert!(matches!(
            PathExp::parse("/o/p/dev"),
            Err(PathExpError::WrongSegmentCount(3))
        ));
        assert!(matches!(
            PathExp::parse("o/p/dev/svc/ci/1"),
            Err(PathExpError::MissingLeadingSlash)
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let exp = PathExp::parse("/o/p/dev/svc/*/*").unwrap();
        let json = serde_json::to_string(&exp).unwrap();
        let back: PathExp = serde_json::from_str(&json).unwrap();
        assert_eq!(exp, back);
    }
}
