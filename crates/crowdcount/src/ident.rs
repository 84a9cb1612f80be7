//! Object names that end up spliced into DDL and stage references.
//!
//! Values (paths, TTLs) always travel as statement bindings; identifiers
//! cannot, so they are restricted to the unquoted identifier grammar.

use crate::error::CrowdError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,254}$"));

fn is_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_ok_and(|pattern| pattern.is_match(name))
}

/// A single unquoted identifier (database, schema, stage or table name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(name: &str) -> Result<Self, CrowdError> {
        let trimmed = name.trim();
        if is_identifier(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(CrowdError::InvalidIdentifier(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison, matching unquoted identifier resolution
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dotted name such as `db.schema.table`, one to three parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName(Vec<Identifier>);

impl QualifiedName {
    pub fn parse(name: &str) -> Result<Self, CrowdError> {
        let parts = name
            .split('.')
            .map(Identifier::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CrowdError::InvalidIdentifier(name.to_string()))?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(CrowdError::InvalidIdentifier(name.to_string()));
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[Identifier] {
        &self.0
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_pattern_compiles() {
        assert!(IDENTIFIER.is_ok());
    }

    #[test]
    fn test_identifier_accepts_unquoted_names() {
        assert_eq!(Identifier::parse("KAMESH_DEMOS").expect("valid").as_str(), "KAMESH_DEMOS");
        assert_eq!(Identifier::parse(" snaps ").expect("valid").as_str(), "snaps");
        assert!(Identifier::parse("_x$1").is_ok());
    }

    #[test]
    fn test_identifier_rejects_injection() {
        assert!(Identifier::parse("").is_err());
        assert!(Identifier::parse("1abc").is_err());
        assert!(Identifier::parse("a; DROP TABLE x").is_err());
        assert!(Identifier::parse("a'b").is_err());
        assert!(Identifier::parse("a.b").is_err());
    }

    #[test]
    fn test_identifier_matches_case_insensitively() {
        let ident = Identifier::parse("information_schema").expect("valid");
        assert!(ident.matches("INFORMATION_SCHEMA"));
        assert!(!ident.matches("PUBLIC"));
    }

    #[test]
    fn test_qualified_name() {
        let name = QualifiedName::parse("kamesh_demos.conferences.smart_crowd_counter")
            .expect("valid");
        assert_eq!(name.parts().len(), 3);
        assert_eq!(name.to_string(), "kamesh_demos.conferences.smart_crowd_counter");

        assert!(QualifiedName::parse("a.b.c.d").is_err());
        assert!(QualifiedName::parse("a..b").is_err());
        assert!(QualifiedName::parse("a.b c").is_err());
    }
}
