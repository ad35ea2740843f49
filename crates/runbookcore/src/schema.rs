use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// Identity of a message contract: a `(name, version)` pair.
///
/// Two schemas are compatible only when both parts are identical.
/// Schemas are written as `name/version`; a bare `name` means version
/// [`DEFAULT_SCHEMA_VERSION`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schema {
    name: String,
    version: String,
}

impl Schema {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse `name/version` or `name`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (name, version) = match s.rsplit_once('/') {
            Some((name, version)) => (name, version),
            None => (s, DEFAULT_SCHEMA_VERSION),
        };
        if name.is_empty() {
            return Err(format!("schema '{}' has an empty name", s));
        }
        if version.is_empty() {
            return Err(format!("schema '{}' has an empty version", s));
        }
        Ok(Self::new(name, version))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Compare versions numerically component by component. Non-numeric
    /// components fall back to string comparison.
    pub fn cmp_version(&self, other: &Schema) -> Ordering {
        compare_versions(&self.version, &other.version)
    }
}

pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl TryFrom<String> for Schema {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Schema::parse(&value)
    }
}

impl From<Schema> for String {
    fn from(schema: Schema) -> Self {
        schema.to_string()
    }
}

impl std::str::FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schema::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_version() {
        let schema = Schema::parse("finding/2.0.0").unwrap();
        assert_eq!(schema.name(), "finding");
        assert_eq!(schema.version(), "2.0.0");
    }

    #[test]
    fn test_parse_defaults_version() {
        let schema = Schema::parse("standard_input").unwrap();
        assert_eq!(schema, Schema::new("standard_input", "1.0.0"));
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(Schema::parse("/1.0.0").is_err());
        assert!(Schema::parse("name/").is_err());
        assert!(Schema::parse("").is_err());
    }

    #[test]
    fn test_identity_requires_both_parts() {
        assert_ne!(Schema::new("s", "1.0.0"), Schema::new("s", "1.0.1"));
        assert_ne!(Schema::new("s", "1.0.0"), Schema::new("t", "1.0.0"));
    }

    #[test]
    fn test_numeric_version_ordering() {
        let a = Schema::new("s", "1.10.0");
        let b = Schema::new("s", "1.9.3");
        assert_eq!(a.cmp_version(&b), Ordering::Greater);
        assert_eq!(b.cmp_version(&a), Ordering::Less);
        assert_eq!(a.cmp_version(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_serde_as_string() {
        let schema = Schema::new("standard_input", "1.0.0");
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, "\"standard_input/1.0.0\"");
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
