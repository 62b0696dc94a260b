//! Compound resource names.
//!
//! Resources are addressed by compound names of the form `scope/leaf`, where
//! the scope identifies a parent grouping (a network, a cluster) and the leaf
//! is the resource's local name. The scope itself may contain further `/`
//! separators; the leaf is always the final segment.

/// A compound name split into its scope and leaf segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundName {
    pub scope: Option<String>,
    pub name: String,
}

impl CompoundName {
    /// Splits a raw name on the last `/`. A name without a separator has no
    /// scope.
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('/') {
            Some((scope, leaf)) => Self {
                scope: Some(scope.to_string()),
                name: leaf.to_string(),
            },
            None => Self {
                scope: None,
                name: raw.to_string(),
            },
        }
    }
}

/// Returns the human-visible leaf segment of a compound name.
pub fn simple_name(raw: &str) -> &str {
    raw.rsplit_once('/').map(|(_, leaf)| leaf).unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scoped() {
        let parsed = CompoundName::parse("main/alice");
        assert_eq!(parsed.scope.as_deref(), Some("main"));
        assert_eq!(parsed.name, "alice");
    }

    #[test]
    fn parse_nested_scope() {
        let parsed = CompoundName::parse("net/main/alice");
        assert_eq!(parsed.scope.as_deref(), Some("net/main"));
        assert_eq!(parsed.name, "alice");
    }

    #[test]
    fn parse_bare() {
        let parsed = CompoundName::parse("alice");
        assert_eq!(parsed.scope, None);
        assert_eq!(parsed.name, "alice");
    }

    #[test]
    fn simple_name_extracts_leaf() {
        assert_eq!(simple_name("main/alice"), "alice");
        assert_eq!(simple_name("alice"), "alice");
    }
}
