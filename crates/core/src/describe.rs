//! Human-oriented introspection tables returned by `describe` surfaces.

use serde::Serialize;

/// A labelled value: either text or a nested sub-table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DescribeValue {
    Text(String),
    Sub(DescribeTable),
}

/// An ordered list of labelled rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DescribeTable(pub Vec<(String, DescribeValue)>);

impl DescribeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.0
            .push((label.into(), DescribeValue::Text(value.into())));
        self
    }

    pub fn push_sub(mut self, label: impl Into<String>, sub: DescribeTable) -> Self {
        self.0.push((label.into(), DescribeValue::Sub(sub)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_tables() {
        let table = DescribeTable::new()
            .push("name", "alice")
            .push_sub("state", DescribeTable::new().push("running", "yes"));
        assert_eq!(table.0.len(), 2);
        assert!(matches!(table.0[1].1, DescribeValue::Sub(_)));
    }
}
