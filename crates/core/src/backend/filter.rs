//! Row predicates shared by queries and realtime bindings.
//!
//! A filter has the textual form `column=op.value`, e.g. `project_id=eq.42`
//! or `status=in.(todo,done)`. The same filter is used to narrow a query and
//! to scope a change listener, so both sides agree on which rows match.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::FilterParseError;

/// Comparison operator of a [`RowFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Lt,
    In,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::In => "in",
        }
    }
}

impl FromStr for FilterOp {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "neq" => Ok(FilterOp::Neq),
            "gt" => Ok(FilterOp::Gt),
            "lt" => Ok(FilterOp::Lt),
            "in" => Ok(FilterOp::In),
            other => Err(FilterParseError::UnknownOperator(other.to_string())),
        }
    }
}

/// A single-column row predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl RowFilter {
    /// Creates a filter from its parts.
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.to_string(),
        }
    }

    /// Creates an equality filter.
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    /// Creates a set-membership filter.
    pub fn any_of<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let joined = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self::new(column, FilterOp::In, format!("({})", joined))
    }

    /// Returns true if `row` satisfies this filter.
    ///
    /// Rows missing the column never match. Numbers compare numerically,
    /// everything else compares by its string form.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(cell) = row.get(&self.column) else {
            return false;
        };
        let cell = cell_to_string(cell);

        match self.op {
            FilterOp::Eq => cell == self.value,
            FilterOp::Neq => cell != self.value,
            FilterOp::Gt => compare_cells(&cell, &self.value) == Ordering::Greater,
            FilterOp::Lt => compare_cells(&cell, &self.value) == Ordering::Less,
            FilterOp::In => self
                .value
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .any(|candidate| candidate.trim() == cell),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

impl FromStr for RowFilter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| FilterParseError::Malformed(s.to_string()))?;
        let (op, value) = rest
            .split_once('.')
            .ok_or_else(|| FilterParseError::Malformed(s.to_string()))?;
        if column.is_empty() {
            return Err(FilterParseError::Malformed(s.to_string()));
        }

        Ok(Self {
            column: column.to_string(),
            op: op.parse()?,
            value: value.to_string(),
        })
    }
}

/// Renders a JSON cell the way filter values are written.
pub fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Orders two cell strings, numerically when both parse as numbers.
pub fn compare_cells(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let filter: RowFilter = "project_id=eq.42".parse().unwrap();

        assert_eq!(filter.column, "project_id");
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.value, "42");
        assert_eq!(filter.to_string(), "project_id=eq.42");
    }

    #[test]
    fn test_parse_value_with_dots() {
        let filter: RowFilter = "title=eq.v1.2.3".parse().unwrap();

        assert_eq!(filter.value, "v1.2.3");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "project_id".parse::<RowFilter>(),
            Err(FilterParseError::Malformed("project_id".to_string()))
        );
        assert_eq!(
            "project_id=like.4".parse::<RowFilter>(),
            Err(FilterParseError::UnknownOperator("like".to_string()))
        );
        assert!("=eq.4".parse::<RowFilter>().is_err());
    }

    #[test]
    fn test_eq_matches_strings_and_numbers() {
        let row = json!({"status": "todo", "points": 3});

        assert!(RowFilter::eq("status", "todo").matches(&row));
        assert!(RowFilter::eq("points", 3).matches(&row));
        assert!(!RowFilter::eq("status", "done").matches(&row));
    }

    #[test]
    fn test_missing_column_never_matches() {
        let row = json!({"status": "todo"});

        assert!(!RowFilter::eq("project_id", "1").matches(&row));
        assert!(!RowFilter::new("project_id", FilterOp::Neq, "1").matches(&row));
    }

    #[test]
    fn test_numeric_comparison() {
        let row = json!({"points": 10});

        assert!(RowFilter::new("points", FilterOp::Gt, 9).matches(&row));
        assert!(!RowFilter::new("points", FilterOp::Gt, 10).matches(&row));
        assert!(RowFilter::new("points", FilterOp::Lt, 11).matches(&row));
    }

    #[test]
    fn test_in_filter() {
        let row = json!({"status": "done"});

        assert!(RowFilter::any_of("status", ["todo", "done"]).matches(&row));
        assert!(!RowFilter::any_of("status", ["todo"]).matches(&row));
        assert_eq!(
            RowFilter::any_of("status", ["todo", "done"]).to_string(),
            "status=in.(todo,done)"
        );
    }
}
