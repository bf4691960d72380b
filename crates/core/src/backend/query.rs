use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::filter::{cell_to_string, compare_cells, RowFilter};

/// Sort clause of a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A filtered, column-projected read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    /// Projected columns. Empty selects every column.
    pub columns: Vec<String>,
    pub filters: Vec<RowFilter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    /// Starts a query selecting every column of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Restricts the returned columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Adds a row filter. Filters are combined with AND.
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sorts by a column.
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    /// Caps the number of rows returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `row` passes every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Evaluates the query over an in-memory row set.
    ///
    /// Filtering happens before ordering and limiting; projection is last so
    /// filters and ordering can use columns that are not returned.
    pub fn evaluate<'a, I>(&self, rows: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut matched: Vec<&Value> = rows.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(order) = &self.order {
            matched.sort_by(|a, b| {
                let ordering = compare_column(a, b, &order.column);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        matched
            .into_iter()
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|row| self.project(row))
            .collect()
    }

    fn project(&self, row: &Value) -> Value {
        if self.columns.is_empty() {
            return row.clone();
        }
        let Some(object) = row.as_object() else {
            return row.clone();
        };
        let projected: Map<String, Value> = self
            .columns
            .iter()
            .filter_map(|c| object.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        Value::Object(projected)
    }
}

fn compare_column(a: &Value, b: &Value, column: &str) -> Ordering {
    match (a.get(column), b.get(column)) {
        (Some(x), Some(y)) => compare_cells(&cell_to_string(x), &cell_to_string(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
