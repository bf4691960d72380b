use thiserror::Error;

/// Errors that can occur when parsing a textual row filter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("Row filter must have the form column=op.value: {0}")]
    Malformed(String),
    #[error("Unknown row filter operator: {0}")]
    UnknownOperator(String),
}

/// Errors returned by the backend query interface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{table} row not found: {id}")]
    NotFound { table: String, id: String },
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Invalid row: {0}")]
    InvalidRow(String),
    #[error("Query failed: {0}")]
    QueryFailed(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parse_error_display() {
        assert_eq!(
            FilterParseError::Malformed("project_id".to_string()).to_string(),
            "Row filter must have the form column=op.value: project_id"
        );
        assert_eq!(
            FilterParseError::UnknownOperator("like".to_string()).to_string(),
            "Unknown row filter operator: like"
        );
    }

    #[test]
    fn test_backend_error_not_found_display() {
        let error = BackendError::NotFound {
            table: "tasks".to_string(),
            id: "abc-123".to_string(),
        };
        assert_eq!(error.to_string(), "tasks row not found: abc-123");
    }

    #[test]
    fn test_backend_error_query_failed_display() {
        let error = BackendError::QueryFailed("statement timeout".to_string());
        assert_eq!(error.to_string(), "Query failed: statement timeout");
    }

    #[test]
    fn test_backend_error_unavailable_display() {
        let error = BackendError::Unavailable("connection reset".to_string());
        assert_eq!(error.to_string(), "Backend unavailable: connection reset");
    }
}
