use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A reshape or join step produced a different number of rows than it was given.
    #[error("{stage}: {}", describe_drift(.expected, .actual))]
    RowCount {
        stage: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed contact_info for student {id}: {reason}")]
    MalformedContact { id: i64, reason: String },

    #[error("Malformed mailing address for student {id}: '{address}' split into {parts} parts, expected 4")]
    MalformedAddress {
        id: i64,
        address: String,
        parts: usize,
    },

    #[error("Invalid value for {column} on row {id}: {value}")]
    InvalidValue {
        column: &'static str,
        id: i64,
        value: String,
    },
}

impl EtlError {
    /// Errors that mean the batch content itself is corrupt. These abort the run
    /// instead of degrading to "no data".
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            EtlError::RowCount { .. }
                | EtlError::MalformedContact { .. }
                | EtlError::MalformedAddress { .. }
                | EtlError::InvalidValue { .. }
        )
    }
}

fn describe_drift(expected: &usize, actual: &usize) -> String {
    let (expected, actual) = (*expected, *actual);
    if actual > expected {
        format!("returned {} more rows than the input ({expected} -> {actual})", actual - expected)
    } else if actual < expected {
        format!("returned {} fewer rows than the input ({expected} -> {actual})", expected - actual)
    } else {
        format!("row count unchanged ({expected})")
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_message_reports_direction() {
        let more = EtlError::RowCount { stage: "join".into(), expected: 3, actual: 5 };
        assert_eq!(more.to_string(), "join: returned 2 more rows than the input (3 -> 5)");

        let fewer = EtlError::RowCount { stage: "clean".into(), expected: 3, actual: 1 };
        assert_eq!(fewer.to_string(), "clean: returned 2 fewer rows than the input (3 -> 1)");
    }

    #[test]
    fn classifies_data_errors_by_kind() {
        assert!(EtlError::RowCount { stage: "x".into(), expected: 1, actual: 2 }.is_data_error());
        assert!(EtlError::MalformedAddress { id: 1, address: "a".into(), parts: 1 }.is_data_error());
        assert!(!EtlError::Config("bad".into()).is_data_error());
        assert!(!EtlError::Database(rusqlite::Error::InvalidQuery).is_data_error());
    }
}
