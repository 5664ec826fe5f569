use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Categorized error types for backend failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE 42601, MySQL 1064)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, constraint violation)
    Execution,
    /// Transaction state errors (e.g., deadlock, transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error carried out of a backend driver.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    /// Categorized error type
    pub category: ErrorCategory,
    /// SQLSTATE or server error number, empty when the driver gave none
    pub code: String,
    /// Primary error message
    pub message: String,
    /// Optional detail providing more context
    pub detail: Option<String>,
    /// Optional hint suggesting a fix
    pub hint: Option<String>,
    /// Computed line number (1-based) from the error position, if available
    pub line: Option<usize>,
    /// Computed column number (1-based) from the error position, if available
    pub col: Option<usize>,
}

impl StructuredError {
    /// Create a StructuredError from a tokio_postgres error, using the query text
    /// to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            StructuredError {
                category: categorize_sqlstate(&code),
                code,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            StructuredError {
                category,
                code: String::new(),
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                hint: None,
                line: None,
                col: None,
            }
        }
    }

    /// Create a StructuredError from a MySQL server error number and message.
    pub fn from_mysql(number: Option<u16>, message: impl Into<String>) -> Self {
        let category = number
            .map(categorize_mysql_errno)
            .unwrap_or(ErrorCategory::Connection);
        StructuredError {
            category,
            code: number.map(|n| n.to_string()).unwrap_or_default(),
            message: message.into(),
            detail: None,
            hint: None,
            line: None,
            col: None,
        }
    }

    /// Create a simple error from a plain string (for non-database errors).
    pub fn from_string(msg: impl Into<String>) -> Self {
        StructuredError {
            category: ErrorCategory::Unknown,
            code: String::new(),
            message: msg.into(),
            detail: None,
            hint: None,
            line: None,
            col: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// Format as a rich multi-line string for logs and the CLI.
    pub fn display_full(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}: {}", self.category, self.message));

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }

        if !self.code.is_empty() {
            lines.push(format!("  Code: {}", self.code));
        }

        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }

        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }

        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, 42702 = ambiguous_column
                ErrorCategory::Semantic
            }
        }
        "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Categorize a MySQL server error number.
fn categorize_mysql_errno(number: u16) -> ErrorCategory {
    match number {
        1064 | 1149 => ErrorCategory::Syntax,
        1046 | 1049 | 1051 | 1052 | 1054 | 1060 | 1109 | 1146 | 1247 => ErrorCategory::Semantic,
        1205 | 1213 | 1792 => ErrorCategory::Transaction,
        1040 | 1045 | 1129 | 1130 | 1152 | 1153 | 2002 | 2003 | 2006 | 2013 => {
            ErrorCategory::Connection
        }
        1000..=1999 => ErrorCategory::Execution,
        _ => ErrorCategory::Unknown,
    }
}

/// Outcome classification of one execution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    /// The backend ran the statement and rejected it.
    Failed,
    /// The statement never reached the backend (guard, routing).
    Rejected,
    /// The document-store translator could not express the statement.
    Unsupported,
}

/// A single decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<CellValue>),
    Unknown(String),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Decimal(d) => d.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
            CellValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.display()).collect();
                format!("{{{}}}", items.join(", "))
            }
            CellValue::Unknown(s) => s.clone(),
        }
    }

    /// JSON view used by the CLI output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int16(i) => Value::from(*i),
            CellValue::Int32(i) => Value::from(*i),
            CellValue::Int64(i) => Value::from(*i),
            CellValue::Float32(f) => Value::from(*f as f64),
            CellValue::Float64(f) => Value::from(*f),
            CellValue::Json(j) => j.clone(),
            CellValue::Array(arr) => Value::Array(arr.iter().map(|v| v.to_json()).collect()),
            other => Value::String(other.display()),
        }
    }

    /// Convert a document-store value into a cell.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CellValue::Int64(i)
                } else {
                    n.as_f64().map(CellValue::Float64).unwrap_or(CellValue::Null)
                }
            }
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Array(items) => CellValue::Array(items.iter().map(CellValue::from_json).collect()),
            Value::Object(_) => CellValue::Json(value.clone()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Outcome of executing one statement. Never mutated after creation; the
/// pruner and canonicalizer build new values from it.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub status: QueryStatus,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Statement that actually ran, after row capping and repair.
    pub executed_sql: Option<String>,
}

impl QueryResult {
    /// Build a successful result, making column names unique and padding or
    /// truncating rows to the column arity.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>, elapsed: Duration) -> Self {
        let columns = unique_columns(columns);
        let arity = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(arity, CellValue::Null);
                row
            })
            .collect();
        Self {
            success: true,
            status: QueryStatus::Success,
            error_message: None,
            elapsed_ms: elapsed.as_millis() as u64,
            columns,
            rows,
            executed_sql: None,
        }
    }

    pub fn failure(status: QueryStatus, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            status,
            error_message: Some(message.into()),
            elapsed_ms: elapsed.as_millis() as u64,
            columns: vec![],
            rows: vec![],
            executed_sql: None,
        }
    }

    pub fn with_executed_sql(mut self, sql: impl Into<String>) -> Self {
        self.executed_sql = Some(sql.into());
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// New result containing only the given column indexes, in order.
    pub fn project(&self, keep: &[usize]) -> Self {
        let columns = keep
            .iter()
            .filter_map(|&i| self.columns.get(i).cloned())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                keep.iter()
                    .filter_map(|&i| row.get(i).cloned())
                    .collect()
            })
            .collect();
        Self {
            success: self.success,
            status: self.status,
            error_message: self.error_message.clone(),
            elapsed_ms: self.elapsed_ms,
            columns,
            rows,
            executed_sql: self.executed_sql.clone(),
        }
    }
}

/// Suffix repeated column names with `_2`, `_3`, ... so every name is unique.
pub fn unique_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(columns.len());
    for name in columns {
        let mut candidate = name.clone();
        let mut n = 2;
        while seen.iter().any(|s| s.eq_ignore_ascii_case(&candidate)) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        seen.push(candidate);
    }
    seen
}
