use crate::Value;

/// Commands a connection worker understands. Closed set; every EXECUTED
/// emission echoes the event that produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryEvent {
    #[default]
    NoEvent,
    TestConnection,
    ListDatabases,
    ListTables,
    ExecuteQuery,
    KillQuery,
    Disconnect,
    CleanState,
    SelectDatabase,
}

impl QueryEvent {
    pub fn from_u32(value: u32) -> QueryEvent {
        match value {
            1 => QueryEvent::TestConnection,
            2 => QueryEvent::ListDatabases,
            3 => QueryEvent::ListTables,
            4 => QueryEvent::ExecuteQuery,
            5 => QueryEvent::KillQuery,
            6 => QueryEvent::Disconnect,
            7 => QueryEvent::CleanState,
            8 => QueryEvent::SelectDatabase,
            _ => QueryEvent::NoEvent,
        }
    }

    pub fn from_value(value: &Value) -> QueryEvent {
        QueryEvent::from_u32(value.as_u32())
    }
}

impl From<QueryEvent> for Value {
    fn from(event: QueryEvent) -> Self {
        Value::UInt16(event as u16)
    }
}

/// Driver failure carried inside a [`QueryResult`]. The transport never
/// raises; `is_error` tells success from failure.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryError {
    pub is_error: bool,
    pub code: Value,
    pub message: String,
}

impl QueryError {
    pub fn new(code: impl Into<Value>, message: impl Into<String>) -> Self {
        QueryError {
            is_error: true,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Packaged outcome of a worker command: success data or driver error.
/// Results are materialised per query; `uid` is the caller's correlation
/// token, echoed verbatim.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub uid: Value,
    pub valid: bool,
    pub affected_rows: i32,
    pub rows_count: i32,
    pub event: QueryEvent,
    pub error: QueryError,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn failure(error: QueryError) -> Self {
        QueryResult {
            error,
            ..QueryResult::default()
        }
    }
}

/// One queued unit of work for a connection worker.
#[derive(Clone, Debug, Default)]
pub struct QueryCommand {
    pub uid: Value,
    pub event: QueryEvent,
    pub arguments: Vec<Value>,
}
