use crate::{QueryResult, Value};

/// Adapter seam between the runtime and a concrete database client. One
/// driver instance owns at most one live session and is driven from a
/// single worker thread; the manager's template instance is only ever
/// used as a factory through [`Driver::clone_driver`].
///
/// Every operation is total: failures are converted at this boundary
/// into the `error` field of the returned [`QueryResult`], never raised.
pub trait Driver: Send {
    /// Opens the session if it is not already open. The returned result
    /// carries no rows; `error.is_error` tells success from failure.
    fn connect(&mut self) -> QueryResult;

    /// Closes the session. Safe to call on a session that never opened.
    fn disconnect(&mut self);

    /// Runs `arguments[0]` as an SQL template with `arguments[1..]`
    /// bound as positional string parameters, materialising the whole
    /// result set.
    fn execute(&mut self, arguments: &[Value]) -> QueryResult;

    /// Database names visible to the session, optionally restricted to
    /// the names in `filter`.
    fn list_databases(&mut self, filter: &[String]) -> QueryResult;

    fn list_tables(&mut self, database: &str) -> QueryResult;

    fn select_database(&mut self, database: &str) -> QueryResult;

    /// Asks the server to abort whatever `session_id` is running. Issued
    /// from a different session than the victim.
    fn kill_session(&mut self, session_id: u64) -> QueryResult;

    /// Server-side id of the live session, or 0 before connect.
    fn session_id(&self) -> u64;

    /// A fresh, unconnected driver for the same endpoint.
    fn clone_driver(&self) -> Box<dyn Driver>;
}
