use crate::value_wrap::{query_error, value_from_sql};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Params};
use rsq_core::{ConnectionSettings, Driver, QueryError, QueryResult, Value};

/// MySQL implementation of the driver seam. One instance owns at most
/// one live connection; the manager's template instance never connects
/// and only spawns fresh copies.
pub struct MySQLDriver {
    hostname: String,
    username: String,
    password: String,
    port: u16,
    conn: Option<Conn>,
    session_id: u64,
}

impl MySQLDriver {
    pub fn from_settings(settings: &ConnectionSettings) -> MySQLDriver {
        MySQLDriver {
            hostname: settings.get("hostname").as_string(),
            username: settings.get("username").as_string(),
            password: settings.get("password").as_string(),
            port: settings.get("port").as_u16(),
            conn: None,
            session_id: 0,
        }
    }

    fn run_query(&mut self, sql: &str, parameters: Vec<mysql::Value>) -> QueryResult {
        let connected = self.connect();
        if connected.error.is_error {
            return connected;
        }
        let Some(conn) = self.conn.as_mut() else {
            return QueryResult::failure(QueryError::new(Value::Null, "Session is not open"));
        };
        let parameters = if parameters.is_empty() {
            Params::Empty
        } else {
            Params::Positional(parameters)
        };
        let fetched: Vec<mysql::Row> = match conn.exec(sql, parameters) {
            Ok(fetched) => fetched,
            Err(error) => {
                log::error!("Query failed: {error}");
                return QueryResult::failure(query_error(&error));
            }
        };
        let mut result = QueryResult {
            affected_rows: conn.affected_rows() as i32,
            ..QueryResult::default()
        };
        if let Some(first) = fetched.first() {
            result.columns = first
                .columns_ref()
                .iter()
                .map(|column| column.name_str().into_owned())
                .collect();
        }
        for row in fetched {
            result
                .rows
                .push(row.unwrap().into_iter().map(value_from_sql).collect());
        }
        result.rows_count = result.rows.len() as i32;
        result.valid = true;
        result
    }
}

impl Driver for MySQLDriver {
    fn connect(&mut self) -> QueryResult {
        if self.conn.is_some() {
            return QueryResult::default();
        }
        let mut opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.hostname.clone()))
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()));
        if self.port != 0 {
            opts = opts.tcp_port(self.port);
        }
        match Conn::new(opts) {
            Ok(conn) => {
                self.session_id = conn.connection_id() as u64;
                self.conn = Some(conn);
                QueryResult::default()
            }
            Err(error) => {
                log::error!("Connect to `{}` failed: {error}", self.hostname);
                QueryResult::failure(query_error(&error))
            }
        }
    }

    fn disconnect(&mut self) {
        // The client closes the wire connection on drop
        self.conn = None;
        self.session_id = 0;
    }

    fn execute(&mut self, arguments: &[Value]) -> QueryResult {
        let sql = arguments.first().map(Value::as_string).unwrap_or_default();
        let parameters = arguments
            .iter()
            .skip(1)
            .map(|argument| mysql::Value::from(argument.as_string()))
            .collect();
        self.run_query(&sql, parameters)
    }

    fn list_databases(&mut self, filter: &[String]) -> QueryResult {
        if filter.is_empty() {
            return self.run_query("SHOW DATABASES", Vec::new());
        }
        let placeholders = vec!["?"; filter.len()].join(", ");
        let sql = format!("SHOW DATABASES WHERE `Database` IN ({placeholders})");
        let parameters = filter
            .iter()
            .map(|name| mysql::Value::from(name.as_str()))
            .collect();
        self.run_query(&sql, parameters)
    }

    fn list_tables(&mut self, database: &str) -> QueryResult {
        let sql = format!("SHOW TABLES FROM {}", quote_identifier(database));
        self.run_query(&sql, Vec::new())
    }

    fn select_database(&mut self, database: &str) -> QueryResult {
        let sql = format!("USE {}", quote_identifier(database));
        self.run_query(&sql, Vec::new())
    }

    fn kill_session(&mut self, session_id: u64) -> QueryResult {
        self.run_query(&format!("KILL QUERY {session_id}"), Vec::new())
    }

    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn clone_driver(&self) -> Box<dyn Driver> {
        Box::new(MySQLDriver {
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            port: self.port,
            conn: None,
            session_id: 0,
        })
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
