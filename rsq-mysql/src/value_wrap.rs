use rsq_core::{QueryError, Value};

/// Maps one MySQL cell onto the runtime value union. Numeric kinds stay
/// typed; byte payloads are assumed textual (the client returns them for
/// every character column); temporal kinds travel as their canonical
/// string form.
pub(crate) fn value_from_sql(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        mysql::Value::Int(v) => Value::Int64(v),
        mysql::Value::UInt(v) => Value::UInt64(v),
        mysql::Value::Float(v) => Value::Float32(v),
        mysql::Value::Double(v) => Value::Float64(v),
        mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
            Value::String(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
            ))
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let hours = days * 24 + u32::from(hours);
            Value::String(format!(
                "{}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}",
                if negative { "-" } else { "" },
            ))
        }
    }
}

/// Converts a client error into the error record carried inside a query
/// result. Server errors keep their code and SQL state; everything else
/// (I/O, protocol) travels as plain text with a null code.
pub(crate) fn query_error(error: &mysql::Error) -> QueryError {
    match error {
        mysql::Error::MySqlError(server) => QueryError::new(
            Value::UInt32(server.code as u32),
            format!("{}: {}", server.state, server.message),
        ),
        other => QueryError::new(Value::Null, other.to_string()),
    }
}
