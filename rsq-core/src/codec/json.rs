use crate::{Context, Result, Value};
use serde_json::Deserializer;
use serde_json::de::IoRead;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Streaming JSON reader yielding one [`Value`] tree per top-level
/// document. A parse error aborts the current value and leaves the
/// stream at the failure point.
pub struct JsonReader<R: Read> {
    stream: serde_json::StreamDeserializer<'static, IoRead<R>, serde_json::Value>,
}

impl JsonReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("While opening `{}` for reading", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> JsonReader<R> {
    pub fn new(input: R) -> Self {
        JsonReader {
            stream: Deserializer::from_reader(input).into_iter(),
        }
    }

    /// Next top-level value, or `None` on a clean end of stream.
    pub fn read_value(&mut self) -> Result<Option<Value>> {
        match self.stream.next() {
            None => Ok(None),
            Some(Ok(json)) => Ok(Some(decode(&json))),
            Some(Err(error)) => Err(error).context("While parsing a JSON value"),
        }
    }
}

/// Streaming JSON writer, one document per [`JsonWriter::write_value`].
pub struct JsonWriter<W: Write> {
    output: W,
}

impl JsonWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("While opening `{}` for writing", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonWriter<W> {
    pub fn new(output: W) -> Self {
        JsonWriter { output }
    }

    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        serde_json::to_writer(&mut self.output, &encode(value))
            .context("While writing a JSON value")
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush().context("While flushing the stream")
    }
}

/// JSON form of a value. Every integer kind widens to signed 64 (the
/// unsigned 64-bit kind wraps, as the historical writer did); a query
/// result writes as `null`, losing its payload by design.
fn encode(value: &Value) -> serde_json::Value {
    match value {
        Value::Null | Value::QueryResult(..) => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::String(v) => serde_json::Value::String(v.clone()),
        Value::StringList(v) => v
            .iter()
            .map(|item| serde_json::Value::String(item.clone()))
            .collect(),
        Value::List(v) => v.iter().map(encode).collect(),
        Value::Map(v) => serde_json::Value::Object(
            v.iter()
                .map(|(key, item)| (key.clone(), encode(item)))
                .collect(),
        ),
        Value::Int16(v) => (*v as i64).into(),
        Value::UInt16(v) => (*v as i64).into(),
        Value::Int32(v) => (*v as i64).into(),
        Value::UInt32(v) => (*v as i64).into(),
        Value::Int64(v) => (*v).into(),
        Value::UInt64(v) => (*v as i64).into(),
        Value::Float32(v) => serde_json::Number::from_f64(*v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Float64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    }
}

fn decode(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::String(v) => Value::String(v.clone()),
        serde_json::Value::Array(v) => Value::List(v.iter().map(decode).collect()),
        serde_json::Value::Object(v) => Value::Map(
            v.iter()
                .map(|(key, item)| (key.clone(), decode(item)))
                .collect(),
        ),
        serde_json::Value::Number(v) => {
            if let Some(integer) = v.as_i64() {
                narrowest(integer)
            } else if let Some(integer) = v.as_u64() {
                Value::UInt64(integer)
            } else {
                Value::Float64(v.as_f64().unwrap_or(0.0))
            }
        }
    }
}

/// Narrowest tag an integer read back from JSON fits in, signed
/// preferred at each width.
fn narrowest(value: i64) -> Value {
    if let Ok(v) = i16::try_from(value) {
        Value::Int16(v)
    } else if let Ok(v) = u16::try_from(value) {
        Value::UInt16(v)
    } else if let Ok(v) = i32::try_from(value) {
        Value::Int32(v)
    } else if let Ok(v) = u32::try_from(value) {
        Value::UInt32(v)
    } else {
        Value::Int64(value)
    }
}
