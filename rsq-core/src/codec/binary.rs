use crate::{Context, Error, QueryResult, Result, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// File header: five magic bytes plus one codec-version byte. Only
/// version `0` (the spaced tag table below) is readable.
pub const MAGIC: [u8; 6] = *b"RSQAF0";

/// Marker preceding every interior record, so a truncated tail can be
/// told apart from a missing record.
pub const RECORD_MARK: [u8; 3] = *b"SOL";

/// Version-0 wire tags. Spaced by ten; the 64-bit kinds historically had
/// two encodings each and readers accept both.
mod tag {
    pub const NULL: u32 = 0;
    pub const STRING: u32 = 10;
    pub const STRING_LIST: u32 = 20;
    pub const LIST: u32 = 30;
    pub const MAP: u32 = 40;
    pub const ULONG: u32 = 50;
    pub const ULONGLONG: u32 = 60;
    pub const LONG: u32 = 70;
    pub const LONGLONG: u32 = 80;
    pub const UINT: u32 = 90;
    pub const INT: u32 = 100;
    pub const USHORT: u32 = 110;
    pub const SHORT: u32 = 120;
    pub const QUERY_RESULT: u32 = 130;
    pub const FLOAT: u32 = 140;
    pub const DOUBLE: u32 = 150;
    pub const BOOLEAN: u32 = 160;
}

/// Upper bound applied to decoded lengths and element counts before any
/// allocation, so a corrupt stream cannot request absurd buffers.
const MAX_DECODED_LEN: u64 = u32::MAX as u64;

/// Reads `SOL`-framed [`Value`] records from a `RSQAF0` stream.
pub struct BinaryReader<R: Read> {
    input: R,
    /// Set when the underlying stream had no header at all (brand new
    /// file); every read then reports a clean end of stream.
    empty: bool,
}

impl BinaryReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("While opening `{}` for reading", path.display()))?;
        Self::new(BufReader::new(file))
            .with_context(|| format!("While validating the header of `{}`", path.display()))
    }
}

impl<R: Read> BinaryReader<R> {
    /// Validates the magic header. A stream with no bytes at all is
    /// accepted as empty; a non-empty stream with the wrong header is
    /// refused.
    pub fn new(mut input: R) -> Result<Self> {
        let mut header = [0u8; 6];
        let got = read_up_to(&mut input, &mut header)?;
        if got == 0 {
            return Ok(BinaryReader { input, empty: true });
        }
        if got < header.len() || header != MAGIC {
            return Err(Error::msg(format!(
                "Not a version-0 settings stream (header {:?})",
                &header[..got]
            )));
        }
        Ok(BinaryReader {
            input,
            empty: false,
        })
    }

    /// Next `SOL`-marked record, or `None` on a clean end of stream.
    pub fn read_record(&mut self) -> Result<Option<Value>> {
        if self.empty {
            return Ok(None);
        }
        let mut marker = [0u8; 3];
        let got = read_up_to(&mut self.input, &mut marker)?;
        if got == 0 {
            return Ok(None);
        }
        if got < marker.len() || marker != RECORD_MARK {
            return Err(Error::msg(format!(
                "Missing record marker (read {:?})",
                &marker[..got]
            )));
        }
        Ok(Some(self.read_value()?))
    }

    /// One tagged value. Unknown tags abort the read at the tag position.
    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_u32()?;
        Ok(match tag {
            tag::NULL => Value::Null,
            tag::STRING => Value::String(self.read_string()?),
            tag::STRING_LIST => {
                let count = self.read_count()?;
                let mut list = Vec::with_capacity(count);
                for _ in 0..count {
                    list.push(self.read_string()?);
                }
                Value::StringList(list)
            }
            tag::LIST => {
                let count = self.read_count()?;
                let mut list = Vec::with_capacity(count);
                for _ in 0..count {
                    list.push(self.read_value()?);
                }
                Value::List(list)
            }
            tag::MAP => {
                let count = self.read_count()?;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    map.insert(key.as_string(), value);
                }
                Value::Map(map)
            }
            tag::ULONG | tag::ULONGLONG => Value::UInt64(u64::from_le_bytes(self.read_array()?)),
            tag::LONG | tag::LONGLONG => Value::Int64(i64::from_le_bytes(self.read_array()?)),
            tag::UINT => Value::UInt32(u32::from_le_bytes(self.read_array()?)),
            tag::INT => Value::Int32(i32::from_le_bytes(self.read_array()?)),
            tag::USHORT => Value::UInt16(u16::from_le_bytes(self.read_array()?)),
            tag::SHORT => Value::Int16(i16::from_le_bytes(self.read_array()?)),
            tag::FLOAT => Value::Float32(f32::from_le_bytes(self.read_array()?)),
            tag::DOUBLE => Value::Float64(f64::from_le_bytes(self.read_array()?)),
            tag::BOOLEAN => Value::Bool(self.read_array::<1>()?[0] != 0),
            // The payload is not persisted; a stored result decodes to
            // the default record.
            tag::QUERY_RESULT => Value::from(QueryResult::default()),
            other => return Err(Error::msg(format!("Unknown value tag {other}"))),
        })
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buffer = [0u8; N];
        self.input
            .read_exact(&mut buffer)
            .context("While reading a value payload")?;
        Ok(buffer)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_count(&mut self) -> Result<usize> {
        let count = u64::from_le_bytes(self.read_array()?);
        if count > MAX_DECODED_LEN {
            return Err(Error::msg(format!("Corrupt element count {count}")));
        }
        Ok(count as usize)
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_count()?;
        let mut bytes = vec![0u8; length];
        self.input
            .read_exact(&mut bytes)
            .context("While reading a string payload")?;
        String::from_utf8(bytes).context("While decoding a string payload")
    }
}

/// Writes `SOL`-framed [`Value`] records, emitting the magic on open.
pub struct BinaryWriter<W: Write> {
    output: W,
}

impl BinaryWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("While opening `{}` for writing", path.display()))?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(mut output: W) -> Result<Self> {
        output
            .write_all(&MAGIC)
            .context("While writing the stream header")?;
        Ok(BinaryWriter { output })
    }

    pub fn write_record(&mut self, value: &Value) -> Result<()> {
        self.output
            .write_all(&RECORD_MARK)
            .context("While writing a record marker")?;
        self.write_value(value)
    }

    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.write_u32(tag::NULL)?,
            Value::String(v) => {
                self.write_u32(tag::STRING)?;
                self.write_string(v)?;
            }
            Value::StringList(v) => {
                self.write_u32(tag::STRING_LIST)?;
                self.write_count(v.len())?;
                for item in v {
                    self.write_string(item)?;
                }
            }
            Value::List(v) => {
                self.write_u32(tag::LIST)?;
                self.write_count(v.len())?;
                for item in v {
                    self.write_value(item)?;
                }
            }
            Value::Map(v) => {
                self.write_u32(tag::MAP)?;
                self.write_count(v.len())?;
                for (key, item) in v {
                    self.write_value(&Value::String(key.clone()))?;
                    self.write_value(item)?;
                }
            }
            Value::UInt64(v) => {
                self.write_u32(tag::ULONGLONG)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::Int64(v) => {
                self.write_u32(tag::LONGLONG)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::UInt32(v) => {
                self.write_u32(tag::UINT)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::Int32(v) => {
                self.write_u32(tag::INT)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::UInt16(v) => {
                self.write_u32(tag::USHORT)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::Int16(v) => {
                self.write_u32(tag::SHORT)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::Bool(v) => {
                self.write_u32(tag::BOOLEAN)?;
                self.write_bytes(&[*v as u8])?;
            }
            Value::Float32(v) => {
                self.write_u32(tag::FLOAT)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::Float64(v) => {
                self.write_u32(tag::DOUBLE)?;
                self.write_bytes(&v.to_le_bytes())?;
            }
            Value::QueryResult(..) => {
                // Lossy by design: the tag alone round-trips to a
                // default result.
                log::debug!("Writing a query result to a binary stream loses its payload");
                self.write_u32(tag::QUERY_RESULT)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush().context("While flushing the stream")
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.output
            .write_all(bytes)
            .context("While writing a value payload")
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        self.write_bytes(&(count as u64).to_le_bytes())
    }

    fn write_string(&mut self, text: &str) -> Result<()> {
        self.write_count(text.len())?;
        self.write_bytes(text.as_bytes())
    }
}

/// Fills as much of `buffer` as the stream still has, reporting how many
/// bytes arrived. Distinguishes a clean end of stream (0) from a
/// truncated field (short but non-zero).
fn read_up_to(input: &mut impl Read, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match input.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(got) => filled += got,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error).context("While reading from the stream"),
        }
    }
    Ok(filled)
}
