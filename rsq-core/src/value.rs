use crate::QueryResult;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Absolute tolerance used when a 32-bit and a 64-bit float are compared.
/// Papers over the precision lost when the same decimal literal was stored
/// at both widths.
const FLOAT_TOLERANCE: f64 = 1e-5;

/// Runtime-tagged value used as the payload currency throughout the
/// backend: command arguments, signal payloads, query cells and persisted
/// settings are all `Value` trees.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    StringList(Vec<String>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Bool(bool),
    Float32(f32),
    Float64(f64),
    QueryResult(Box<QueryResult>),
}

/// Discriminant of a [`Value`], detached from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    String,
    StringList,
    List,
    Map,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Bool,
    Float32,
    Float64,
    QueryResult,
}

/// Comparison family a pair of values is promoted into. Mixed-kind
/// comparisons pick the family of the higher ranked operand.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Family {
    String,
    StringList,
    List,
    Map,
    Bool,
    Integer,
    QueryResult,
    Float,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::String(..) => ValueKind::String,
            Value::StringList(..) => ValueKind::StringList,
            Value::List(..) => ValueKind::List,
            Value::Map(..) => ValueKind::Map,
            Value::Int16(..) => ValueKind::Int16,
            Value::UInt16(..) => ValueKind::UInt16,
            Value::Int32(..) => ValueKind::Int32,
            Value::UInt32(..) => ValueKind::UInt32,
            Value::Int64(..) => ValueKind::Int64,
            Value::UInt64(..) => ValueKind::UInt64,
            Value::Bool(..) => ValueKind::Bool,
            Value::Float32(..) => ValueKind::Float32,
            Value::Float64(..) => ValueKind::Float64,
            Value::QueryResult(..) => ValueKind::QueryResult,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String form of the value. Sequences yield their first element,
    /// numbers their decimal form, null the empty string. Total.
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(v) => v.clone(),
            Value::StringList(v) => v.first().cloned().unwrap_or_default(),
            Value::List(v) => v.first().map(Value::as_string).unwrap_or_default(),
            Value::Map(..) => String::new(),
            Value::Int16(v) => v.to_string(),
            Value::UInt16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::UInt32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::UInt64(v) => v.to_string(),
            // "1"/"0" so the numeric re-parse of a stringified boolean
            // lands back on the same truth value
            Value::Bool(v) => String::from(if *v { "1" } else { "0" }),
            Value::Float32(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::QueryResult(..) => String::new(),
        }
    }

    /// Sequence-of-strings form. A `List` converts element-wise, null is
    /// empty and any other kind becomes a one-element sequence.
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            Value::Null => Vec::new(),
            Value::StringList(v) => v.clone(),
            Value::List(v) => v.iter().map(Value::as_string).collect(),
            other => vec![other.as_string()],
        }
    }

    /// Sequence-of-values form, mirroring [`Value::as_string_list`].
    pub fn as_list(&self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(v) => v.clone(),
            Value::StringList(v) => v.iter().cloned().map(Value::String).collect(),
            other => vec![other.clone()],
        }
    }

    pub fn as_map(&self) -> BTreeMap<String, Value> {
        match self {
            Value::Map(v) => v.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(v) => *v,
            Value::Float32(v) => *v != 0.0,
            Value::Float64(v) => *v != 0.0,
            other => other.integer_value() != 0,
        }
    }

    pub fn as_query_result(&self) -> QueryResult {
        match self {
            Value::QueryResult(v) => (**v).clone(),
            _ => QueryResult::default(),
        }
    }

    /// Mathematical value of the payload, used by the integer accessors
    /// and by promoted comparisons. Strings and sequences go through the
    /// whitespace-tolerant prefix parse; unparsable input is zero.
    fn integer_value(&self) -> i128 {
        match self {
            Value::Null | Value::Map(..) | Value::QueryResult(..) => 0,
            Value::Int16(v) => *v as i128,
            Value::UInt16(v) => *v as i128,
            Value::Int32(v) => *v as i128,
            Value::UInt32(v) => *v as i128,
            Value::Int64(v) => *v as i128,
            Value::UInt64(v) => *v as i128,
            Value::Bool(v) => *v as i128,
            Value::Float32(v) => *v as i128,
            Value::Float64(v) => *v as i128,
            other => integer_prefix(&other.as_string()),
        }
    }

    fn float_value(&self) -> f64 {
        match self {
            Value::Null | Value::Map(..) | Value::QueryResult(..) => 0.0,
            Value::Int16(v) => *v as f64,
            Value::UInt16(v) => *v as f64,
            Value::Int32(v) => *v as f64,
            Value::UInt32(v) => *v as f64,
            Value::Int64(v) => *v as f64,
            Value::UInt64(v) => *v as f64,
            Value::Bool(v) => *v as u8 as f64,
            Value::Float32(v) => *v as f64,
            Value::Float64(v) => *v,
            other => float_prefix(&other.as_string()),
        }
    }

    fn family(&self) -> Option<Family> {
        Some(match self {
            Value::Null => return None,
            Value::String(..) => Family::String,
            Value::StringList(..) => Family::StringList,
            Value::List(..) => Family::List,
            Value::Map(..) => Family::Map,
            Value::Bool(..) => Family::Bool,
            Value::Int16(..)
            | Value::UInt16(..)
            | Value::Int32(..)
            | Value::UInt32(..)
            | Value::Int64(..)
            | Value::UInt64(..) => Family::Integer,
            Value::QueryResult(..) => Family::QueryResult,
            Value::Float32(..) | Value::Float64(..) => Family::Float,
        })
    }

    /// Promotion rank: floats above all integers, wider integers above
    /// narrower, integers above boolean, numbers above containers and
    /// strings.
    fn promotion_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::String(..) => 1,
            Value::StringList(..) => 2,
            Value::List(..) => 3,
            Value::Map(..) => 4,
            Value::Bool(..) => 5,
            Value::Int16(..) => 6,
            Value::UInt16(..) => 7,
            Value::Int32(..) => 8,
            Value::UInt32(..) => 9,
            Value::Int64(..) => 10,
            Value::UInt64(..) => 11,
            Value::QueryResult(..) => 12,
            Value::Float32(..) => 13,
            Value::Float64(..) => 14,
        }
    }

    fn uid(&self) -> Value {
        match self {
            Value::QueryResult(v) => v.uid.clone(),
            _ => Value::Null,
        }
    }
}

fn promoted_family(left: &Value, right: &Value) -> Option<Family> {
    if left.promotion_rank() >= right.promotion_rank() {
        left.family()
    } else {
        right.family()
    }
}

/// Signed decimal prefix of `text`, leading whitespace skipped. Yields
/// zero when no digits lead the input.
fn integer_prefix(text: &str) -> i128 {
    atoi::atoi::<i128>(text.trim_start().as_bytes()).unwrap_or(0)
}

fn float_prefix(text: &str) -> f64 {
    fast_float::parse_partial::<f64, _>(text.trim_start())
        .map(|(value, _)| value)
        .unwrap_or(0.0)
}

macro_rules! impl_integer_accessor {
    ($name:ident, $ty:ty) => {
        impl Value {
            pub fn $name(&self) -> $ty {
                self.integer_value() as $ty
            }
        }
    };
}

impl_integer_accessor!(as_i16, i16);
impl_integer_accessor!(as_u16, u16);
impl_integer_accessor!(as_i32, i32);
impl_integer_accessor!(as_u32, u32);
impl_integer_accessor!(as_i64, i64);
impl_integer_accessor!(as_u64, u64);

macro_rules! impl_float_accessor {
    ($name:ident, $ty:ty) => {
        impl Value {
            pub fn $name(&self) -> $ty {
                self.float_value() as $ty
            }
        }
    };
}

impl_float_accessor!(as_f32, f32);
impl_float_accessor!(as_f64, f64);

macro_rules! impl_from {
    ($source:ty, $variant:path) => {
        impl From<$source> for Value {
            fn from(value: $source) -> Self {
                $variant(value)
            }
        }
    };
}

impl_from!(String, Value::String);
impl_from!(Vec<String>, Value::StringList);
impl_from!(Vec<Value>, Value::List);
impl_from!(BTreeMap<String, Value>, Value::Map);
impl_from!(i16, Value::Int16);
impl_from!(u16, Value::UInt16);
impl_from!(i32, Value::Int32);
impl_from!(u32, Value::UInt32);
impl_from!(i64, Value::Int64);
impl_from!(u64, Value::UInt64);
impl_from!(bool, Value::Bool);
impl_from!(f32, Value::Float32);
impl_from!(f64, Value::Float64);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<QueryResult> for Value {
    fn from(value: QueryResult) -> Self {
        Value::QueryResult(Box::new(value))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // Null promotes to the other side but equals only null.
        if self.is_null() || other.is_null() {
            return self.is_null() && other.is_null();
        }
        match (self, other) {
            (Value::Float32(l), Value::Float64(r)) => ((*l as f64) - r).abs() <= FLOAT_TOLERANCE,
            (Value::Float64(l), Value::Float32(r)) => (l - (*r as f64)).abs() <= FLOAT_TOLERANCE,
            _ => match promoted_family(self, other) {
                None => false,
                Some(Family::String) => self.as_string() == other.as_string(),
                Some(Family::StringList) => self.as_string_list() == other.as_string_list(),
                Some(Family::List) => self.as_list() == other.as_list(),
                Some(Family::Map) => self.as_map() == other.as_map(),
                Some(Family::Bool) => self.as_bool() == other.as_bool(),
                // Mathematical comparison: same-width signed/unsigned
                // pairs compare as signed when both fit, wider otherwise
                Some(Family::Integer) => self.integer_value() == other.integer_value(),
                Some(Family::QueryResult) => self.uid() == other.uid(),
                Some(Family::Float) => self.float_value() == other.float_value(),
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return Some(match (self.is_null(), other.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                _ => Ordering::Greater,
            });
        }
        match promoted_family(self, other)? {
            Family::String => self.as_string().partial_cmp(&other.as_string()),
            Family::StringList => self.as_string_list().partial_cmp(&other.as_string_list()),
            Family::List => self.as_list().partial_cmp(&other.as_list()),
            Family::Map => self.as_map().partial_cmp(&other.as_map()),
            Family::Bool => self.as_bool().partial_cmp(&other.as_bool()),
            Family::Integer => self.integer_value().partial_cmp(&other.integer_value()),
            Family::QueryResult => self.uid().partial_cmp(&other.uid()),
            Family::Float => self.float_value().partial_cmp(&other.float_value()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
