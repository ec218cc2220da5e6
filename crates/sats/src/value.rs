use std::fmt;

/// The storage category of a [`Value`] -- what the engine actually holds in
/// memory, independent of any declared column type. Every `Value` variant
/// except `Null` has exactly one corresponding `PhysicalType`; `Null` has
/// none, since NULL is the absence of a typed value rather than a type of
/// its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Integer,
    BigInt,
    Real,
    Text,
    Blob,
    Boolean,
    Temporal,
    Json,
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhysicalType::Integer => "INTEGER",
            PhysicalType::BigInt => "BIGINT",
            PhysicalType::Real => "REAL",
            PhysicalType::Text => "TEXT",
            PhysicalType::Blob => "BLOB",
            PhysicalType::Boolean => "BOOLEAN",
            PhysicalType::Temporal => "TEMPORAL",
            PhysicalType::Json => "JSON",
        };
        f.write_str(s)
    }
}

/// The semantic kind of a [`TemporalValue`]. Values of each kind are stored
/// (and compared) as ISO-8601 text, per the data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemporalKind {
    Date,
    Time,
    DateTime,
}

/// A DATE/TIME/DATETIME value, stored as ISO-8601 text per §3 of the data
/// model. Construction validates the text parses strictly for `kind`;
/// comparison treats values as points on the timeline (see [`compare`]).
///
/// [`compare`]: crate::compare::compare
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemporalValue {
    pub kind: TemporalKind,
    iso8601: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid {kind:?} literal `{text}`")]
pub struct TemporalParseError {
    pub kind: TemporalKind,
    pub text: String,
}

impl TemporalValue {
    /// Parses `text` strictly as an ISO-8601 literal of `kind`. This is a
    /// deliberately narrow parser -- full ISO-8601 grammar (timezone
    /// offsets, fractional seconds of arbitrary precision, week dates) is
    /// not implemented, but malformed literals for the requested `kind`
    /// are rejected rather than silently accepted.
    pub fn parse(kind: TemporalKind, text: &str) -> Result<Self, TemporalParseError> {
        let ok = match kind {
            TemporalKind::Date => parse_date(text),
            TemporalKind::Time => parse_time(text),
            TemporalKind::DateTime => {
                if let Some((d, t)) = text.split_once('T') {
                    parse_date(d) && parse_time(t)
                } else {
                    false
                }
            }
        };
        if ok {
            Ok(Self {
                kind,
                iso8601: text.to_string(),
            })
        } else {
            Err(TemporalParseError {
                kind,
                text: text.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.iso8601
    }
}

fn parse_date(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    matches!(parts.as_slice(), [y, m, d]
        if y.len() == 4 && m.len() == 2 && d.len() == 2
        && y.bytes().all(|b| b.is_ascii_digit())
        && m.parse::<u32>().is_ok_and(|m| (1..=12).contains(&m))
        && d.parse::<u32>().is_ok_and(|d| (1..=31).contains(&d)))
}

fn parse_time(s: &str) -> bool {
    let main = s.split('.').next().unwrap_or(s);
    let parts: Vec<&str> = main.split(':').collect();
    matches!(parts.as_slice(), [h, m, sec]
        if h.len() == 2 && m.len() == 2 && sec.len() == 2
        && h.parse::<u32>().is_ok_and(|h| h < 24)
        && m.parse::<u32>().is_ok_and(|m| m < 60)
        && sec.parse::<u32>().is_ok_and(|s| s < 60))
}

/// A single value flowing through the engine: one of the variants named in
/// §3 of the data model. `Value` is the unit that rows, literals, and
/// bound parameters are made of.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    BigInt(i128),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Temporal(TemporalValue),
    /// Compared by canonical structural equality: object key-set equality,
    /// array element-wise, per §4.1.
    Json(serde_json::Value),
}

impl Value {
    pub fn type_of(&self) -> Option<PhysicalType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => PhysicalType::Boolean,
            Value::Integer(_) => PhysicalType::Integer,
            Value::BigInt(_) => PhysicalType::BigInt,
            Value::Real(_) => PhysicalType::Real,
            Value::Text(_) => PhysicalType::Text,
            Value::Blob(_) => PhysicalType::Blob,
            Value::Temporal(_) => PhysicalType::Temporal,
            Value::Json(_) => PhysicalType::Json,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::BigInt(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::BigInt(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Blob(b) => write!(f, "x'{}'", b.iter().map(|b| format!("{b:02x}")).collect::<String>()),
            Value::Temporal(t) => write!(f, "{}", t.as_str()),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

/// A table row: an ordered sequence of values whose length equals the
/// owning table's column count.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, col: usize) -> Option<&Value> {
        self.0.get(col)
    }

    pub fn project(&self, cols: &[usize]) -> Row {
        Row(cols.iter().map(|&i| self.0[i].clone()).collect())
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_rejects_malformed_date() {
        assert!(TemporalValue::parse(TemporalKind::Date, "2024-13-01").is_err());
        assert!(TemporalValue::parse(TemporalKind::Date, "2024-02-29").is_ok());
    }

    #[test]
    fn json_value_equality_is_structural() {
        let a = Value::Json(serde_json::json!({"a": 1, "b": 2}));
        let b = Value::Json(serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }
}
