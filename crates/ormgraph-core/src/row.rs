//! Rows as exchanged with storage, and typed reads out of them.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;

/// A single row read from storage.
///
/// Entities keep the last row they were read from (or wrote) so foreign
/// keys can be resolved without another round trip. Column order is the
/// order the columns were supplied in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from `(column, value)` pairs.
    ///
    /// A column given twice keeps the last value.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut row = Row::default();
        for (column, value) in pairs {
            row.set(column.into(), value);
        }
        row
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.values[i])
    }

    /// Return a copy of this row with `updates` applied; unknown columns are appended.
    #[must_use]
    pub fn merged<'a, I>(&self, updates: I) -> Row
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut row = self.clone();
        for (column, value) in updates {
            row.set(column.to_string(), value.clone());
        }
        row
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(&self.values)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn set(&mut self, column: String, value: Value) {
        match self.position(&column) {
            Some(i) => self.values[i] = value,
            None => {
                self.columns.push(column);
                self.values.push(value);
            }
        }
    }
}

/// Trait for converting from a `Value` to a typed value.
///
/// The derive uses it to write columns back into entity fields.
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if the conversion fails.
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

fn out_of_range(expected: &'static str, value: i64) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("{value} (out of range)"),
        column: None,
    })
}

/// Integers narrower than `i64` go through `as_i64` and a checked cast.
macro_rules! narrow_integer {
    ($($ty:ty),*) => {$(
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                let wide = value.as_i64().ok_or_else(|| mismatch(stringify!($ty), value))?;
                <$ty>::try_from(wide).map_err(|_| out_of_range(stringify!($ty), wide))
            }
        }
    )*};
}

narrow_integer!(i16, i32, u32);

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| mismatch("f32", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(Error::from),
            _ => Err(mismatch("JSON", value)),
        }
    }
}
