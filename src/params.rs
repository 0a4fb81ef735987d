//! Statement parameters and their binding to SQLite arguments

use std::borrow::Cow;

use serde_json::{Map, Value as JsonValue};
use sqlx::Arguments;
use sqlx::sqlite::SqliteArguments;

use crate::{Error, Result};

/// Parameters supplied alongside SQL text.
///
/// Positional values bind to `?` / `$N` placeholders in order. Named values bind
/// to `:name` placeholders; the SQL is rewritten to positional form before it is
/// sent, so a name may appear any number of times.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
   Positional(Vec<JsonValue>),
   Named(Map<String, JsonValue>),
}

impl Default for Params {
   fn default() -> Self {
      Params::Positional(Vec::new())
   }
}

impl From<()> for Params {
   fn from(_: ()) -> Self {
      Params::default()
   }
}

impl From<Vec<JsonValue>> for Params {
   fn from(values: Vec<JsonValue>) -> Self {
      Params::Positional(values)
   }
}

impl From<Map<String, JsonValue>> for Params {
   fn from(values: Map<String, JsonValue>) -> Self {
      Params::Named(values)
   }
}

impl Params {
   /// Named parameters from `(name, value)` pairs
   pub fn named<K, V, I>(pairs: I) -> Self
   where
      I: IntoIterator<Item = (K, V)>,
      K: Into<String>,
      V: Into<JsonValue>,
   {
      Params::Named(
         pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
      )
   }

   /// Resolve the SQL to send and the arguments to send with it.
   pub(crate) fn into_arguments<'q>(self, sql: &str) -> Result<(Cow<'_, str>, SqliteArguments<'q>)> {
      let (sql, values) = match self {
         Params::Positional(values) => (Cow::Borrowed(sql), values),
         Params::Named(map) => {
            let (sql, values) = compile_named(sql, &map)?;
            (Cow::Owned(sql), values)
         }
      };

      let mut args = SqliteArguments::default();
      for value in values {
         bind_value(&mut args, value)?;
      }
      Ok((sql, args))
   }
}

/// Append a JSON value to SQLite arguments.
fn bind_value<'q>(args: &mut SqliteArguments<'q>, value: JsonValue) -> Result<()> {
   let bound = match value {
      JsonValue::Null => args.add(None::<String>),
      JsonValue::Bool(b) => args.add(b),
      JsonValue::String(s) => args.add(s),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            args.add(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Too large for SQLite's INTEGER; bind as f64 (loses precision)
            args.add(uint_val as f64)
         } else {
            args.add(number.as_f64().unwrap_or_default())
         }
      }
      other => args.add(other.to_string()),
   };
   bound.map_err(|e| Error::native("bind")(sqlx::Error::Encode(e)))
}

#[derive(Clone, Copy)]
enum State {
   Normal,
   SingleQuoted,
   DoubleQuoted,
   Backticked,
   Bracketed,
   LineComment,
   BlockComment,
}

/// Rewrite `:name` placeholders to `?` and collect their values in order.
///
/// Placeholders inside string literals, quoted identifiers and comments are left
/// alone, as is `::`.
fn compile_named(sql: &str, params: &Map<String, JsonValue>) -> Result<(String, Vec<JsonValue>)> {
   let bytes = sql.as_bytes();
   let mut out = String::with_capacity(sql.len());
   let mut values = Vec::new();
   let mut state = State::Normal;
   let mut copied = 0;
   let mut idx = 0;

   while idx < bytes.len() {
      let b = bytes[idx];
      match state {
         State::Normal => match b {
            b'\'' => state = State::SingleQuoted,
            b'"' => state = State::DoubleQuoted,
            b'`' => state = State::Backticked,
            b'[' => state = State::Bracketed,
            b'-' if bytes.get(idx + 1) == Some(&b'-') => {
               state = State::LineComment;
               idx += 1;
            }
            b'/' if bytes.get(idx + 1) == Some(&b'*') => {
               state = State::BlockComment;
               idx += 1;
            }
            b':' if bytes.get(idx + 1) == Some(&b':') => idx += 1,
            b':' => {
               let end = scan_name(bytes, idx + 1);
               if end > idx + 1 {
                  let name = &sql[idx + 1..end];
                  let value = params
                     .get(name)
                     .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
                  out.push_str(&sql[copied..idx]);
                  out.push('?');
                  values.push(value.clone());
                  copied = end;
                  idx = end;
                  continue;
               }
            }
            _ => {}
         },
         State::SingleQuoted if b == b'\'' => state = State::Normal,
         State::DoubleQuoted if b == b'"' => state = State::Normal,
         State::Backticked if b == b'`' => state = State::Normal,
         State::Bracketed if b == b']' => state = State::Normal,
         State::LineComment if b == b'\n' => state = State::Normal,
         State::BlockComment if b == b'*' && bytes.get(idx + 1) == Some(&b'/') => {
            state = State::Normal;
            idx += 1;
         }
         _ => {}
      }
      idx += 1;
   }

   out.push_str(&sql[copied..]);
   Ok((out, values))
}

fn scan_name(bytes: &[u8], start: usize) -> usize {
   let mut idx = start;
   while idx < bytes.len() {
      let b = bytes[idx];
      let allowed = b.is_ascii_alphanumeric() || b == b'_' || (b == b'.' && idx > start);
      if !allowed {
         break;
      }
      idx += 1;
   }
   idx
}
