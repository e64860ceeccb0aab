//! Typed variable values and content/variable fingerprints

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

/// A variable binding value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A set of variable bindings, ordered by name
pub type Variables = BTreeMap<String, Value>;

impl Value {
    /// Truthiness used by conditional sections
    ///
    /// Empty strings, zero, NaN, `false`, and empty collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    /// Look up a key when this value is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Elements visited by a loop: list items, or map values in key order
    pub fn iter_items(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::List(items) => Box::new(items.iter()),
            Value::Map(entries) => Box::new(entries.values()),
            _ => Box::new(std::iter::empty()),
        }
    }

    fn feed(&self, hasher: &mut Xxh3) {
        match self {
            Value::Bool(b) => hasher.update(&[0, *b as u8]),
            Value::Number(n) => {
                hasher.update(&[1]);
                hasher.update(&n.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                hasher.update(&[2]);
                feed_str(hasher, s);
            }
            Value::List(items) => {
                hasher.update(&[3]);
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
            Value::Map(entries) => {
                hasher.update(&[4]);
                feed_map(hasher, entries);
            }
        }
    }
}

fn feed_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn feed_map(hasher: &mut Xxh3, entries: &BTreeMap<String, Value>) {
    hasher.update(&(entries.len() as u64).to_le_bytes());
    for (key, value) in entries {
        feed_str(hasher, key);
        value.feed(hasher);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

/// A stable 128-bit hash used in cache keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    /// Fingerprint raw template content
    pub fn of_content(content: &[u8]) -> Self {
        Self(xxh3_128(content))
    }

    /// Fingerprint a variable binding set
    pub fn of_variables(variables: &Variables) -> Self {
        let mut hasher = Xxh3::new();
        feed_map(&mut hasher, variables);
        Self(hasher.digest128())
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Build a [`Variables`] map from `key => value` pairs
///
/// ```rust
/// use doctemplate::{vars, Value};
///
/// let v = vars! { "name" => "World", "count" => 3 };
/// assert_eq!(v["name"], Value::from("World"));
/// ```
#[macro_export]
macro_rules! vars {
    () => { $crate::Variables::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut variables = $crate::Variables::new();
        $( variables.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        variables
    }};
}
