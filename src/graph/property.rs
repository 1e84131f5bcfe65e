//! Property values
//!
//! Values carry a total order so they can key the B-tree property indexes:
//! values of one type compare naturally, values of different types by a fixed
//! type rank.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A value stored under a property key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Unix milliseconds
    DateTime(i64),
    Array(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    Null,
}

/// Properties of one node or relationship, in insertion order
pub type PropertyMap = IndexMap<String, PropertyValue>;

impl PropertyValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PropertyValue::Null => 0,
            PropertyValue::Boolean(_) => 1,
            PropertyValue::Integer(_) => 2,
            PropertyValue::Float(_) => 3,
            PropertyValue::DateTime(_) => 4,
            PropertyValue::String(_) => 5,
            PropertyValue::Array(_) => 6,
            PropertyValue::Map(_) => 7,
        }
    }
}

impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use PropertyValue::*;
        match (self, other) {
            (String(a), String(b)) => a.cmp(b),
            (Integer(a), Integer(b)) | (DateTime(a), DateTime(b)) => a.cmp(b),
            // NaN must still land somewhere fixed in an index
            (Float(a), Float(b)) => a.total_cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Array(a), Array(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PropertyValue {}

fn write_joined<T>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
    mut item: impl FnMut(&mut fmt::Formatter<'_>, T) -> fmt::Result,
) -> fmt::Result {
    for (i, value) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item(f, value)?;
    }
    Ok(())
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{:?}", s),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::DateTime(ms) => write!(f, "DateTime({})", ms),
            PropertyValue::Array(values) => {
                f.write_str("[")?;
                write_joined(f, values.iter(), |f, v| write!(f, "{}", v))?;
                f.write_str("]")
            }
            PropertyValue::Map(map) => {
                f.write_str("{")?;
                write_joined(f, map.iter(), |f, (k, v)| write!(f, "{}: {}", k, v))?;
                f.write_str("}")
            }
            PropertyValue::Null => f.write_str("null"),
        }
    }
}

macro_rules! property_from {
    ($($source:ty => |$v:ident| $value:expr),* $(,)?) => {
        $(
            impl From<$source> for PropertyValue {
                fn from($v: $source) -> Self {
                    $value
                }
            }
        )*
    };
}

property_from! {
    String => |s| PropertyValue::String(s),
    &str => |s| PropertyValue::String(s.to_string()),
    i64 => |i| PropertyValue::Integer(i),
    i32 => |i| PropertyValue::Integer(i64::from(i)),
    f64 => |v| PropertyValue::Float(v),
    bool => |b| PropertyValue::Boolean(b),
    Vec<PropertyValue> => |values| PropertyValue::Array(values),
    BTreeMap<String, PropertyValue> => |map| PropertyValue::Map(map),
}
