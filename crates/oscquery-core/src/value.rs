//! OSC argument values as they appear in a node's VALUE attribute.
//!
//! An OSC message carries a tuple of typed arguments, so a node's value is
//! always a sequence. JSON has no width information: integers read back
//! from the wire come out as `Int` or `Long`, anything with a fraction as
//! `Double`, so a peer's doubles keep their precision.

use serde::{Deserialize, Serialize};

/// One typed OSC argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OscValue {
    Nil,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Float(f32),
    String(String),
    Array(Vec<OscValue>),
}

impl OscValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            OscValue::Int(v) => Some(v as f64),
            OscValue::Long(v) => Some(v as f64),
            OscValue::Float(v) => Some(v as f64),
            OscValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for OscValue {
    fn from(v: bool) -> Self {
        OscValue::Bool(v)
    }
}

impl From<i32> for OscValue {
    fn from(v: i32) -> Self {
        OscValue::Int(v)
    }
}

impl From<i64> for OscValue {
    fn from(v: i64) -> Self {
        OscValue::Long(v)
    }
}

impl From<f32> for OscValue {
    fn from(v: f32) -> Self {
        OscValue::Float(v)
    }
}

impl From<f64> for OscValue {
    fn from(v: f64) -> Self {
        OscValue::Double(v)
    }
}

impl From<&str> for OscValue {
    fn from(v: &str) -> Self {
        OscValue::String(v.to_string())
    }
}

impl From<String> for OscValue {
    fn from(v: String) -> Self {
        OscValue::String(v)
    }
}

impl<T: Into<OscValue>> From<Vec<T>> for OscValue {
    fn from(v: Vec<T>) -> Self {
        OscValue::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Build a value tuple from a list of scalars: `osc_values![0.5f32, "on"]`.
#[macro_export]
macro_rules! osc_values {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::value::OscValue::from($v)),*]
    };
}
