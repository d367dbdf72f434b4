// Runtime value system for the CPS engine
// Values are plain data so that any suspended step can be written out and read back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Truthiness used by conditions and logical operators: `null`, `false`,
    /// zero and empty containers are false, everything else is true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(f, "[{}]", entries.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Well-known failure kinds raised by the engine itself.
pub mod kinds {
    pub const MISSING_VARIABLE: &str = "MissingVariable";
    pub const MISSING_MEMBER: &str = "MissingMember";
    pub const TYPE_MISMATCH: &str = "TypeMismatch";
    pub const DIVISION_BY_ZERO: &str = "DivisionByZero";
    pub const THROWN: &str = "Thrown";
    pub const ENGINE_FAULT: &str = "EngineFault";
}

/// A script-level failure. Failures travel through the continuation chain as
/// ordinary data so that try/catch/finally blocks can intercept them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Failure {
            kind: kind.into(),
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn missing_variable(name: &str) -> Self {
        Failure::new(kinds::MISSING_VARIABLE, format!("No such variable: {}", name))
    }

    pub fn missing_member(receiver: &Value, member: &str) -> Self {
        Failure::new(
            kinds::MISSING_MEMBER,
            format!("No member {} on {}", member, receiver.type_name()),
        )
    }

    pub fn type_mismatch(operation: &str, lhs: &Value, rhs: &Value) -> Self {
        Failure::new(
            kinds::TYPE_MISMATCH,
            format!(
                "Cannot apply {} to {} and {}",
                operation,
                lhs.type_name(),
                rhs.type_name()
            ),
        )
    }

    /// Builds the failure raised by a `throw` of `value`. A map carrying
    /// `kind`/`message` entries keeps them; anything else becomes the payload.
    pub fn from_thrown(value: Value) -> Self {
        match value {
            Value::Str(message) => Failure::new(kinds::THROWN, message),
            Value::Map(mut entries) => {
                let kind = match entries.remove("kind") {
                    Some(Value::Str(kind)) => kind,
                    _ => kinds::THROWN.to_string(),
                };
                let message = match entries.remove("message") {
                    Some(Value::Str(message)) => message,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let failure = Failure::new(kind, message);
                match entries.remove("payload") {
                    Some(payload) => failure.with_payload(payload),
                    None => failure,
                }
            }
            other => Failure::new(kinds::THROWN, other.to_string()).with_payload(other),
        }
    }

    /// The value bound to a catch variable.
    pub fn to_value(&self) -> Value {
        let mut entries = BTreeMap::new();
        entries.insert("kind".to_string(), Value::Str(self.kind.clone()));
        entries.insert("message".to_string(), Value::Str(self.message.clone()));
        if let Some(payload) = &self.payload {
            entries.insert("payload".to_string(), payload.clone());
        }
        Value::Map(entries)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a continuation receives: either a produced value or a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Value(Value),
    Thrown(Failure),
}

impl Signal {
    pub fn value(v: impl Into<Value>) -> Self {
        Signal::Value(v.into())
    }

    pub fn is_thrown(&self) -> bool {
        matches!(self, Signal::Thrown(_))
    }
}
