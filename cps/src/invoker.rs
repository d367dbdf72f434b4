//! The invoker seam.
//!
//! Blocks never touch receivers directly. Every property, attribute or method
//! access is packaged as an [`Invocation`] and performed by the driver through
//! an [`Invoker`], which is where sandboxing, logging or host functions plug in.

use crate::values::{Failure, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Type name used for the receiver of receiver-less calls.
pub const SCRIPT_RECEIVER: &str = "Script";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Invocation {
    MethodCall {
        receiver: Value,
        method: String,
        args: Vec<Value>,
    },
    GetProperty {
        receiver: Value,
        name: String,
    },
    SetProperty {
        receiver: Value,
        name: String,
        value: Value,
    },
    GetAttribute {
        receiver: Value,
        name: String,
    },
    SetAttribute {
        receiver: Value,
        name: String,
        value: Value,
    },
}

impl Invocation {
    pub fn receiver(&self) -> &Value {
        match self {
            Invocation::MethodCall { receiver, .. }
            | Invocation::GetProperty { receiver, .. }
            | Invocation::SetProperty { receiver, .. }
            | Invocation::GetAttribute { receiver, .. }
            | Invocation::SetAttribute { receiver, .. } => receiver,
        }
    }

    pub fn member(&self) -> &str {
        match self {
            Invocation::MethodCall { method, .. } => method,
            Invocation::GetProperty { name, .. }
            | Invocation::SetProperty { name, .. }
            | Invocation::GetAttribute { name, .. }
            | Invocation::SetAttribute { name, .. } => name,
        }
    }

    /// Type of the receiver as seen by policies and call logs.
    pub fn receiver_type(&self) -> &'static str {
        match self {
            Invocation::MethodCall {
                receiver: Value::Null,
                ..
            } => SCRIPT_RECEIVER,
            other => other.receiver().type_name(),
        }
    }

    /// `Type.member`, the signature policies and logs refer to.
    pub fn signature(&self) -> String {
        format!("{}.{}", self.receiver_type(), self.member())
    }
}

pub trait Invoker: Send + Sync {
    fn method_call(&self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, Failure>;

    fn get_property(&self, receiver: &Value, name: &str) -> Result<Value, Failure>;

    /// Returns the updated receiver.
    fn set_property(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure>;

    fn get_attribute(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        self.get_property(receiver, name)
    }

    fn set_attribute(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        self.set_property(receiver, name, value)
    }

    fn invoke(&self, call: &Invocation) -> Result<Value, Failure> {
        match call {
            Invocation::MethodCall {
                receiver,
                method,
                args,
            } => self.method_call(receiver, method, args),
            Invocation::GetProperty { receiver, name } => self.get_property(receiver, name),
            Invocation::SetProperty {
                receiver,
                name,
                value,
            } => self.set_property(receiver, name, value.clone()),
            Invocation::GetAttribute { receiver, name } => self.get_attribute(receiver, name),
            Invocation::SetAttribute {
                receiver,
                name,
                value,
            } => self.set_attribute(receiver, name, value.clone()),
        }
    }
}

impl<I: Invoker + ?Sized> Invoker for Arc<I> {
    fn method_call(&self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, Failure> {
        (**self).method_call(receiver, method, args)
    }

    fn get_property(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        (**self).get_property(receiver, name)
    }

    fn set_property(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        (**self).set_property(receiver, name, value)
    }

    fn get_attribute(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        (**self).get_attribute(receiver, name)
    }

    fn set_attribute(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        (**self).set_attribute(receiver, name, value)
    }

    fn invoke(&self, call: &Invocation) -> Result<Value, Failure> {
        (**self).invoke(call)
    }
}

pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, Failure> + Send + Sync>;

/// Built-in member semantics for values plus host functions callable
/// without a receiver.
#[derive(Clone, Default)]
pub struct DefaultInvoker {
    functions: HashMap<String, HostFunction>,
}

impl DefaultInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Failure> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    fn arity(receiver: &Value, method: &str, args: &[Value], expected: usize) -> Result<(), Failure> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(Failure::new(
                crate::values::kinds::TYPE_MISMATCH,
                format!(
                    "{}.{} expects {} argument(s), got {}",
                    receiver.type_name(),
                    method,
                    expected,
                    args.len()
                ),
            ))
        }
    }
}

impl fmt::Debug for DefaultInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("DefaultInvoker").field("functions", &names).finish()
    }
}

impl Invoker for DefaultInvoker {
    fn method_call(&self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, Failure> {
        match (receiver, method) {
            (Value::Null, _) => match self.functions.get(method) {
                Some(f) => f(args),
                None => Err(Failure::new(
                    crate::values::kinds::MISSING_MEMBER,
                    format!("No such script method: {}", method),
                )),
            },
            (Value::Str(s), "size" | "length") => Ok(Value::Int(s.chars().count() as i64)),
            (Value::Str(s), "toUpperCase") => Ok(Value::Str(s.to_uppercase())),
            (Value::Str(s), "toLowerCase") => Ok(Value::Str(s.to_lowercase())),
            (Value::Str(s), "trim") => Ok(Value::Str(s.trim().to_string())),
            (Value::Str(s), "contains" | "startsWith" | "endsWith") => {
                Self::arity(receiver, method, args, 1)?;
                let needle = args[0].to_string();
                Ok(Value::Bool(match method {
                    "contains" => s.contains(&needle),
                    "startsWith" => s.starts_with(&needle),
                    _ => s.ends_with(&needle),
                }))
            }
            (Value::List(items), "size") => Ok(Value::Int(items.len() as i64)),
            (Value::List(items), "isEmpty") => Ok(Value::Bool(items.is_empty())),
            (Value::List(items), "contains") => {
                Self::arity(receiver, method, args, 1)?;
                Ok(Value::Bool(items.contains(&args[0])))
            }
            (Value::List(items), "get") => {
                Self::arity(receiver, method, args, 1)?;
                let index = args[0]
                    .as_int()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| Failure::missing_member(receiver, method))?;
                Ok(items.get(index).cloned().unwrap_or_default())
            }
            (Value::Map(entries), "size") => Ok(Value::Int(entries.len() as i64)),
            (Value::Map(entries), "isEmpty") => Ok(Value::Bool(entries.is_empty())),
            (Value::Map(entries), "get" | "containsKey") => {
                Self::arity(receiver, method, args, 1)?;
                let key = args[0].to_string();
                Ok(if method == "get" {
                    entries.get(&key).cloned().unwrap_or_default()
                } else {
                    Value::Bool(entries.contains_key(&key))
                })
            }
            (Value::Map(entries), "keySet") => Ok(Value::List(
                entries.keys().map(|k| Value::Str(k.clone())).collect(),
            )),
            _ => Err(Failure::missing_member(receiver, method)),
        }
    }

    fn get_property(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        match (receiver, name) {
            (Value::Map(entries), _) => Ok(entries.get(name).cloned().unwrap_or_default()),
            (Value::List(items), "size") => Ok(Value::Int(items.len() as i64)),
            (Value::Str(s), "length") => Ok(Value::Int(s.chars().count() as i64)),
            _ => Err(Failure::missing_member(receiver, name)),
        }
    }

    fn set_property(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        match receiver {
            Value::Map(entries) => {
                let mut entries = entries.clone();
                entries.insert(name.to_string(), value);
                Ok(Value::Map(entries))
            }
            _ => Err(Failure::missing_member(receiver, name)),
        }
    }
}

pub type CallRecorder = Arc<dyn Fn(&str) + Send + Sync>;

/// Records calls made on internal receiver types, then delegates.
pub struct LoggingInvoker<I> {
    delegate: I,
    internal_types: Vec<String>,
    calls: Arc<Mutex<Vec<String>>>,
    recorder: Option<CallRecorder>,
}

impl<I: Invoker> LoggingInvoker<I> {
    pub fn new(delegate: I) -> Self {
        LoggingInvoker {
            delegate,
            internal_types: vec![SCRIPT_RECEIVER.to_string()],
            calls: Arc::new(Mutex::new(Vec::new())),
            recorder: None,
        }
    }

    /// Also reports every recorded signature to `recorder`, typically the
    /// execution the script runs in.
    pub fn with_recorder(mut self, recorder: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.recorder = Some(Arc::new(recorder));
        self
    }

    pub fn with_internal_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.internal_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Shared handle onto the call log.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    pub fn recorded(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_internal(&self, type_name: &str) -> bool {
        self.internal_types.iter().any(|t| t == type_name)
    }

    fn maybe_record(&self, call: &Invocation) {
        if self.is_internal(call.receiver_type()) {
            let signature = call.signature();
            tracing::trace!(call = %signature, "internal call");
            if let Some(recorder) = &self.recorder {
                recorder(&signature);
            }
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(signature);
        }
    }
}

impl<I: Invoker> Invoker for LoggingInvoker<I> {
    fn method_call(&self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, Failure> {
        self.maybe_record(&Invocation::MethodCall {
            receiver: receiver.clone(),
            method: method.to_string(),
            args: Vec::new(),
        });
        self.delegate.method_call(receiver, method, args)
    }

    fn get_property(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        self.invoke(&Invocation::GetProperty {
            receiver: receiver.clone(),
            name: name.to_string(),
        })
    }

    fn set_property(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        self.invoke(&Invocation::SetProperty {
            receiver: receiver.clone(),
            name: name.to_string(),
            value,
        })
    }

    fn get_attribute(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        self.invoke(&Invocation::GetAttribute {
            receiver: receiver.clone(),
            name: name.to_string(),
        })
    }

    fn set_attribute(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        self.invoke(&Invocation::SetAttribute {
            receiver: receiver.clone(),
            name: name.to_string(),
            value,
        })
    }

    fn invoke(&self, call: &Invocation) -> Result<Value, Failure> {
        self.maybe_record(call);
        self.delegate.invoke(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn script_functions_receive_arguments() {
        let invoker = DefaultInvoker::new().with_function("echo", |args| Ok(Value::List(args.to_vec())));
        let result = invoker.method_call(&Value::Null, "echo", &[Value::Int(1)]);
        assert_eq!(result, Ok(Value::List(vec![Value::Int(1)])));
    }

    #[test]
    fn unknown_script_method_is_missing_member() {
        let err = DefaultInvoker::new()
            .method_call(&Value::Null, "sh", &[])
            .unwrap_err();
        assert_eq!(err.kind, crate::values::kinds::MISSING_MEMBER);
    }

    #[test]
    fn set_property_returns_updated_map() {
        let invoker = DefaultInvoker::new();
        let updated = invoker
            .set_property(&Value::Map(BTreeMap::new()), "a", Value::Int(1))
            .expect("map");
        assert_eq!(invoker.get_property(&updated, "a"), Ok(Value::Int(1)));
    }

    #[test]
    fn logging_invoker_records_only_internal_receivers() {
        let logging = LoggingInvoker::new(
            DefaultInvoker::new().with_function("echo", |_| Ok(Value::Null)),
        );
        logging.method_call(&Value::Null, "echo", &[]).expect("echo");
        logging
            .method_call(&Value::from("abc"), "size", &[])
            .expect("size");
        assert_eq!(logging.recorded(), vec!["Script.echo".to_string()]);
    }

    #[test]
    fn recorder_sees_each_internal_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let logging = LoggingInvoker::new(DefaultInvoker::new().with_function("echo", |_| Ok(Value::Null)))
            .with_recorder(move |sig| sink.lock().expect("sink").push(sig.to_string()));
        logging.method_call(&Value::Null, "echo", &[]).expect("echo");
        logging.get_property(&Value::Map(BTreeMap::new()), "size").expect("size");
        assert_eq!(*seen.lock().expect("seen"), vec!["Script.echo".to_string()]);
    }

    /// Answers every call through `invoke` alone.
    struct Fixed;

    impl Invoker for Fixed {
        fn method_call(&self, _: &Value, _: &str, _: &[Value]) -> Result<Value, Failure> {
            Ok(Value::from("member"))
        }

        fn get_property(&self, _: &Value, _: &str) -> Result<Value, Failure> {
            Ok(Value::from("member"))
        }

        fn set_property(&self, _: &Value, _: &str, _: Value) -> Result<Value, Failure> {
            Ok(Value::from("member"))
        }

        fn invoke(&self, _: &Invocation) -> Result<Value, Failure> {
            Ok(Value::from("invoke"))
        }
    }

    #[test]
    fn shared_invoker_keeps_its_own_invoke() {
        let shared: Arc<dyn Invoker> = Arc::new(Fixed);
        let call = Invocation::GetProperty {
            receiver: Value::Null,
            name: "x".into(),
        };
        assert_eq!(shared.invoke(&call), Ok(Value::from("invoke")));
        assert_eq!(Invoker::invoke(&shared, &call), Ok(Value::from("invoke")));
    }
}
