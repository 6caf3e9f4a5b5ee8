//! Capability descriptions: the caller-supplied contract a proxy must expose.
//!
//! A capability is a named set of method signatures. The loader core treats
//! it as a pure input; the domain API behind the signatures is irrelevant
//! here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type of a marshalled parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// No value (void return).
    Unit,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// Opaque native handle, passed through unchanged.
    Handle,
    /// Text. As a return type this means "pointer to a null-terminated
    /// native byte buffer", copied into an owned string right after the
    /// call; as a parameter it is passed as a C string pointer.
    Str,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unit => write!(f, "unit"),
            ValueType::Int => write!(f, "int"),
            ValueType::Long => write!(f, "long"),
            ValueType::Double => write!(f, "double"),
            ValueType::Handle => write!(f, "handle"),
            ValueType::Str => write!(f, "str"),
        }
    }
}

/// A dynamically typed value crossing the proxy boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Unit,
    Int(i32),
    Long(i64),
    Double(f64),
    Handle(usize),
    Str(String),
}

impl Value {
    /// The declared type this value satisfies.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Unit => ValueType::Unit,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Handle(_) => ValueType::Handle,
            Value::Str(_) => ValueType::Str,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<usize> {
        match self {
            Value::Handle(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// Signature of one native entry point: symbol name, ordered parameter
/// types and return type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<ValueType>,
    pub ret: ValueType,
}

impl MethodSig {
    pub fn new(name: impl Into<String>, params: Vec<ValueType>, ret: ValueType) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|ty| ty.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({params}) -> {}", self.name, self.ret)
    }
}

/// A named set of method signatures a proxy must implement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescription {
    /// Capability identifier, used as the proxy cache key.
    pub name: String,
    pub methods: Vec<MethodSig>,
}

impl CapabilityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method signature (builder style).
    pub fn with_method(
        mut self,
        name: impl Into<String>,
        params: Vec<ValueType>,
        ret: ValueType,
    ) -> Self {
        self.methods.push(MethodSig::new(name, params, ret));
        self
    }
}
