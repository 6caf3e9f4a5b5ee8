//! Capability proxies: typed dispatch tables over resolved native symbols.
//!
//! Where the original idea calls for emitting call thunks at runtime, the
//! Rust rendering is a dispatch table built once per capability: every
//! method name maps to a resolved symbol address plus its declared
//! signature, and one statically generated call shim per signature *shape*
//! performs the actual native call. Shims are shared between methods with
//! the same shape; that sharing is internal and never observable.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use tracing::debug;

use crate::capability::{CapabilityDescription, MethodSig, Value, ValueType};
use crate::error::{LoaderError, Result};
use crate::platform::{NativeLibrary, SymbolAddr};

/// Register class of a marshalled argument.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RawArg {
    /// Integer/pointer class: ints, longs, handles and C-string pointers.
    Word(u64),
    /// Floating-point class.
    Float(f64),
}

/// Register class of a native return value.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RetClass {
    Unit,
    Word32,
    Word64,
    Float,
}

#[derive(Debug, Clone, Copy)]
enum RawRet {
    Unit,
    Word32(u32),
    Word64(u64),
    Float(f64),
}

/// One resolved entry point of a capability.
#[derive(Debug)]
struct BoundMethod {
    sig: MethodSig,
    ret_class: RetClass,
    addr: SymbolAddr,
}

/// A generated proxy: pure dispatch from method name to bound native entry
/// point plus marshaling. Holds no state beyond the resolved addresses.
///
/// The addresses stay valid for as long as the owning registry keeps the
/// library handle open; a caller that holds a proxy across registry
/// teardown must not call through it (compare generation counters to detect
/// a torn-down-and-replaced registry).
#[derive(Debug)]
pub struct CapabilityProxy {
    library: String,
    capability: String,
    methods: HashMap<String, BoundMethod>,
}

impl CapabilityProxy {
    /// Resolve every method of `description` against `library` and build the
    /// dispatch table. Any missing symbol fails the whole build; partial
    /// proxies are never produced.
    pub(crate) fn build(
        library: &dyn NativeLibrary,
        library_name: &str,
        description: &CapabilityDescription,
    ) -> Result<Self> {
        let mut methods = HashMap::with_capacity(description.methods.len());
        for sig in &description.methods {
            let ret_class = validate_shape(sig)?;
            let addr = library
                .resolve(&sig.name)
                .map_err(|_| LoaderError::SymbolNotFound {
                    symbol: sig.name.clone(),
                    library: library_name.to_string(),
                })?;
            methods.insert(
                sig.name.clone(),
                BoundMethod {
                    sig: sig.clone(),
                    ret_class,
                    addr,
                },
            );
        }
        debug!(
            library = library_name,
            capability = %description.name,
            methods = methods.len(),
            "built capability proxy"
        );
        Ok(Self {
            library: library_name.to_string(),
            capability: description.name.clone(),
            methods,
        })
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Invoke a bound native entry point with marshalled arguments.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let bound = self
            .methods
            .get(method)
            .ok_or_else(|| LoaderError::InvalidArguments {
                method: method.to_string(),
                detail: format!("not a method of capability {}", self.capability),
            })?;

        let scratch = marshal_args(&bound.sig, args)?;
        // SAFETY: addr was resolved from this proxy's library for a symbol
        // the capability declares with exactly this signature shape, and the
        // registry keeps the library mapped while the proxy is reachable
        // through it.
        let raw = unsafe { invoke_raw(bound.addr.0, bound.ret_class, &scratch.raw) }.ok_or_else(
            || LoaderError::UnsupportedSignature {
                method: method.to_string(),
                detail: bound.sig.to_string(),
            },
        )?;
        unmarshal_ret(&bound.sig, raw)
    }
}

/// Check a signature against the supported call-shape table and classify
/// its return value. Mixed int/float shapes are covered to arity 4,
/// all-integer shapes to arity 8.
fn validate_shape(sig: &MethodSig) -> Result<RetClass> {
    let unsupported = |detail: &str| LoaderError::UnsupportedSignature {
        method: sig.name.clone(),
        detail: detail.to_string(),
    };

    let mut has_float = false;
    for param in &sig.params {
        match param {
            ValueType::Unit => return Err(unsupported("unit is not a parameter type")),
            ValueType::Double => has_float = true,
            _ => {}
        }
    }
    if sig.params.len() > 8 {
        return Err(unsupported("more than 8 parameters"));
    }
    if has_float && sig.params.len() > 4 {
        return Err(unsupported("float parameters beyond arity 4"));
    }

    Ok(match sig.ret {
        ValueType::Unit => RetClass::Unit,
        ValueType::Int => RetClass::Word32,
        ValueType::Long | ValueType::Handle | ValueType::Str => RetClass::Word64,
        ValueType::Double => RetClass::Float,
    })
}

/// Marshalled arguments plus the C strings that must outlive the call.
struct CallScratch {
    raw: Vec<RawArg>,
    _strings: Vec<CString>,
}

fn marshal_args(sig: &MethodSig, args: &[Value]) -> Result<CallScratch> {
    if args.len() != sig.params.len() {
        return Err(LoaderError::InvalidArguments {
            method: sig.name.clone(),
            detail: format!("expected {} arguments, got {}", sig.params.len(), args.len()),
        });
    }

    let mut raw = Vec::with_capacity(args.len());
    let mut strings = Vec::new();
    for (index, (param, value)) in sig.params.iter().zip(args).enumerate() {
        let mismatch = || LoaderError::InvalidArguments {
            method: sig.name.clone(),
            detail: format!(
                "parameter {index} expects {param}, got {}",
                value.value_type()
            ),
        };
        let arg = match (param, value) {
            (ValueType::Int, Value::Int(v)) => RawArg::Word(*v as u64),
            (ValueType::Long, Value::Long(v)) => RawArg::Word(*v as u64),
            (ValueType::Handle, Value::Handle(v)) => RawArg::Word(*v as u64),
            (ValueType::Double, Value::Double(v)) => RawArg::Float(*v),
            (ValueType::Str, Value::Str(text)) => {
                let cstring = CString::new(text.as_str()).map_err(|_| {
                    LoaderError::InvalidArguments {
                        method: sig.name.clone(),
                        detail: format!("parameter {index} contains an interior NUL byte"),
                    }
                })?;
                strings.push(cstring);
                let ptr = strings
                    .last()
                    .map(|s| s.as_ptr() as u64)
                    .unwrap_or_default();
                RawArg::Word(ptr)
            }
            _ => return Err(mismatch()),
        };
        raw.push(arg);
    }

    Ok(CallScratch {
        raw,
        _strings: strings,
    })
}

fn unmarshal_ret(sig: &MethodSig, raw: RawRet) -> Result<Value> {
    Ok(match (sig.ret, raw) {
        (ValueType::Unit, RawRet::Unit) => Value::Unit,
        (ValueType::Int, RawRet::Word32(v)) => Value::Int(v as i32),
        (ValueType::Long, RawRet::Word64(v)) => Value::Long(v as i64),
        (ValueType::Handle, RawRet::Word64(v)) => Value::Handle(v as usize),
        (ValueType::Double, RawRet::Float(v)) => Value::Double(v),
        (ValueType::Str, RawRet::Word64(v)) => {
            let ptr = v as *const c_char;
            if ptr.is_null() {
                return Err(LoaderError::NullPointer(sig.name.clone()));
            }
            // The native buffer's lifetime is not assumed to outlive the
            // call, so the bytes are copied out immediately.
            // SAFETY: the signature declares this return as a pointer to a
            // NUL-terminated byte buffer.
            let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
            Value::Str(text)
        }
        // Return classes are derived from the same signature at build time.
        _ => unreachable!("return class drifted from declared signature"),
    })
}

macro_rules! shim {
    ($addr:expr, $ret:expr, ($($name:ident : $ty:ty),*)) => {{
        match $ret {
            RetClass::Unit => {
                let f: unsafe extern "C" fn($($ty),*) = std::mem::transmute($addr);
                f($($name),*);
                Some(RawRet::Unit)
            }
            RetClass::Word32 => {
                let f: unsafe extern "C" fn($($ty),*) -> u32 = std::mem::transmute($addr);
                Some(RawRet::Word32(f($($name),*)))
            }
            RetClass::Word64 => {
                let f: unsafe extern "C" fn($($ty),*) -> u64 = std::mem::transmute($addr);
                Some(RawRet::Word64(f($($name),*)))
            }
            RetClass::Float => {
                let f: unsafe extern "C" fn($($ty),*) -> f64 = std::mem::transmute($addr);
                Some(RawRet::Float(f($($name),*)))
            }
        }
    }};
}

/// Call through a resolved address with the shim matching the argument
/// shape. Returns `None` for a shape outside the table; `validate_shape`
/// rejects those before a method can ever be bound.
///
/// # Safety
/// `addr` must point at an `extern "C"` function whose true parameter and
/// return classes match `args` and `ret` exactly.
unsafe fn invoke_raw(addr: *const (), ret: RetClass, args: &[RawArg]) -> Option<RawRet> {
    use RawArg::{Float as F, Word as W};
    match args {
        &[] => shim!(addr, ret, ()),
        &[W(a)] => shim!(addr, ret, (a: u64)),
        &[F(a)] => shim!(addr, ret, (a: f64)),
        &[W(a), W(b)] => shim!(addr, ret, (a: u64, b: u64)),
        &[W(a), F(b)] => shim!(addr, ret, (a: u64, b: f64)),
        &[F(a), W(b)] => shim!(addr, ret, (a: f64, b: u64)),
        &[F(a), F(b)] => shim!(addr, ret, (a: f64, b: f64)),
        &[W(a), W(b), W(c)] => shim!(addr, ret, (a: u64, b: u64, c: u64)),
        &[W(a), W(b), F(c)] => shim!(addr, ret, (a: u64, b: u64, c: f64)),
        &[W(a), F(b), W(c)] => shim!(addr, ret, (a: u64, b: f64, c: u64)),
        &[W(a), F(b), F(c)] => shim!(addr, ret, (a: u64, b: f64, c: f64)),
        &[F(a), W(b), W(c)] => shim!(addr, ret, (a: f64, b: u64, c: u64)),
        &[F(a), W(b), F(c)] => shim!(addr, ret, (a: f64, b: u64, c: f64)),
        &[F(a), F(b), W(c)] => shim!(addr, ret, (a: f64, b: f64, c: u64)),
        &[F(a), F(b), F(c)] => shim!(addr, ret, (a: f64, b: f64, c: f64)),
        &[W(a), W(b), W(c), W(d)] => shim!(addr, ret, (a: u64, b: u64, c: u64, d: u64)),
        &[W(a), W(b), W(c), F(d)] => shim!(addr, ret, (a: u64, b: u64, c: u64, d: f64)),
        &[W(a), W(b), F(c), W(d)] => shim!(addr, ret, (a: u64, b: u64, c: f64, d: u64)),
        &[W(a), W(b), F(c), F(d)] => shim!(addr, ret, (a: u64, b: u64, c: f64, d: f64)),
        &[W(a), F(b), W(c), W(d)] => shim!(addr, ret, (a: u64, b: f64, c: u64, d: u64)),
        &[W(a), F(b), W(c), F(d)] => shim!(addr, ret, (a: u64, b: f64, c: u64, d: f64)),
        &[W(a), F(b), F(c), W(d)] => shim!(addr, ret, (a: u64, b: f64, c: f64, d: u64)),
        &[W(a), F(b), F(c), F(d)] => shim!(addr, ret, (a: u64, b: f64, c: f64, d: f64)),
        &[F(a), W(b), W(c), W(d)] => shim!(addr, ret, (a: f64, b: u64, c: u64, d: u64)),
        &[F(a), W(b), W(c), F(d)] => shim!(addr, ret, (a: f64, b: u64, c: u64, d: f64)),
        &[F(a), W(b), F(c), W(d)] => shim!(addr, ret, (a: f64, b: u64, c: f64, d: u64)),
        &[F(a), W(b), F(c), F(d)] => shim!(addr, ret, (a: f64, b: u64, c: f64, d: f64)),
        &[F(a), F(b), W(c), W(d)] => shim!(addr, ret, (a: f64, b: f64, c: u64, d: u64)),
        &[F(a), F(b), W(c), F(d)] => shim!(addr, ret, (a: f64, b: f64, c: u64, d: f64)),
        &[F(a), F(b), F(c), W(d)] => shim!(addr, ret, (a: f64, b: f64, c: f64, d: u64)),
        &[F(a), F(b), F(c), F(d)] => shim!(addr, ret, (a: f64, b: f64, c: f64, d: f64)),
        &[W(a), W(b), W(c), W(d), W(e)] => {
            shim!(addr, ret, (a: u64, b: u64, c: u64, d: u64, e: u64))
        }
        &[W(a), W(b), W(c), W(d), W(e), W(g)] => {
            shim!(addr, ret, (a: u64, b: u64, c: u64, d: u64, e: u64, g: u64))
        }
        &[W(a), W(b), W(c), W(d), W(e), W(g), W(h)] => {
            shim!(addr, ret, (a: u64, b: u64, c: u64, d: u64, e: u64, g: u64, h: u64))
        }
        &[W(a), W(b), W(c), W(d), W(e), W(g), W(h), W(i)] => shim!(
            addr,
            ret,
            (a: u64, b: u64, c: u64, d: u64, e: u64, g: u64, h: u64, i: u64)
        ),
        _ => None,
    }
}
