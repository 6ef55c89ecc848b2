//! Custom SQL functions and aggregates

use std::ffi::{c_char, c_int, c_void, CString};
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::Arc;

use rusqlite::ffi;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::statement::copy_bytes;
use crate::value::Value;

pub type ScalarFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync + 'static>;
pub type AggregateFactory = Arc<dyn Fn() -> Box<dyn AggregateFunction> + Send + Sync + 'static>;

/// Per-group aggregate state
///
/// One instance is created on the first `step` of a group and consumed by `finalize`.
pub trait AggregateFunction: Send {
    fn step(&mut self, args: &[Value]) -> Result<()>;
    fn finalize(self: Box<Self>) -> Result<Value>;
}

#[derive(Clone)]
pub enum FunctionKind {
    Scalar(ScalarFn),
    Aggregate(AggregateFactory),
}

/// (name, arity) pair; arity -1 is variadic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    pub name: String,
    pub arity: i32,
}

#[derive(Clone)]
pub struct CustomFunction {
    name: String,
    arity: i32,
    pure: bool,
    indirect: bool,
    kind: FunctionKind,
}

impl CustomFunction {
    pub fn scalar<F>(name: impl Into<String>, arity: i32, f: F) -> Self
    where F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static {
        Self { name: name.into(), arity, pure: false, indirect: false, kind: FunctionKind::Scalar(Arc::new(f)) }
    }

    pub fn aggregate<A, F>(name: impl Into<String>, arity: i32, factory: F) -> Self
    where
        A: AggregateFunction + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let factory: AggregateFactory = Arc::new(move || Box::new(factory()));
        Self { name: name.into(), arity, pure: false, indirect: false, kind: FunctionKind::Aggregate(factory) }
    }

    /// Same inputs always give the same output; lets the engine reuse results
    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    /// Allow use from triggers, views and schema expressions
    pub fn indirect(mut self) -> Self {
        self.indirect = true;
        self
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn arity(&self) -> i32 { self.arity }

    pub fn kind(&self) -> &FunctionKind { &self.kind }

    pub fn identity(&self) -> FunctionIdentity { FunctionIdentity { name: self.name.clone(), arity: self.arity } }

    fn flags(&self) -> c_int {
        let mut flags = ffi::SQLITE_UTF8;
        if self.pure {
            flags |= ffi::SQLITE_DETERMINISTIC;
        }
        if !self.indirect {
            flags |= ffi::SQLITE_DIRECTONLY;
        }
        flags
    }

    /// Register with the engine, replacing any function with the same identity
    pub(crate) fn install(&self, conn: &rusqlite::Connection) -> Result<()> {
        debug!("Installing function {}/{}", self.name, self.arity);
        let name = CString::new(self.name.as_str())?;
        let (func, step, last): (Option<XFunc>, Option<XFunc>, Option<XFinal>) = match self.kind {
            FunctionKind::Scalar(_) => (Some(scalar_trampoline as XFunc), None, None),
            FunctionKind::Aggregate(_) => (None, Some(step_trampoline as XFunc), Some(final_trampoline as XFinal)),
        };
        let app = Box::into_raw(Box::new(self.kind.clone()));
        // SAFETY: the engine owns `app` from here on and frees it through `destroy`, also when registration fails
        unsafe {
            let db = conn.handle();
            let rc = ffi::sqlite3_create_function_v2(db, name.as_ptr(), self.arity, self.flags(), app.cast::<c_void>(), func, step, last, Some(destroy));
            if rc != ffi::SQLITE_OK {
                return Err(Error::from_handle(db, rc));
            }
        }
        Ok(())
    }

    pub(crate) fn uninstall(&self, conn: &rusqlite::Connection) -> Result<()> {
        debug!("Removing function {}/{}", self.name, self.arity);
        let name = CString::new(self.name.as_str())?;
        unsafe {
            let db = conn.handle();
            let rc = ffi::sqlite3_create_function_v2(db, name.as_ptr(), self.arity, ffi::SQLITE_UTF8, ptr::null_mut(), None, None, None, None);
            if rc != ffi::SQLITE_OK {
                return Err(Error::from_handle(db, rc));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CustomFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FunctionKind::Scalar(_) => "scalar",
            FunctionKind::Aggregate(_) => "aggregate",
        };
        write!(f, "CustomFunction({} {}/{}, pure: {}, indirect: {})", kind, self.name, self.arity, self.pure, self.indirect)
    }
}

type XFunc = unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value);
type XFinal = unsafe extern "C" fn(*mut ffi::sqlite3_context);

/// Per-group state behind the engine's aggregate context
///
/// The context itself only holds a pointer to this box. `instance` is None when the factory panicked.
struct AggregateSlot {
    instance: Option<Box<dyn AggregateFunction>>,
    poisoned: bool,
}

unsafe fn function_kind<'a>(ctx: *mut ffi::sqlite3_context) -> &'a FunctionKind { &*(ffi::sqlite3_user_data(ctx) as *const FunctionKind) }

unsafe extern "C" fn scalar_trampoline(ctx: *mut ffi::sqlite3_context, argc: c_int, argv: *mut *mut ffi::sqlite3_value) {
    let FunctionKind::Scalar(f) = function_kind(ctx) else {
        return;
    };
    let args = arguments(argc, argv);
    match catch_unwind(AssertUnwindSafe(|| f(&args))) {
        Ok(Ok(value)) => set_result(ctx, &value),
        Ok(Err(err)) => set_error(ctx, &err),
        Err(_) => {
            error!("custom function panicked");
            set_error(ctx, &Error::Usage("custom function panicked".into()));
        }
    }
}

unsafe extern "C" fn step_trampoline(ctx: *mut ffi::sqlite3_context, argc: c_int, argv: *mut *mut ffi::sqlite3_value) {
    let FunctionKind::Aggregate(factory) = function_kind(ctx) else {
        return;
    };
    // Zeroed on first use for each group
    let cell = ffi::sqlite3_aggregate_context(ctx, mem::size_of::<*mut AggregateSlot>() as c_int) as *mut *mut AggregateSlot;
    if cell.is_null() {
        ffi::sqlite3_result_error_nomem(ctx);
        return;
    }
    if (*cell).is_null() {
        let instance = catch_unwind(AssertUnwindSafe(|| factory())).ok();
        *cell = Box::into_raw(Box::new(AggregateSlot { poisoned: instance.is_none(), instance }));
    }
    let slot = &mut **cell;
    if slot.poisoned {
        return;
    }
    let Some(instance) = slot.instance.as_mut() else {
        return;
    };
    let args = arguments(argc, argv);
    let failure = match catch_unwind(AssertUnwindSafe(|| instance.step(&args))) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(_) => {
            error!("aggregate step panicked");
            Error::Usage("aggregate step panicked".into())
        }
    };
    slot.poisoned = true;
    set_error(ctx, &failure);
}

/// Also runs while the engine cleans up after a failed step; a poisoned group only releases its state
unsafe extern "C" fn final_trampoline(ctx: *mut ffi::sqlite3_context) {
    let FunctionKind::Aggregate(factory) = function_kind(ctx) else {
        return;
    };
    let cell = ffi::sqlite3_aggregate_context(ctx, 0) as *mut *mut AggregateSlot;
    let slot = if cell.is_null() || (*cell).is_null() {
        None
    } else {
        let slot = Box::from_raw(*cell);
        *cell = ptr::null_mut();
        Some(slot)
    };
    let instance = match slot {
        Some(slot) if slot.poisoned => {
            warn!("aggregate finalized after a failed step; discarding state");
            ffi::sqlite3_result_null(ctx);
            return;
        }
        Some(slot) => slot.instance,
        // Empty group: finalize a fresh instance
        None => catch_unwind(AssertUnwindSafe(|| factory())).ok(),
    };
    let Some(instance) = instance else {
        set_error(ctx, &Error::Usage("aggregate factory panicked".into()));
        return;
    };
    match catch_unwind(AssertUnwindSafe(move || instance.finalize())) {
        Ok(Ok(value)) => set_result(ctx, &value),
        Ok(Err(err)) => set_error(ctx, &err),
        Err(_) => {
            error!("aggregate finalize panicked");
            set_error(ctx, &Error::Usage("aggregate finalize panicked".into()));
        }
    }
}

unsafe extern "C" fn destroy(app: *mut c_void) { drop(Box::from_raw(app as *mut FunctionKind)); }

unsafe fn arguments(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Vec<Value> {
    if argv.is_null() || argc <= 0 {
        return Vec::new();
    }
    slice::from_raw_parts(argv, argc as usize).iter().map(|&arg| argument(arg)).collect()
}

/// Copy one argument out of engine memory
unsafe fn argument(arg: *mut ffi::sqlite3_value) -> Value {
    match ffi::sqlite3_value_type(arg) {
        ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_value_int64(arg)),
        ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_value_double(arg)),
        ffi::SQLITE_TEXT => {
            let data = ffi::sqlite3_value_text(arg);
            let size = ffi::sqlite3_value_bytes(arg);
            Value::from_text_bytes(copy_bytes(data.cast::<u8>(), size))
        }
        ffi::SQLITE_BLOB => {
            let data = ffi::sqlite3_value_blob(arg);
            let size = ffi::sqlite3_value_bytes(arg);
            Value::Blob(copy_bytes(data.cast::<u8>(), size).to_vec())
        }
        _ => Value::Null,
    }
}

unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
    match value {
        Value::Integer(i) => ffi::sqlite3_result_int64(ctx, *i),
        Value::Real(f) => ffi::sqlite3_result_double(ctx, *f),
        Value::Text(s) => match c_int::try_from(s.len()) {
            Ok(len) => ffi::sqlite3_result_text(ctx, s.as_ptr().cast::<c_char>(), len, ffi::SQLITE_TRANSIENT()),
            Err(_) => ffi::sqlite3_result_error_toobig(ctx),
        },
        Value::Blob(b) if b.is_empty() => ffi::sqlite3_result_zeroblob(ctx, 0),
        Value::Blob(b) => match c_int::try_from(b.len()) {
            Ok(len) => ffi::sqlite3_result_blob(ctx, b.as_ptr().cast::<c_void>(), len, ffi::SQLITE_TRANSIENT()),
            Err(_) => ffi::sqlite3_result_error_toobig(ctx),
        },
        Value::Null => ffi::sqlite3_result_null(ctx),
    }
}

/// Errors with a native reason keep their result code; others report as a generic function error
unsafe fn set_error(ctx: *mut ffi::sqlite3_context, err: &Error) {
    let message = err.message();
    let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
    ffi::sqlite3_result_error(ctx, message.as_ptr().cast::<c_char>(), len);
    // Setting the message resets the code to SQLITE_ERROR, so the code goes last
    if let Some(code) = err.reason().code() {
        ffi::sqlite3_result_error_code(ctx, code);
    }
}
