//! Sandboxed execution engine for dynamically generated parsers.
//!
//! Oracle-produced parser source is written in a compact Go-flavored
//! dialect: the file declares `package dynamic` and a single entry point
//! `func Parse(data []byte) map[string]interface{}` that returns a record or
//! `nil`. This crate compiles that source to an AST once per cache key and
//! evaluates it under strict containment:
//!
//! - **Allow-listed imports only.** A parser may import `fmt`,
//!   `encoding/binary`, `math`, `math/bits`, `bytes`, `strconv`,
//!   `unicode/utf8`, `time`, and `errors`. Anything else fails at compile,
//!   before user code runs.
//! - **Hard deadline.** Execution is abandoned cooperatively once the
//!   per-call deadline (50 ms by default) expires; an unbounded loop comes
//!   back as [`ExecError::Timeout`] and the engine stays usable.
//! - **Panic containment.** Out-of-range indexing, nil dereference, bad
//!   operand types and friends surface as [`ExecError::Panic`], never as a
//!   host crash.
//!
//! The compiled cache is keyed by caller-chosen string (normally the
//! protocol id) so identical sources compile once. Re-registration
//! invalidates through [`Engine::clear_cache`].

mod ast;
mod interp;
mod lex;
mod parse;
mod stdlib;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use framegate_types::{FieldValue, Record};

use ast::Program;
use interp::{FaultKind, Interp, Value};

pub use stdlib::ALLOWED_IMPORTS;

/// Package name every parser source must declare.
pub const EXPECTED_PACKAGE: &str = "dynamic";

/// Name of the entry-point function.
pub const ENTRY_POINT: &str = "Parse";

/// Default per-call execution deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(50);

/// Engine failures, mutually exclusive by construction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecError {
    /// The source failed to lex/parse, declared the wrong package, or
    /// imported something outside the allow-list.
    #[error("compile error: {0}")]
    Compile(String),

    /// The entry point is missing or has the wrong shape, or the parser
    /// returned something that is neither a mapping nor nil.
    #[error("parser contract violation: {0}")]
    Contract(String),

    /// The parser exceeded its execution deadline and was abandoned.
    #[error("execution timeout: parser exceeded {}ms deadline", .0.as_millis())]
    Timeout(Duration),

    /// The parser hit a runtime fault (out-of-range index, nil dereference,
    /// bad operand types, ...).
    #[error("parser panic: {0}")]
    Panic(String),
}

/// Compiles and runs parser source with caching, timeout and containment.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Engine {
    cache: RwLock<HashMap<String, Arc<Program>>>,
    deadline: Duration,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_deadline(DEFAULT_DEADLINE)
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            deadline,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `source`'s `Parse` over `frame`.
    ///
    /// The compiled program is cached under `cache_key`; subsequent calls
    /// with the same key skip compilation entirely (the source is not even
    /// inspected, so callers must [`Engine::clear_cache`] when it changes).
    pub fn execute(&self, cache_key: &str, frame: &[u8], source: &str) -> Result<Record, ExecError> {
        let program = self.cached_or_compile(cache_key, source)?;
        self.run(&program, frame)
    }

    /// Pre-compile `source` under `cache_key` without executing it.
    pub fn compile_and_cache(&self, cache_key: &str, source: &str) -> Result<(), ExecError> {
        let program = Arc::new(compile(source)?);
        self.write_cache().insert(cache_key.to_string(), program);
        Ok(())
    }

    /// Drop the compiled entry for `cache_key`, if any.
    pub fn clear_cache(&self, cache_key: &str) {
        self.write_cache().remove(cache_key);
    }

    /// Whether a compiled program is cached under `cache_key`.
    #[must_use]
    pub fn is_cached(&self, cache_key: &str) -> bool {
        self.read_cache().contains_key(cache_key)
    }

    fn cached_or_compile(&self, cache_key: &str, source: &str) -> Result<Arc<Program>, ExecError> {
        if let Some(program) = self.read_cache().get(cache_key) {
            return Ok(Arc::clone(program));
        }
        let mut cache = self.write_cache();
        // double-check: another thread may have compiled while we waited
        if let Some(program) = cache.get(cache_key) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(compile(source)?);
        cache.insert(cache_key.to_string(), Arc::clone(&program));
        Ok(program)
    }

    fn run(&self, program: &Program, frame: &[u8]) -> Result<Record, ExecError> {
        let Some(entry) = program.func(ENTRY_POINT) else {
            return Err(ExecError::Contract(format!(
                "entry point {ENTRY_POINT} not found"
            )));
        };
        let deadline = Instant::now() + self.deadline;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let interp = Interp::new(program, deadline);
            interp.call_entry(entry, vec![Value::bytes(frame.to_vec())])
        }));
        match outcome {
            Err(_) => {
                tracing::error!("interpreter panicked while running a sandboxed parser");
                Err(ExecError::Panic("internal interpreter fault".into()))
            }
            Ok(Err(fault)) => match fault.kind {
                FaultKind::Timeout => Err(ExecError::Timeout(self.deadline)),
                FaultKind::Panic => Err(ExecError::Panic(fault.msg)),
            },
            Ok(Ok(value)) => to_record(value),
        }
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Program>>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Program>>> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn compile(source: &str) -> Result<Program, ExecError> {
    let program = parse::parse(source).map_err(|e| ExecError::Compile(e.to_string()))?;
    if program.package != EXPECTED_PACKAGE {
        return Err(ExecError::Compile(format!(
            "source must declare package {EXPECTED_PACKAGE}, found package {}",
            program.package
        )));
    }
    for import in &program.imports {
        if !stdlib::import_allowed(import) {
            return Err(ExecError::Compile(format!(
                "import {import:?} is not permitted in sandboxed parsers"
            )));
        }
    }
    let Some(entry) = program.func(ENTRY_POINT) else {
        return Err(ExecError::Contract(format!(
            "entry point {ENTRY_POINT} not found"
        )));
    };
    if entry.params.len() != 1 {
        return Err(ExecError::Contract(format!(
            "{ENTRY_POINT} must take exactly one argument, takes {}",
            entry.params.len()
        )));
    }
    Ok(program)
}

/// Convert the entry point's return value into a [`Record`].
///
/// `nil` means "insufficient data / not applicable" and becomes an empty
/// record with no error.
fn to_record(value: Value) -> Result<Record, ExecError> {
    match value {
        Value::Nil => Ok(Record::new()),
        Value::Map(map) => {
            let mut record = Record::new();
            for (key, value) in map.borrow().iter() {
                if matches!(value, Value::Nil) {
                    continue;
                }
                record.insert(key.clone(), to_field(value)?);
            }
            Ok(record)
        }
        other => Err(ExecError::Contract(format!(
            "{ENTRY_POINT} must return a map or nil, returned {}",
            other.type_name()
        ))),
    }
}

fn to_field(value: &Value) -> Result<FieldValue, ExecError> {
    Ok(match value {
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Int(i) => FieldValue::Int(*i),
        Value::Float(f) => FieldValue::Float(*f),
        Value::Str(s) => FieldValue::Str(s.to_string()),
        Value::Bytes(b) => FieldValue::Bytes(b.borrow().clone()),
        Value::Time(nanos) => FieldValue::Int(nanos / 1_000_000),
        Value::ErrVal(msg) => FieldValue::Str(msg.to_string()),
        Value::List(items) => {
            let mut list = Vec::with_capacity(items.borrow().len());
            for item in items.borrow().iter() {
                list.push(to_field(item)?);
            }
            FieldValue::List(list)
        }
        Value::Map(map) => {
            let mut inner = Record::new();
            for (key, value) in map.borrow().iter() {
                if matches!(value, Value::Nil) {
                    continue;
                }
                inner.insert(key.clone(), to_field(value)?);
            }
            FieldValue::Map(inner)
        }
        Value::Nil | Value::Func(_) => {
            return Err(ExecError::Contract(format!(
                "parser returned unsupported {} value",
                value.type_name()
            )));
        }
    })
}
