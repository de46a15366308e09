//! Tree-walking evaluator with a cooperative hard deadline.
//!
//! Every runtime fault a parser can provoke (out-of-range index, nil map
//! write, type mismatch, division by zero, runaway recursion) is reported as
//! a [`Fault`] and never unwinds the host. The deadline is checked on a
//! cheap instruction counter so an unbounded loop is abandoned within a few
//! microseconds of expiry.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use crate::ast::*;
use crate::stdlib;

const MAX_CALL_DEPTH: u32 = 200;
const TICK_MASK: u32 = 0x3F;

/// A runtime value. Aggregates are reference types, matching the source
/// language's slice/map semantics closely enough for parser code.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
    Bytes(Rc<RefCell<Vec<u8>>>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<BTreeMap<String, Value>>>),
    Func(Rc<Closure>),
    /// Unix timestamp in nanoseconds, as returned by `time.Now()`.
    Time(i64),
    ErrVal(Rc<String>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Rc::new(s.into()))
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(Rc::new(RefCell::new(b.into())))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "[]byte",
            Value::List(_) => "[]interface{}",
            Value::Map(_) => "map[string]interface{}",
            Value::Func(_) => "func",
            Value::Time(_) => "time.Time",
            Value::ErrVal(_) => "error",
        }
    }
}

#[derive(Debug)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Block,
    pub env: EnvRef,
}

/// What went wrong during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Panic,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub msg: String,
}

impl Fault {
    pub fn panic(msg: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Panic,
            msg: msg.into(),
        }
    }

    fn timeout() -> Self {
        Self {
            kind: FaultKind::Timeout,
            msg: "deadline exceeded".into(),
        }
    }
}

pub type EvalResult = Result<Value, Fault>;

#[derive(Debug)]
pub struct Env {
    vars: HashMap<String, Value>,
    parent: Option<EnvRef>,
}

pub type EnvRef = Rc<RefCell<Env>>;

impl Env {
    pub fn root() -> EnvRef {
        Rc::new(RefCell::new(Env {
            vars: HashMap::new(),
            parent: None,
        }))
    }

    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Env {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn define(env: &EnvRef, name: &str, value: Value) {
        env.borrow_mut().vars.insert(name.to_string(), value);
    }

    pub fn get(env: &EnvRef, name: &str) -> Option<Value> {
        let env = env.borrow();
        if let Some(v) = env.vars.get(name) {
            return Some(v.clone());
        }
        env.parent.as_ref().and_then(|p| Env::get(p, name))
    }

    /// Assign to an existing binding, walking outward. Returns false when the
    /// name was never declared.
    pub fn assign(env: &EnvRef, name: &str, value: Value) -> bool {
        let mut env = env.borrow_mut();
        if let Some(slot) = env.vars.get_mut(name) {
            *slot = value;
            return true;
        }
        match env.parent.as_ref() {
            Some(p) => Env::assign(p, name, value),
            None => false,
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type ExecResult = Result<Flow, Fault>;

pub struct Interp<'p> {
    program: &'p Program,
    /// Package names (final path segments) the source imported.
    imports: HashSet<String>,
    deadline: Instant,
    ticks: Cell<u32>,
    depth: Cell<u32>,
}

impl<'p> Interp<'p> {
    pub fn new(program: &'p Program, deadline: Instant) -> Self {
        let imports = program
            .imports
            .iter()
            .map(|path| path.rsplit('/').next().unwrap_or(path).to_string())
            .collect();
        Self {
            program,
            imports,
            deadline,
            ticks: Cell::new(0),
            depth: Cell::new(0),
        }
    }

    /// Invoke a top-level function with the given arguments.
    pub fn call_entry(&self, decl: &FuncDecl, args: Vec<Value>) -> EvalResult {
        self.call_decl(decl, args)
    }

    fn tick(&self) -> Result<(), Fault> {
        let t = self.ticks.get().wrapping_add(1);
        self.ticks.set(t);
        if t & TICK_MASK == 0 && Instant::now() >= self.deadline {
            return Err(Fault::timeout());
        }
        Ok(())
    }

    // ----- statements -----

    fn exec_block(&self, block: &Block, parent: &EnvRef) -> ExecResult {
        let env = Env::child(parent);
        self.exec_stmts(block, &env)
    }

    fn exec_stmts(&self, block: &Block, env: &EnvRef) -> ExecResult {
        for stmt in block {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, env: &EnvRef) -> ExecResult {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Define { names, exprs } => {
                self.exec_define(names, exprs, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { targets, op, exprs } => {
                self.exec_assign(targets, *op, exprs, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Var { name, expr } => {
                let value = match expr {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Nil,
                };
                Env::define(env, name, value);
                Ok(Flow::Normal)
            }
            Stmt::IncDec { target, inc } => {
                let op = if *inc { BinOp::Add } else { BinOp::Sub };
                self.compound_assign(target, op, Value::Int(1), env)?;
                Ok(Flow::Normal)
            }
            Stmt::If(if_stmt) => self.exec_if(if_stmt, env),
            Stmt::For(for_stmt) => self.exec_for(for_stmt, env),
            Stmt::Switch(sw) => self.exec_switch(sw, env),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Block(block) => self.exec_block(block, env),
        }
    }

    fn exec_define(&self, names: &[String], exprs: &[Expr], env: &EnvRef) -> Result<(), Fault> {
        if names.len() == 2 && exprs.len() == 1 {
            let (value, ok) = self.comma_ok(&exprs[0], env)?;
            if names[0] != "_" {
                Env::define(env, &names[0], value);
            }
            if names[1] != "_" {
                Env::define(env, &names[1], Value::Bool(ok));
            }
            return Ok(());
        }
        let values: Vec<Value> = exprs
            .iter()
            .map(|e| self.eval(e, env))
            .collect::<Result<_, _>>()?;
        for (name, value) in names.iter().zip(values) {
            if name != "_" {
                Env::define(env, name, value);
            }
        }
        Ok(())
    }

    fn exec_assign(
        &self,
        targets: &[Target],
        op: Option<BinOp>,
        exprs: &[Expr],
        env: &EnvRef,
    ) -> Result<(), Fault> {
        if let Some(op) = op {
            let rhs = self.eval(&exprs[0], env)?;
            return self.compound_assign(&targets[0], op, rhs, env);
        }
        if targets.len() == 2 && exprs.len() == 1 {
            let (value, ok) = self.comma_ok(&exprs[0], env)?;
            self.store(&targets[0], value, env)?;
            self.store(&targets[1], Value::Bool(ok), env)?;
            return Ok(());
        }
        let values: Vec<Value> = exprs
            .iter()
            .map(|e| self.eval(e, env))
            .collect::<Result<_, _>>()?;
        for (target, value) in targets.iter().zip(values) {
            self.store(target, value, env)?;
        }
        Ok(())
    }

    /// `v, ok := m[k]` - the only two-valued expression form.
    fn comma_ok(&self, expr: &Expr, env: &EnvRef) -> Result<(Value, bool), Fault> {
        let Expr::Index { base, index } = expr else {
            return Err(Fault::panic("expected map index on two-valued assignment"));
        };
        let base = self.eval(base, env)?;
        let key = self.eval(index, env)?;
        match (&base, &key) {
            (Value::Map(m), Value::Str(k)) => match m.borrow().get(k.as_str()) {
                Some(v) => Ok((v.clone(), true)),
                None => Ok((Value::Nil, false)),
            },
            (Value::Nil, Value::Str(_)) => Ok((Value::Nil, false)),
            _ => Err(Fault::panic(format!(
                "two-valued index requires a string-keyed map, got {}[{}]",
                base.type_name(),
                key.type_name()
            ))),
        }
    }

    fn compound_assign(
        &self,
        target: &Target,
        op: BinOp,
        rhs: Value,
        env: &EnvRef,
    ) -> Result<(), Fault> {
        match target {
            Target::Ident(name) => {
                if name == "_" {
                    return Ok(());
                }
                let current = Env::get(env, name)
                    .ok_or_else(|| Fault::panic(format!("undefined: {name}")))?;
                let next = binary_op(op, current, rhs)?;
                Env::assign(env, name, next);
                Ok(())
            }
            Target::Index { base, index } => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                let current = index_read(&base, &index)?;
                let next = binary_op(op, current, rhs)?;
                index_write(&base, &index, next)
            }
        }
    }

    fn store(&self, target: &Target, value: Value, env: &EnvRef) -> Result<(), Fault> {
        match target {
            Target::Ident(name) => {
                if name == "_" {
                    return Ok(());
                }
                if Env::assign(env, name, value) {
                    Ok(())
                } else {
                    Err(Fault::panic(format!("undefined: {name}")))
                }
            }
            Target::Index { base, index } => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                index_write(&base, &index, value)
            }
        }
    }

    fn exec_if(&self, if_stmt: &IfStmt, parent: &EnvRef) -> ExecResult {
        let env = Env::child(parent);
        if let Some(init) = &if_stmt.init {
            match self.exec_stmt(init, &env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        if as_bool(&self.eval(&if_stmt.cond, &env)?)? {
            self.exec_block(&if_stmt.then, &env)
        } else if let Some(otherwise) = &if_stmt.otherwise {
            self.exec_stmt(otherwise, &env)
        } else {
            Ok(Flow::Normal)
        }
    }

    fn exec_for(&self, for_stmt: &ForStmt, parent: &EnvRef) -> ExecResult {
        match for_stmt {
            ForStmt::Loop { body } => loop {
                self.tick()?;
                match self.exec_block(body, parent)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            ForStmt::While { cond, body } => loop {
                self.tick()?;
                if !as_bool(&self.eval(cond, parent)?)? {
                    return Ok(Flow::Normal);
                }
                match self.exec_block(body, parent)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            ForStmt::Classic {
                init,
                cond,
                post,
                body,
            } => {
                let env = Env::child(parent);
                if let Some(init) = init {
                    match self.exec_stmt(init, &env)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                loop {
                    self.tick()?;
                    if let Some(cond) = cond {
                        if !as_bool(&self.eval(cond, &env)?)? {
                            return Ok(Flow::Normal);
                        }
                    }
                    match self.exec_block(body, &env)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(post) = post {
                        match self.exec_stmt(post, &env)? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                    }
                }
            }
            ForStmt::Range {
                key,
                value,
                expr,
                body,
            } => {
                let subject = self.eval(expr, parent)?;
                let pairs: Vec<(Value, Value)> = match &subject {
                    Value::Bytes(b) => b
                        .borrow()
                        .iter()
                        .enumerate()
                        .map(|(i, byte)| (Value::Int(i as i64), Value::Int(i64::from(*byte))))
                        .collect(),
                    Value::List(items) => items
                        .borrow()
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (Value::Int(i as i64), v.clone()))
                        .collect(),
                    Value::Map(m) => m
                        .borrow()
                        .iter()
                        .map(|(k, v)| (Value::str(k.clone()), v.clone()))
                        .collect(),
                    Value::Str(s) => s
                        .char_indices()
                        .map(|(i, c)| (Value::Int(i as i64), Value::Int(i64::from(c as u32))))
                        .collect(),
                    Value::Nil => Vec::new(),
                    other => {
                        return Err(Fault::panic(format!(
                            "cannot range over {}",
                            other.type_name()
                        )));
                    }
                };
                for (k, v) in pairs {
                    self.tick()?;
                    let env = Env::child(parent);
                    if let Some(name) = key {
                        Env::define(&env, name, k);
                    }
                    if let Some(name) = value {
                        Env::define(&env, name, v);
                    }
                    match self.exec_stmts(body, &env)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_switch(&self, sw: &SwitchStmt, parent: &EnvRef) -> ExecResult {
        let env = Env::child(parent);
        let subject = match &sw.subject {
            Some(e) => self.eval(e, &env)?,
            None => Value::Bool(true),
        };
        let mut matched: Option<&SwitchCase> = None;
        'cases: for case in &sw.cases {
            for m in &case.matches {
                let candidate = self.eval(m, &env)?;
                if value_eq(&subject, &candidate)? {
                    matched = Some(case);
                    break 'cases;
                }
            }
        }
        let case = matched.or_else(|| sw.cases.iter().find(|c| c.matches.is_empty()));
        let Some(case) = case else {
            return Ok(Flow::Normal);
        };
        match self.exec_block(&case.body, &env)? {
            Flow::Break => Ok(Flow::Normal),
            other => Ok(other),
        }
    }

    // ----- expressions -----

    fn eval(&self, expr: &Expr, env: &EnvRef) -> EvalResult {
        self.tick()?;
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Ident(name) => self.eval_ident(name, env),
            Expr::Selector { base, field } => self.eval_selector(base, field, env),
            Expr::Index { base, index } => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                index_read(&base, &index)
            }
            Expr::Slice { base, lo, hi } => {
                let base = self.eval(base, env)?;
                let lo = match lo {
                    Some(e) => Some(self.eval(e, env)?),
                    None => None,
                };
                let hi = match hi {
                    Some(e) => Some(self.eval(e, env)?),
                    None => None,
                };
                slice_value(&base, lo, hi)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, env)?;
                unary_op(*op, value)
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::And => {
                    if as_bool(&self.eval(lhs, env)?)? {
                        Ok(Value::Bool(as_bool(&self.eval(rhs, env)?)?))
                    } else {
                        Ok(Value::Bool(false))
                    }
                }
                BinOp::Or => {
                    if as_bool(&self.eval(lhs, env)?)? {
                        Ok(Value::Bool(true))
                    } else {
                        Ok(Value::Bool(as_bool(&self.eval(rhs, env)?)?))
                    }
                }
                _ => {
                    let l = self.eval(lhs, env)?;
                    let r = self.eval(rhs, env)?;
                    binary_op(*op, l, r)
                }
            },
            Expr::FuncLit { params, body } => Ok(Value::Func(Rc::new(Closure {
                params: params.clone(),
                body: body.clone(),
                env: Rc::clone(env),
            }))),
            Expr::MapLit(pairs) => {
                let mut map = BTreeMap::new();
                for (k, v) in pairs {
                    let key = self.eval(k, env)?;
                    let Value::Str(key) = key else {
                        return Err(Fault::panic(format!(
                            "map literal key must be a string, got {}",
                            key.type_name()
                        )));
                    };
                    let value = self.eval(v, env)?;
                    map.insert(key.to_string(), value);
                }
                Ok(Value::map(map))
            }
            Expr::ListLit(elems) => {
                let items: Vec<Value> = elems
                    .iter()
                    .map(|e| self.eval(e, env))
                    .collect::<Result<_, _>>()?;
                Ok(Value::list(items))
            }
            Expr::BytesLit(elems) => {
                let mut bytes = Vec::with_capacity(elems.len());
                for e in elems {
                    match self.eval(e, env)? {
                        Value::Int(v) => bytes.push((v & 0xFF) as u8),
                        other => {
                            return Err(Fault::panic(format!(
                                "byte literal element must be an integer, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                Ok(Value::bytes(bytes))
            }
            Expr::TypeRef(_) => Err(Fault::panic("type is not an expression")),
        }
    }

    fn eval_ident(&self, name: &str, env: &EnvRef) -> EvalResult {
        if name == "_" {
            return Err(Fault::panic("cannot use _ as value"));
        }
        if let Some(v) = Env::get(env, name) {
            return Ok(v);
        }
        if let Some(decl) = self.program.func(name) {
            return Ok(Value::Func(Rc::new(Closure {
                params: decl.params.clone(),
                body: decl.body.clone(),
                env: Env::root(),
            })));
        }
        Err(Fault::panic(format!("undefined: {name}")))
    }

    fn eval_selector(&self, base: &Expr, field: &str, env: &EnvRef) -> EvalResult {
        if let Some(path) = self.qualified_path(base, field, env) {
            if let Some(v) = stdlib::constant(&path) {
                return Ok(v);
            }
            return Err(Fault::panic(format!("undefined: {path}")));
        }
        Err(Fault::panic(format!(
            "field access .{field} is only supported on imported packages"
        )))
    }

    /// Flatten `pkg.A.B` selector chains rooted at an imported package name
    /// that is not shadowed by a local variable.
    fn qualified_path(&self, base: &Expr, field: &str, env: &EnvRef) -> Option<String> {
        let mut segments = vec![field.to_string()];
        let mut cursor = base;
        loop {
            match cursor {
                Expr::Selector { base, field } => {
                    segments.push(field.clone());
                    cursor = base;
                }
                Expr::Ident(name) => {
                    if Env::get(env, name).is_some() {
                        return None;
                    }
                    if !self.imports.contains(name) {
                        return None;
                    }
                    segments.push(name.clone());
                    segments.reverse();
                    return Some(segments.join("."));
                }
                _ => return None,
            }
        }
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr], env: &EnvRef) -> EvalResult {
        // Qualified stdlib calls and method calls dispatch on the callee shape.
        if let Expr::Selector { base, field } = callee {
            if let Some(path) = self.qualified_path(base, field, env) {
                let values = self.eval_args(args, env)?;
                return match stdlib::call_qualified(&path, &values) {
                    Some(result) => result,
                    None => Err(Fault::panic(format!("undefined: {path}"))),
                };
            }
            let receiver = self.eval(base, env)?;
            let values = self.eval_args(args, env)?;
            return call_method(&receiver, field, &values);
        }

        if let Expr::Ident(name) = callee {
            if Env::get(env, name).is_none() {
                // make(T, ...) takes a type expression as its first argument
                if name == "make" {
                    if let Some(Expr::TypeRef(kind)) = args.first() {
                        let values = self.eval_args(&args[1..], env)?;
                        return stdlib::composite_conversion(*kind, &values);
                    }
                }
                if let Some(decl) = self.program.func(name) {
                    let values = self.eval_args(args, env)?;
                    return self.call_decl(decl, values);
                }
                let values = self.eval_args(args, env)?;
                return match stdlib::call_builtin(name, &values) {
                    Some(result) => result,
                    None => Err(Fault::panic(format!("undefined: {name}"))),
                };
            }
        }

        if let Expr::TypeRef(kind) = callee {
            let values = self.eval_args(args, env)?;
            return stdlib::composite_conversion(*kind, &values);
        }

        let callee = self.eval(callee, env)?;
        let values = self.eval_args(args, env)?;
        match callee {
            Value::Func(closure) => self.call_closure(&closure, values),
            other => Err(Fault::panic(format!(
                "cannot call {} value",
                other.type_name()
            ))),
        }
    }

    fn eval_args(&self, args: &[Expr], env: &EnvRef) -> Result<Vec<Value>, Fault> {
        args.iter().map(|a| self.eval(a, env)).collect()
    }

    fn call_decl(&self, decl: &FuncDecl, args: Vec<Value>) -> EvalResult {
        if args.len() != decl.params.len() {
            return Err(Fault::panic(format!(
                "{} takes {} arguments, got {}",
                decl.name,
                decl.params.len(),
                args.len()
            )));
        }
        let env = Env::root();
        for (param, arg) in decl.params.iter().zip(args) {
            Env::define(&env, param, arg);
        }
        self.enter()?;
        let result = self.exec_stmts(&decl.body, &env);
        self.leave();
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Nil),
        }
    }

    fn call_closure(&self, closure: &Closure, args: Vec<Value>) -> EvalResult {
        if args.len() != closure.params.len() {
            return Err(Fault::panic(format!(
                "closure takes {} arguments, got {}",
                closure.params.len(),
                args.len()
            )));
        }
        let env = Env::child(&closure.env);
        for (param, arg) in closure.params.iter().zip(args) {
            Env::define(&env, param, arg);
        }
        self.enter()?;
        let result = self.exec_stmts(&closure.body, &env);
        self.leave();
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Nil),
        }
    }

    fn enter(&self) -> Result<(), Fault> {
        let d = self.depth.get() + 1;
        if d > MAX_CALL_DEPTH {
            return Err(Fault::panic("call depth limit exceeded"));
        }
        self.depth.set(d);
        Ok(())
    }

    fn leave(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

// ----- value operations -----

fn as_bool(v: &Value) -> Result<bool, Fault> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(Fault::panic(format!(
            "non-bool {} used as condition",
            other.type_name()
        ))),
    }
}

fn method_list(value: &Value) -> &'static str {
    match value {
        Value::Time(_) => "Unix, UnixMilli, UnixNano",
        Value::ErrVal(_) => "Error",
        _ => "",
    }
}

fn call_method(receiver: &Value, name: &str, args: &[Value]) -> EvalResult {
    if !args.is_empty() {
        return Err(Fault::panic(format!("method {name} takes no arguments")));
    }
    match (receiver, name) {
        (Value::Time(nanos), "Unix") => Ok(Value::Int(nanos / 1_000_000_000)),
        (Value::Time(nanos), "UnixMilli") => Ok(Value::Int(nanos / 1_000_000)),
        (Value::Time(nanos), "UnixNano") => Ok(Value::Int(*nanos)),
        (Value::ErrVal(msg), "Error") => Ok(Value::str(msg.as_str())),
        _ => Err(Fault::panic(format!(
            "unknown method {name} on {} (have: {})",
            receiver.type_name(),
            method_list(receiver)
        ))),
    }
}

pub fn index_read(base: &Value, index: &Value) -> EvalResult {
    match base {
        Value::Bytes(bytes) => {
            let i = int_index(index)?;
            let bytes = bytes.borrow();
            bytes
                .get(i)
                .map(|b| Value::Int(i64::from(*b)))
                .ok_or_else(|| oob(i, bytes.len()))
        }
        Value::Str(s) => {
            let i = int_index(index)?;
            s.as_bytes()
                .get(i)
                .map(|b| Value::Int(i64::from(*b)))
                .ok_or_else(|| oob(i, s.len()))
        }
        Value::List(items) => {
            let i = int_index(index)?;
            let items = items.borrow();
            items.get(i).cloned().ok_or_else(|| oob(i, items.len()))
        }
        Value::Map(map) => match index {
            Value::Str(k) => Ok(map.borrow().get(k.as_str()).cloned().unwrap_or(Value::Nil)),
            other => Err(Fault::panic(format!(
                "map key must be a string, got {}",
                other.type_name()
            ))),
        },
        Value::Nil => match index {
            // reading from a nil map yields the zero value
            Value::Str(_) => Ok(Value::Nil),
            _ => Err(Fault::panic("index into nil value")),
        },
        other => Err(Fault::panic(format!("cannot index {}", other.type_name()))),
    }
}

fn index_write(base: &Value, index: &Value, value: Value) -> Result<(), Fault> {
    match base {
        Value::Map(map) => match index {
            Value::Str(k) => {
                map.borrow_mut().insert(k.to_string(), value);
                Ok(())
            }
            other => Err(Fault::panic(format!(
                "map key must be a string, got {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            let i = int_index(index)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            match items.get_mut(i) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(oob(i, len)),
            }
        }
        Value::Bytes(bytes) => {
            let i = int_index(index)?;
            let byte = match value {
                Value::Int(v) => (v & 0xFF) as u8,
                other => {
                    return Err(Fault::panic(format!(
                        "cannot store {} in a byte slice",
                        other.type_name()
                    )));
                }
            };
            let mut bytes = bytes.borrow_mut();
            let len = bytes.len();
            match bytes.get_mut(i) {
                Some(slot) => {
                    *slot = byte;
                    Ok(())
                }
                None => Err(oob(i, len)),
            }
        }
        Value::Nil => Err(Fault::panic("assignment to entry in nil map")),
        other => Err(Fault::panic(format!(
            "cannot assign into {}",
            other.type_name()
        ))),
    }
}

fn int_index(v: &Value) -> Result<usize, Fault> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        Value::Int(i) => Err(Fault::panic(format!("index out of range [{i}]"))),
        other => Err(Fault::panic(format!(
            "index must be an integer, got {}",
            other.type_name()
        ))),
    }
}

fn oob(index: usize, len: usize) -> Fault {
    Fault::panic(format!(
        "index out of range [{index}] with length {len}"
    ))
}

fn slice_value(base: &Value, lo: Option<Value>, hi: Option<Value>) -> EvalResult {
    let len = match base {
        Value::Bytes(b) => b.borrow().len(),
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len(),
        other => {
            return Err(Fault::panic(format!(
                "cannot slice {}",
                other.type_name()
            )));
        }
    };
    let lo = match lo {
        Some(v) => int_index(&v)?,
        None => 0,
    };
    let hi = match hi {
        Some(v) => int_index(&v)?,
        None => len,
    };
    if lo > hi || hi > len {
        return Err(Fault::panic(format!(
            "slice bounds out of range [{lo}:{hi}] with length {len}"
        )));
    }
    match base {
        Value::Bytes(b) => Ok(Value::bytes(b.borrow()[lo..hi].to_vec())),
        Value::Str(s) => Ok(Value::str(
            String::from_utf8_lossy(&s.as_bytes()[lo..hi]).into_owned(),
        )),
        Value::List(items) => Ok(Value::list(items.borrow()[lo..hi].to_vec())),
        _ => unreachable!(),
    }
}

pub fn value_eq(l: &Value, r: &Value) -> Result<bool, Fault> {
    match (l, r) {
        (Value::Nil, Value::Nil) => Ok(true),
        (Value::Nil, _) | (_, Value::Nil) => Ok(false),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Float(a), Value::Float(b)) => Ok(a == b),
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            Ok((*a as f64) == *b)
        }
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Time(a), Value::Time(b)) => Ok(a == b),
        (Value::ErrVal(a), Value::ErrVal(b)) => Ok(a == b),
        _ => Err(Fault::panic(format!(
            "cannot compare {} with {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn unary_op(op: UnOp, value: Value) -> EvalResult {
    match (op, value) {
        (UnOp::Neg, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
        (UnOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnOp::BitNot, Value::Int(v)) => Ok(Value::Int(!v)),
        (op, value) => Err(Fault::panic(format!(
            "invalid operand {} for unary {op:?}",
            value.type_name()
        ))),
    }
}

pub fn binary_op(op: BinOp, l: Value, r: Value) -> EvalResult {
    use BinOp::*;
    match op {
        Eq => return Ok(Value::Bool(value_eq(&l, &r)?)),
        Ne => return Ok(Value::Bool(!value_eq(&l, &r)?)),
        _ => {}
    }

    // string concatenation and ordering
    if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
        return match op {
            Add => Ok(Value::str(format!("{a}{b}"))),
            Lt => Ok(Value::Bool(a < b)),
            Le => Ok(Value::Bool(a <= b)),
            Gt => Ok(Value::Bool(a > b)),
            Ge => Ok(Value::Bool(a >= b)),
            _ => Err(Fault::panic(format!("invalid string operation {op:?}"))),
        };
    }

    match (l, r) {
        (Value::Int(a), Value::Int(b)) => int_op(op, a, b),
        (Value::Float(a), Value::Float(b)) => float_op(op, a, b),
        (Value::Int(a), Value::Float(b)) => float_op(op, a as f64, b),
        (Value::Float(a), Value::Int(b)) => float_op(op, a, b as f64),
        (l, r) => Err(Fault::panic(format!(
            "invalid operands {} and {} for {op:?}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> EvalResult {
    use BinOp::*;
    let v = match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        Mul => a.wrapping_mul(b),
        Div => {
            if b == 0 {
                return Err(Fault::panic("integer divide by zero"));
            }
            a.wrapping_div(b)
        }
        Rem => {
            if b == 0 {
                return Err(Fault::panic("integer divide by zero"));
            }
            a.wrapping_rem(b)
        }
        BitAnd => a & b,
        BitOr => a | b,
        BitXor => a ^ b,
        Shl => {
            if b < 0 {
                return Err(Fault::panic("negative shift amount"));
            }
            if b >= 64 { 0 } else { a.wrapping_shl(b as u32) }
        }
        Shr => {
            if b < 0 {
                return Err(Fault::panic("negative shift amount"));
            }
            if b >= 64 { a >> 63 } else { a >> b }
        }
        Lt => return Ok(Value::Bool(a < b)),
        Le => return Ok(Value::Bool(a <= b)),
        Gt => return Ok(Value::Bool(a > b)),
        Ge => return Ok(Value::Bool(a >= b)),
        And | Or | Eq | Ne => unreachable!("handled by caller"),
    };
    Ok(Value::Int(v))
}

fn float_op(op: BinOp, a: f64, b: f64) -> EvalResult {
    use BinOp::*;
    let v = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => a / b,
        Lt => return Ok(Value::Bool(a < b)),
        Le => return Ok(Value::Bool(a <= b)),
        Gt => return Ok(Value::Bool(a > b)),
        Ge => return Ok(Value::Bool(a >= b)),
        _ => {
            return Err(Fault::panic(format!(
                "invalid float operation {op:?}"
            )));
        }
    };
    Ok(Value::Float(v))
}
