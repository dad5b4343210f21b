//! Tree-walking interpreter with replay-based suspension.
//!
//! A paused script is represented by the results it has received so far.
//! Resuming re-executes the module from the top, answering earlier external
//! calls from that history, and stops at the first call that has no recorded
//! result. Scripts have no ambient inputs, so replay is deterministic.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use super::ast::{
    BinaryOp, CompareOp, Expr, ExprKind, Literal, LogicalOp, Module, Stmt, StmtKind, Target,
    UnaryOp,
};
use super::parser::parse;
use super::value::{Dict, Value};
use super::{CallSite, Engine, ErrorKind, HostCall, Program, Progress, ScriptError, Snapshot};

pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Longest list or string a single operation may build.
pub const MAX_SEQUENCE_LEN: usize = 1_000_000;

pub const BUILTINS: &[&str] = &[
    "abs", "bool", "float", "int", "len", "max", "min", "range", "round", "sorted", "str", "sum",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// The reference [`Engine`].
#[derive(Debug, Clone)]
pub struct Interpreter {
    step_limit: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self {
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum statements executed per run, counting replayed ones.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }
}

impl Engine for Interpreter {
    fn compile(&self, source: &str, externals: &[String]) -> Result<Arc<dyn Program>, ScriptError> {
        let module = parse(source)?;
        Ok(Arc::new(CompiledScript {
            shared: Arc::new(Shared {
                module,
                externals: externals.iter().cloned().collect(),
                step_limit: self.step_limit,
            }),
        }))
    }
}

struct Shared {
    module: Module,
    externals: HashSet<String>,
    step_limit: u64,
}

struct CompiledScript {
    shared: Arc<Shared>,
}

impl Program for CompiledScript {
    fn start(&self) -> Result<Progress, ScriptError> {
        execute(Arc::clone(&self.shared), Vec::new())
    }

    fn call_sites(&self) -> Vec<CallSite> {
        super::infer::call_sites(&self.shared.module, &self.shared.externals)
    }
}

struct ReplaySnapshot {
    shared: Arc<Shared>,
    history: Vec<(String, Value)>,
    call: HostCall,
}

impl Snapshot for ReplaySnapshot {
    fn call(&self) -> &HostCall {
        &self.call
    }

    fn resume(self: Box<Self>, value: Value) -> Result<Progress, ScriptError> {
        let ReplaySnapshot {
            shared,
            mut history,
            call,
        } = *self;
        history.push((call.function_name, value));
        execute(shared, history)
    }
}

fn execute(shared: Arc<Shared>, history: Vec<(String, Value)>) -> Result<Progress, ScriptError> {
    let (outcome, output) = {
        let mut machine = Machine {
            shared: &shared,
            history: &history,
            cursor: 0,
            steps: 0,
            vars: HashMap::new(),
            output: Value::None,
        };
        let outcome = machine.block(&shared.module.body);
        trace!(steps = machine.steps, replayed = machine.cursor, "script pass finished");
        (outcome, machine.output)
    };
    match outcome {
        Ok(()) => Ok(Progress::Complete(output)),
        Err(Interrupt::Suspend(call)) => Ok(Progress::Paused(Box::new(ReplaySnapshot {
            shared,
            history,
            call,
        }))),
        Err(Interrupt::Fail(err)) => Err(err),
        Err(Interrupt::Break | Interrupt::Continue) => Err(ScriptError::new(
            ErrorKind::Syntax,
            "loop control outside loop",
        )),
    }
}

/// Non-local exits from statement execution.
enum Interrupt {
    Suspend(HostCall),
    Fail(ScriptError),
    Break,
    Continue,
}

impl Interrupt {
    fn with_line(self, line: usize) -> Self {
        match self {
            Interrupt::Fail(err) => Interrupt::Fail(err.or_line(line)),
            other => other,
        }
    }
}

impl From<ScriptError> for Interrupt {
    fn from(err: ScriptError) -> Self {
        Interrupt::Fail(err)
    }
}

type Flow<T> = Result<T, Interrupt>;

struct Machine<'a> {
    shared: &'a Shared,
    history: &'a [(String, Value)],
    cursor: usize,
    steps: u64,
    vars: HashMap<String, Value>,
    output: Value,
}

impl Machine<'_> {
    fn block(&mut self, body: &[Stmt]) -> Flow<()> {
        for stmt in body {
            self.steps += 1;
            if self.steps > self.shared.step_limit {
                return Err(ScriptError::at(
                    ErrorKind::Budget,
                    stmt.line,
                    format!("step limit of {} exceeded", self.shared.step_limit),
                )
                .into());
            }
            self.statement(stmt).map_err(|i| i.with_line(stmt.line))?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> Flow<()> {
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                match target {
                    Target::Name(name) => {
                        self.vars.insert(name.clone(), value);
                        Ok(())
                    }
                    Target::Item { name, key } => {
                        let key = self.eval(key)?;
                        self.store_item(name, key, value)
                    }
                }
            }
            StmtKind::AugAssign { target, op, value } => match target {
                Target::Name(name) => {
                    let current = self.variable(name)?;
                    let rhs = self.eval(value)?;
                    let result = binary(*op, &current, &rhs)?;
                    self.vars.insert(name.clone(), result);
                    Ok(())
                }
                Target::Item { name, key } => {
                    let key = self.eval(key)?;
                    let current = index_value(&self.variable(name)?, &key)?;
                    let rhs = self.eval(value)?;
                    let result = binary(*op, &current, &rhs)?;
                    self.store_item(name, key, result)
                }
            },
            StmtKind::Expr(expr) => {
                self.output = self.eval(expr)?;
                Ok(())
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.block(body);
                    }
                }
                self.block(orelse)
            }
            StmtKind::For { var, iter, body } => {
                let items = iterate(&self.eval(iter)?)?;
                for item in items {
                    self.vars.insert(var.clone(), item);
                    match self.block(body) {
                        Ok(()) | Err(Interrupt::Continue) => {}
                        Err(Interrupt::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Break => Err(Interrupt::Break),
            StmtKind::Continue => Err(Interrupt::Continue),
        }
    }

    fn variable(&self, name: &str) -> Result<Value, ScriptError> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::new(ErrorKind::Name, format!("name '{name}' is not defined")))
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.vars.get(name) {
            return Ok(value.clone());
        }
        if self.shared.externals.contains(name) || is_builtin(name) {
            return Ok(Value::Function(name.to_string()));
        }
        Err(ScriptError::new(
            ErrorKind::Name,
            format!("name '{name}' is not defined"),
        ))
    }

    fn store_item(&mut self, name: &str, key: Value, value: Value) -> Flow<()> {
        let Some(container) = self.vars.get_mut(name) else {
            return Err(ScriptError::new(
                ErrorKind::Name,
                format!("name '{name}' is not defined"),
            )
            .into());
        };
        match container {
            Value::Dict(dict) => {
                check_hashable(&key)?;
                dict.insert(key, value);
            }
            Value::List(items) => {
                let slot = list_index(items.len(), &key, "list assignment index out of range")?;
                items[slot] = value;
            }
            other => {
                return Err(ScriptError::new(
                    ErrorKind::Type,
                    format!(
                        "'{}' object does not support item assignment",
                        other.type_name()
                    ),
                )
                .into());
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Flow<Value> {
        self.eval_inner(expr).map_err(|i| i.with_line(expr.line))
    }

    fn eval_inner(&mut self, expr: &Expr) -> Flow<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(x) => Value::Float(*x),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Name(name) => Ok(self.lookup(name)?),
            ExprKind::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::List(out))
            }
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    check_hashable(&key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value);
                }
                Ok(Value::Dict(dict))
            }
            ExprKind::Index { value, index } => {
                let value = self.eval(value)?;
                let index = self.eval(index)?;
                Ok(index_value(&value, &index)?)
            }
            ExprKind::Call {
                callee,
                args,
                kwargs,
            } => {
                let mut positional = Vec::with_capacity(args.len());
                for arg in args {
                    positional.push(self.eval(arg)?);
                }
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    keywords.push((name.clone(), self.eval(value)?));
                }
                self.call(callee, positional, keywords)
            }
            ExprKind::Method {
                receiver,
                method,
                args,
            } => {
                if method == "append" {
                    return self.append(receiver, args);
                }
                let receiver = self.eval(receiver)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                Ok(call_method(&receiver, method, values)?)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                Ok(unary(*op, &operand)?)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right)?)
            }
            ExprKind::Compare { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Bool(compare(*op, &left, &right)?))
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Flow<Value> {
        let target = match self.vars.get(name) {
            Some(Value::Function(function)) => function.clone(),
            Some(other) => {
                return Err(ScriptError::new(
                    ErrorKind::Type,
                    format!("'{}' object is not callable", other.type_name()),
                )
                .into());
            }
            None => name.to_string(),
        };
        if self.shared.externals.contains(&target) {
            return self.external(HostCall {
                function_name: target,
                args,
                kwargs,
            });
        }
        if is_builtin(&target) {
            if !kwargs.is_empty() {
                return Err(ScriptError::new(
                    ErrorKind::Type,
                    format!("{target}() takes no keyword arguments"),
                )
                .into());
            }
            return Ok(builtin(&target, args)?);
        }
        Err(ScriptError::new(ErrorKind::Name, format!("name '{name}' is not defined")).into())
    }

    fn external(&mut self, call: HostCall) -> Flow<Value> {
        let Some((recorded, value)) = self.history.get(self.cursor) else {
            return Err(Interrupt::Suspend(call));
        };
        if *recorded != call.function_name {
            return Err(ScriptError::new(
                ErrorKind::Replay,
                format!(
                    "replay expected a call to {recorded} but the script called {}",
                    call.function_name
                ),
            )
            .into());
        }
        self.cursor += 1;
        Ok(value.clone())
    }

    fn append(&mut self, receiver: &Expr, args: &[Expr]) -> Flow<Value> {
        let ExprKind::Name(name) = &receiver.kind else {
            return Err(ScriptError::new(
                ErrorKind::Type,
                "append() is only supported on a variable",
            )
            .into());
        };
        let [arg] = args else {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!("append() takes exactly one argument ({} given)", args.len()),
            )
            .into());
        };
        let item = self.eval(arg)?;
        match self.vars.get_mut(name) {
            Some(Value::List(items)) => {
                items.push(item);
                Ok(Value::None)
            }
            Some(other) => Err(ScriptError::new(
                ErrorKind::Attribute,
                format!("'{}' object has no attribute 'append'", other.type_name()),
            )
            .into()),
            None => Err(ScriptError::new(
                ErrorKind::Name,
                format!("name '{name}' is not defined"),
            )
            .into()),
        }
    }
}

fn type_error(message: impl Into<String>) -> ScriptError {
    ScriptError::new(ErrorKind::Type, message)
}

fn overflow() -> ScriptError {
    ScriptError::new(ErrorKind::Value, "integer overflow")
}

fn check_hashable(key: &Value) -> Result<(), ScriptError> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(x) => x,
        }
    }
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Float(x) => Some(Num::Float(*x)),
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        _ => None,
    }
}

fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ScriptError> {
    match (op, num(operand)) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!operand.truthy())),
        (UnaryOp::Neg, Some(Num::Int(n))) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Some(Num::Float(x))) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, Some(Num::Int(n))) => Ok(Value::Int(n)),
        (UnaryOp::Pos, Some(Num::Float(x))) => Ok(Value::Float(x)),
        (UnaryOp::Neg | UnaryOp::Pos, None) => {
            let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
            Err(type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                operand.type_name()
            )))
        }
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>, ScriptError> {
    let times = usize::try_from(times).unwrap_or(0);
    if items.len().saturating_mul(times) > MAX_SEQUENCE_LEN {
        return Err(ScriptError::new(
            ErrorKind::Budget,
            "repetition result is too large",
        ));
    }
    Ok(std::iter::repeat_n(items, times).flatten().cloned().collect())
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinaryOp::Add, Value::Str(_), other) => {
            return Err(type_error(format!(
                "can only concatenate str (not \"{}\") to str",
                other.type_name()
            )));
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        (BinaryOp::Mul, Value::Str(s), Value::Int(n)) | (BinaryOp::Mul, Value::Int(n), Value::Str(s)) => {
            let chars: Vec<char> = s.chars().collect();
            return Ok(Value::Str(repeat(&chars, *n)?.into_iter().collect()));
        }
        (BinaryOp::Mul, Value::List(items), Value::Int(n))
        | (BinaryOp::Mul, Value::Int(n), Value::List(items)) => {
            return Ok(Value::List(repeat(items, *n)?));
        }
        _ => {}
    }
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => int_arith(op, a, b),
        (Some(a), Some(b)) => float_arith(op, a.to_f64(), b.to_f64()),
        _ => Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let zero = || {
        ScriptError::new(
            ErrorKind::ZeroDivision,
            "integer division or modulo by zero",
        )
    };
    let n = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Div => {
            if b == 0 {
                return Err(ScriptError::new(ErrorKind::ZeroDivision, "division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero());
            }
            let r = a.wrapping_rem(b);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
    };
    Ok(Value::Int(n))
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<Value, ScriptError> {
    let x = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(ScriptError::new(
                ErrorKind::ZeroDivision,
                "float division by zero",
            ));
        }
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
    };
    Ok(Value::Float(x))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    let ordering = match op {
        CompareOp::Eq => return Ok(left.loosely_equals(right)),
        CompareOp::NotEq => return Ok(!left.loosely_equals(right)),
        CompareOp::In => return contains(right, left),
        CompareOp::NotIn => return contains(right, left).map(|found| !found),
        _ => ordering(left, right, op.symbol())?,
    };
    Ok(match op {
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    })
}

/// `None` when the values are unordered (NaN).
fn ordering(left: &Value, right: &Value, symbol: &str) -> Result<Option<Ordering>, ScriptError> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !x.loosely_equals(y) {
                    return ordering(x, y, symbol);
                }
            }
            Ok(Some(a.len().cmp(&b.len())))
        }
        _ => match (num(left), num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Some(a.cmp(&b))),
            (Some(a), Some(b)) => Ok(a.to_f64().partial_cmp(&b.to_f64())),
            _ => Err(type_error(format!(
                "'{symbol}' not supported between instances of '{}' and '{}'",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|candidate| candidate.loosely_equals(item))),
        Value::Dict(dict) => Ok(dict.contains_key(item)),
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn list_index(len: usize, index: &Value, out_of_range: &str) -> Result<usize, ScriptError> {
    let Value::Int(i) = index else {
        return Err(type_error(format!(
            "list indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).map_err(|_| overflow())?;
    let resolved = if *i < 0 { len + i } else { *i };
    if resolved < 0 || resolved >= len {
        return Err(ScriptError::new(ErrorKind::Index, out_of_range));
    }
    usize::try_from(resolved).map_err(|_| overflow())
}

fn index_value(value: &Value, index: &Value) -> Result<Value, ScriptError> {
    match value {
        Value::List(items) => {
            let i = list_index(items.len(), index, "list index out of range")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = list_index(chars.len(), index, "string index out of range")?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Dict(dict) => dict
            .get(index)
            .cloned()
            .ok_or_else(|| ScriptError::new(ErrorKind::Key, index.repr())),
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn iterate(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Dict(dict) => Ok(dict.keys().cloned().collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else if args.len() < min {
        format!("at least {min}")
    } else {
        format!("at most {max}")
    };
    Err(type_error(format!(
        "{name}() takes {expected} argument(s) ({} given)",
        args.len()
    )))
}

fn str_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str, ScriptError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_error(format!(
            "{name}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn int_arg(value: &Value) -> Result<i64, ScriptError> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

fn float_to_int(x: f64) -> Result<i64, ScriptError> {
    if !x.is_finite() {
        return Err(ScriptError::new(
            ErrorKind::Value,
            format!("cannot convert float {x} to integer"),
        ));
    }
    let truncated = x.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(truncated as i64)
}

fn call_method(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    match (receiver, method) {
        (Value::Dict(dict), "get") => {
            arity(method, &args, 1, 2)?;
            Ok(dict
                .get(&args[0])
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        (Value::Dict(dict), "keys") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::List(dict.keys().cloned().collect()))
        }
        (Value::Dict(dict), "values") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::List(dict.values().cloned().collect()))
        }
        (Value::Str(s), "upper") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        (Value::Str(s), "lower") => {
            arity(method, &args, 0, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        (Value::Str(s), "strip") => {
            arity(method, &args, 0, 1)?;
            match args.first() {
                None | Some(Value::None) => Ok(Value::str(s.trim())),
                Some(chars) => {
                    let chars = str_arg(method, chars)?;
                    Ok(Value::str(s.trim_matches(|c| chars.contains(c))))
                }
            }
        }
        (Value::Str(s), "startswith" | "endswith") => {
            arity(method, &args, 1, 1)?;
            let affix = str_arg(method, &args[0])?;
            Ok(Value::Bool(if method == "startswith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        (Value::Str(s), "split") => {
            arity(method, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = str_arg(method, sep)?;
                    if sep.is_empty() {
                        return Err(ScriptError::new(ErrorKind::Value, "empty separator"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Ok(Value::List(parts))
        }
        (Value::Str(s), "join") => {
            arity(method, &args, 1, 1)?;
            let mut pieces = Vec::new();
            for (i, item) in iterate(&args[0])?.into_iter().enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::Str(pieces.join(s)))
        }
        (Value::Str(s), "replace") => {
            arity(method, &args, 2, 2)?;
            let from = str_arg(method, &args[0])?;
            let to = str_arg(method, &args[1])?;
            Ok(Value::Str(s.replace(from, to)))
        }
        _ => Err(ScriptError::new(
            ErrorKind::Attribute,
            format!(
                "'{}' object has no attribute '{method}'",
                receiver.type_name()
            ),
        )),
    }
}

fn extreme(name: &str, args: Vec<Value>, wanted: Ordering) -> Result<Value, ScriptError> {
    let items = match args.as_slice() {
        [] => {
            return Err(type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )));
        }
        [single] => iterate(single)?,
        _ => args,
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => {
                if ordering(&item, &current, if name == "max" { ">" } else { "<" })? == Some(wanted) {
                    item
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| {
        ScriptError::new(
            ErrorKind::Value,
            format!("{name}() arg is an empty sequence"),
        )
    })
}

fn builtin(name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    match name {
        "len" => {
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Dict(dict) => dict.len(),
                other => {
                    return Err(type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(i64::try_from(len).map_err(|_| overflow())?))
        }
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(
                args.first().map(ToString::to_string).unwrap_or_default(),
            ))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Int(n)) => Ok(Value::Int(*n)),
                Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
                Some(Value::Float(x)) => Ok(Value::Int(float_to_int(*x)?)),
                Some(Value::Str(s)) => s.trim().replace('_', "").parse().map(Value::Int).map_err(|_| {
                    ScriptError::new(
                        ErrorKind::Value,
                        format!("invalid literal for int() with base 10: {}", Value::str(s.as_str()).repr()),
                    )
                }),
                Some(other) => Err(type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => s.trim().parse().map(Value::Float).map_err(|_| {
                    ScriptError::new(
                        ErrorKind::Value,
                        format!("could not convert string to float: {}", Value::str(s.as_str()).repr()),
                    )
                }),
                Some(other) => num(other).map(|n| Value::Float(n.to_f64())).ok_or_else(|| {
                    type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))
                }),
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match num(&args[0]) {
                Some(Num::Int(n)) => n.checked_abs().map(Value::Int).ok_or_else(overflow),
                Some(Num::Float(x)) => Ok(Value::Float(x.abs())),
                None => Err(type_error(format!(
                    "bad operand type for abs(): '{}'",
                    args[0].type_name()
                ))),
            }
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let digits = match args.get(1) {
                None | Some(Value::None) => None,
                Some(value) => Some(int_arg(value)?),
            };
            match (num(&args[0]), digits) {
                (Some(Num::Int(n)), _) => Ok(Value::Int(n)),
                (Some(Num::Float(x)), None) => Ok(Value::Int(float_to_int(x.round_ties_even())?)),
                (Some(Num::Float(x)), Some(digits)) => {
                    let digits = i32::try_from(digits.clamp(-308, 308)).unwrap_or(0);
                    let factor = 10f64.powi(digits);
                    Ok(Value::Float((x * factor).round_ties_even() / factor))
                }
                (None, _) => Err(type_error(format!(
                    "type {} doesn't define __round__ method",
                    args[0].type_name()
                ))),
            }
        }
        "min" => extreme(name, args, Ordering::Less),
        "max" => extreme(name, args, Ordering::Greater),
        "sum" => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in iterate(&args[0])? {
                total = binary(BinaryOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let bounds: Vec<i64> = args.iter().map(int_arg).collect::<Result<_, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(type_error("range expected at most 3 arguments")),
            };
            if step == 0 {
                return Err(ScriptError::new(
                    ErrorKind::Value,
                    "range() arg 3 must not be zero",
                ));
            }
            let span = if step > 0 {
                i128::from(stop) - i128::from(start)
            } else {
                i128::from(start) - i128::from(stop)
            };
            let step_abs = i128::from(step).abs();
            let count = if span <= 0 { 0 } else { (span + step_abs - 1) / step_abs };
            if count > MAX_SEQUENCE_LEN as i128 {
                return Err(ScriptError::new(
                    ErrorKind::Budget,
                    format!("range() of {count} items exceeds the limit of {MAX_SEQUENCE_LEN}"),
                ));
            }
            let items = (0..count)
                .map(|i| Value::Int((i128::from(start) + i * i128::from(step)) as i64))
                .collect();
            Ok(Value::List(items))
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let mut items = iterate(&args[0])?;
            let mut failure = None;
            items.sort_by(|a, b| match ordering(a, b, "<") {
                Ok(ord) => ord.unwrap_or(Ordering::Equal),
                Err(err) => {
                    failure.get_or_insert(err);
                    Ordering::Equal
                }
            });
            match failure {
                Some(err) => Err(err),
                None => Ok(Value::List(items)),
            }
        }
        other => Err(ScriptError::new(
            ErrorKind::Name,
            format!("name '{other}' is not defined"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str, externals: &[&str]) -> Arc<dyn Program> {
        let externals: Vec<String> = externals.iter().map(ToString::to_string).collect();
        Interpreter::new()
            .compile(source, &externals)
            .expect("compile")
    }

    fn run_pure(source: &str) -> Result<Value, ScriptError> {
        match compile(source, &[]).start()? {
            Progress::Complete(value) => Ok(value),
            Progress::Paused(snapshot) => panic!("unexpected pause at {:?}", snapshot.call()),
        }
    }

    fn paused(progress: Progress) -> Box<dyn Snapshot> {
        match progress {
            Progress::Paused(snapshot) => snapshot,
            Progress::Complete(value) => panic!("expected pause, completed with {value}"),
        }
    }

    #[test]
    fn integer_division_follows_floor_semantics() {
        let value = run_pure("x = 7 // 2\ny = -7 % 3\n[x, y, 7 / 2, -7 // 2]\n").expect("run");
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(3),
                Value::Int(2),
                Value::Float(3.5),
                Value::Int(-4)
            ])
        );
    }

    #[test]
    fn suspends_at_each_external_call_and_resumes_in_order() {
        let program = compile(
            "a = fetch(1)\nb = fetch(a + 1, tag='x')\na + b\n",
            &["fetch"],
        );

        let first = paused(program.start().expect("start"));
        assert_eq!(first.call(), &HostCall::new("fetch").arg(Value::Int(1)));

        let second = paused(first.resume(Value::Int(10)).expect("resume"));
        assert_eq!(
            second.call(),
            &HostCall::new("fetch")
                .arg(Value::Int(11))
                .kwarg("tag", Value::str("x"))
        );

        match second.resume(Value::Int(5)).expect("resume") {
            Progress::Complete(value) => assert_eq!(value, Value::Int(15)),
            Progress::Paused(_) => panic!("expected completion"),
        }
    }

    #[test]
    fn separate_starts_are_independent() {
        let program = compile("x = fetch()\nx * 2\n", &["fetch"]);
        let a = paused(program.start().expect("start"));
        let b = paused(program.start().expect("start"));

        let Progress::Complete(from_b) = b.resume(Value::Int(2)).expect("resume") else {
            panic!("expected completion");
        };
        let Progress::Complete(from_a) = a.resume(Value::Int(1)).expect("resume") else {
            panic!("expected completion");
        };
        assert_eq!(from_a, Value::Int(2));
        assert_eq!(from_b, Value::Int(4));
    }

    #[test]
    fn missing_key_reports_key_error_with_line() {
        let err = run_pure("d = {'a': 1}\nx = d['b']\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Key);
        assert_eq!(err.line, Some(2));
        assert_eq!(err.message, "'b'");
    }

    #[test]
    fn unknown_function_is_a_name_error() {
        let err = run_pure("x = 1\nfoo(x)\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn step_limit_bounds_execution() {
        let program = Interpreter::new()
            .with_step_limit(10)
            .compile("for i in range(100):\n    x = i\n", &[])
            .expect("compile");
        let err = program.start().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
    }

    #[test]
    fn loop_control_and_string_methods() {
        let value = run_pure(
            "out = []\nfor w in 'a,b,,c,d'.split(','):\n    if w == '':\n        continue\n    if w == 'c':\n        break\n    out.append(w.upper())\n', '.join(out)\n",
        )
        .expect("run");
        assert_eq!(value, Value::str("A, B"));
    }

    #[test]
    fn boolean_operators_return_operands() {
        assert_eq!(
            run_pure("'HUB' in 'GITHUB' and not ('x' in [1, 2])\n").expect("run"),
            Value::Bool(true)
        );
        assert_eq!(
            run_pure("None or 'default'\n").expect("run"),
            Value::str("default")
        );
    }

    #[test]
    fn round_uses_ties_to_even() {
        assert_eq!(
            run_pure("[round(2.5), round(3.5), round(0.125, 2)]\n").expect("run"),
            Value::List(vec![Value::Int(2), Value::Int(4), Value::Float(0.12)])
        );
    }

    #[test]
    fn item_assignment_and_augmented_assignment() {
        let value = run_pure(
            "totals = {'debit': 0}\nfor amt in [1.5, 2.5]:\n    totals['debit'] += amt\ntotals['credit'] = 4.0\ntotals\n",
        )
        .expect("run");
        let Value::Dict(dict) = value else {
            panic!("expected dict");
        };
        assert_eq!(dict.get_str("debit"), Some(&Value::Float(4.0)));
        assert_eq!(dict.get_str("credit"), Some(&Value::Float(4.0)));
    }

    #[test]
    fn string_concatenation_with_int_is_a_type_error() {
        let err = run_pure("'a' + 1\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("can only concatenate str"));
    }

    #[test]
    fn sequences_repeat_by_integer_factor() {
        assert_eq!(
            run_pure("[1, 'a'] * 2\n").expect("run"),
            Value::List(vec![
                Value::Int(1),
                Value::str("a"),
                Value::Int(1),
                Value::str("a")
            ])
        );
        assert_eq!(
            run_pure("[3 * ['-'], 'ab' * 3, [0] * -1]\n").expect("run"),
            Value::List(vec![
                Value::List(vec![Value::str("-"); 3]),
                Value::str("ababab"),
                Value::List(Vec::new())
            ])
        );
    }

    #[test]
    fn output_is_last_expression_statement() {
        assert_eq!(run_pure("x = 1\n").expect("run"), Value::None);
        assert_eq!(run_pure("1\nx = 2\n").expect("run"), Value::Int(1));
    }
}
