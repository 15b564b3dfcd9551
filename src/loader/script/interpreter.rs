//! Tree-walking evaluator.
//!
//! Calls into other runtimes go through [`Foreign`]; the interpreter never
//! touches loader tables itself, so no loader lock is held while guest code
//! runs.

use std::{cell::Cell, cmp::Ordering, collections::HashMap, sync::Arc, thread::LocalKey};

use crate::value::FunctionHandle;

use super::{
    ast::{Block, Expression, Program, Statement},
    error::{ScriptError, ScriptResult},
    object::{Body, Globals, Object, ScriptFunction, lookup_builtin},
};

/// Nested script calls allowed on one thread, counted across re-entrant
/// invocations through the bridge.
pub const MAX_DEPTH: usize = 100;

/// Nested expression evaluations allowed on one thread.
pub const MAX_EVAL_DEPTH: usize = 1_000;

/// Longest string a repetition may build, in bytes.
pub const MAX_STRING_LEN: usize = 1 << 26;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One level of a per-thread depth counter, released on drop.
struct Nested(&'static LocalKey<Cell<usize>>);

impl Nested {
    fn enter(counter: &'static LocalKey<Cell<usize>>, limit: usize) -> ScriptResult<Self> {
        let depth = counter.get();
        if depth >= limit {
            return Err(ScriptError::runtime("maximum recursion depth exceeded"));
        }
        counter.set(depth + 1);
        Ok(Nested(counter))
    }
}

impl Drop for Nested {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

pub trait Foreign {
    fn call_foreign(&self, function: &FunctionHandle, args: Vec<Object>) -> ScriptResult<Object>;

    /// Binds `name` exported by the runtime `tag`.
    fn import(&self, tag: &str, name: &str) -> ScriptResult<Object>;
}

enum Flow {
    Normal,
    Return(Object),
}

struct Env {
    /// `None` at module level, where assignments bind globals.
    locals: Option<HashMap<String, Object>>,
    globals: Globals,
}

impl Env {
    fn lookup(&self, name: &str) -> ScriptResult<Object> {
        if let Some(value) = self.locals.as_ref().and_then(|locals| locals.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.read().get(name) {
            return Ok(value.clone());
        }
        lookup_builtin(name).ok_or_else(|| ScriptError::Name(name.to_string()))
    }

    fn assign(&mut self, name: &str, value: Object) {
        let previous = match &mut self.locals {
            Some(locals) => locals.insert(name.to_string(), value),
            None => self.globals.write().insert(name.to_string(), value),
        };
        drop(previous);
    }

    fn capture(&self) -> HashMap<String, Object> {
        self.locals.clone().unwrap_or_default()
    }
}

pub struct Interpreter<'a> {
    foreign: &'a dyn Foreign,
}

impl<'a> Interpreter<'a> {
    pub fn new(foreign: &'a dyn Foreign) -> Self {
        Self { foreign }
    }

    /// Runs a module body, binding its top-level names into `globals`.
    pub fn run_module(&mut self, program: &Program, globals: &Globals) -> ScriptResult<()> {
        let mut env = Env {
            locals: None,
            globals: globals.clone(),
        };
        for statement in &program.statements {
            let flow = self
                .execute(statement, &mut env)
                .map_err(|err| err.at(statement.position()))?;
            if let Flow::Return(_) = flow {
                return Err(
                    ScriptError::runtime("'return' outside function").at(statement.position())
                );
            }
        }
        Ok(())
    }

    pub fn call(&mut self, callee: &Object, args: Vec<Object>) -> ScriptResult<Object> {
        match callee {
            Object::Function(function) => self.call_function(function, args),
            Object::Builtin(_, builtin) => builtin(args),
            Object::Foreign(handle) => self.foreign.call_foreign(handle, args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub fn call_function(
        &mut self,
        function: &Arc<ScriptFunction>,
        args: Vec<Object>,
    ) -> ScriptResult<Object> {
        if args.len() != function.params.len() {
            return Err(ScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                function.name,
                function.params.len(),
                args.len()
            )));
        }
        let _nested = Nested::enter(&CALL_DEPTH, MAX_DEPTH)?;
        let globals = function.globals.upgrade().ok_or_else(|| {
            ScriptError::runtime(format!(
                "module defining `{}` is no longer loaded",
                function.name
            ))
        })?;

        let mut locals = function.captured.clone();
        if function.nested {
            locals
                .entry(function.name.clone())
                .or_insert_with(|| Object::Function(function.clone()));
        }
        for (param, arg) in function.params.iter().zip(args) {
            locals.insert(param.clone(), arg);
        }
        let mut env = Env {
            locals: Some(locals),
            globals,
        };

        match &function.body {
            Body::Block(block) => self.execute_block(block, &mut env).map(|flow| match flow {
                Flow::Return(value) => value,
                Flow::Normal => Object::None,
            }),
            Body::Expression(expression) => self.eval(expression, &mut env),
        }
    }

    fn execute_block(&mut self, block: &Block, env: &mut Env) -> ScriptResult<Flow> {
        for statement in block {
            if let Flow::Return(value) = self.execute(statement, env)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn execute(&mut self, statement: &Statement, env: &mut Env) -> ScriptResult<Flow> {
        match statement {
            Statement::Def {
                name, params, body, ..
            } => {
                let function = ScriptFunction {
                    name: name.clone(),
                    params: params.clone(),
                    body: Body::Block(body.clone()),
                    captured: env.capture(),
                    globals: Arc::downgrade(&env.globals),
                    nested: env.locals.is_some(),
                };
                env.assign(name, Object::Function(Arc::new(function)));
            }
            Statement::Return { value, .. } => {
                let value = match value {
                    Some(expression) => self.eval(expression, env)?,
                    None => Object::None,
                };
                return Ok(Flow::Return(value));
            }
            Statement::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                if self.eval(condition, env)?.is_truthy() {
                    return self.execute_block(consequence, env);
                }
                if let Some(alternative) = alternative {
                    return self.execute_block(alternative, env);
                }
            }
            Statement::Assign { name, value, .. } => {
                let value = self.eval(value, env)?;
                env.assign(name, value);
            }
            Statement::Import { path, names, .. } => {
                let tag = path
                    .last()
                    .ok_or_else(|| ScriptError::runtime("empty import path"))?;
                for name in names {
                    let imported = self.foreign.import(tag, name)?;
                    env.assign(name, imported);
                }
            }
            Statement::Pass => {}
            Statement::Expression { expression, .. } => {
                self.eval(expression, env)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expression: &Expression, env: &mut Env) -> ScriptResult<Object> {
        let _nested = Nested::enter(&EVAL_DEPTH, MAX_EVAL_DEPTH)?;
        match expression {
            Expression::Identifier(name) => env.lookup(name),
            Expression::Integer(value) => Ok(Object::Int(*value)),
            Expression::Float(value) => Ok(Object::Float(*value)),
            Expression::String(value) => Ok(Object::Str(value.clone())),
            Expression::Boolean(value) => Ok(Object::Bool(*value)),
            Expression::None => Ok(Object::None),
            Expression::List(items) => items
                .iter()
                .map(|item| self.eval(item, env))
                .collect::<ScriptResult<Vec<_>>>()
                .map(Object::List),
            Expression::Dict(pairs) => {
                let mut dict: Vec<(Object, Object)> = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    match dict.iter_mut().find(|(existing, _)| *existing == key) {
                        Some(entry) => entry.1 = value,
                        None => dict.push((key, value)),
                    }
                }
                Ok(Object::Dict(dict))
            }
            Expression::Prefix { operator, right } => {
                let right = self.eval(right, env)?;
                eval_prefix(operator, right)
            }
            Expression::Infix {
                left,
                operator,
                right,
            } => {
                let left = self.eval(left, env)?;
                match operator.as_str() {
                    "and" if !left.is_truthy() => Ok(left),
                    "or" if left.is_truthy() => Ok(left),
                    "and" | "or" => self.eval(right, env),
                    _ => {
                        let right = self.eval(right, env)?;
                        eval_infix(operator, left, right)
                    }
                }
            }
            Expression::Call {
                function,
                arguments,
            } => {
                let callee = self.eval(function, env)?;
                let args = arguments
                    .iter()
                    .map(|argument| self.eval(argument, env))
                    .collect::<ScriptResult<Vec<_>>>()?;
                self.call(&callee, args)
            }
            Expression::Index { left, index } => {
                let left = self.eval(left, env)?;
                let index = self.eval(index, env)?;
                eval_index(left, index)
            }
            Expression::Lambda { params, body } => {
                Ok(Object::Function(Arc::new(ScriptFunction {
                    name: "<lambda>".to_string(),
                    params: params.clone(),
                    body: Body::Expression(body.clone()),
                    captured: env.capture(),
                    globals: Arc::downgrade(&env.globals),
                    nested: false,
                })))
            }
        }
    }
}

fn eval_prefix(operator: &str, right: Object) -> ScriptResult<Object> {
    match (operator, right) {
        ("not", right) => Ok(Object::Bool(!right.is_truthy())),
        ("-", Object::Int(value)) => value
            .checked_neg()
            .map(Object::Int)
            .ok_or_else(|| ScriptError::runtime("integer overflow")),
        ("-", Object::Float(value)) => Ok(Object::Float(-value)),
        (operator, right) => Err(ScriptError::type_error(format!(
            "bad operand type for unary {operator}: '{}'",
            right.type_name()
        ))),
    }
}

fn eval_infix(operator: &str, left: Object, right: Object) -> ScriptResult<Object> {
    match (operator, &left, &right) {
        ("==", ..) => Ok(Object::Bool(left == right)),
        ("!=", ..) => Ok(Object::Bool(left != right)),
        (_, Object::Int(a), Object::Int(b)) => eval_int(operator, *a, *b),
        (_, Object::Int(_) | Object::Float(_), Object::Int(_) | Object::Float(_)) => {
            eval_float(operator, as_f64(&left), as_f64(&right))
        }
        ("+", Object::Str(a), Object::Str(b)) => Ok(Object::Str(format!("{a}{b}"))),
        ("*", Object::Str(s), Object::Int(n)) | ("*", Object::Int(n), Object::Str(s)) => {
            repeat(s, *n)
        }
        ("+", Object::List(a), Object::List(b)) => {
            Ok(Object::List(a.iter().chain(b).cloned().collect()))
        }
        ("<" | ">" | "<=" | ">=", Object::Str(a), Object::Str(b)) => {
            Ok(Object::Bool(compare(operator, a.cmp(b))))
        }
        _ => Err(ScriptError::type_error(format!(
            "unsupported operand type(s) for {operator}: '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn repeat(s: &str, times: i64) -> ScriptResult<Object> {
    let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
    match s.len().checked_mul(times) {
        Some(len) if len <= MAX_STRING_LEN => Ok(Object::Str(s.repeat(times))),
        _ => Err(ScriptError::runtime("repeated string is too long")),
    }
}

fn as_f64(object: &Object) -> f64 {
    match object {
        Object::Int(i) => *i as f64,
        Object::Float(x) => *x,
        _ => f64::NAN,
    }
}

fn compare(operator: &str, ordering: Ordering) -> bool {
    match operator {
        "<" => ordering == Ordering::Less,
        ">" => ordering == Ordering::Greater,
        "<=" => ordering != Ordering::Greater,
        _ => ordering != Ordering::Less,
    }
}

fn eval_int(operator: &str, a: i64, b: i64) -> ScriptResult<Object> {
    let overflow = || ScriptError::runtime("integer overflow");
    let value = match operator {
        "+" => a.checked_add(b).ok_or_else(overflow)?,
        "-" => a.checked_sub(b).ok_or_else(overflow)?,
        "*" => a.checked_mul(b).ok_or_else(overflow)?,
        "/" => return eval_float(operator, a as f64, b as f64),
        "%" => {
            if b == 0 {
                return Err(ScriptError::runtime("integer modulo by zero"));
            }
            let rem = a.checked_rem(b).ok_or_else(overflow)?;
            if rem != 0 && (rem < 0) != (b < 0) {
                rem + b
            } else {
                rem
            }
        }
        "<" | ">" | "<=" | ">=" => return Ok(Object::Bool(compare(operator, a.cmp(&b)))),
        _ => {
            return Err(ScriptError::type_error(format!(
                "unsupported operand type(s) for {operator}: 'int' and 'int'"
            )));
        }
    };
    Ok(Object::Int(value))
}

fn eval_float(operator: &str, a: f64, b: f64) -> ScriptResult<Object> {
    let value = match operator {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" | "%" if b == 0.0 => {
            return Err(ScriptError::runtime("float division by zero"));
        }
        "/" => a / b,
        "%" => a - b * (a / b).floor(),
        "<" | ">" | "<=" | ">=" => {
            return Ok(Object::Bool(
                a.partial_cmp(&b).is_some_and(|ordering| compare(operator, ordering)),
            ));
        }
        _ => {
            return Err(ScriptError::type_error(format!(
                "unsupported operand type(s) for {operator}: 'float' and 'float'"
            )));
        }
    };
    Ok(Object::Float(value))
}

fn eval_index(left: Object, index: Object) -> ScriptResult<Object> {
    match (&left, &index) {
        (Object::List(items), Object::Int(i)) => {
            let at = normalize_index(*i, items.len())
                .ok_or_else(|| ScriptError::runtime("list index out of range"))?;
            Ok(items[at].clone())
        }
        (Object::Str(s), Object::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let at = normalize_index(*i, chars.len())
                .ok_or_else(|| ScriptError::runtime("string index out of range"))?;
            Ok(Object::Str(chars[at].to_string()))
        }
        (Object::Dict(pairs), key) => pairs
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| ScriptError::runtime(format!("key not found: {key}"))),
        _ => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable with '{}'",
            left.type_name(),
            index.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}
