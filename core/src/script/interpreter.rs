//! Tree-walking interpreter for the routine language.
//!
//! RULE: Every statement and every expression evaluation costs one step.
//! The step counter is the only preemption point: the deadline and the
//! cancel flag are polled every `INTERRUPT_INTERVAL` steps, so a routine
//! stuck in a loop is always interrupted within a bounded amount of work.
//!
//! RULE: Faults never carry partial results. A fault records the call
//! frames active when it was raised so the executor can log them; the
//! caller only ever sees the category and message.

use super::{
    ast::*,
    builtins::{self, Builtin},
    value::{format_number, to_json, ArrayRef, Closure, ObjectRef, Value},
};
use crate::rng::SampleRng;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

/// Steps between polls of the deadline and the cancel flag.
const INTERRUPT_INTERVAL: u64 = 1024;

/// Deepest statement and expression recursion a run may reach, counting
/// calls. Sized for the worker thread's stack.
pub const MAX_EVAL_DEPTH: usize = 8_192;

/// Deepest array nesting a string conversion follows.
const MAX_STRINGIFY_DEPTH: usize = 64;

// ── Scopes ─────────────────────────────────────────────────────────

struct Binding {
    value:   Value,
    mutable: bool,
}

/// Lexical scope. Closures keep their defining scope alive.
pub struct Scope {
    vars:   RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

enum AssignError {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    /// Bind `name` in this scope. Returns false if it was already bound here.
    pub(super) fn declare(&self, name: &str, value: Value, mutable: bool) -> bool {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable })
            .is_none()
    }

    fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref()?.lookup(name)
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Err(AssignError::Constant);
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(AssignError::Undeclared),
        }
    }

    /// Drop this scope's bindings and its ancestors'.
    fn clear_chain(&self) {
        self.vars.borrow_mut().clear();
        if let Some(parent) = &self.parent {
            parent.clear_chain();
        }
    }
}

// ── Faults ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Runtime,
    ResourceExceeded,
    Cancelled,
    InvalidParameter,
    UnsupportedParameter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind:    FaultKind,
    pub message: String,
    /// Active call frames, outermost first.
    pub trace:   Vec<String>,
}

/// Hard limits for one run.
#[derive(Debug, Clone)]
pub struct Budget {
    pub max_steps:       u64,
    pub max_allocations: u64,
    pub max_call_depth:  usize,
    pub deadline:        Instant,
    pub cancel:          Arc<AtomicBool>,
}

/// Counters reported after a run, successful or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub steps:       u64,
    pub iterations:  u64,
    pub allocations: u64,
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Resolved assignment target; the container is evaluated once.
enum Place {
    Var(String),
    Field(ObjectRef, String),
    Element(ArrayRef, usize),
    Append(ArrayRef),
}

enum Container {
    Array(Weak<RefCell<Vec<Value>>>),
    Object(Weak<RefCell<BTreeMap<String, Value>>>),
}

// ── Interpreter ────────────────────────────────────────────────────

pub struct Interpreter {
    budget:      Budget,
    steps:       u64,
    iterations:  u64,
    allocations: u64,
    depth:       usize,
    eval_depth:  usize,
    line:        u32,
    frames:      Vec<String>,
    globals:     Rc<Scope>,
    pub(super) rng: SampleRng,
    warned_families: HashSet<String>,
    // Weak handles to everything that can take part in an Rc cycle,
    // cleared on drop so a run never leaks its heap.
    containers:  Vec<Container>,
    captured:    Vec<Weak<Scope>>,
}

/// Execute `program` with `params` bound as the entry point's argument.
pub fn run(
    program: &Program,
    params: &serde_json::Map<String, serde_json::Value>,
    rng: SampleRng,
    budget: Budget,
) -> (Result<serde_json::Value, Fault>, RunStats) {
    let mut interp = Interpreter::new(rng, budget);
    let result = interp.run_program(program, params);
    (result, interp.stats())
}

impl Interpreter {
    fn new(rng: SampleRng, budget: Budget) -> Self {
        Self {
            budget,
            steps: 0,
            iterations: 0,
            allocations: 0,
            depth: 0,
            eval_depth: 0,
            line: 0,
            frames: Vec::new(),
            globals: Scope::root(),
            rng,
            warned_families: HashSet::new(),
            containers: Vec::new(),
            captured: Vec::new(),
        }
    }

    fn stats(&self) -> RunStats {
        RunStats {
            steps: self.steps,
            iterations: self.iterations,
            allocations: self.allocations,
        }
    }

    fn run_program(
        &mut self,
        program: &Program,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, Fault> {
        self.check_interrupts()?;
        let globals = self.globals.clone();
        builtins::install(self, &globals)?;
        self.exec_block(&program.body, &globals)?;

        let entry = self.entry_point(program)?;
        let mut argument = BTreeMap::new();
        for (key, value) in params {
            let value = self.from_json(value)?;
            argument.insert(key.clone(), value);
        }
        let argument = self.new_object(argument)?;
        let result = self.call_value(&entry, vec![argument])?;
        to_json(&result, "result")
            .map_err(|reason| self.fault(format!("routine produced an invalid result: {reason}")))
    }

    /// `calculate` when defined, otherwise the first top-level function.
    fn entry_point(&self, program: &Program) -> Result<Value, Fault> {
        if let Some(value @ Value::Function(_)) = self.globals.lookup("calculate") {
            return Ok(value);
        }
        program
            .top_level_functions()
            .find_map(|decl| decl.name.as_deref())
            .and_then(|name| self.globals.lookup(name))
            .ok_or_else(|| self.fault("routine defines no entry point function".to_string()))
    }

    // ── Accounting ─────────────────────────────────────────────

    fn tick(&mut self) -> Result<(), Fault> {
        self.charge_steps(1)
    }

    /// Charge `n` steps of work done outside the evaluator (builtins).
    pub(super) fn charge_steps(&mut self, n: u64) -> Result<(), Fault> {
        let before = self.steps;
        self.steps = self.steps.saturating_add(n);
        if self.steps > self.budget.max_steps {
            return Err(self.resource(format!(
                "step limit of {} exceeded",
                self.budget.max_steps
            )));
        }
        if before / INTERRUPT_INTERVAL != self.steps / INTERRUPT_INTERVAL {
            self.check_interrupts()?;
        }
        Ok(())
    }

    fn check_interrupts(&self) -> Result<(), Fault> {
        if self.budget.cancel.load(Ordering::Relaxed) {
            return Err(Fault {
                kind: FaultKind::Cancelled,
                message: "run cancelled".to_string(),
                trace: self.frames.clone(),
            });
        }
        if Instant::now() >= self.budget.deadline {
            return Err(self.resource("wall-clock time limit exceeded".to_string()));
        }
        Ok(())
    }

    /// Charge `n` allocation units (container slots, string bytes / 16).
    pub(super) fn alloc(&mut self, n: usize) -> Result<(), Fault> {
        self.allocations = self.allocations.saturating_add(n as u64);
        if self.allocations > self.budget.max_allocations {
            return Err(self.resource(format!(
                "allocation limit of {} exceeded",
                self.budget.max_allocations
            )));
        }
        Ok(())
    }

    pub(super) fn new_array(&mut self, items: Vec<Value>) -> Result<Value, Fault> {
        self.alloc(items.len() + 1)?;
        let array = Rc::new(RefCell::new(items));
        self.containers.push(Container::Array(Rc::downgrade(&array)));
        Ok(Value::Array(array))
    }

    pub(super) fn new_object(&mut self, fields: BTreeMap<String, Value>) -> Result<Value, Fault> {
        self.alloc(fields.len() + 1)?;
        let object = Rc::new(RefCell::new(fields));
        self.containers.push(Container::Object(Rc::downgrade(&object)));
        Ok(Value::Object(object))
    }

    pub(super) fn new_string(&mut self, s: String) -> Result<Value, Fault> {
        self.alloc(1 + s.len() / 16)?;
        Ok(Value::Str(Rc::from(s)))
    }

    /// Enter one level of statement or expression recursion.
    fn descend(&mut self) -> Result<(), Fault> {
        if self.eval_depth >= MAX_EVAL_DEPTH {
            return Err(self.resource(format!(
                "evaluation depth limit of {MAX_EVAL_DEPTH} exceeded"
            )));
        }
        self.eval_depth += 1;
        Ok(())
    }

    // ── String conversion ──────────────────────────────────────

    /// String form of `value` as `+` and `Error(..)` see it. Arrays join
    /// their elements with commas, with null and undefined elements left
    /// empty. Steps and allocation units are charged per element before
    /// the text is appended; a self-referencing array is a runtime fault.
    pub(super) fn stringify(&mut self, value: &Value) -> Result<String, Fault> {
        let mut out = String::new();
        let mut open = Vec::new();
        self.stringify_into(value, &mut out, &mut open)?;
        Ok(out)
    }

    fn stringify_into(
        &mut self,
        value: &Value,
        out: &mut String,
        open: &mut Vec<*const RefCell<Vec<Value>>>,
    ) -> Result<(), Fault> {
        let items = match value {
            Value::Array(items) => items,
            Value::Str(s) => return self.append_text(out, s),
            other => return self.append_text(out, &other.to_string()),
        };
        let identity = Rc::as_ptr(items);
        if open.contains(&identity) {
            return Err(self.fault("cannot convert a self-referencing array to a string".to_string()));
        }
        if open.len() >= MAX_STRINGIFY_DEPTH {
            return Err(self.fault(format!(
                "array is nested more than {MAX_STRINGIFY_DEPTH} deep to convert to a string"
            )));
        }
        let items = items.borrow();
        self.charge_steps(items.len() as u64)?;
        open.push(identity);
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.append_text(out, ",")?;
            }
            if !matches!(item, Value::Undefined | Value::Null) {
                self.stringify_into(item, out, open)?;
            }
        }
        open.pop();
        Ok(())
    }

    fn append_text(&mut self, out: &mut String, text: &str) -> Result<(), Fault> {
        let before = out.len() / 16;
        let after = (out.len() + text.len()) / 16;
        self.alloc(after - before)?;
        out.push_str(text);
        Ok(())
    }

    fn make_closure(&mut self, decl: &Rc<FunctionDecl>, env: &Rc<Scope>) -> Result<Value, Fault> {
        self.alloc(1)?;
        self.captured.push(Rc::downgrade(env));
        Ok(Value::Function(Rc::new(Closure {
            decl: decl.clone(),
            env: env.clone(),
        })))
    }

    /// Record that `family` was not recognised. True the first time.
    pub(super) fn first_unknown_family(&mut self, family: &str) -> bool {
        self.warned_families.insert(family.to_string())
    }

    // ── Faults ─────────────────────────────────────────────────

    pub(super) fn fault(&self, message: String) -> Fault {
        self.fault_of(FaultKind::Runtime, format!("{message} (line {})", self.line))
    }

    pub(super) fn fault_of(&self, kind: FaultKind, message: String) -> Fault {
        Fault {
            kind,
            message,
            trace: self.frames.clone(),
        }
    }

    fn resource(&self, message: String) -> Fault {
        self.fault_of(FaultKind::ResourceExceeded, message)
    }

    /// Fault raised by a `throw` statement. A thrown value that cannot
    /// be converted to a string faults with the conversion's reason.
    fn thrown(&mut self, value: &Value) -> Fault {
        let mut message = value.clone();
        let mut is_range = false;
        if let Value::Object(fields) = value {
            let fields = fields.borrow();
            if let Some(field) = fields.get("message") {
                message = field.clone();
                is_range = matches!(fields.get("name"), Some(Value::Str(n)) if &**n == "RangeError");
            }
        }
        match self.stringify(&message) {
            Ok(message) if is_range => self.fault_of(FaultKind::InvalidParameter, message),
            Ok(message) => self.fault(format!("routine threw: {message}")),
            Err(fault) => fault,
        }
    }

    pub(super) fn number(&self, value: &Value, what: &str) -> Result<f64, Fault> {
        match value {
            Value::Number(n) => Ok(*n),
            other => Err(self.fault(format!(
                "{what} expects a number, got {}",
                other.type_name()
            ))),
        }
    }

    // ── Statements ─────────────────────────────────────────────

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, Fault> {
        for stmt in stmts {
            if let StmtKind::Function(decl) = &stmt.kind {
                if let Some(name) = &decl.name {
                    let closure = self.make_closure(decl, scope)?;
                    scope.declare(name, closure, true);
                }
            }
        }
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, Fault> {
        self.descend()?;
        let flow = self.exec_stmt_at(stmt, scope);
        self.eval_depth -= 1;
        flow
    }

    fn exec_stmt_at(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, Fault> {
        self.tick()?;
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Function(_) | StmtKind::Empty => Ok(Flow::Normal),
            StmtKind::Declare { kind, bindings } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    if *kind != DeclKind::Var && scope.has_own(name) {
                        return Err(self.fault(format!("'{name}' is already declared")));
                    }
                    scope.declare(name, value, *kind != DeclKind::Const);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            StmtKind::If { cond, then, otherwise } => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec_stmt(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::For { init, cond, step, body } => {
                let scope = Scope::child(scope);
                if let Some(init) = init {
                    self.exec_stmt(init, &scope)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.eval(cond, &scope)?.truthy() {
                            break;
                        }
                    }
                    self.iterations += 1;
                    match self.exec_stmt(body, &scope)? {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(step) = step {
                        self.eval(step, &scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::ForOf { kind, name, iterable, body } => {
                let items = match self.eval(iterable, scope)? {
                    Value::Array(items) => items,
                    other => {
                        return Err(self.fault(format!(
                            "for...of expects an array, got {}",
                            other.type_name()
                        )))
                    }
                };
                let mut index = 0;
                loop {
                    let item = match items.borrow().get(index) {
                        Some(item) => item.clone(),
                        None => break,
                    };
                    index += 1;
                    self.iterations += 1;
                    let iteration = Scope::child(scope);
                    iteration.declare(name, item, *kind != DeclKind::Const);
                    match self.exec_stmt(body, &iteration)? {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, scope)?.truthy() {
                    self.iterations += 1;
                    match self.exec_stmt(body, scope)? {
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => self.exec_block(stmts, &Scope::child(scope)),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(self.thrown(&value))
            }
        }
    }

    // ── Expressions ────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, Fault> {
        self.descend()?;
        let value = self.eval_at(expr, scope);
        self.eval_depth -= 1;
        value
    }

    fn eval_at(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, Fault> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| self.fault(format!("'{name}' is not defined"))),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                self.new_array(values)
            }
            Expr::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, value) in fields {
                    let value = self.eval(value, scope)?;
                    map.insert(key.clone(), value);
                }
                self.new_object(map)
            }
            Expr::Member(object, name) => {
                let object = self.eval(object, scope)?;
                self.get_member(&object, name)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                self.get_index(&object, &index)
            }
            Expr::Call(callee, args) => self.eval_call(callee, args, scope),
            Expr::New(name, args) => {
                let constructor = scope
                    .lookup(name)
                    .ok_or_else(|| self.fault(format!("'{name}' is not defined")))?;
                if !matches!(constructor, Value::Builtin(Builtin::Error | Builtin::RangeError)) {
                    return Err(self.fault(format!("'new' is not supported for '{name}'")));
                }
                let args = self.eval_args(args, scope)?;
                self.call_value(&constructor, args)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => Ok(Value::Number(-self.number(&value, "unary '-'")?)),
                    UnaryOp::Plus => Ok(Value::Number(self.number(&value, "unary '+'")?)),
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, scope)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, scope),
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign(op, target, value) => {
                let place = self.resolve_place(target, scope)?;
                let value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.read_place(&place, scope)?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(*op, &current, &rhs)?
                    }
                };
                self.write_place(place, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Update { increment, prefix, target } => {
                let place = self.resolve_place(target, scope)?;
                let current = self.read_place(&place, scope)?;
                let old = self.number(&current, if *increment { "'++'" } else { "'--'" })?;
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(place, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Function(decl) => self.make_closure(decl, scope),
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, Fault> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        Ok(values)
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Fault> {
        use BinaryOp::*;
        match op {
            Add => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    let mut text = self.stringify(left)?;
                    text.push_str(&self.stringify(right)?);
                    self.alloc(1)?;
                    Ok(Value::Str(Rc::from(text)))
                }
                _ => Err(self.operand_fault(op, left, right)),
            },
            Sub | Mul | Div | Rem | Pow => {
                let (a, b) = match (left, right) {
                    (Value::Number(a), Value::Number(b)) => (*a, *b),
                    _ => return Err(self.operand_fault(op, left, right)),
                };
                let result = match op {
                    Sub => a - b,
                    Mul => a * b,
                    Div if b == 0.0 => return Err(self.fault("division by zero".to_string())),
                    Div => a / b,
                    Rem if b == 0.0 => return Err(self.fault("modulo by zero".to_string())),
                    Rem => a % b,
                    _ => a.powf(b),
                };
                Ok(Value::Number(result))
            }
            Eq => Ok(Value::Bool(left.loose_equals(right))),
            Ne => Ok(Value::Bool(!left.loose_equals(right))),
            StrictEq => Ok(Value::Bool(left.strict_equals(right))),
            StrictNe => Ok(Value::Bool(!left.strict_equals(right))),
            Lt | Le | Gt | Ge => {
                let ordering = match (left, right) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => return Err(self.operand_fault(op, left, right)),
                };
                let result = match ordering {
                    None => false,
                    Some(ordering) => match op {
                        Lt => ordering.is_lt(),
                        Le => ordering.is_le(),
                        Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                };
                Ok(Value::Bool(result))
            }
        }
    }

    fn operand_fault(&self, op: BinaryOp, left: &Value, right: &Value) -> Fault {
        self.fault(format!(
            "cannot apply '{}' to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    }

    // ── Property access ────────────────────────────────────────

    fn get_member(&self, object: &Value, name: &str) -> Result<Value, Fault> {
        match object {
            Value::Object(fields) => fields
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| self.fault(format!("property '{name}' does not exist"))),
            Value::Array(items) if name == "length" => Ok(Value::Number(items.borrow().len() as f64)),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            other => Err(self.fault(format!(
                "cannot read property '{name}' of {}",
                other.type_name()
            ))),
        }
    }

    fn get_index(&mut self, object: &Value, index: &Value) -> Result<Value, Fault> {
        match object {
            Value::Array(items) => {
                let i = self.array_index(index)?;
                let len = items.borrow().len();
                items.borrow().get(i).cloned().ok_or_else(|| {
                    self.fault(format!("index {i} is out of bounds for array of length {len}"))
                })
            }
            Value::Object(_) => {
                let key = self.property_key(index)?;
                self.get_member(object, &key)
            }
            Value::Str(s) => {
                let i = self.array_index(index)?;
                match s.chars().nth(i) {
                    Some(ch) => self.new_string(ch.to_string()),
                    None => Err(self.fault(format!("index {i} is out of bounds for string"))),
                }
            }
            other => Err(self.fault(format!("cannot index into {}", other.type_name()))),
        }
    }

    fn array_index(&self, index: &Value) -> Result<usize, Fault> {
        match index {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < usize::MAX as f64 => {
                Ok(*n as usize)
            }
            Value::Number(n) => Err(self.fault(format!("invalid array index {}", format_number(*n)))),
            other => Err(self.fault(format!("invalid array index of type {}", other.type_name()))),
        }
    }

    fn property_key(&self, key: &Value) -> Result<String, Fault> {
        match key {
            Value::Str(s) => Ok(s.to_string()),
            Value::Number(n) => Ok(format_number(*n)),
            other => Err(self.fault(format!("invalid property key of type {}", other.type_name()))),
        }
    }

    fn resolve_place(&mut self, target: &Expr, scope: &Rc<Scope>) -> Result<Place, Fault> {
        match target {
            Expr::Ident(name) => Ok(Place::Var(name.clone())),
            Expr::Member(object, name) => match self.eval(object, scope)? {
                Value::Object(fields) => Ok(Place::Field(fields, name.clone())),
                other => Err(self.fault(format!(
                    "cannot set property '{name}' on {}",
                    other.type_name()
                ))),
            },
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                match object {
                    Value::Array(items) => {
                        let i = self.array_index(&index)?;
                        let len = items.borrow().len();
                        if i < len {
                            Ok(Place::Element(items, i))
                        } else if i == len {
                            Ok(Place::Append(items))
                        } else {
                            Err(self.fault(format!(
                                "index {i} is out of bounds for array of length {len}"
                            )))
                        }
                    }
                    Value::Object(fields) => Ok(Place::Field(fields, self.property_key(&index)?)),
                    other => Err(self.fault(format!("cannot index into {}", other.type_name()))),
                }
            }
            _ => Err(self.fault("invalid assignment target".to_string())),
        }
    }

    fn read_place(&self, place: &Place, scope: &Rc<Scope>) -> Result<Value, Fault> {
        match place {
            Place::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| self.fault(format!("'{name}' is not defined"))),
            Place::Field(fields, key) => fields
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| self.fault(format!("property '{key}' does not exist"))),
            Place::Element(items, i) => items
                .borrow()
                .get(*i)
                .cloned()
                .ok_or_else(|| self.fault(format!("index {i} is out of bounds"))),
            Place::Append(items) => Err(self.fault(format!(
                "index {} is out of bounds",
                items.borrow().len()
            ))),
        }
    }

    fn write_place(&mut self, place: Place, value: Value, scope: &Rc<Scope>) -> Result<(), Fault> {
        match place {
            Place::Var(name) => scope.assign(&name, value).map_err(|err| match err {
                AssignError::Undeclared => self.fault(format!("assignment to undeclared variable '{name}'")),
                AssignError::Constant => self.fault(format!("assignment to constant '{name}'")),
            }),
            Place::Field(fields, key) => {
                if !fields.borrow().contains_key(&key) {
                    self.alloc(1)?;
                }
                fields.borrow_mut().insert(key, value);
                Ok(())
            }
            Place::Element(items, i) => {
                if let Some(slot) = items.borrow_mut().get_mut(i) {
                    *slot = value;
                }
                Ok(())
            }
            Place::Append(items) => {
                self.alloc(1)?;
                items.borrow_mut().push(value);
                Ok(())
            }
        }
    }

    // ── Calls ──────────────────────────────────────────────────

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: &Rc<Scope>) -> Result<Value, Fault> {
        if let Expr::Member(receiver, name) = callee {
            let receiver = self.eval(receiver, scope)?;
            let args = self.eval_args(args, scope)?;
            return match &receiver {
                Value::Array(items) => self.call_array_method(items, name, args),
                Value::Object(fields) => {
                    let method = fields.borrow().get(name).cloned();
                    match method {
                        Some(method) => self.call_value(&method, args),
                        None => Err(self.fault(format!("'{name}' is not a function"))),
                    }
                }
                other => Err(self.fault(format!(
                    "cannot call method '{name}' on {}",
                    other.type_name()
                ))),
            };
        }
        let function = self.eval(callee, scope)?;
        let args = self.eval_args(args, scope)?;
        self.call_value(&function, args)
    }

    pub(super) fn call_value(&mut self, function: &Value, args: Vec<Value>) -> Result<Value, Fault> {
        match function {
            Value::Function(closure) => self.call_closure(closure.clone(), args),
            Value::Builtin(builtin) => builtins::call(self, *builtin, args),
            other => Err(self.fault(format!("{} is not a function", other.type_name()))),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, args: Vec<Value>) -> Result<Value, Fault> {
        if self.depth >= self.budget.max_call_depth {
            return Err(self.resource(format!(
                "call depth limit of {} exceeded",
                self.budget.max_call_depth
            )));
        }
        let scope = Scope::child(&closure.env);
        let mut args = args.into_iter();
        for param in &closure.decl.params {
            scope.declare(param, args.next().unwrap_or(Value::Undefined), true);
        }

        let name = closure.decl.name.as_deref().unwrap_or("<anonymous>");
        self.frames.push(format!("{name} (called from line {})", self.line));
        self.depth += 1;
        let caller_line = self.line;

        let result = match &closure.decl.body {
            FunctionBody::Block(stmts) => self.exec_block(stmts, &scope).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::Undefined,
            }),
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
        };

        self.depth -= 1;
        self.frames.pop();
        self.line = caller_line;
        result
    }

    fn call_array_method(
        &mut self,
        items: &ArrayRef,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        match name {
            "push" => {
                self.alloc(args.len())?;
                let mut items = items.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "slice" => {
                let len = items.borrow().len();
                let start = self.slice_bound(args.first(), 0, len)?;
                let end = self.slice_bound(args.get(1), len, len)?;
                let copy = if start < end {
                    items.borrow()[start..end].to_vec()
                } else {
                    Vec::new()
                };
                self.charge_steps(copy.len() as u64)?;
                self.new_array(copy)
            }
            "indexOf" => {
                let needle = args.into_iter().next().unwrap_or(Value::Undefined);
                let position = items.borrow().iter().position(|v| v.strict_equals(&needle));
                self.charge_steps(items.borrow().len() as u64)?;
                Ok(Value::Number(position.map_or(-1.0, |i| i as f64)))
            }
            "sort" => {
                let snapshot = items.borrow().clone();
                let sorted = match args.first() {
                    Some(comparator) => self.merge_sort(snapshot, comparator)?,
                    None => self.default_sort(snapshot)?,
                };
                *items.borrow_mut() = sorted;
                Ok(Value::Array(items.clone()))
            }
            "map" | "filter" | "forEach" => {
                let callback = self.callback_arg(name, args.first())?;
                let mut out = Vec::new();
                let mut index = 0;
                loop {
                    let item = match items.borrow().get(index) {
                        Some(item) => item.clone(),
                        None => break,
                    };
                    let result =
                        self.call_value(&callback, vec![item.clone(), Value::Number(index as f64)])?;
                    match name {
                        "map" => out.push(result),
                        "filter" if result.truthy() => out.push(item),
                        _ => {}
                    }
                    index += 1;
                }
                if name == "forEach" {
                    Ok(Value::Undefined)
                } else {
                    self.new_array(out)
                }
            }
            "reduce" => {
                let callback = self.callback_arg(name, args.first())?;
                let mut index = 0;
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => {
                        let first = items.borrow().first().cloned();
                        index = 1;
                        first.ok_or_else(|| {
                            self.fault("reduce of empty array with no initial value".to_string())
                        })?
                    }
                };
                loop {
                    let item = match items.borrow().get(index) {
                        Some(item) => item.clone(),
                        None => break,
                    };
                    acc = self.call_value(&callback, vec![acc, item, Value::Number(index as f64)])?;
                    index += 1;
                }
                Ok(acc)
            }
            other => Err(self.fault(format!("arrays have no method '{other}'"))),
        }
    }

    fn callback_arg(&self, method: &str, arg: Option<&Value>) -> Result<Value, Fault> {
        match arg {
            Some(f @ (Value::Function(_) | Value::Builtin(_))) => Ok(f.clone()),
            _ => Err(self.fault(format!("{method} expects a function argument"))),
        }
    }

    fn slice_bound(&self, arg: Option<&Value>, default: usize, len: usize) -> Result<usize, Fault> {
        let n = match arg {
            None | Some(Value::Undefined) => return Ok(default),
            Some(value) => self.number(value, "slice")?.trunc(),
        };
        let len_f = len as f64;
        let bound = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
        Ok(bound as usize)
    }

    /// Numbers ascending numerically, strings lexicographically.
    fn default_sort(&mut self, mut items: Vec<Value>) -> Result<Vec<Value>, Fault> {
        self.charge_steps(items.len() as u64)?;
        if items.iter().all(|v| matches!(v, Value::Number(_))) {
            items.sort_by(|a, b| match (a, b) {
                (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
                _ => std::cmp::Ordering::Equal,
            });
        } else if items.iter().all(|v| matches!(v, Value::Str(_))) {
            items.sort_by(|a, b| match (a, b) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => std::cmp::Ordering::Equal,
            });
        } else {
            return Err(self.fault("sort without a comparator needs all numbers or all strings".to_string()));
        }
        Ok(items)
    }

    /// Stable merge sort driven by a routine comparator. Inconsistent
    /// comparators give an unspecified order, never a fault.
    fn merge_sort(&mut self, mut items: Vec<Value>, comparator: &Value) -> Result<Vec<Value>, Fault> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, comparator)?;
        let right = self.merge_sort(right, comparator)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let (l, r) = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => (l.clone(), r.clone()),
                _ => break,
            };
            let order = self.call_value(comparator, vec![l, r])?;
            let order = self.number(&order, "sort comparator")?;
            let next = if order > 0.0 { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    // ── JSON ───────────────────────────────────────────────────

    fn from_json(&mut self, value: &serde_json::Value) -> Result<Value, Fault> {
        use serde_json::Value as Json;
        match value {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
            Json::String(s) => self.new_string(s.clone()),
            Json::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.from_json(item)?);
                }
                self.new_array(values)
            }
            Json::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, field) in fields {
                    map.insert(key.clone(), self.from_json(field)?);
                }
                self.new_object(map)
            }
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        for scope in self.captured.drain(..) {
            if let Some(scope) = scope.upgrade() {
                scope.clear_chain();
            }
        }
        for container in self.containers.drain(..) {
            match container {
                Container::Array(items) => {
                    if let Some(items) = items.upgrade() {
                        items.borrow_mut().clear();
                    }
                }
                Container::Object(fields) => {
                    if let Some(fields) = fields.upgrade() {
                        fields.borrow_mut().clear();
                    }
                }
            }
        }
        self.globals.clear_chain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;
    use std::time::Duration;

    fn budget() -> Budget {
        Budget {
            max_steps: 1_000_000,
            max_allocations: 100_000,
            max_call_depth: 64,
            deadline: Instant::now() + Duration::from_secs(10),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn eval_with(source: &str, params: serde_json::Value, budget: Budget) -> Result<serde_json::Value, Fault> {
        let program = parse(source).expect("parses");
        let params = params.as_object().cloned().unwrap_or_default();
        run(&program, &params, SampleRng::new(7), budget).0
    }

    fn eval(source: &str) -> Result<serde_json::Value, Fault> {
        eval_with(source, serde_json::json!({}), budget())
    }

    #[test]
    fn calculate_receives_params() {
        let out = eval_with(
            "function calculate(p) { return { doubled: p.x * 2, name: p.label } }",
            serde_json::json!({ "x": 21, "label": "ok" }),
            budget(),
        )
        .unwrap();
        assert_eq!(out, serde_json::json!({ "doubled": 42, "name": "ok" }));
    }

    #[test]
    fn first_function_is_entry_without_calculate() {
        let out = eval("function helper() { return 1 }\nfunction other() { return 2 }").unwrap();
        assert_eq!(out, serde_json::json!(1));
    }

    #[test]
    fn closures_loops_and_array_methods() {
        let src = r#"
            function calculate(p) {
                let total = 0;
                const xs = [3, 1, 2];
                for (let i = 0; i < xs.length; i++) { total += xs[i]; }
                for (const x of xs) { total += x; }
                const sorted = xs.slice().sort();
                const squares = sorted.map(x => x * x);
                const big = squares.filter(function (x) { return x > 1 });
                const sum = big.reduce((a, b) => a + b, 0);
                return { total, sorted, squares, sum, desc: xs.sort((a, b) => b - a) };
            }
        "#;
        let out = eval(src).unwrap();
        assert_eq!(out["total"], 12);
        assert_eq!(out["sorted"], serde_json::json!([1, 2, 3]));
        assert_eq!(out["squares"], serde_json::json!([1, 4, 9]));
        assert_eq!(out["sum"], 13);
        assert_eq!(out["desc"], serde_json::json!([3, 2, 1]));
    }

    #[test]
    fn missing_property_is_a_runtime_fault() {
        let err = eval("function calculate(p) { return p.nope }").unwrap_err();
        assert_eq!(err.kind, FaultKind::Runtime);
        assert!(err.message.contains("nope"), "{}", err.message);
    }

    #[test]
    fn division_by_zero_faults() {
        let err = eval("function calculate() { return 1 / 0 }").unwrap_err();
        assert_eq!(err.kind, FaultKind::Runtime);
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn const_reassignment_faults() {
        let err = eval("function calculate() { const a = 1; a = 2; return a }").unwrap_err();
        assert!(err.message.contains("constant"));
    }

    #[test]
    fn range_error_maps_to_invalid_parameter() {
        let err = eval("function calculate() { throw new RangeError('iterations too small') }").unwrap_err();
        assert_eq!(err.kind, FaultKind::InvalidParameter);
        assert_eq!(err.message, "iterations too small");
    }

    #[test]
    fn infinite_loop_hits_step_limit() {
        let mut b = budget();
        b.max_steps = 10_000;
        let err = eval_with("function calculate() { while (true) {} }", serde_json::json!({}), b).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceExceeded);
    }

    #[test]
    fn runaway_recursion_hits_depth_limit() {
        let err = eval("function calculate() { return calculate() }").unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceExceeded);
        assert!(err.message.contains("call depth"));
        assert!(!err.trace.is_empty());
    }

    #[test]
    fn cancel_flag_stops_run() {
        let b = budget();
        b.cancel.store(true, Ordering::Relaxed);
        let err = eval_with("function calculate() { return 1 }", serde_json::json!({}), b).unwrap_err();
        assert_eq!(err.kind, FaultKind::Cancelled);
    }

    #[test]
    fn allocation_limit_is_enforced() {
        let mut b = budget();
        b.max_allocations = 500;
        let src = "function calculate() { const xs = []; for (let i = 0; i < 10000; i++) { xs.push(i) } return xs.length }";
        let err = eval_with(src, serde_json::json!({}), b).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceExceeded);
        assert!(err.message.contains("allocation"));
    }

    #[test]
    fn undefined_result_is_rejected() {
        let err = eval("function calculate() { }").unwrap_err();
        assert!(err.message.contains("undefined"));
    }

    #[test]
    fn self_referencing_result_is_rejected_not_overflowed() {
        let err = eval("function calculate() { const o = { a: 1 }; o.self = o; return o }").unwrap_err();
        assert_eq!(err.kind, FaultKind::Runtime);
    }
}
