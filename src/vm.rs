// File: src/vm.rs
//
// Virtual machine for executing SandJS bytecode.
// Stack-based VM with an operand stack and a call-frame stack. Holds the
// globals map across executions, enforces the instruction watchdog, and
// implements the closure capture rules.

use crate::builtins;
use crate::bytecode::{OpCode, Program};
use crate::compiler::Compiler;
use crate::errors::SandError;
use crate::lexer::tokenize;
use crate::parser::Parser;
use crate::value::{next_closure_id, Closure, UserFunction, Value};
use ahash::AHashMap;
use colored::Colorize;
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

/// Default instruction budget before the watchdog aborts execution
pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 200_000;

/// Force verbose tracing regardless of the configured debug level
static TRACE_FORCED: Lazy<bool> = Lazy::new(|| std::env::var("SANDJS_TRACE").is_ok());

/// Host bindings merged into globals before a run
pub type Context = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Off,
    Basic,
    Detail,
    Verbose,
}

/// Per-execution overrides
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub max_instructions: Option<u64>,
}

/// Snapshot of the VM's persistent state
#[derive(Debug, Clone)]
pub struct VmState {
    pub initialized: bool,
    pub global_names: Vec<String>,
    pub call_depth: usize,
}

/// Call frame for script function invocations
struct CallFrame {
    /// pc to resume at after Return
    return_pc: usize,
    /// Parameters, `this`, `arguments`, imported built-ins, declared vars
    locals: IndexMap<String, Value>,
    is_constructor: bool,
    /// Pre-allocated receiver for constructor calls, else undefined
    new_instance: Value,
    /// The function being executed (provides its closure)
    function: Arc<UserFunction>,
}

pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: AHashMap<String, Value>,
    /// Names seeded by the built-in table; excluded from closure capture
    /// and survived by reset
    builtin_names: IndexSet<String>,
    initialized: bool,
    max_instructions: u64,
    debug: DebugLevel,
    debug_symbols: bool,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: AHashMap::new(),
            builtin_names: IndexSet::new(),
            initialized: false,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            debug: DebugLevel::Off,
            debug_symbols: true,
        }
    }

    // === Host API ===

    /// Parse, compile and execute source text
    pub fn run(&mut self, source: &str) -> Result<Value, SandError> {
        self.run_with(source, Context::new())
    }

    /// Parse, compile and execute with host bindings merged into globals
    pub fn run_with(&mut self, source: &str, context: Context) -> Result<Value, SandError> {
        let program = self.compile(source)?;
        self.execute_with(&program, context, ExecOptions::default())
    }

    /// Compile source text to a program without executing it
    pub fn compile(&self, source: &str) -> Result<Program, SandError> {
        let tokens = tokenize(source)?;
        let ast = Parser::new(tokens).parse_program()?;
        Compiler::new(source, self.debug_symbols).compile(&ast)
    }

    pub fn execute(&mut self, program: &Program) -> Result<Value, SandError> {
        self.execute_with(program, Context::new(), ExecOptions::default())
    }

    /// Execute a compiled program. Globals persist across calls on the
    /// same instance; built-ins are seeded on the first one.
    pub fn execute_with(
        &mut self,
        program: &Program,
        context: Context,
        options: ExecOptions,
    ) -> Result<Value, SandError> {
        self.ensure_initialized();
        for (name, value) in context {
            self.globals.insert(name, value);
        }
        let budget = options.max_instructions.unwrap_or(self.max_instructions);
        self.exec(program, budget)
    }

    /// Clear all globals and reinitialize the built-in table
    pub fn reset(&mut self) {
        self.globals.clear();
        self.builtin_names.clear();
        self.stack.clear();
        self.frames.clear();
        self.initialized = false;
        self.ensure_initialized();
    }

    pub fn set_max_instructions(&mut self, n: u64) {
        self.max_instructions = n;
    }

    pub fn enable_debug(&mut self, level: DebugLevel) {
        self.debug = level;
    }

    pub fn disable_debug(&mut self) {
        self.debug = DebugLevel::Off;
    }

    /// Whether compiled programs carry a pc -> source mapping
    pub fn set_debug_symbols(&mut self, enabled: bool) {
        self.debug_symbols = enabled;
    }

    pub fn state(&self) -> VmState {
        let mut global_names: Vec<String> = self.globals.keys().cloned().collect();
        global_names.sort();
        VmState {
            initialized: self.initialized,
            global_names,
            call_depth: self.frames.len(),
        }
    }

    fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }
        for (name, value) in builtins::defaults() {
            self.builtin_names.insert(name.clone());
            self.globals.insert(name, value);
        }
        self.initialized = true;
    }

    // === Dispatch loop ===

    fn exec(&mut self, program: &Program, budget: u64) -> Result<Value, SandError> {
        self.stack.clear();
        self.frames.clear();

        let trace = self.debug >= DebugLevel::Verbose || *TRACE_FORCED;
        let mut pc = 0usize;
        let mut counter = 0u64;

        while pc < program.code.len() {
            counter += 1;
            if counter > budget {
                return Err(SandError::budget(budget));
            }

            let op = &program.code[pc];
            if trace {
                eprintln!(
                    "{}",
                    format!(
                        "[{:>5}] {:<12} stack={} frames={}",
                        pc,
                        op.name(),
                        self.stack.len(),
                        self.frames.len()
                    )
                    .dimmed()
                );
            }
            let depth_before = self.stack.len();

            let mut next_pc = pc + 1;
            match op {
                OpCode::PushConst(k) => {
                    let value = self
                        .const_at(program, *k)
                        .map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(value);
                }

                OpCode::Pop => {
                    self.pop().map_err(|e| self.fail(program, pc, e))?;
                }

                OpCode::Dup => {
                    let top = self
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| self.fail(program, pc, stack_underflow()))?;
                    self.stack.push(top);
                }

                OpCode::Add => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    let result = if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
                        Value::string(format!("{}{}", a.coerce_string(), b.coerce_string()))
                    } else {
                        Value::Number(a.to_number() + b.to_number())
                    };
                    self.stack.push(result);
                }

                OpCode::Sub => self.numeric_binop(program, pc, |a, b| a - b)?,
                OpCode::Mul => self.numeric_binop(program, pc, |a, b| a * b)?,
                OpCode::Div => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    // Division by zero is float semantics, but container
                    // and function operands are a tag error
                    for v in [&a, &b] {
                        if matches!(
                            v,
                            Value::Array(_)
                                | Value::Object(_)
                                | Value::Regex(_)
                                | Value::Native(_)
                                | Value::Function(_)
                        ) {
                            return Err(self.fail(
                                program,
                                pc,
                                SandError::runtime(format!(
                                    "cannot divide with a {} operand",
                                    v.type_of()
                                )),
                            ));
                        }
                    }
                    self.stack.push(Value::Number(a.to_number() / b.to_number()));
                }
                OpCode::Mod => self.numeric_binop(program, pc, |a, b| a % b)?,

                OpCode::Neg => {
                    let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(Value::Number(-v.to_number()));
                }

                OpCode::Shl => self.int_binop(program, pc, |a, b| a << (b & 31))?,
                OpCode::Shr => self.int_binop(program, pc, |a, b| a >> (b & 31))?,
                OpCode::UShr => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    let shifted = a.to_uint32() >> (b.to_uint32() & 31);
                    self.stack.push(Value::Number(shifted as f64));
                }
                OpCode::BitAnd => self.int_binop(program, pc, |a, b| a & b)?,
                OpCode::BitOr => self.int_binop(program, pc, |a, b| a | b)?,
                OpCode::BitXor => self.int_binop(program, pc, |a, b| a ^ b)?,

                OpCode::BitNot => {
                    let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(Value::Number(!v.to_int32() as f64));
                }

                OpCode::Eq => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(Value::Bool(a.strict_eq(&b)));
                }
                OpCode::Ne => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(Value::Bool(!a.strict_eq(&b)));
                }
                OpCode::Lt => self.compare(program, pc, |o| o == std::cmp::Ordering::Less)?,
                OpCode::Le => self.compare(program, pc, |o| o != std::cmp::Ordering::Greater)?,
                OpCode::Gt => self.compare(program, pc, |o| o == std::cmp::Ordering::Greater)?,
                OpCode::Ge => self.compare(program, pc, |o| o != std::cmp::Ordering::Less)?,

                OpCode::And => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(if a.is_truthy() { b } else { a });
                }
                OpCode::Or => {
                    let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(if a.is_truthy() { a } else { b });
                }
                OpCode::Not => {
                    let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::TypeOf => {
                    let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(Value::string(v.type_of()));
                }

                OpCode::LoadVar(k) => {
                    let name = self.name_at(program, *k).map_err(|e| self.fail(program, pc, e))?;
                    let value =
                        self.load_name(&name).map_err(|e| self.fail(program, pc, e))?;
                    self.stack.push(value);
                }

                OpCode::StoreVar(k) => {
                    let name = self.name_at(program, *k).map_err(|e| self.fail(program, pc, e))?;
                    let value = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    self.store_name(&name, value);
                }

                OpCode::DeclareVar(k) => {
                    let name = self.name_at(program, *k).map_err(|e| self.fail(program, pc, e))?;
                    let value = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    if let Value::Function(f) = &value {
                        self.capture_on_declare(f);
                    }
                    match self.frames.last_mut() {
                        Some(frame) => {
                            frame.locals.insert(name, value);
                        }
                        None => {
                            self.globals.insert(name, value);
                        }
                    }
                }

                OpCode::Jump(target) => {
                    next_pc = *target;
                }
                OpCode::JumpIfTrue(target) => {
                    let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    if v.is_truthy() {
                        next_pc = *target;
                    }
                }
                OpCode::JumpIfFalse(target) => {
                    let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    if !v.is_truthy() {
                        next_pc = *target;
                    }
                }

                OpCode::Call(k) => {
                    let argc = self.argc_at(program, *k).map_err(|e| self.fail(program, pc, e))?;
                    let callee = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let args = self.pop_args(argc).map_err(|e| self.fail(program, pc, e))?;
                    let receiver = self.global_this();
                    if let Some(entry) = self
                        .invoke(callee, args, receiver, pc, false, Value::Undefined)
                        .map_err(|e| self.fail(program, pc, e))?
                    {
                        next_pc = entry;
                    }
                }

                OpCode::CallMethod(k) => {
                    let argc = self.argc_at(program, *k).map_err(|e| self.fail(program, pc, e))?;
                    let callee = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let receiver = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let args = self.pop_args(argc).map_err(|e| self.fail(program, pc, e))?;
                    if let Some(entry) = self
                        .invoke(callee, args, receiver, pc, false, Value::Undefined)
                        .map_err(|e| self.fail(program, pc, e))?
                    {
                        next_pc = entry;
                    }
                }

                OpCode::New(k) => {
                    let argc = self.argc_at(program, *k).map_err(|e| self.fail(program, pc, e))?;
                    let callee = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let args = self.pop_args(argc).map_err(|e| self.fail(program, pc, e))?;
                    match callee {
                        // Host constructors dispatch straight to the native
                        Value::Native(f) => {
                            let result = f
                                .call(&args, &Value::Undefined)
                                .map_err(|msg| self.fail(program, pc, SandError::runtime(msg)))?;
                            self.stack.push(result);
                        }
                        Value::Function(f) => {
                            let instance = Value::empty_object();
                            if let Some(entry) = self
                                .invoke(
                                    Value::Function(f),
                                    args,
                                    instance.clone(),
                                    pc,
                                    true,
                                    instance,
                                )
                                .map_err(|e| self.fail(program, pc, e))?
                            {
                                next_pc = entry;
                            }
                        }
                        other => {
                            return Err(self.fail(
                                program,
                                pc,
                                SandError::runtime(format!(
                                    "'{}' is not a constructor",
                                    other.type_of()
                                )),
                            ));
                        }
                    }
                }

                OpCode::Return => {
                    let value = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let frame = self.frames.pop().ok_or_else(|| {
                        self.fail(program, pc, SandError::runtime("return outside a call"))
                    })?;
                    if self.debug >= DebugLevel::Detail {
                        eprintln!(
                            "{}",
                            format!(
                                "[ret ] {} -> depth {}",
                                frame.function.name.as_deref().unwrap_or("<anonymous>"),
                                self.frames.len()
                            )
                            .dimmed()
                        );
                    }
                    let result = if frame.is_constructor {
                        match value {
                            v @ (Value::Object(_) | Value::Array(_)) => v,
                            _ => frame.new_instance.clone(),
                        }
                    } else {
                        self.capture_on_return(value, &frame)
                    };
                    self.stack.push(result);
                    next_pc = frame.return_pc;
                }

                OpCode::NewObject => {
                    let count = self.pop_count(program, pc)?;
                    let mut pairs = Vec::with_capacity(count);
                    for _ in 0..count {
                        let key = self.pop().map_err(|e| self.fail(program, pc, e))?;
                        let value = self.pop().map_err(|e| self.fail(program, pc, e))?;
                        pairs.push((key.coerce_string(), value));
                    }
                    let mut map = IndexMap::with_capacity(count);
                    for (key, value) in pairs.into_iter().rev() {
                        map.insert(key, value);
                    }
                    self.stack.push(Value::object(map));
                }

                OpCode::NewArray => {
                    let count = self.pop_count(program, pc)?;
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(self.pop().map_err(|e| self.fail(program, pc, e))?);
                    }
                    items.reverse();
                    self.stack.push(Value::array(items));
                }

                OpCode::GetProp | OpCode::GetElem => {
                    let key = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let receiver = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let value = builtins::get_property(&receiver, &key)
                        .map_err(|msg| self.fail(program, pc, SandError::runtime(msg)))?;
                    self.stack.push(value);
                }

                OpCode::SetProp | OpCode::SetElem => {
                    let value = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let key = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    let receiver = self.pop().map_err(|e| self.fail(program, pc, e))?;
                    builtins::set_property(&receiver, &key, value.clone())
                        .map_err(|msg| self.fail(program, pc, SandError::runtime(msg)))?;
                    self.stack.push(value);
                }

                OpCode::Halt => break,
                OpCode::Nop => {}
            }

            if trace {
                if let Some((inputs, outputs)) = op.fixed_stack_effect() {
                    let expected = depth_before + outputs - inputs.min(depth_before);
                    if self.stack.len() != expected {
                        eprintln!(
                            "{}",
                            format!(
                                "[warn] {} at pc {}: stack depth {} (expected {})",
                                op.name(),
                                pc,
                                self.stack.len(),
                                expected
                            )
                            .yellow()
                        );
                    }
                }
            }

            pc = next_pc;
        }

        if self.debug >= DebugLevel::Basic {
            eprintln!(
                "{}",
                format!("[done] {} instructions, stack depth {}", counter, self.stack.len())
                    .dimmed()
            );
        }

        Ok(self.stack.pop().unwrap_or(Value::Undefined))
    }

    // === Stack helpers ===

    fn pop(&mut self) -> Result<Value, SandError> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    fn pop2(&mut self) -> Result<(Value, Value), SandError> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn pop_args(&mut self, argc: usize) -> Result<Vec<Value>, SandError> {
        if argc > self.stack.len() {
            return Err(SandError::runtime(format!(
                "argument count {} exceeds stack depth {}",
                argc,
                self.stack.len()
            )));
        }
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        Ok(args)
    }

    fn pop_count(&mut self, program: &Program, pc: usize) -> Result<usize, SandError> {
        let v = self.pop().map_err(|e| self.fail(program, pc, e))?;
        let n = v.to_number();
        if !n.is_finite() || n < 0.0 {
            return Err(self.fail(
                program,
                pc,
                SandError::runtime(format!("invalid element count {}", v.coerce_string())),
            ));
        }
        Ok(n as usize)
    }

    fn numeric_binop(
        &mut self,
        program: &Program,
        pc: usize,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<(), SandError> {
        let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
        self.stack.push(Value::Number(f(a.to_number(), b.to_number())));
        Ok(())
    }

    fn int_binop(
        &mut self,
        program: &Program,
        pc: usize,
        f: impl Fn(i32, i32) -> i32,
    ) -> Result<(), SandError> {
        let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
        self.stack.push(Value::Number(f(a.to_int32(), b.to_int32()) as f64));
        Ok(())
    }

    fn compare(
        &mut self,
        program: &Program,
        pc: usize,
        f: impl Fn(std::cmp::Ordering) -> bool,
    ) -> Result<(), SandError> {
        let (a, b) = self.pop2().map_err(|e| self.fail(program, pc, e))?;
        let ordering = match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            _ => a.to_number().partial_cmp(&b.to_number()),
        };
        // NaN compares false against everything
        self.stack.push(Value::Bool(ordering.map(&f).unwrap_or(false)));
        Ok(())
    }

    // === Constant helpers ===

    fn const_at(&self, program: &Program, index: usize) -> Result<Value, SandError> {
        program
            .constants
            .get(index)
            .cloned()
            .ok_or_else(|| SandError::runtime(format!("constant index {} out of range", index)))
    }

    fn name_at(&self, program: &Program, index: usize) -> Result<String, SandError> {
        match program.constants.get(index) {
            Some(Value::Str(s)) => Ok(s.as_ref().clone()),
            Some(other) => Err(SandError::runtime(format!(
                "constant {} is not a name: {}",
                index,
                other.coerce_string()
            ))),
            None => Err(SandError::runtime(format!("constant index {} out of range", index))),
        }
    }

    fn argc_at(&self, program: &Program, index: usize) -> Result<usize, SandError> {
        match program.constants.get(index) {
            Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
            Some(other) => Err(SandError::runtime(format!(
                "constant {} is not an argument count: {}",
                index,
                other.coerce_string()
            ))),
            None => Err(SandError::runtime(format!("constant index {} out of range", index))),
        }
    }

    // === Name resolution ===

    fn global_this(&self) -> Value {
        self.globals.get("this").cloned().unwrap_or(Value::Undefined)
    }

    /// Lookup order: current function's closure, enclosing frame locals
    /// from innermost out, globals, then the global receiver's properties
    fn load_name(&self, name: &str) -> Result<Value, SandError> {
        if let Some(frame) = self.frames.last() {
            let closure = frame.function.closure.lock().unwrap();
            if let Some(v) = closure.vars.get(name) {
                return Ok(v.clone());
            }
        }
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.locals.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Value::Object(map) = self.global_this() {
            if let Some(v) = map.lock().unwrap().get(name) {
                return Ok(v.clone());
            }
        }

        let mut known: Vec<String> = self.globals.keys().cloned().collect();
        for frame in &self.frames {
            known.extend(frame.locals.keys().cloned());
        }
        Err(SandError::undefined_variable(name, &known))
    }

    /// Assignment order: the current function's closure first, then the
    /// first enclosing frame holding the name, then globals
    fn store_name(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last() {
            let mut closure = frame.function.closure.lock().unwrap();
            if closure.vars.contains_key(name) {
                closure.vars.insert(name.to_string(), value);
                return;
            }
        }
        for frame in self.frames.iter_mut().rev() {
            if frame.locals.contains_key(name) {
                frame.locals.insert(name.to_string(), value);
                return;
            }
        }
        self.globals.insert(name.to_string(), value);
    }

    // === Closure capture ===

    /// Capture-on-declare: snapshot the enclosing frame chain and the
    /// non-built-in globals into the function's closure, unless it
    /// already owns an independent one. Supports sibling references
    /// within a defining scope.
    fn capture_on_declare(&self, function: &Arc<UserFunction>) {
        let mut closure = function.closure.lock().unwrap();
        if closure.independent {
            return;
        }
        closure.vars.clear();
        for frame in self.frames.iter().rev() {
            for (name, value) in frame.locals.iter() {
                if name == "this" || name == "arguments" {
                    continue;
                }
                if self.builtin_names.contains(name) {
                    continue;
                }
                closure.vars.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        for (name, value) in self.globals.iter() {
            if name == "this" || self.builtin_names.contains(name) {
                continue;
            }
            closure.vars.entry(name.clone()).or_insert_with(|| value.clone());
        }
        closure.id = next_closure_id();
    }

    /// Capture-on-return: a returned function becomes a fresh instance
    /// with its own closure, populated from the returning frame's locals
    /// by shallow copy. Parameters of the returned function, `this`,
    /// `arguments`, built-ins and function-valued bindings are skipped.
    fn capture_on_return(&self, value: Value, frame: &CallFrame) -> Value {
        let function = match value {
            Value::Function(f) => f,
            other => return other,
        };

        let mut vars = AHashMap::new();
        {
            // Start from the template closure so names captured at
            // declare time (outer scopes) survive the copy
            let template = function.closure.lock().unwrap();
            for (name, v) in template.vars.iter() {
                if function.params.iter().any(|p| p == name) {
                    continue;
                }
                vars.insert(name.clone(), v.shallow_clone());
            }
        }
        for (name, v) in frame.locals.iter() {
            if name == "this" || name == "arguments" {
                continue;
            }
            if function.params.iter().any(|p| p == name) {
                continue;
            }
            if self.builtin_names.contains(name) {
                continue;
            }
            // Functions stay addressable through their own bindings;
            // only data values need per-instance copies
            if matches!(v, Value::Native(_) | Value::Function(_)) {
                continue;
            }
            vars.insert(name.clone(), v.shallow_clone());
        }

        let fresh = UserFunction {
            name: function.name.clone(),
            params: function.params.clone(),
            entry_pc: function.entry_pc,
            closure: Mutex::new(Closure {
                id: next_closure_id(),
                independent: true,
                vars,
            }),
        };
        Value::Function(Arc::new(fresh))
    }

    // === Calls ===

    /// Dispatch a call. Native callees push their result and return None;
    /// script callees push a frame and return the entry pc.
    fn invoke(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        receiver: Value,
        pc: usize,
        is_constructor: bool,
        new_instance: Value,
    ) -> Result<Option<usize>, SandError> {
        match callee {
            Value::Native(f) => {
                let result = f.call(&args, &receiver).map_err(SandError::runtime)?;
                self.stack.push(result);
                Ok(None)
            }
            Value::Function(f) => {
                if self.debug >= DebugLevel::Detail {
                    eprintln!(
                        "{}",
                        format!(
                            "[call] {}({}) depth {}",
                            f.name.as_deref().unwrap_or("<anonymous>"),
                            args.len(),
                            self.frames.len() + 1
                        )
                        .dimmed()
                    );
                }
                let mut locals = IndexMap::new();
                // Built-in globals are imported as locals so direct
                // identifier lookup inside the body hits them
                for name in &self.builtin_names {
                    if let Some(v) = self.globals.get(name) {
                        locals.insert(name.clone(), v.clone());
                    }
                }
                for (i, param) in f.params.iter().enumerate() {
                    locals.insert(
                        param.clone(),
                        args.get(i).cloned().unwrap_or(Value::Undefined),
                    );
                }
                locals.insert("this".to_string(), receiver);
                locals.insert("arguments".to_string(), Value::array(args));

                let entry = f.entry_pc;
                self.frames.push(CallFrame {
                    return_pc: pc + 1,
                    locals,
                    is_constructor,
                    new_instance,
                    function: f,
                });
                Ok(Some(entry))
            }
            other => Err(SandError::runtime(format!(
                "'{}' is not callable",
                other.coerce_string()
            ))),
        }
    }

    // === Error context ===

    fn fail(&self, program: &Program, pc: usize, err: SandError) -> SandError {
        if err.is_budget() || err.pc.is_some() {
            return err;
        }
        let mut err = err.with_pc(pc, program.code[pc].name().to_string());
        if let Some(info) = program.debug_for(pc) {
            err = err.at(crate::errors::SourceLocation::new(info.line, info.column));
            if let Some(text) = &info.source_text {
                err = err.with_source(text.clone());
            }
        }
        err
    }
}

fn stack_underflow() -> SandError {
    SandError::runtime("operand stack underflow")
}
