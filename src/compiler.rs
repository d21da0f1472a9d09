// File: src/compiler.rs
//
// Bytecode compiler for the SandJS engine.
// Lowers the AST into stack-machine instructions with forward-patched
// jumps. Expressions leave exactly one value on the stack; statements
// leave none (except the final top-level expression statement, whose
// value becomes the program result).

use crate::ast::*;
use crate::bytecode::{DebugInfo, OpCode, Program};
use crate::errors::{SandError, SourceLocation};
use crate::value::{RegexValue, UserFunction, Value};
use std::sync::Arc;

/// Pending break/continue jumps for an enclosing loop or switch.
/// `break` patches into the innermost entry of either kind, so a switch
/// nested in a loop owns the breaks inside it; `continue` skips switch
/// entries.
enum FlowContext {
    Loop { breaks: Vec<usize>, continues: Vec<usize> },
    Switch { breaks: Vec<usize> },
}

pub struct Compiler {
    program: Program,
    flow: Vec<FlowContext>,
    /// Lexical scope stack of declared names (not values)
    scopes: Vec<Vec<String>>,
    function_depth: usize,
    /// Counter for hidden locals minted by desugaring
    hidden_counter: usize,
    debug_symbols: bool,
    source_lines: Vec<String>,
    /// Location of the node currently being lowered
    cur_loc: SourceLocation,
}

impl Compiler {
    pub fn new(source: &str, debug_symbols: bool) -> Self {
        Self {
            program: Program::new(),
            flow: Vec::new(),
            scopes: vec![Vec::new()],
            function_depth: 0,
            hidden_counter: 0,
            debug_symbols,
            source_lines: if debug_symbols {
                source.lines().map(|l| l.to_string()).collect()
            } else {
                Vec::new()
            },
            cur_loc: SourceLocation::unknown(),
        }
    }

    pub fn compile(mut self, ast: &AstProgram) -> Result<Program, SandError> {
        let last = ast.body.len().saturating_sub(1);
        for (i, stmt) in ast.body.iter().enumerate() {
            // The final top-level expression statement keeps its value on
            // the stack so it survives as the program result
            if i == last {
                if let StmtKind::Expression(expr) = &stmt.kind {
                    self.cur_loc = stmt.loc.clone();
                    self.compile_expr(expr)?;
                    continue;
                }
            }
            self.compile_stmt(stmt)?;
        }
        self.emit(OpCode::Halt);
        Ok(self.program)
    }

    // === Emission helpers ===

    fn emit(&mut self, op: OpCode) -> usize {
        let pc = self.program.emit(op);
        if self.debug_symbols && self.cur_loc.line > 0 {
            let source_text = self
                .source_lines
                .get(self.cur_loc.line - 1)
                .map(|l| l.trim_end().to_string());
            self.program.record_debug(
                pc,
                DebugInfo {
                    line: self.cur_loc.line,
                    column: self.cur_loc.column,
                    source_text,
                },
            );
        }
        pc
    }

    fn kconst(&mut self, value: Value) -> usize {
        self.program.constants.add(value)
    }

    fn kname(&mut self, name: &str) -> usize {
        self.program.constants.add(Value::string(name))
    }

    fn emit_push_number(&mut self, n: f64) {
        let idx = self.kconst(Value::Number(n));
        self.emit(OpCode::PushConst(idx));
    }

    fn emit_push_undefined(&mut self) {
        let idx = self.kconst(Value::Undefined);
        self.emit(OpCode::PushConst(idx));
    }

    fn emit_argc(&mut self, n: usize) -> usize {
        self.kconst(Value::Number(n as f64))
    }

    fn declare_name(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn err(&self, message: impl Into<String>) -> SandError {
        SandError::compile(message).at(self.cur_loc.clone())
    }

    // === Statements ===

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), SandError> {
        self.cur_loc = stmt.loc.clone();

        match &stmt.kind {
            StmtKind::Empty => Ok(()),

            StmtKind::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop);
                Ok(())
            }

            StmtKind::VarDecl { declarations, .. } => {
                for decl in declarations {
                    match &decl.init {
                        Some(init) => self.compile_expr(init)?,
                        None => self.emit_push_undefined(),
                    }
                    let name_idx = self.kname(&decl.name);
                    self.emit(OpCode::DeclareVar(name_idx));
                    self.declare_name(&decl.name);
                }
                Ok(())
            }

            StmtKind::FunctionDecl { name, params, body } => {
                self.compile_function(Some(name.clone()), params, body)?;
                let name_idx = self.kname(name);
                self.emit(OpCode::DeclareVar(name_idx));
                self.declare_name(name);
                Ok(())
            }

            StmtKind::Block(body) => {
                for stmt in body {
                    self.compile_stmt(stmt)?;
                }
                Ok(())
            }

            StmtKind::If { test, consequent, alternate } => {
                self.compile_expr(test)?;
                let else_jump = self.emit(OpCode::JumpIfFalse(0));
                self.compile_stmt(consequent)?;
                if let Some(alternate) = alternate {
                    let end_jump = self.emit(OpCode::Jump(0));
                    self.program.patch_jump_here(else_jump);
                    self.compile_stmt(alternate)?;
                    self.program.patch_jump_here(end_jump);
                } else {
                    self.program.patch_jump_here(else_jump);
                }
                Ok(())
            }

            StmtKind::While { test, body } => {
                let loop_start = self.program.len();
                self.compile_expr(test)?;
                let exit_jump = self.emit(OpCode::JumpIfFalse(0));

                self.flow.push(FlowContext::Loop { breaks: Vec::new(), continues: Vec::new() });
                self.compile_stmt(body)?;
                self.emit(OpCode::Jump(loop_start));

                self.program.patch_jump_here(exit_jump);
                self.finish_loop(loop_start);
                Ok(())
            }

            StmtKind::DoWhile { body, test } => {
                let body_start = self.program.len();
                self.flow.push(FlowContext::Loop { breaks: Vec::new(), continues: Vec::new() });
                self.compile_stmt(body)?;

                let continue_point = self.program.len();
                self.compile_expr(test)?;
                self.emit(OpCode::JumpIfTrue(body_start));
                self.finish_loop(continue_point);
                Ok(())
            }

            StmtKind::For { init, test, update, body } => {
                match init {
                    Some(ForInit::Decl { kind, declarations }) => {
                        self.compile_stmt(&Stmt {
                            kind: StmtKind::VarDecl {
                                kind: *kind,
                                declarations: declarations.clone(),
                            },
                            loc: stmt.loc.clone(),
                        })?;
                    }
                    Some(ForInit::Expr(expr)) => {
                        self.compile_expr(expr)?;
                        self.emit(OpCode::Pop);
                    }
                    None => {}
                }

                let loop_start = self.program.len();
                let exit_jump = match test {
                    Some(test) => {
                        self.compile_expr(test)?;
                        Some(self.emit(OpCode::JumpIfFalse(0)))
                    }
                    None => None,
                };

                self.flow.push(FlowContext::Loop { breaks: Vec::new(), continues: Vec::new() });
                self.compile_stmt(body)?;

                let continue_point = self.program.len();
                if let Some(update) = update {
                    self.compile_expr(update)?;
                    self.emit(OpCode::Pop);
                }
                self.emit(OpCode::Jump(loop_start));

                if let Some(exit_jump) = exit_jump {
                    self.program.patch_jump_here(exit_jump);
                }
                self.finish_loop(continue_point);
                Ok(())
            }

            StmtKind::ForIn { left, right, body } => self.compile_for_in(left, right, body),

            StmtKind::Switch { discriminant, cases } => {
                self.compile_switch(discriminant, cases)
            }

            StmtKind::Break => {
                let jump = self.emit(OpCode::Jump(0));
                match self.flow.last_mut() {
                    Some(FlowContext::Loop { breaks, .. })
                    | Some(FlowContext::Switch { breaks }) => {
                        breaks.push(jump);
                        Ok(())
                    }
                    None => Err(self.err("'break' outside of a loop or switch")),
                }
            }

            StmtKind::Continue => {
                let jump = self.emit(OpCode::Jump(0));
                for ctx in self.flow.iter_mut().rev() {
                    if let FlowContext::Loop { continues, .. } = ctx {
                        continues.push(jump);
                        return Ok(());
                    }
                }
                Err(self.err("'continue' outside of a loop"))
            }

            StmtKind::Return(arg) => {
                if self.function_depth == 0 {
                    return Err(self.err("'return' outside of a function"));
                }
                match arg {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_push_undefined(),
                }
                self.emit(OpCode::Return);
                Ok(())
            }

            StmtKind::Throw(arg) => {
                // Raised through the hidden helper; the call never returns
                self.compile_expr(arg)?;
                let callee_idx = self.kname("__throw");
                self.emit(OpCode::LoadVar(callee_idx));
                let argc = self.emit_argc(1);
                self.emit(OpCode::Call(argc));
                self.emit(OpCode::Pop);
                Ok(())
            }

            StmtKind::Try { block, handler: _, finalizer } => {
                // Accepted but not unwound: the try body runs inline and
                // the catch block is dropped; the finalizer always runs
                for stmt in block {
                    self.compile_stmt(stmt)?;
                }
                if let Some(finalizer) = finalizer {
                    for stmt in finalizer {
                        self.compile_stmt(stmt)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Pop the innermost loop context, patching breaks to the next pc
    /// and continues to the given target
    fn finish_loop(&mut self, continue_target: usize) {
        if let Some(FlowContext::Loop { breaks, continues }) = self.flow.pop() {
            for jump in breaks {
                self.program.patch_jump_here(jump);
            }
            for jump in continues {
                self.program.set_jump_target(jump, continue_target);
            }
        }
    }

    fn compile_for_in(
        &mut self,
        left: &ForInTarget,
        right: &Expr,
        body: &Stmt,
    ) -> Result<(), SandError> {
        self.hidden_counter += 1;
        let keys_name = format!("__forin_keys_{}", self.hidden_counter);
        let idx_name = format!("__forin_idx_{}", self.hidden_counter);
        let len_name = format!("__forin_len_{}", self.hidden_counter);

        // keys = __object_keys(iteree)
        self.compile_expr(right)?;
        let helper_idx = self.kname("__object_keys");
        self.emit(OpCode::LoadVar(helper_idx));
        let argc = self.emit_argc(1);
        self.emit(OpCode::Call(argc));
        let keys_idx = self.kname(&keys_name);
        self.emit(OpCode::DeclareVar(keys_idx));

        // idx = 0; len = keys.length
        self.emit_push_number(0.0);
        let idx_idx = self.kname(&idx_name);
        self.emit(OpCode::DeclareVar(idx_idx));
        self.emit(OpCode::LoadVar(keys_idx));
        let length_idx = self.kname("length");
        self.emit(OpCode::PushConst(length_idx));
        self.emit(OpCode::GetProp);
        let len_idx = self.kname(&len_name);
        self.emit(OpCode::DeclareVar(len_idx));

        // while (idx < len)
        let loop_start = self.program.len();
        self.emit(OpCode::LoadVar(idx_idx));
        self.emit(OpCode::LoadVar(len_idx));
        self.emit(OpCode::Lt);
        let exit_jump = self.emit(OpCode::JumpIfFalse(0));

        // loopvar = keys[idx]
        self.emit(OpCode::LoadVar(keys_idx));
        self.emit(OpCode::LoadVar(idx_idx));
        self.emit(OpCode::GetElem);
        match left {
            ForInTarget::Decl(name) => {
                let name_idx = self.kname(name);
                self.emit(OpCode::DeclareVar(name_idx));
                self.declare_name(name);
            }
            ForInTarget::Ident(name) => {
                let name_idx = self.kname(name);
                self.emit(OpCode::StoreVar(name_idx));
            }
        }

        self.flow.push(FlowContext::Loop { breaks: Vec::new(), continues: Vec::new() });
        self.compile_stmt(body)?;

        // idx = idx + 1
        let continue_point = self.program.len();
        self.emit(OpCode::LoadVar(idx_idx));
        self.emit_push_number(1.0);
        self.emit(OpCode::Add);
        self.emit(OpCode::StoreVar(idx_idx));
        self.emit(OpCode::Jump(loop_start));

        self.program.patch_jump_here(exit_jump);
        self.finish_loop(continue_point);
        Ok(())
    }

    fn compile_switch(
        &mut self,
        discriminant: &Expr,
        cases: &[SwitchCase],
    ) -> Result<(), SandError> {
        self.compile_expr(discriminant)?;
        self.flow.push(FlowContext::Switch { breaks: Vec::new() });

        // Dispatch ladder: strict-compare against each case test, jump
        // to its body on a match
        let mut body_jumps: Vec<Option<usize>> = Vec::with_capacity(cases.len());
        for case in cases {
            match &case.test {
                Some(test) => {
                    self.emit(OpCode::Dup);
                    self.compile_expr(test)?;
                    self.emit(OpCode::Eq);
                    let no_match = self.emit(OpCode::JumpIfFalse(0));
                    self.emit(OpCode::Pop); // discard the discriminant
                    let to_body = self.emit(OpCode::Jump(0));
                    self.program.patch_jump_here(no_match);
                    body_jumps.push(Some(to_body));
                }
                None => body_jumps.push(None),
            }
        }
        // No case matched: drop the discriminant, go to the default body
        // if there is one, otherwise past the switch
        self.emit(OpCode::Pop);
        let default_jump = self.emit(OpCode::Jump(0));

        // Bodies in source order so fallthrough works naturally
        let mut default_patched = false;
        for (i, case) in cases.iter().enumerate() {
            match body_jumps[i] {
                Some(jump) => self.program.patch_jump_here(jump),
                None => {
                    self.program.patch_jump_here(default_jump);
                    default_patched = true;
                }
            }
            for stmt in &case.body {
                self.compile_stmt(stmt)?;
            }
        }
        if !default_patched {
            self.program.patch_jump_here(default_jump);
        }

        if let Some(FlowContext::Switch { breaks }) = self.flow.pop() {
            for jump in breaks {
                self.program.patch_jump_here(jump);
            }
        }
        Ok(())
    }

    /// Compile a function body inline behind a jump and push the
    /// resulting function value. Declarations bind it afterwards;
    /// expressions leave it on the stack.
    fn compile_function(
        &mut self,
        name: Option<String>,
        params: &[String],
        body: &[Stmt],
    ) -> Result<(), SandError> {
        let over_body = self.emit(OpCode::Jump(0));
        let entry_pc = self.program.len();

        self.scopes.push(Vec::new());
        for param in params {
            if self.scopes.last().is_some_and(|scope| scope.contains(param)) {
                self.scopes.pop();
                return Err(self.err(format!("duplicate parameter name '{}'", param)));
            }
            self.declare_name(param);
        }
        self.function_depth += 1;
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        // Guaranteed return for bodies that fall off the end
        self.emit_push_undefined();
        self.emit(OpCode::Return);
        self.function_depth -= 1;
        self.scopes.pop();

        self.program.patch_jump_here(over_body);

        let function = UserFunction::new(name, params.to_vec(), entry_pc);
        let func_idx = self.kconst(Value::Function(Arc::new(function)));
        self.emit(OpCode::PushConst(func_idx));
        Ok(())
    }

    // === Expressions ===

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), SandError> {
        self.cur_loc = expr.loc.clone();

        match &expr.kind {
            ExprKind::Number(n) => {
                self.emit_push_number(*n);
                Ok(())
            }

            ExprKind::Str(s) => {
                let idx = self.kconst(Value::string(s.clone()));
                self.emit(OpCode::PushConst(idx));
                Ok(())
            }

            ExprKind::Bool(b) => {
                let idx = self.kconst(Value::Bool(*b));
                self.emit(OpCode::PushConst(idx));
                Ok(())
            }

            ExprKind::Null => {
                let idx = self.kconst(Value::Null);
                self.emit(OpCode::PushConst(idx));
                Ok(())
            }

            ExprKind::Template { quasis, expressions } => {
                // Fold left to right: quasi + String(expr) + quasi + ...
                let first = self.kconst(Value::string(quasis[0].clone()));
                self.emit(OpCode::PushConst(first));
                for (i, part) in expressions.iter().enumerate() {
                    self.compile_expr(part)?;
                    let coerce_idx = self.kname("String");
                    self.emit(OpCode::LoadVar(coerce_idx));
                    let argc = self.emit_argc(1);
                    self.emit(OpCode::Call(argc));
                    self.emit(OpCode::Add);
                    let quasi = &quasis[i + 1];
                    if !quasi.is_empty() {
                        let idx = self.kconst(Value::string(quasi.clone()));
                        self.emit(OpCode::PushConst(idx));
                        self.emit(OpCode::Add);
                    }
                }
                Ok(())
            }

            ExprKind::Regex { pattern, flags } => {
                let compiled = RegexValue::compile(pattern, flags)
                    .map_err(|msg| self.err(msg))?;
                let idx = self.kconst(Value::Regex(Arc::new(compiled)));
                self.emit(OpCode::PushConst(idx));
                Ok(())
            }

            ExprKind::Identifier(name) => {
                let idx = self.kname(name);
                self.emit(OpCode::LoadVar(idx));
                Ok(())
            }

            ExprKind::This => {
                let idx = self.kname("this");
                self.emit(OpCode::LoadVar(idx));
                Ok(())
            }

            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binary_opcode(*op));
                Ok(())
            }

            ExprKind::Logical { op, left, right } => {
                // a && b: keep a when falsy, else evaluate b.
                // a || b: keep a when truthy, else evaluate b.
                self.compile_expr(left)?;
                self.emit(OpCode::Dup);
                let short = match op {
                    LogicalOp::And => self.emit(OpCode::JumpIfFalse(0)),
                    LogicalOp::Or => self.emit(OpCode::JumpIfTrue(0)),
                };
                self.emit(OpCode::Pop);
                self.compile_expr(right)?;
                self.program.patch_jump_here(short);
                Ok(())
            }

            ExprKind::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => {
                        self.compile_expr(operand)?;
                        self.emit(OpCode::Neg);
                    }
                    UnaryOp::Pos => {
                        // Numeric coercion via subtraction from zero
                        self.compile_expr(operand)?;
                        self.emit_push_number(0.0);
                        self.emit(OpCode::Sub);
                    }
                    UnaryOp::Not => {
                        self.compile_expr(operand)?;
                        self.emit(OpCode::Not);
                    }
                    UnaryOp::BitNot => {
                        self.compile_expr(operand)?;
                        self.emit(OpCode::BitNot);
                    }
                    UnaryOp::TypeOf => {
                        self.compile_expr(operand)?;
                        self.emit(OpCode::TypeOf);
                    }
                }
                Ok(())
            }

            ExprKind::Update { op, prefix, target } => {
                self.compile_update(*op, *prefix, target)
            }

            ExprKind::Assign { op, target, value } => {
                self.compile_assign(*op, target, value)
            }

            ExprKind::Conditional { test, consequent, alternate } => {
                self.compile_expr(test)?;
                let else_jump = self.emit(OpCode::JumpIfFalse(0));
                self.compile_expr(consequent)?;
                let end_jump = self.emit(OpCode::Jump(0));
                self.program.patch_jump_here(else_jump);
                self.compile_expr(alternate)?;
                self.program.patch_jump_here(end_jump);
                Ok(())
            }

            ExprKind::Sequence(exprs) => {
                let last = exprs.len() - 1;
                for (i, e) in exprs.iter().enumerate() {
                    self.compile_expr(e)?;
                    if i != last {
                        self.emit(OpCode::Pop);
                    }
                }
                Ok(())
            }

            ExprKind::Call { callee, args } => {
                // Arguments push in reverse so they pop in forward order
                for arg in args.iter().rev() {
                    self.compile_expr(arg)?;
                }

                if let ExprKind::Member { object, property, .. } = &callee.kind {
                    // Receiver stays beneath the resolved method
                    self.compile_expr(object)?;
                    self.emit(OpCode::Dup);
                    self.compile_expr(property)?;
                    self.emit(OpCode::GetProp);
                    let argc = self.emit_argc(args.len());
                    self.emit(OpCode::CallMethod(argc));
                } else {
                    self.compile_expr(callee)?;
                    let argc = self.emit_argc(args.len());
                    self.emit(OpCode::Call(argc));
                }
                Ok(())
            }

            ExprKind::New { callee, args } => {
                for arg in args.iter().rev() {
                    self.compile_expr(arg)?;
                }
                self.compile_expr(callee)?;
                let argc = self.emit_argc(args.len());
                self.emit(OpCode::New(argc));
                Ok(())
            }

            ExprKind::Member { object, property, computed } => {
                self.compile_expr(object)?;
                self.compile_expr(property)?;
                if *computed {
                    self.emit(OpCode::GetElem);
                } else {
                    self.emit(OpCode::GetProp);
                }
                Ok(())
            }

            ExprKind::Array(elements) => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit_push_number(elements.len() as f64);
                self.emit(OpCode::NewArray);
                Ok(())
            }

            ExprKind::Object(properties) => {
                for prop in properties {
                    // Value first, then key: NewObject pops key before value
                    self.compile_expr(&prop.value)?;
                    if prop.computed {
                        self.compile_expr(&prop.key)?;
                    } else {
                        let key = match &prop.key.kind {
                            ExprKind::Str(s) => s.clone(),
                            ExprKind::Number(n) => crate::value::format_number(*n),
                            _ => return Err(self.err("invalid object literal key")),
                        };
                        let idx = self.kconst(Value::string(key));
                        self.emit(OpCode::PushConst(idx));
                    }
                }
                self.emit_push_number(properties.len() as f64);
                self.emit(OpCode::NewObject);
                Ok(())
            }

            ExprKind::Function { name, params, body } => {
                self.compile_function(name.clone(), params, body)
            }
        }
    }

    fn compile_update(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        target: &Expr,
    ) -> Result<(), SandError> {
        let step = match op {
            UpdateOp::Inc => OpCode::Add,
            UpdateOp::Dec => OpCode::Sub,
        };

        match &target.kind {
            ExprKind::Identifier(name) => {
                let name_idx = self.kname(name);
                self.emit(OpCode::LoadVar(name_idx));
                if prefix {
                    self.emit_push_number(1.0);
                    self.emit(step);
                    self.emit(OpCode::Dup);
                    self.emit(OpCode::StoreVar(name_idx));
                } else {
                    self.emit(OpCode::Dup);
                    self.emit_push_number(1.0);
                    self.emit(step);
                    self.emit(OpCode::StoreVar(name_idx));
                }
                Ok(())
            }

            ExprKind::Member { object, property, computed } => {
                let fetch = if *computed { OpCode::GetElem } else { OpCode::GetProp };
                if prefix {
                    // obj key (obj key -> old) +1 SetProp -> new
                    self.compile_expr(object)?;
                    self.compile_expr(property)?;
                    self.compile_expr(object)?;
                    self.compile_expr(property)?;
                    self.emit(fetch);
                    self.emit_push_number(1.0);
                    self.emit(step);
                    self.emit(OpCode::SetProp);
                } else {
                    // old value first, then a full store round underneath it
                    self.compile_expr(object)?;
                    self.compile_expr(property)?;
                    self.emit(fetch.clone());
                    self.compile_expr(object)?;
                    self.compile_expr(property)?;
                    self.compile_expr(object)?;
                    self.compile_expr(property)?;
                    self.emit(fetch);
                    self.emit_push_number(1.0);
                    self.emit(step);
                    self.emit(OpCode::SetProp);
                    self.emit(OpCode::Pop);
                }
                Ok(())
            }

            _ => Err(self.err("invalid increment/decrement target")),
        }
    }

    fn compile_assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &Expr,
        value: &Expr,
    ) -> Result<(), SandError> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                let name_idx = self.kname(name);
                match op {
                    None => {
                        self.compile_expr(value)?;
                    }
                    Some(op) => {
                        self.emit(OpCode::LoadVar(name_idx));
                        self.compile_expr(value)?;
                        self.emit(binary_opcode(op));
                    }
                }
                self.emit(OpCode::Dup);
                self.emit(OpCode::StoreVar(name_idx));
                Ok(())
            }

            ExprKind::Member { object, property, computed } => {
                self.compile_expr(object)?;
                self.compile_expr(property)?;
                match op {
                    None => {
                        self.compile_expr(value)?;
                    }
                    Some(op) => {
                        // Re-evaluate the target for the fetch half
                        self.compile_expr(object)?;
                        self.compile_expr(property)?;
                        let fetch = if *computed { OpCode::GetElem } else { OpCode::GetProp };
                        self.emit(fetch);
                        self.compile_expr(value)?;
                        self.emit(binary_opcode(op));
                    }
                }
                // Computed stores route through SetProp as well
                self.emit(OpCode::SetProp);
                Ok(())
            }

            _ => Err(self.err("invalid assignment target")),
        }
    }
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::Ne => OpCode::Ne,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Le => OpCode::Le,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::Ge => OpCode::Ge,
        BinaryOp::Shl => OpCode::Shl,
        BinaryOp::Shr => OpCode::Shr,
        BinaryOp::UShr => OpCode::UShr,
        BinaryOp::BitAnd => OpCode::BitAnd,
        BinaryOp::BitOr => OpCode::BitOr,
        BinaryOp::BitXor => OpCode::BitXor,
    }
}

// The compiler consumes the parser's Program; aliased to avoid clashing
// with the bytecode Program in this module
use crate::ast::Program as AstProgram;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn compile_src(src: &str) -> Program {
        let tokens = tokenize(src).unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        Compiler::new(src, false).compile(&ast).unwrap()
    }

    #[test]
    fn literals_share_pool_slots() {
        let program = compile_src("1 + 1 + 1;");
        let ones = program
            .constants
            .iter()
            .filter(|v| matches!(v, Value::Number(n) if *n == 1.0))
            .count();
        assert_eq!(ones, 1);
    }

    #[test]
    fn no_unpatched_jumps_remain() {
        let src = r#"
            var total = 0;
            for (var i = 0; i < 10; i++) {
                if (i % 2 == 0) { continue; }
                if (i > 7) { break; }
                total += i;
            }
            while (false) { break; }
            switch (total) { case 1: break; default: total = 0; }
        "#;
        let program = compile_src(src);
        for (pc, op) in program.code.iter().enumerate() {
            if let OpCode::Jump(t) | OpCode::JumpIfTrue(t) | OpCode::JumpIfFalse(t) = op {
                assert!(
                    *t <= program.code.len(),
                    "jump at pc {} targets {} outside the program",
                    pc,
                    t
                );
            }
        }
    }

    #[test]
    fn compilation_is_deterministic() {
        let src = "var x = 1; function f(a) { return a + x; } f(2) * 3";
        let a = compile_src(src);
        let b = compile_src(src);
        assert_eq!(a.code, b.code);
        assert_eq!(a.constants.len(), b.constants.len());
    }

    #[test]
    fn last_top_level_expression_keeps_its_value() {
        let program = compile_src("1; 2");
        // The first statement pops, the final one must not
        let pops = program.code.iter().filter(|op| matches!(op, OpCode::Pop)).count();
        assert_eq!(pops, 1);
        assert_eq!(program.code.last(), Some(&OpCode::Halt));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let tokens = tokenize("break;").unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        let err = Compiler::new("break;", false).compile(&ast).unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn return_outside_function_is_rejected() {
        let tokens = tokenize("return 1;").unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        let err = Compiler::new("return 1;", false).compile(&ast).unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        let src = "function f(a, a) { return a; }";
        let tokens = tokenize(src).unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        let err = Compiler::new(src, false).compile(&ast).unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn call_arguments_compile_right_to_left() {
        let program = compile_src("f(1, 2);");
        let push_positions: Vec<usize> = program
            .code
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match op {
                OpCode::PushConst(k) => match program.constants.get(*k) {
                    Some(Value::Number(n)) if (*n == 1.0 || *n == 2.0) => Some((i, *n)),
                    _ => None,
                },
                _ => None,
            })
            .map(|(i, _)| i)
            .collect();
        // the literal 2 (last argument) is pushed before the literal 1
        let n_at = |i: usize| match program.code[i] {
            OpCode::PushConst(k) => match program.constants.get(k) {
                Some(Value::Number(n)) => *n,
                _ => 0.0,
            },
            _ => 0.0,
        };
        assert_eq!(n_at(push_positions[0]), 2.0);
        assert_eq!(n_at(push_positions[1]), 1.0);
    }

    #[test]
    fn debug_symbols_populate_the_map() {
        let src = "var x = 1;\nx + 2";
        let tokens = tokenize(src).unwrap();
        let ast = Parser::new(tokens).parse_program().unwrap();
        let program = Compiler::new(src, true).compile(&ast).unwrap();
        assert!(!program.debug_map.is_empty());
        let info = program.debug_map.values().find(|d| d.line == 2).unwrap();
        assert_eq!(info.source_text.as_deref(), Some("x + 2"));
    }
}
