// File: src/parser.rs
//
// Recursive-descent parser for the JavaScript subset SandJS executes.
// Consumes the token stream from the lexer and produces the AST the
// compiler lowers to bytecode.

use crate::ast::*;
use crate::errors::{SandError, SourceLocation};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Program, SandError> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    /// Parse a single expression followed by end of input (REPL, template holes)
    pub fn parse_expression_stream(&mut self) -> Result<Expr, SandError> {
        let expr = self.parse_expression()?;
        if !self.at_eof() {
            let tok = self.current().clone();
            return Err(SandError::compile(format!(
                "unexpected token after expression: {}",
                describe(&tok.kind)
            ))
            .at(tok.loc()));
        }
        Ok(expr)
    }

    // === Token helpers ===

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens.last().expect("token stream always ends with Eof")
        })
    }

    fn loc(&self) -> SourceLocation {
        self.current().loc()
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check_punct(&self, p: char) -> bool {
        matches!(&self.current().kind, TokenKind::Punctuation(c) if *c == p)
    }

    fn eat_punct(&mut self, p: char) -> bool {
        if self.check_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: char) -> Result<(), SandError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            let tok = self.current().clone();
            Err(SandError::compile(format!(
                "expected '{}' but found {}",
                p,
                describe(&tok.kind)
            ))
            .at(tok.loc()))
        }
    }

    fn check_keyword(&self, kw: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Keyword(k) if k == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.check_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SandError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            let tok = self.current().clone();
            Err(SandError::compile(format!(
                "expected '{}' but found {}",
                kw,
                describe(&tok.kind)
            ))
            .at(tok.loc()))
        }
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Operator(o) if o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> Result<String, SandError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Identifier(name) => Ok(name),
            ref other => Err(SandError::compile(format!(
                "expected identifier but found {}",
                describe(other)
            ))
            .at(tok.loc())),
        }
    }

    // === Statements ===

    fn parse_statement(&mut self) -> Result<Stmt, SandError> {
        let loc = self.loc();

        let kind = match &self.current().kind {
            TokenKind::Punctuation(';') => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Punctuation('{') => self.parse_block()?,
            TokenKind::Keyword(k) => match k.as_str() {
                "var" | "let" | "const" => {
                    let decl = self.parse_var_decl()?;
                    self.eat_punct(';');
                    decl
                }
                "function" => self.parse_function_decl()?,
                "if" => self.parse_if()?,
                "while" => self.parse_while()?,
                "do" => self.parse_do_while()?,
                "for" => self.parse_for()?,
                "switch" => self.parse_switch()?,
                "break" => {
                    self.advance();
                    self.eat_punct(';');
                    StmtKind::Break
                }
                "continue" => {
                    self.advance();
                    self.eat_punct(';');
                    StmtKind::Continue
                }
                "return" => {
                    self.advance();
                    let arg = if self.check_punct(';')
                        || self.check_punct('}')
                        || self.at_eof()
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.eat_punct(';');
                    StmtKind::Return(arg)
                }
                "throw" => {
                    self.advance();
                    let arg = self.parse_expression()?;
                    self.eat_punct(';');
                    StmtKind::Throw(arg)
                }
                "try" => self.parse_try()?,
                _ => {
                    let expr = self.parse_expression()?;
                    self.eat_punct(';');
                    StmtKind::Expression(expr)
                }
            },
            _ => {
                let expr = self.parse_expression()?;
                self.eat_punct(';');
                StmtKind::Expression(expr)
            }
        };

        Ok(Stmt { kind, loc })
    }

    fn parse_block(&mut self) -> Result<StmtKind, SandError> {
        Ok(StmtKind::Block(self.parse_brace_body()?))
    }

    fn parse_brace_body(&mut self) -> Result<Vec<Stmt>, SandError> {
        self.expect_punct('{')?;
        let mut body = Vec::new();
        while !self.check_punct('}') {
            if self.at_eof() {
                return Err(SandError::compile("expected '}' but found end of input")
                    .at(self.loc()));
            }
            body.push(self.parse_statement()?);
        }
        self.expect_punct('}')?;
        Ok(body)
    }

    fn parse_var_decl(&mut self) -> Result<StmtKind, SandError> {
        let kind = match &self.advance().kind {
            TokenKind::Keyword(k) if k == "let" => DeclKind::Let,
            TokenKind::Keyword(k) if k == "const" => DeclKind::Const,
            _ => DeclKind::Var,
        };

        let mut declarations = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let init = if self.eat_op("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarations.push(VarDeclarator { name, init });
            if !self.eat_punct(',') {
                break;
            }
        }

        Ok(StmtKind::VarDecl { kind, declarations })
    }

    fn parse_function_decl(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("function")?;
        let name = self.expect_identifier()?;
        let params = self.parse_param_list()?;
        let body = self.parse_brace_body()?;
        Ok(StmtKind::FunctionDecl { name, params, body })
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>, SandError> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        if !self.check_punct(')') {
            loop {
                params.push(self.expect_identifier()?);
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        Ok(params)
    }

    fn parse_if(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("if")?;
        self.expect_punct('(')?;
        let test = self.parse_expression()?;
        self.expect_punct(')')?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_keyword("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If { test, consequent, alternate })
    }

    fn parse_while(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("while")?;
        self.expect_punct('(')?;
        let test = self.parse_expression()?;
        self.expect_punct(')')?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::While { test, body })
    }

    fn parse_do_while(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("do")?;
        let body = Box::new(self.parse_statement()?);
        self.expect_keyword("while")?;
        self.expect_punct('(')?;
        let test = self.parse_expression()?;
        self.expect_punct(')')?;
        self.eat_punct(';');
        Ok(StmtKind::DoWhile { body, test })
    }

    fn parse_for(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("for")?;
        self.expect_punct('(')?;

        // for-in with a declared loop variable
        if self.check_keyword("var") || self.check_keyword("let") || self.check_keyword("const")
        {
            let decl_stmt = self.parse_var_decl()?;
            if self.eat_keyword("in") {
                let name = match &decl_stmt {
                    StmtKind::VarDecl { declarations, .. }
                        if declarations.len() == 1 && declarations[0].init.is_none() =>
                    {
                        declarations[0].name.clone()
                    }
                    _ => {
                        return Err(SandError::compile(
                            "for-in loop variable must be a single name",
                        )
                        .at(self.loc()));
                    }
                };
                let right = self.parse_expression()?;
                self.expect_punct(')')?;
                let body = Box::new(self.parse_statement()?);
                return Ok(StmtKind::ForIn { left: ForInTarget::Decl(name), right, body });
            }
            self.expect_punct(';')?;
            let init = match decl_stmt {
                StmtKind::VarDecl { kind, declarations } => {
                    Some(ForInit::Decl { kind, declarations })
                }
                _ => None,
            };
            return self.parse_for_tail(init);
        }

        // for-in over an existing binding: `for (k in o)`
        if let TokenKind::Identifier(name) = &self.current().kind {
            if matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.kind),
                Some(TokenKind::Keyword(k)) if k == "in"
            ) {
                let name = name.clone();
                self.advance();
                self.advance();
                let right = self.parse_expression()?;
                self.expect_punct(')')?;
                let body = Box::new(self.parse_statement()?);
                return Ok(StmtKind::ForIn { left: ForInTarget::Ident(name), right, body });
            }
        }

        let init = if self.check_punct(';') {
            None
        } else {
            Some(ForInit::Expr(self.parse_expression()?))
        };
        self.expect_punct(';')?;
        self.parse_for_tail(init)
    }

    fn parse_for_tail(&mut self, init: Option<ForInit>) -> Result<StmtKind, SandError> {
        let test = if self.check_punct(';') {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(';')?;
        let update = if self.check_punct(')') {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(')')?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For { init, test, update, body })
    }

    fn parse_switch(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("switch")?;
        self.expect_punct('(')?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(')')?;
        self.expect_punct('{')?;

        let mut cases = Vec::new();
        while !self.check_punct('}') {
            let test = if self.eat_keyword("case") {
                let e = self.parse_expression()?;
                Some(e)
            } else if self.eat_keyword("default") {
                None
            } else {
                let tok = self.current().clone();
                return Err(SandError::compile(format!(
                    "expected 'case' or 'default' but found {}",
                    describe(&tok.kind)
                ))
                .at(tok.loc()));
            };
            self.expect_punct(':')?;

            let mut body = Vec::new();
            while !self.check_punct('}')
                && !self.check_keyword("case")
                && !self.check_keyword("default")
            {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        self.expect_punct('}')?;
        Ok(StmtKind::Switch { discriminant, cases })
    }

    fn parse_try(&mut self) -> Result<StmtKind, SandError> {
        self.expect_keyword("try")?;
        let block = self.parse_brace_body()?;

        let handler = if self.eat_keyword("catch") {
            let param = if self.eat_punct('(') {
                let name = self.expect_identifier()?;
                self.expect_punct(')')?;
                Some(name)
            } else {
                None
            };
            let body = self.parse_brace_body()?;
            Some(CatchClause { param, body })
        } else {
            None
        };

        let finalizer = if self.eat_keyword("finally") {
            Some(self.parse_brace_body()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(
                SandError::compile("try statement requires catch or finally").at(self.loc())
            );
        }

        Ok(StmtKind::Try { block, handler, finalizer })
    }

    // === Expressions, lowest to highest precedence ===

    fn parse_expression(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        let first = self.parse_assignment()?;
        if !self.check_punct(',') {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(',') {
            exprs.push(self.parse_assignment()?);
        }
        Ok(Expr { kind: ExprKind::Sequence(exprs), loc })
    }

    fn parse_assignment(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        let left = self.parse_conditional()?;

        let op = match &self.current().kind {
            TokenKind::Operator(o) => match o.as_str() {
                "=" => Some(None),
                "+=" => Some(Some(BinaryOp::Add)),
                "-=" => Some(Some(BinaryOp::Sub)),
                "*=" => Some(Some(BinaryOp::Mul)),
                "/=" => Some(Some(BinaryOp::Div)),
                "%=" => Some(Some(BinaryOp::Mod)),
                "&=" => Some(Some(BinaryOp::BitAnd)),
                "|=" => Some(Some(BinaryOp::BitOr)),
                "^=" => Some(Some(BinaryOp::BitXor)),
                "<<=" => Some(Some(BinaryOp::Shl)),
                ">>=" => Some(Some(BinaryOp::Shr)),
                ">>>=" => Some(Some(BinaryOp::UShr)),
                _ => None,
            },
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let value = self.parse_assignment()?;
            return Ok(Expr {
                kind: ExprKind::Assign {
                    op,
                    target: Box::new(left),
                    value: Box::new(value),
                },
                loc,
            });
        }

        Ok(left)
    }

    fn parse_conditional(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        let test = self.parse_logical_or()?;
        if self.eat_punct('?') {
            let consequent = self.parse_assignment()?;
            self.expect_punct(':')?;
            let alternate = self.parse_assignment()?;
            return Ok(Expr {
                kind: ExprKind::Conditional {
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                },
                loc,
            });
        }
        Ok(test)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        let mut left = self.parse_logical_and()?;
        while self.eat_op("||") {
            let right = self.parse_logical_and()?;
            left = Expr {
                kind: ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc: loc.clone(),
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        let mut left = self.parse_bit_or()?;
        while self.eat_op("&&") {
            let right = self.parse_bit_or()?;
            left = Expr {
                kind: ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc: loc.clone(),
            };
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(&[("|", BinaryOp::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(&[("^", BinaryOp::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(&[("&", BinaryOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, SandError> {
        // == and != are compiled strictly, same as === / !==
        self.parse_binary_level(
            &[
                ("===", BinaryOp::Eq),
                ("!==", BinaryOp::Ne),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(
            &[(">>>", BinaryOp::UShr), ("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SandError> {
        self.parse_binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Mod)],
            Self::parse_unary,
        )
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, SandError>,
    ) -> Result<Expr, SandError> {
        let loc = self.loc();
        let mut left = next(self)?;
        'outer: loop {
            for (text, op) in ops {
                if self.eat_op(text) {
                    let right = next(self)?;
                    left = Expr {
                        kind: ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        loc: loc.clone(),
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();

        let op = if self.eat_op("!") {
            Some(UnaryOp::Not)
        } else if self.eat_op("~") {
            Some(UnaryOp::BitNot)
        } else if self.eat_op("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_op("+") {
            Some(UnaryOp::Pos)
        } else if self.eat_keyword("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = self.parse_unary()?;
            return Ok(Expr { kind: ExprKind::Unary { op, operand: Box::new(operand) }, loc });
        }

        if self.eat_op("++") {
            let target = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Update { op: UpdateOp::Inc, prefix: true, target: Box::new(target) },
                loc,
            });
        }
        if self.eat_op("--") {
            let target = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Update { op: UpdateOp::Dec, prefix: true, target: Box::new(target) },
                loc,
            });
        }

        let expr = self.parse_postfix()?;
        Ok(expr)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        let expr = self.parse_call_member()?;

        if self.eat_op("++") {
            return Ok(Expr {
                kind: ExprKind::Update { op: UpdateOp::Inc, prefix: false, target: Box::new(expr) },
                loc,
            });
        }
        if self.eat_op("--") {
            return Ok(Expr {
                kind: ExprKind::Update { op: UpdateOp::Dec, prefix: false, target: Box::new(expr) },
                loc,
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, SandError> {
        let mut expr = if self.check_keyword("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        loop {
            let loc = self.loc();
            if self.eat_punct('.') {
                let name = self.expect_identifier()?;
                let property = Expr { kind: ExprKind::Str(name), loc: loc.clone() };
                expr = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: false,
                    },
                    loc,
                };
            } else if self.eat_punct('[') {
                let property = self.parse_expression()?;
                self.expect_punct(']')?;
                expr = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: true,
                    },
                    loc,
                };
            } else if self.check_punct('(') {
                let args = self.parse_arguments()?;
                expr = Expr {
                    kind: ExprKind::Call { callee: Box::new(expr), args },
                    loc,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_new(&mut self) -> Result<Expr, SandError> {
        let loc = self.loc();
        self.expect_keyword("new")?;

        // The constructor expression is a member chain, never a call,
        // so `new a.b.C(x)` parses as expected.
        let mut callee = self.parse_primary()?;
        loop {
            let member_loc = self.loc();
            if self.eat_punct('.') {
                let name = self.expect_identifier()?;
                let property = Expr { kind: ExprKind::Str(name), loc: member_loc.clone() };
                callee = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(callee),
                        property: Box::new(property),
                        computed: false,
                    },
                    loc: member_loc,
                };
            } else if self.eat_punct('[') {
                let property = self.parse_expression()?;
                self.expect_punct(']')?;
                callee = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(callee),
                        property: Box::new(property),
                        computed: true,
                    },
                    loc: member_loc,
                };
            } else {
                break;
            }
        }

        let args = if self.check_punct('(') {
            self.parse_arguments()?
        } else {
            Vec::new()
        };

        Ok(Expr { kind: ExprKind::New { callee: Box::new(callee), args }, loc })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, SandError> {
        self.expect_punct('(')?;
        let mut args = Vec::new();
        if !self.check_punct(')') {
            loop {
                args.push(self.parse_assignment()?);
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, SandError> {
        let tok = self.advance();
        let loc = tok.loc();

        let kind = match tok.kind {
            TokenKind::Number(n) => ExprKind::Number(n),
            TokenKind::String(s) => ExprKind::Str(s),
            TokenKind::Identifier(name) => ExprKind::Identifier(name),
            TokenKind::Regex { pattern, flags } => ExprKind::Regex { pattern, flags },
            TokenKind::Template { quasis, expressions } => {
                let mut parsed = Vec::new();
                for mut hole in expressions {
                    let end = hole.last().cloned().unwrap_or_else(|| Token {
                        kind: TokenKind::Eof,
                        line: loc.line,
                        column: loc.column,
                    });
                    hole.push(Token { kind: TokenKind::Eof, ..end });
                    let mut sub = Parser::new(hole);
                    parsed.push(sub.parse_expression_stream()?);
                }
                ExprKind::Template { quasis, expressions: parsed }
            }
            TokenKind::Keyword(k) => match k.as_str() {
                "true" => ExprKind::Bool(true),
                "false" => ExprKind::Bool(false),
                "null" => ExprKind::Null,
                "this" => ExprKind::This,
                "function" => return self.parse_function_expr(loc),
                other => {
                    return Err(SandError::compile(format!(
                        "unexpected keyword '{}' in expression",
                        other
                    ))
                    .at(loc));
                }
            },
            TokenKind::Punctuation('(') => {
                let expr = self.parse_expression()?;
                self.expect_punct(')')?;
                return Ok(expr);
            }
            TokenKind::Punctuation('[') => {
                let mut elements = Vec::new();
                if !self.check_punct(']') {
                    loop {
                        elements.push(self.parse_assignment()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                        // trailing comma
                        if self.check_punct(']') {
                            break;
                        }
                    }
                }
                self.expect_punct(']')?;
                ExprKind::Array(elements)
            }
            TokenKind::Punctuation('{') => {
                let mut properties = Vec::new();
                if !self.check_punct('}') {
                    loop {
                        properties.push(self.parse_object_property()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                        if self.check_punct('}') {
                            break;
                        }
                    }
                }
                self.expect_punct('}')?;
                ExprKind::Object(properties)
            }
            other => {
                return Err(SandError::compile(format!(
                    "unexpected token {}",
                    describe(&other)
                ))
                .at(loc));
            }
        };

        Ok(Expr { kind, loc })
    }

    fn parse_function_expr(&mut self, loc: SourceLocation) -> Result<Expr, SandError> {
        let name = if let TokenKind::Identifier(n) = &self.current().kind {
            let n = n.clone();
            self.advance();
            Some(n)
        } else {
            None
        };
        let params = self.parse_param_list()?;
        let body = self.parse_brace_body()?;
        Ok(Expr { kind: ExprKind::Function { name, params, body }, loc })
    }

    fn parse_object_property(&mut self) -> Result<ObjectProperty, SandError> {
        let tok = self.advance();
        let loc = tok.loc();

        let (key, computed) = match tok.kind {
            TokenKind::Identifier(name) => {
                (Expr { kind: ExprKind::Str(name), loc: loc.clone() }, false)
            }
            TokenKind::Keyword(name) => {
                (Expr { kind: ExprKind::Str(name), loc: loc.clone() }, false)
            }
            TokenKind::String(s) => (Expr { kind: ExprKind::Str(s), loc: loc.clone() }, false),
            TokenKind::Number(n) => {
                (Expr { kind: ExprKind::Number(n), loc: loc.clone() }, false)
            }
            TokenKind::Punctuation('[') => {
                let key = self.parse_assignment()?;
                self.expect_punct(']')?;
                (key, true)
            }
            other => {
                return Err(SandError::compile(format!(
                    "invalid object key: {}",
                    describe(&other)
                ))
                .at(loc));
            }
        };

        self.expect_punct(':')?;
        let value = self.parse_assignment()?;
        Ok(ObjectProperty { key, value, computed })
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(n) => format!("identifier '{}'", n),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::String(_) => "string literal".to_string(),
        TokenKind::Template { .. } => "template literal".to_string(),
        TokenKind::Regex { .. } => "regex literal".to_string(),
        TokenKind::Operator(o) => format!("'{}'", o),
        TokenKind::Punctuation(p) => format!("'{}'", p),
        TokenKind::Keyword(k) => format!("keyword '{}'", k),
        TokenKind::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Program {
        let tokens = tokenize(src).unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse("2 + 3 * 4;");
        match &program.body[0].kind {
            StmtKind::Expression(e) => match &e.kind {
                ExprKind::Binary { op: BinaryOp::Add, right, .. } => {
                    assert!(matches!(
                        right.kind,
                        ExprKind::Binary { op: BinaryOp::Mul, .. }
                    ));
                }
                other => panic!("expected Add at the root, got {:?}", other),
            },
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn member_call_chain() {
        let program = parse("a.b[0](1, 2);");
        match &program.body[0].kind {
            StmtKind::Expression(e) => {
                assert!(matches!(e.kind, ExprKind::Call { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn for_in_both_forms() {
        let program = parse("for (var k in o) {} for (k in o) {}");
        assert!(matches!(
            program.body[0].kind,
            StmtKind::ForIn { left: ForInTarget::Decl(_), .. }
        ));
        assert!(matches!(
            program.body[1].kind,
            StmtKind::ForIn { left: ForInTarget::Ident(_), .. }
        ));
    }

    #[test]
    fn new_with_member_callee() {
        let program = parse("new ns.Point(1, 2);");
        match &program.body[0].kind {
            StmtKind::Expression(e) => match &e.kind {
                ExprKind::New { callee, args } => {
                    assert!(matches!(callee.kind, ExprKind::Member { .. }));
                    assert_eq!(args.len(), 2);
                }
                other => panic!("expected New, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn compound_assignment_targets() {
        let program = parse("a[0] |= 3;");
        match &program.body[0].kind {
            StmtKind::Expression(e) => match &e.kind {
                ExprKind::Assign { op: Some(BinaryOp::BitOr), target, .. } => {
                    assert!(matches!(target.kind, ExprKind::Member { computed: true, .. }));
                }
                other => panic!("expected compound assign, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn unsupported_syntax_is_a_compile_error() {
        let tokens = tokenize("var x = ;").unwrap();
        let err = Parser::new(tokens).parse_program().unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn switch_cases_and_default() {
        let program = parse("switch (x) { case 1: a(); break; default: b(); }");
        match &program.body[0].kind {
            StmtKind::Switch { cases, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(cases[0].test.is_some());
                assert!(cases[1].test.is_none());
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }
}
