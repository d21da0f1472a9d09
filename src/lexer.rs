// File: src/lexer.rs
//
// Tokenizer for the JavaScript subset SandJS executes.
// Produces a flat token stream with line/column positions; template
// literal holes are tokenized into nested streams.

use crate::errors::{SandError, SourceLocation};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Number(f64),
    String(String),
    /// Backtick literal. `quasis` has one more entry than `expressions`;
    /// each expression hole is a nested token stream (without Eof).
    Template {
        quasis: Vec<String>,
        expressions: Vec<Vec<Token>>,
    },
    /// Regex literal, kept as raw pattern and flags
    Regex {
        pattern: String,
        flags: String,
    },
    Operator(String),
    Punctuation(char),
    Keyword(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn loc(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }
}

const KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "return", "if", "else", "while", "do",
    "for", "in", "break", "continue", "switch", "case", "default", "new",
    "typeof", "this", "null", "true", "false", "throw", "try", "catch",
    "finally",
];

// Multi-character operators, longest first so greedy matching works
const OPERATORS: &[&str] = &[
    ">>>=", "===", "!==", ">>>", "<<=", ">>=", "==", "!=", "<=", ">=", "&&",
    "||", "<<", ">>", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=",
    "^=", "+", "-", "*", "/", "%", "=", "<", ">", "!", "&", "|", "^", "~",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, SandError> {
    Lexer::new(source, 1, 1).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    fn new(source: &str, line: usize, col: usize) -> Self {
        Self { chars: source.chars().collect(), pos: 0, line, col }
    }

    fn run(mut self) -> Result<Vec<Token>, SandError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            let line = self.line;
            let column = self.col;

            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(SandError::compile("unterminated block comment")
                                    .at(SourceLocation::new(line, column)));
                            }
                        }
                    }
                }
                '/' if regex_can_start(tokens.last()) => {
                    let token = self.lex_regex(line, column)?;
                    tokens.push(token);
                }
                '"' | '\'' => {
                    let s = self.lex_string(c, line, column)?;
                    tokens.push(Token { kind: TokenKind::String(s), line, column });
                }
                '`' => {
                    let token = self.lex_template(line, column)?;
                    tokens.push(token);
                }
                '0'..='9' => {
                    let n = self.lex_number();
                    tokens.push(Token { kind: TokenKind::Number(n), line, column });
                }
                '.' if matches!(self.peek_at(1), Some('0'..='9')) => {
                    let n = self.lex_number();
                    tokens.push(Token { kind: TokenKind::Number(n), line, column });
                }
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    let mut ident = String::new();
                    while let Some(ch) = self.peek() {
                        if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                            ident.push(ch);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    let kind = if KEYWORDS.contains(&ident.as_str()) {
                        TokenKind::Keyword(ident)
                    } else {
                        TokenKind::Identifier(ident)
                    };
                    tokens.push(Token { kind, line, column });
                }
                '(' | ')' | '{' | '}' | '[' | ']' | ',' | ';' | ':' | '.' | '?' => {
                    self.bump();
                    tokens.push(Token { kind: TokenKind::Punctuation(c), line, column });
                }
                _ => {
                    if let Some(op) = self.lex_operator() {
                        tokens.push(Token {
                            kind: TokenKind::Operator(op.to_string()),
                            line,
                            column,
                        });
                    } else {
                        return Err(SandError::compile(format!(
                            "unexpected character '{}'",
                            c
                        ))
                        .at(SourceLocation::new(line, column)));
                    }
                }
            }
        }

        tokens.push(Token { kind: TokenKind::Eof, line: self.line, column: self.col });
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(ch) = c {
            self.pos += 1;
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn lex_operator(&mut self) -> Option<&'static str> {
        for op in OPERATORS {
            let mut matches = true;
            for (i, expected) in op.chars().enumerate() {
                if self.peek_at(i) != Some(expected) {
                    matches = false;
                    break;
                }
            }
            if matches {
                for _ in 0..op.chars().count() {
                    self.bump();
                }
                return Some(op);
            }
        }
        None
    }

    fn lex_number(&mut self) -> f64 {
        // Hex form
        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x') | Some('X'))
        {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_hexdigit() {
                    digits.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
            return i64::from_str_radix(&digits, 16).unwrap_or(0) as f64;
        }

        let mut num = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                num.push(ch);
                self.bump();
            } else if (ch == 'e' || ch == 'E')
                && (matches!(self.peek_at(1), Some('0'..='9'))
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && matches!(self.peek_at(2), Some('0'..='9'))))
            {
                num.push(ch);
                self.bump();
                num.push(self.bump().unwrap_or('+'));
                while let Some(d) = self.peek() {
                    if d.is_ascii_digit() {
                        num.push(d);
                        self.bump();
                    } else {
                        break;
                    }
                }
                break;
            } else {
                break;
            }
        }
        num.parse().unwrap_or(0.0)
    }

    fn lex_string(&mut self, quote: char, line: usize, column: usize) -> Result<String, SandError> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                Some(ch) if ch == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('b') => s.push('\u{0008}'),
                    Some('f') => s.push('\u{000C}'),
                    Some('v') => s.push('\u{000B}'),
                    Some('u') => s.push(self.lex_unicode_escape(4)),
                    Some('x') => s.push(self.lex_unicode_escape(2)),
                    Some(other) => s.push(other),
                    None => {
                        return Err(SandError::compile("unterminated string literal")
                            .at(SourceLocation::new(line, column)));
                    }
                },
                Some('\n') | None => {
                    return Err(SandError::compile("unterminated string literal")
                        .at(SourceLocation::new(line, column)));
                }
                Some(ch) => s.push(ch),
            }
        }
        Ok(s)
    }

    fn lex_unicode_escape(&mut self, len: usize) -> char {
        let mut digits = String::new();
        for _ in 0..len {
            match self.peek() {
                Some(d) if d.is_ascii_hexdigit() => {
                    digits.push(d);
                    self.bump();
                }
                _ => break,
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or('\u{FFFD}')
    }

    fn lex_template(&mut self, line: usize, column: usize) -> Result<Token, SandError> {
        self.bump(); // opening backtick
        let mut quasis = Vec::new();
        let mut expressions = Vec::new();
        let mut current = String::new();

        loop {
            match self.peek() {
                Some('`') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('n') => current.push('\n'),
                        Some('t') => current.push('\t'),
                        Some('`') => current.push('`'),
                        Some('$') => current.push('$'),
                        Some(other) => current.push(other),
                        None => {
                            return Err(SandError::compile("unterminated template literal")
                                .at(SourceLocation::new(line, column)));
                        }
                    }
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    quasis.push(std::mem::take(&mut current));
                    let hole_line = self.line;
                    let hole_col = self.col;
                    let hole_src = self.take_template_hole(line, column)?;
                    let mut inner = Lexer::new(&hole_src, hole_line, hole_col).run()?;
                    inner.pop(); // drop the inner Eof
                    expressions.push(inner);
                }
                Some(_) => {
                    current.push(self.bump().unwrap());
                }
                None => {
                    return Err(SandError::compile("unterminated template literal")
                        .at(SourceLocation::new(line, column)));
                }
            }
        }

        quasis.push(current);
        Ok(Token { kind: TokenKind::Template { quasis, expressions }, line, column })
    }

    /// Consume the source of a `${...}` hole, balancing braces and
    /// skipping over string literals inside the hole.
    fn take_template_hole(&mut self, line: usize, column: usize) -> Result<String, SandError> {
        let mut depth = 1usize;
        let mut src = String::new();
        loop {
            match self.peek() {
                Some('{') => {
                    depth += 1;
                    src.push('{');
                    self.bump();
                }
                Some('}') => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return Ok(src);
                    }
                    src.push('}');
                }
                Some(q @ ('"' | '\'')) => {
                    src.push(q);
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('\\') => {
                                src.push('\\');
                                if let Some(esc) = self.bump() {
                                    src.push(esc);
                                }
                            }
                            Some(ch) => {
                                src.push(ch);
                                if ch == q {
                                    break;
                                }
                            }
                            None => {
                                return Err(SandError::compile(
                                    "unterminated template literal",
                                )
                                .at(SourceLocation::new(line, column)));
                            }
                        }
                    }
                }
                Some(_) => {
                    src.push(self.bump().unwrap());
                }
                None => {
                    return Err(SandError::compile("unterminated template literal")
                        .at(SourceLocation::new(line, column)));
                }
            }
        }
    }

    fn lex_regex(&mut self, line: usize, column: usize) -> Result<Token, SandError> {
        self.bump(); // opening slash
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            match self.bump() {
                Some('\\') => {
                    pattern.push('\\');
                    match self.bump() {
                        Some(esc) => pattern.push(esc),
                        None => {
                            return Err(SandError::compile("unterminated regex literal")
                                .at(SourceLocation::new(line, column)));
                        }
                    }
                }
                Some('[') => {
                    in_class = true;
                    pattern.push('[');
                }
                Some(']') => {
                    in_class = false;
                    pattern.push(']');
                }
                Some('/') if !in_class => break,
                Some('\n') | None => {
                    return Err(SandError::compile("unterminated regex literal")
                        .at(SourceLocation::new(line, column)));
                }
                Some(ch) => pattern.push(ch),
            }
        }

        let mut flags = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphabetic() {
                flags.push(ch);
                self.bump();
            } else {
                break;
            }
        }

        Ok(Token { kind: TokenKind::Regex { pattern, flags }, line, column })
    }
}

/// Whether a `/` at this position starts a regex literal rather than a
/// division, judged from the previous significant token.
fn regex_can_start(prev: Option<&Token>) -> bool {
    match prev.map(|t| &t.kind) {
        None => true,
        Some(TokenKind::Operator(_)) => true,
        Some(TokenKind::Keyword(k)) => k != "this",
        Some(TokenKind::Punctuation(p)) => {
            matches!(p, '(' | '{' | '[' | ',' | ';' | ':' | '?')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers_and_operators() {
        let toks = kinds("2 + 3.5 * 0x10");
        assert_eq!(
            toks,
            vec![
                TokenKind::Number(2.0),
                TokenKind::Operator("+".into()),
                TokenKind::Number(3.5),
                TokenKind::Operator("*".into()),
                TokenKind::Number(16.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn greedy_operator_matching() {
        let toks = kinds("a >>> b >>= c");
        assert!(toks.contains(&TokenKind::Operator(">>>".into())));
        assert!(toks.contains(&TokenKind::Operator(">>=".into())));
    }

    #[test]
    fn string_escapes() {
        let toks = kinds(r#""a\tb\n""#);
        assert_eq!(toks[0], TokenKind::String("a\tb\n".into()));
    }

    #[test]
    fn regex_vs_division() {
        let toks = kinds("a / b");
        assert!(toks.contains(&TokenKind::Operator("/".into())));

        let toks = kinds("x = /ab+c/gi");
        assert!(toks.iter().any(|k| matches!(
            k,
            TokenKind::Regex { pattern, flags } if pattern == "ab+c" && flags == "gi"
        )));
    }

    #[test]
    fn template_with_holes() {
        let toks = tokenize("`a ${x + 1} b`").unwrap();
        match &toks[0].kind {
            TokenKind::Template { quasis, expressions } => {
                assert_eq!(quasis, &vec!["a ".to_string(), " b".to_string()]);
                assert_eq!(expressions.len(), 1);
                assert!(expressions[0]
                    .iter()
                    .any(|t| t.kind == TokenKind::Operator("+".into())));
            }
            other => panic!("expected template token, got {:?}", other),
        }
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("1 // comment\n/* block */ 2");
        assert_eq!(
            toks,
            vec![TokenKind::Number(1.0), TokenKind::Number(2.0), TokenKind::Eof]
        );
    }

    #[test]
    fn positions_track_lines() {
        let toks = tokenize("a\n  b").unwrap();
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[1].line, toks[1].column), (2, 3));
    }
}
