// File: src/errors.rs
//
// Error handling and reporting for the SandJS engine.
// Provides structured error types with source location information
// and pretty-printed error messages.

use colored::Colorize;
use std::fmt;

/// Source location information for tracking where code appears in a file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column, file: None }
    }

    pub fn unknown() -> Self {
        Self { line: 0, column: 0, file: None }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// The three failure classes the engine surfaces to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsupported syntax or AST shape, bad assignment target,
    /// break/continue outside a loop or switch
    Compile,
    /// Undefined variable, non-callable callee, property access on
    /// null/undefined, stack underflow, bad operand tags
    Runtime,
    /// Instruction budget exceeded
    Budget,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Compile => write!(f, "Compile Error"),
            ErrorKind::Runtime => write!(f, "Runtime Error"),
            ErrorKind::Budget => write!(f, "Budget Error"),
        }
    }
}

/// A structured error with location and VM context
#[derive(Debug, Clone)]
pub struct SandError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    /// Program counter of the failing instruction (runtime errors)
    pub pc: Option<usize>,
    /// Opcode name of the failing instruction (runtime errors)
    pub opcode: Option<String>,
    pub source_line: Option<String>,
    pub suggestion: Option<String>,
}

impl SandError {
    pub fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            location: None,
            pc: None,
            opcode: None,
            source_line: None,
            suggestion: None,
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message.into())
    }

    pub fn budget(limit: u64) -> Self {
        Self::new(
            ErrorKind::Budget,
            format!("instruction budget of {} exceeded", limit),
        )
    }

    pub fn undefined_variable(name: &str, known: &[String]) -> Self {
        let mut err = Self::runtime(format!("variable '{}' is not defined", name));
        if let Some(close) = find_closest_match(name, known) {
            err.suggestion = Some(close.to_string());
        }
        err
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_pc(mut self, pc: usize, opcode: String) -> Self {
        self.pc = Some(pc);
        self.opcode = Some(opcode);
        self
    }

    pub fn with_source(mut self, source_line: String) -> Self {
        self.source_line = Some(source_line);
        self
    }

    pub fn is_budget(&self) -> bool {
        self.kind == ErrorKind::Budget
    }

    pub fn is_compile(&self) -> bool {
        self.kind == ErrorKind::Compile
    }

    pub fn is_runtime(&self) -> bool {
        self.kind == ErrorKind::Runtime
    }
}

impl fmt::Display for SandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind_str = format!("{}", self.kind);
        writeln!(f, "{}: {}", kind_str.red().bold(), self.message.bold())?;

        if let Some(ref location) = self.location {
            let location_str = format!("  --> {}", location);
            writeln!(f, "{}", location_str.bright_blue())?;
        }

        if let (Some(pc), Some(ref opcode)) = (self.pc, &self.opcode) {
            writeln!(f, "{}", format!("  at pc {} ({})", pc, opcode).bright_blue())?;
        }

        if let Some(ref source) = self.source_line {
            let line_num = self.location.as_ref().map(|l| l.line).unwrap_or(0);
            let col_num = self.location.as_ref().map(|l| l.column).unwrap_or(1);

            writeln!(f, "   {}", "|".bright_blue())?;
            writeln!(
                f,
                "{} {} {}",
                format!("{:3}", line_num).bright_blue(),
                "|".bright_blue(),
                source
            )?;
            writeln!(
                f,
                "   {} {}{}",
                "|".bright_blue(),
                " ".repeat(col_num.saturating_sub(1)),
                "^".red().bold()
            )?;
        }

        if let Some(ref suggestion) = self.suggestion {
            writeln!(
                f,
                "   {} {}",
                "=".bright_green(),
                format!("Did you mean '{}'?", suggestion).bright_green()
            )?;
        }

        Ok(())
    }
}

impl std::error::Error for SandError {}

/// Computes the Levenshtein distance between two strings
/// Used for "Did you mean?" suggestions
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(
                    matrix[i - 1][j] + 1, // deletion
                    matrix[i][j - 1] + 1, // insertion
                ),
                matrix[i - 1][j - 1] + cost, // substitution
            );
        }
    }

    matrix[len1][len2]
}

/// Find the closest match from a list of candidates using Levenshtein distance
/// Returns None if no good match is found (distance > 3)
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    if candidates.is_empty() {
        return None;
    }

    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);

        if distance <= 3 && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate.as_str());
        }
    }

    best_match
}
