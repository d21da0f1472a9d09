// File: src/repl.rs
//
// Interactive REPL (Read-Eval-Print Loop) for the SandJS engine.
// Provides an interactive shell with:
// - Multi-line input support for functions and control structures
// - Command history with up/down arrow navigation
// - Special commands (:help, :globals, :reset, :quit)
// - Persistent VM state across inputs

use crate::value::Value;
use crate::vm::VM;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// REPL session that maintains VM state and handles user interaction
pub struct Repl {
    vm: VM,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: VM::new(), editor })
    }

    fn show_banner(&self) {
        println!(
            "{}",
            format!("SandJS {} - sandboxed script shell", env!("CARGO_PKG_VERSION"))
                .bright_cyan()
        );
        println!(
            "  Use {} for commands, {} to exit",
            ":help".bright_yellow(),
            ":quit".bright_yellow()
        );
        println!();
    }

    /// Starts the REPL loop
    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                "sandjs> ".bright_green().to_string()
            } else {
                "  ....> ".bright_blue().to_string()
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            continue;
                        } else {
                            break;
                        }
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.eval_input(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C (:quit to exit)".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "Goodbye!".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "readline error:".red(), err);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns false when the REPL should exit
    fn handle_command(&mut self, command: &str) -> bool {
        match command {
            ":help" => {
                println!("  {}     show this help", ":help".bright_yellow());
                println!("  {}  list global bindings", ":globals".bright_yellow());
                println!("  {}    clear state and re-seed built-ins", ":reset".bright_yellow());
                println!("  {}     exit the shell", ":quit".bright_yellow());
                true
            }
            ":globals" => {
                for name in self.vm.state().global_names {
                    println!("  {}", name);
                }
                true
            }
            ":reset" => {
                self.vm.reset();
                println!("{}", "state cleared".bright_green());
                true
            }
            ":quit" | ":q" | ":exit" => false,
            other => {
                println!("{} {}", "unknown command:".red(), other);
                true
            }
        }
    }

    fn eval_input(&mut self, source: &str) {
        match self.vm.run(source) {
            Ok(Value::Undefined) => {}
            Ok(value) => println!("{}", value.inspect()),
            Err(err) => eprint!("{}", err),
        }
    }
}

/// Heuristic completeness check: balanced brackets outside of string
/// literals mean the input can be evaluated.
fn is_input_complete(source: &str) -> bool {
    let mut depth: i64 = 0;
    let mut chars = source.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        match in_string {
            Some(quote) => match c {
                '\\' => {
                    chars.next();
                }
                c if c == quote => in_string = None,
                _ => {}
            },
            None => match c {
                '"' | '\'' | '`' => in_string = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                '/' if chars.peek() == Some(&'/') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => {}
            },
        }
    }

    depth <= 0 && in_string.is_none()
}
