// File: src/main.rs
//
// Main entry point for the SandJS engine.
// Handles command-line argument parsing and dispatches to the
// appropriate subcommand (run, eval, or repl).

mod ast;
mod builtins;
mod bytecode;
mod compiler;
mod errors;
mod lexer;
mod parser;
mod repl;
mod value;
mod vm;

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use value::Value;
use vm::{DebugLevel, VM};

#[derive(ClapParser)]
#[command(
    name = "sandjs",
    about = "SandJS: a sandboxed JavaScript-subset engine",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Run a script file
    Run {
        /// Path to the script
        file: PathBuf,

        /// Instruction budget before execution is aborted
        #[arg(long)]
        max_instructions: Option<u64>,

        /// Debug trace level (basic, detail, verbose)
        #[arg(long)]
        debug: Option<String>,

        /// Disable pc -> source mapping in errors
        #[arg(long)]
        no_debug_symbols: bool,

        /// Print the final value even when it is undefined
        #[arg(short, long)]
        print: bool,
    },

    /// Evaluate an inline expression and print the result
    Eval {
        /// Source text
        code: String,

        #[arg(long)]
        max_instructions: Option<u64>,
    },

    /// Launch the interactive shell
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, max_instructions, debug, no_debug_symbols, print } => {
            let source = match fs::read_to_string(&file) {
                Ok(source) => source,
                Err(err) => {
                    eprintln!("{} {}: {}", "error:".red().bold(), file.display(), err);
                    return ExitCode::FAILURE;
                }
            };

            let mut vm = VM::new();
            if let Some(n) = max_instructions {
                vm.set_max_instructions(n);
            }
            if no_debug_symbols {
                vm.set_debug_symbols(false);
            }
            if let Some(level) = debug {
                match parse_debug_level(&level) {
                    Some(level) => vm.enable_debug(level),
                    None => {
                        eprintln!(
                            "{} unknown debug level '{}' (basic, detail, verbose)",
                            "error:".red().bold(),
                            level
                        );
                        return ExitCode::FAILURE;
                    }
                }
            }

            match vm.run(&source) {
                Ok(Value::Undefined) if !print => ExitCode::SUCCESS,
                Ok(value) => {
                    println!("{}", value.inspect());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprint!("{}", err);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Eval { code, max_instructions } => {
            let mut vm = VM::new();
            if let Some(n) = max_instructions {
                vm.set_max_instructions(n);
            }
            match vm.run(&code) {
                Ok(value) => {
                    println!("{}", value.inspect());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprint!("{}", err);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Repl => match repl::Repl::new() {
            Ok(mut repl) => {
                if let Err(err) = repl.run() {
                    eprintln!("{} {}", "repl error:".red(), err);
                    return ExitCode::FAILURE;
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{} {}", "repl error:".red(), err);
                ExitCode::FAILURE
            }
        },
    }
}

fn parse_debug_level(level: &str) -> Option<DebugLevel> {
    match level {
        "basic" => Some(DebugLevel::Basic),
        "detail" => Some(DebugLevel::Detail),
        "verbose" => Some(DebugLevel::Verbose),
        _ => None,
    }
}
