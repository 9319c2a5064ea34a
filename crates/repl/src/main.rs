//! Interactive shell for the relational engine.
//!
//! Supports both execute mode (one command, exit status = error code)
//! and an interactive line loop.

mod commands;
mod pretty;

use anyhow::Result;
use clap::Parser;
use common::{Config, DbError, MAX_OPEN};
use executor::Engine;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process::ExitCode;

const PROMPT: &str = "query > ";

#[derive(Parser, Debug)]
#[command(name = "relsh", about = "Interactive shell for the relational engine")]
struct Args {
    /// Directory against which database paths are resolved
    #[arg(long, default_value = ".")]
    data_root: PathBuf,

    /// Open-relation cache slots
    #[arg(long, default_value_t = MAX_OPEN)]
    max_open: usize,

    /// Execute the provided command and exit
    #[arg(short = 'e', long)]
    execute: Option<String>,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::builder()
        .data_root(args.data_root)
        .max_open(args.max_open)
        .build();
    let mut engine = Engine::new(config);

    if let Some(line) = args.execute {
        let code = run_line(&mut engine, &line);
        shutdown(&mut engine);
        return Ok(ExitCode::from(code.min(255) as u8));
    }

    interactive_loop(&mut engine)?;
    shutdown(&mut engine);
    Ok(ExitCode::SUCCESS)
}

fn interactive_loop(engine: &mut Engine) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Relational engine shell. Type 'help' for commands, 'quit' to leave.");
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if matches!(line.as_str(), "quit" | "exit") {
                    break;
                }
                run_line(engine, &line);
            }
            // Ctrl+C abandons the current input but keeps the database
            // consistent; Ctrl+D leaves like 'quit'.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Dispatch one command line; returns 0 on success, the error code
/// otherwise.
fn run_line(engine: &mut Engine, line: &str) -> i32 {
    match commands::dispatch(engine, line) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            0
        }
        Err(err) => {
            eprintln!("error {}: {err}", err.code());
            suggest(engine, &err);
            err.code()
        }
    }
}

/// Substring fallback for the "did you mean" hook: the engine feeds
/// candidate names, the shell picks the close ones.
fn suggest(engine: &mut Engine, err: &DbError) {
    let (typed, candidates) = match err {
        DbError::RelNotFound(name) => {
            let Ok(names) = engine.relation_names() else {
                return;
            };
            (name.clone(), names)
        }
        DbError::AttrNotFound { rel, attr } => {
            let Ok(names) = engine.attribute_names(rel) else {
                return;
            };
            (attr.clone(), names)
        }
        _ => return,
    };
    let typed_lower = typed.to_lowercase();
    let close: Vec<String> = candidates
        .into_iter()
        .filter(|c| {
            let c_lower = c.to_lowercase();
            c_lower.contains(&typed_lower) || typed_lower.contains(&c_lower)
        })
        .take(5)
        .collect();
    if !close.is_empty() {
        eprintln!("did you mean: {}?", close.join(", "));
    }
}

fn shutdown(engine: &mut Engine) {
    if engine.is_open() {
        if let Err(err) = engine.close_db() {
            eprintln!("error {}: {err}", err.code());
        }
    }
}
