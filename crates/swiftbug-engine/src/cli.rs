//! Line-oriented front end over [`CommandExecutor`]: command scripts and the
//! interactive prompt. Both report restorations as they finish.

use crate::error::CoreError;
use crate::executor::CommandExecutor;
use crate::restore::RestoreReport;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

pub const EXIT_COMMANDS: [&str; 2] = ["exit", "quit"];

const BANNER: &str = "Backend launched. Enter commands (e.g., 'save', 'list', 'restore <id>').\n\
Type 'help' for all commands, 'exit' or 'quit' to close.";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Cannot read command file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Line {line} ({command}): {message}")]
    Command {
        line: usize,
        command: String,
        message: String,
    },

    #[error("Input error: {0}")]
    Io(#[from] io::Error),
}

/// Where command output goes.
pub trait Transcript {
    fn output(&mut self, text: &str);
    fn failure(&mut self, text: &str);
    fn prompt(&mut self) {}
}

/// Results on stdout, failures on stderr.
pub struct Console;

impl Transcript for Console {
    fn output(&mut self, text: &str) {
        println!("{}", text);
    }

    fn failure(&mut self, text: &str) {
        eprintln!("{}", text);
    }

    fn prompt(&mut self) {
        print!("> ");
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnError {
    #[default]
    Stop,
    Continue,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptSummary {
    pub executed: usize,
    pub failed: usize,
    pub restorations: usize,
}

/// Runs one command per line; blank lines and `#` comments are skipped.
/// Restorations still running when the script ends (or stops) are awaited.
pub async fn run_script<R: AsyncBufRead + Unpin>(
    executor: &CommandExecutor,
    input: R,
    transcript: &mut dyn Transcript,
    on_error: OnError,
) -> Result<ScriptSummary, CliError> {
    let mut lines = input.lines();
    let mut summary = ScriptSummary::default();
    let mut number = 0;

    while let Some(line) = lines.next_line().await? {
        number += 1;
        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        summary.executed += 1;

        match executor.execute_line(command).await {
            Ok(text) => transcript.output(&text),
            Err(e) => {
                summary.failed += 1;
                let failure = CliError::Command {
                    line: number,
                    command: command.to_string(),
                    message: e.to_string(),
                };
                transcript.failure(&format!("Error: {}", failure));
                if on_error == OnError::Stop {
                    let results = executor.handler().wait_restorations().await;
                    report_restorations(results, transcript);
                    return Err(failure);
                }
            }
        }
    }

    let results = executor.handler().wait_restorations().await;
    summary.restorations = report_restorations(results, transcript);
    Ok(summary)
}

pub async fn run_file(
    executor: &CommandExecutor,
    path: &Path,
    transcript: &mut dyn Transcript,
    on_error: OnError,
) -> Result<ScriptSummary, CliError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| CliError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    run_script(executor, BufReader::new(file), transcript, on_error).await
}

/// Interactive session until EOF, Ctrl-C or an exit command. Failed commands
/// are reported and the session goes on.
pub async fn run_repl<R: AsyncBufRead + Unpin>(
    executor: &CommandExecutor,
    input: R,
    transcript: &mut dyn Transcript,
) -> Result<(), CliError> {
    transcript.output(BANNER);
    let mut lines = input.lines();

    loop {
        transcript.prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let command = line.trim();
        if EXIT_COMMANDS.contains(&command) {
            break;
        }
        if !command.is_empty() {
            match executor.execute_line(command).await {
                Ok(text) => transcript.output(&text),
                Err(e) => transcript.failure(&format!("Error: {}", e)),
            }
        }
        let finished = executor.handler().finished_restorations().await;
        report_restorations(finished, transcript);
    }

    let results = executor.handler().wait_restorations().await;
    report_restorations(results, transcript);
    Ok(())
}

fn report_restorations(
    results: Vec<Result<RestoreReport, CoreError>>,
    transcript: &mut dyn Transcript,
) -> usize {
    let count = results.len();
    for result in results {
        match result {
            Ok(report) => transcript.output(&format!("Restored: {}", report)),
            Err(e) => transcript.failure(&format!("Restoration failed: {}", e)),
        }
    }
    count
}
