//! Lookup of the active Python interpreter's version.
//!
//! Used when a notebook without metadata is saved: the synthesized
//! `language_info` records the interpreter's major version.

use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use regex::Regex;

/// Major version used when no interpreter can be queried.
pub const FALLBACK_PYTHON_MAJOR: i64 = 3;

/// Source of the interpreter version for new notebooks.
pub trait InterpreterInfo: Send + Sync {
    fn major_version(&self) -> BoxFuture<'_, Option<i64>>;
}

/// A fixed answer, for embedding hosts that already know the interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedInterpreter(pub Option<i64>);

impl InterpreterInfo for FixedInterpreter {
    fn major_version(&self) -> BoxFuture<'_, Option<i64>> {
        futures::future::ready(self.0).boxed()
    }
}

/// Queries `<program> --version`.
#[derive(Debug, Clone)]
pub struct PythonCommand {
    program: PathBuf,
}

impl PythonCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PythonCommand {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl InterpreterInfo for PythonCommand {
    fn major_version(&self) -> BoxFuture<'_, Option<i64>> {
        async move {
            let output = match tokio::process::Command::new(&self.program)
                .arg("--version")
                .kill_on_drop(true)
                .output()
                .await
            {
                Ok(output) if output.status.success() => output,
                Ok(output) => {
                    debug!(
                        "[interpreter] {:?} --version exited with {}",
                        self.program, output.status
                    );
                    return None;
                }
                Err(e) => {
                    debug!("[interpreter] Failed to run {:?}: {}", self.program, e);
                    return None;
                }
            };
            // Python 2 prints its version to stderr
            let text = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            parse_python_version(&text).map(|(major, _, _)| major)
        }
        .boxed()
    }
}

/// Parse `Python 3.11.4` style output into (major, minor, patch).
pub fn parse_python_version(text: &str) -> Option<(i64, i64, i64)> {
    let re = Regex::new(r"Python (\d+)\.(\d+)(?:\.(\d+))?").ok()?;
    let caps = re.captures(text)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    let patch = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    Some((major, minor, patch))
}
