//! Formatter and linter boundary.
//!
//! External tools run as child processes; when one is missing or fails, the
//! chain falls through to the built-in implementation. Callers treat a
//! final `ToolError` as "skip this step".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

use super::analyzer::find_smells;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    NotAvailable(String),
    Failed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ToolError::NotAvailable(tool) => write!(f, "Tool '{}' is not available", tool),
            ToolError::Failed(details) => write!(f, "Tool failed: {}", details),
        }
    }
}

impl std::error::Error for ToolError {}

/// One static-analysis finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based; 0 when the tool gave no line
    pub line: usize,
    pub message: String,
    pub tool: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.message, self.tool)
    }
}

pub trait Formatter: Send + Sync {
    fn name(&self) -> &str;
    fn format(&self, code: &str) -> Result<String, ToolError>;
}

pub trait Linter: Send + Sync {
    fn name(&self) -> &str;
    fn lint(&self, code: &str) -> Result<Vec<Diagnostic>, ToolError>;
}

/// Strips trailing whitespace, collapses runs of blank lines to two and
/// ends the text with exactly one newline
pub struct WhitespaceFormatter;

impl Formatter for WhitespaceFormatter {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn format(&self, code: &str) -> Result<String, ToolError> {
        let mut out: Vec<&str> = Vec::new();
        let mut blank_run = 0;
        for line in code.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 2 || out.is_empty() {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            out.push(line);
        }
        while out.last().is_some_and(|l| l.is_empty()) {
            out.pop();
        }
        let mut formatted = out.join("\n");
        formatted.push('\n');
        Ok(formatted)
    }
}

/// `black -q -`
pub struct BlackFormatter {
    command: String,
    timeout: Duration,
}

impl BlackFormatter {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.unwrap_or_else(|| "black".to_string()),
            timeout: TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Formatter for BlackFormatter {
    fn name(&self) -> &str {
        "black"
    }

    fn format(&self, code: &str) -> Result<String, ToolError> {
        let output = run_with_stdin(&self.command, &["-q", "-"], code, self.timeout)?;
        if !output.status.success() {
            return Err(ToolError::Failed(format!(
                "black exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| ToolError::Failed(format!("Invalid UTF-8 from black: {}", e)))
    }
}

/// Diagnostics derived from the built-in smell detector
pub struct SmellLinter;

impl Linter for SmellLinter {
    fn name(&self) -> &str {
        "smells"
    }

    fn lint(&self, code: &str) -> Result<Vec<Diagnostic>, ToolError> {
        Ok(find_smells(code)
            .into_iter()
            .map(|smell| Diagnostic {
                line: smell.line,
                message: smell.message,
                tool: "smells".to_string(),
            })
            .collect())
    }
}

/// `python3 -m pyflakes` reading the code from stdin
pub struct PyflakesLinter {
    python: String,
    timeout: Duration,
}

impl PyflakesLinter {
    pub fn new(python: Option<String>) -> Self {
        Self {
            python: python.unwrap_or_else(|| "python3".to_string()),
            timeout: TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Linter for PyflakesLinter {
    fn name(&self) -> &str {
        "pyflakes"
    }

    fn lint(&self, code: &str) -> Result<Vec<Diagnostic>, ToolError> {
        let output = run_with_stdin(&self.python, &["-m", "pyflakes"], code, self.timeout)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No module named") {
            return Err(ToolError::NotAvailable("pyflakes".to_string()));
        }
        // exit status 1 only means "warnings found"
        if !output.status.success() && stdout.trim().is_empty() && stderr.trim().is_empty() {
            return Err(ToolError::Failed(format!("pyflakes exited with {}", output.status)));
        }
        Ok(parse_pyflakes(&format!("{}\n{}", stdout, stderr)))
    }
}

fn parse_pyflakes(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let cap = pyflakes_re().captures(line)?;
            Some(Diagnostic {
                line: cap.get(1)?.as_str().parse().unwrap_or(0),
                message: cap.get(2)?.as_str().trim().to_string(),
                tool: "pyflakes".to_string(),
            })
        })
        .collect()
}

fn pyflakes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<stdin>:(\d+):(?:\d+:?)?\s*(.+)$").expect("valid regex"))
}

/// Upper bound on one external tool run
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn run_with_stdin(
    program: &str,
    args: &[&str],
    input: &str,
    timeout: Duration,
) -> Result<Output, ToolError> {
    debug!(program, ?args, ?timeout, "spawning tool");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|_| ToolError::NotAvailable(program.to_string()))?;

    // Pipes are drained on their own threads so a chatty tool cannot
    // block on a full buffer while we wait for it
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.as_bytes().to_vec();
        thread::spawn(move || stdin.write_all(&input))
    });
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Failed(format!(
                    "{} timed out after {:?}",
                    program, timeout
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(ToolError::Failed(format!("Failed to wait for {}: {}", program, e)));
            }
        }
    };

    if let Some(Ok(Err(e))) = writer.map(JoinHandle::join) {
        // a tool may exit before reading all of its input
        debug!(program, error = %e, "stdin write incomplete");
    }
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|handle| handle.join().ok()).unwrap_or_default()
}

/// Runs `formatter` on the blocking pool so a slow tool never stalls the
/// async runtime
pub async fn format_blocking(formatter: Arc<dyn Formatter>, code: String) -> Result<String, ToolError> {
    tokio::task::spawn_blocking(move || formatter.format(&code))
        .await
        .map_err(|e| ToolError::Failed(format!("formatter task failed: {}", e)))?
}

/// Runs `linter` on the blocking pool
pub async fn lint_blocking(linter: Arc<dyn Linter>, code: String) -> Result<Vec<Diagnostic>, ToolError> {
    tokio::task::spawn_blocking(move || linter.lint(&code))
        .await
        .map_err(|e| ToolError::Failed(format!("linter task failed: {}", e)))?
}

/// Tries each formatter in order; the first success wins
#[derive(Clone)]
pub struct FormatterChain {
    formatters: Vec<Arc<dyn Formatter>>,
}

impl FormatterChain {
    pub fn new(formatters: Vec<Arc<dyn Formatter>>) -> Self {
        Self { formatters }
    }

    /// black, falling back to whitespace cleanup
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(BlackFormatter::new(None)),
            Arc::new(WhitespaceFormatter),
        ])
    }
}

impl Formatter for FormatterChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn format(&self, code: &str) -> Result<String, ToolError> {
        let mut last = ToolError::NotAvailable("formatter".to_string());
        for formatter in &self.formatters {
            match formatter.format(code) {
                Ok(formatted) => return Ok(formatted),
                Err(e) => {
                    debug!(formatter = formatter.name(), error = %e, "formatter skipped");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// Tries each linter in order; the first success wins
#[derive(Clone)]
pub struct LinterChain {
    linters: Vec<Arc<dyn Linter>>,
}

impl LinterChain {
    pub fn new(linters: Vec<Arc<dyn Linter>>) -> Self {
        Self { linters }
    }

    /// pyflakes, falling back to the smell detector
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(PyflakesLinter::new(None)),
            Arc::new(SmellLinter),
        ])
    }
}

impl Linter for LinterChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn lint(&self, code: &str) -> Result<Vec<Diagnostic>, ToolError> {
        let mut last = ToolError::NotAvailable("linter".to_string());
        for linter in &self.linters {
            match linter.lint(code) {
                Ok(diagnostics) => return Ok(diagnostics),
                Err(e) => {
                    debug!(linter = linter.name(), error = %e, "linter skipped");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::validator::validate_syntax;

    struct Broken;

    impl Formatter for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn format(&self, _code: &str) -> Result<String, ToolError> {
            Err(ToolError::Failed("always".to_string()))
        }
    }

    #[test]
    fn test_whitespace_formatter() {
        let code = "\n\ndef f():   \n    return 1\t\n\n\n\n\nx = f()\n\n";
        let formatted = WhitespaceFormatter.format(code).unwrap();
        assert_eq!(formatted, "def f():\n    return 1\n\n\nx = f()\n");
    }

    #[test]
    fn test_formatting_keeps_valid_code_valid() {
        let code = "def s(n):   \n    return sum(n)   \n\n\n\n\n";
        assert!(validate_syntax(code).ok);
        let formatted = WhitespaceFormatter.format(code).unwrap();
        assert!(validate_syntax(&formatted).ok);
    }

    #[test]
    fn test_chain_falls_back() {
        let chain = FormatterChain::new(vec![Arc::new(Broken), Arc::new(WhitespaceFormatter)]);
        assert_eq!(chain.format("x = 1   ").unwrap(), "x = 1\n");
    }

    #[test]
    fn test_chain_reports_last_error() {
        let chain = FormatterChain::new(vec![Arc::new(Broken)]);
        assert!(matches!(chain.format("x = 1"), Err(ToolError::Failed(_))));
    }

    #[test]
    fn test_missing_program_is_not_available() {
        let formatter = BlackFormatter::new(Some("reforge-no-such-formatter".to_string()));
        assert!(matches!(formatter.format("x = 1"), Err(ToolError::NotAvailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_tool_is_killed_at_deadline() {
        let started = Instant::now();
        let outcome = run_with_stdin("sleep", &["5"], "", Duration::from_millis(100));
        match outcome {
            Err(ToolError::Failed(details)) => assert!(details.contains("timed out")),
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_tool_output_is_collected() {
        let output = run_with_stdin("cat", &[], "x = 1\n", TOOL_TIMEOUT).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"x = 1\n");
    }

    #[tokio::test]
    async fn test_blocking_helpers_run_off_the_runtime() {
        let formatted = format_blocking(Arc::new(WhitespaceFormatter), "x = 1   ".to_string())
            .await
            .unwrap();
        assert_eq!(formatted, "x = 1\n");
        let diagnostics = lint_blocking(Arc::new(SmellLinter), "x = 1\n".to_string())
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_smell_linter_reports_lines() {
        let code = format!("x = 1\n{}\n", "y = 'a'".repeat(20));
        let diagnostics = SmellLinter.lint(&code).unwrap();
        assert!(diagnostics.iter().any(|d| d.line == 2 && d.tool == "smells"));
    }

    #[test]
    fn test_parse_pyflakes_output() {
        let output = "<stdin>:1:1: 'os' imported but unused\n<stdin>:3: undefined name 'y'\n";
        let diagnostics = parse_pyflakes(output);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].line, 1);
        assert_eq!(diagnostics[0].message, "'os' imported but unused");
        assert_eq!(diagnostics[1].line, 3);
        assert_eq!(diagnostics[1].message, "undefined name 'y'");
    }
}
