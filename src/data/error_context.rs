use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Runtime error taxonomy understood by the pattern patcher
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    UndefinedName,
    DivisionByZero,
    IndexOutOfRange,
    MissingAttribute,
    ImportFailure,
    /// Anything else, keeping the raised exception name
    Other(String),
}

impl ErrorKind {
    /// Maps a Python exception name to a kind
    pub fn from_exception(name: &str) -> ErrorKind {
        let short = name.rsplit('.').next().unwrap_or(name);
        match short {
            "NameError" | "UnboundLocalError" => ErrorKind::UndefinedName,
            "ZeroDivisionError" => ErrorKind::DivisionByZero,
            "IndexError" => ErrorKind::IndexOutOfRange,
            "AttributeError" => ErrorKind::MissingAttribute,
            "ImportError" | "ModuleNotFoundError" => ErrorKind::ImportFailure,
            other => ErrorKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::UndefinedName => "undefined-name",
            ErrorKind::DivisionByZero => "division-by-zero",
            ErrorKind::IndexOutOfRange => "index-out-of-range",
            ErrorKind::MissingAttribute => "missing-attribute",
            ErrorKind::ImportFailure => "import-failure",
            ErrorKind::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    /// Accepts both taxonomy names (`index-out-of-range`) and exception
    /// names (`IndexError`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim() {
            "undefined-name" => ErrorKind::UndefinedName,
            "division-by-zero" => ErrorKind::DivisionByZero,
            "index-out-of-range" => ErrorKind::IndexOutOfRange,
            "missing-attribute" => ErrorKind::MissingAttribute,
            "import-failure" => ErrorKind::ImportFailure,
            other => ErrorKind::from_exception(other),
        };
        Ok(kind)
    }
}

/// Snapshot of a failure, captured at the moment it happened.
///
/// Holds copies only; nothing here refers back into the failed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub message: String,
    pub line_text: String,
    /// 1-based line in `source`; 0 when unknown
    pub line_number: usize,
    pub function_name: Option<String>,
    /// Local variable name -> repr string
    pub locals: BTreeMap<String, String>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<String>,
        line_number: usize,
    ) -> Self {
        let source = source.into();
        let line_text = line_at(&source, line_number).unwrap_or_default();
        Self {
            kind,
            message: message.into(),
            line_text,
            line_number,
            function_name: None,
            locals: BTreeMap::new(),
            source,
            timestamp: Utc::now(),
        }
    }

    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, repr: impl Into<String>) -> Self {
        self.locals.insert(name.into(), repr.into());
        self
    }

    /// Builds a context from a Python traceback printed on stderr.
    ///
    /// Uses the innermost frame that belongs to `script` and whose line
    /// falls inside `source`. Without a script path, frames from the
    /// standard library, site-packages and frozen modules are skipped.
    /// Returns `None` when no exception line can be found.
    pub fn from_traceback(
        source: &str,
        script: Option<&Path>,
        traceback: &str,
    ) -> Option<ErrorContext> {
        let line_count = source.lines().count();
        let mut frame: Option<(usize, String)> = None;
        for cap in frame_re().captures_iter(traceback) {
            let file = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            let line = cap
                .get(2)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .unwrap_or(0);
            if line == 0 || line > line_count || !frame_in_script(file, script) {
                continue;
            }
            let function = cap.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
            frame = Some((line, function));
        }

        let (exception, message) = traceback
            .lines()
            .rev()
            .map(str::trim_end)
            .filter(|l| !l.is_empty() && !l.starts_with(' '))
            .find_map(|l| {
                let cap = exception_re().captures(l)?;
                let name = cap.get(1)?.as_str().to_string();
                let message = cap.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
                Some((name, message))
            })?;

        let (line_number, function) = frame.unwrap_or((0, String::new()));
        let mut ctx = ErrorContext::new(
            ErrorKind::from_exception(&exception),
            message,
            source,
            line_number,
        );
        if !function.is_empty() && function != "<module>" {
            ctx = ctx.with_function(function);
        }
        Some(ctx)
    }
}

fn frame_in_script(file: &str, script: Option<&Path>) -> bool {
    match script {
        Some(script) => {
            let frame_path = Path::new(file);
            frame_path == script
                || (frame_path.file_name().is_some() && frame_path.file_name() == script.file_name())
        }
        None => !(file.starts_with('<')
            || file.contains("site-packages")
            || file.contains("dist-packages")
            || file.contains("/lib/python")
            || file.contains("\\Lib\\")),
    }
}

fn line_at(source: &str, line_number: usize) -> Option<String> {
    if line_number == 0 {
        return None;
    }
    source.lines().nth(line_number - 1).map(|l| l.to_string())
}

fn frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*File "([^"]*)", line (\d+), in (\S+)"#).expect("valid regex")
    })
}

fn exception_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][\w.]*(?:Error|Exception|Warning|Exit|Interrupt))(?::\s*(.*))?$")
            .expect("valid regex")
    })
}

/// A proposed fix for a captured error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSuggestion {
    pub analysis: String,
    pub proposed_fix: String,
    pub rationale: String,
    pub confidence: f64,
    /// Ordered, may be empty
    pub alternatives: Vec<String>,
    pub patched_code: String,
    /// True when a deterministic patch was applied mechanically
    pub patch_applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One debugging invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub context: ErrorContext,
    pub suggestion: PatchSuggestion,
    pub status: SessionStatus,
    pub notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "def f(lst):\n    return lst[10]\n\nf([1, 2, 3])\n";

    #[test]
    fn test_from_traceback() {
        let traceback = r#"Traceback (most recent call last):
  File "demo.py", line 4, in <module>
    f([1, 2, 3])
  File "demo.py", line 2, in f
    return lst[10]
           ~~~^^^^
IndexError: list index out of range
"#;
        let ctx = ErrorContext::from_traceback(SOURCE, Some(Path::new("demo.py")), traceback).unwrap();
        assert_eq!(ctx.kind, ErrorKind::IndexOutOfRange);
        assert_eq!(ctx.message, "list index out of range");
        assert_eq!(ctx.line_number, 2);
        assert_eq!(ctx.line_text, "    return lst[10]");
        assert_eq!(ctx.function_name.as_deref(), Some("f"));
    }

    #[test]
    fn test_from_traceback_without_exception() {
        assert!(ErrorContext::from_traceback(SOURCE, None, "all good\n").is_none());
    }

    #[test]
    fn test_from_traceback_skips_library_frames() {
        let source = "import statistics\n\nstatistics.mean([])\n";
        let traceback = r#"Traceback (most recent call last):
  File "/home/me/stats_demo.py", line 3, in <module>
    statistics.mean([])
  File "/usr/lib/python3.12/statistics.py", line 432, in mean
    raise StatisticsError('mean requires at least one data point')
statistics.StatisticsError: mean requires at least one data point
"#;
        let ctx = ErrorContext::from_traceback(
            source,
            Some(Path::new("stats_demo.py")),
            traceback,
        )
        .unwrap();
        assert_eq!(ctx.line_number, 3);
        assert_eq!(ctx.line_text, "statistics.mean([])");
        assert!(ctx.function_name.is_none());

        let ctx = ErrorContext::from_traceback(source, None, traceback).unwrap();
        assert_eq!(ctx.line_number, 3);
    }

    #[test]
    fn test_from_traceback_ignores_foreign_frame_inside_source_range() {
        let source = "import json\na = 1 / 0\njson.loads(\"{\")\n";
        let traceback = r#"Traceback (most recent call last):
  File "/tmp/job.py", line 3, in <module>
    json.loads("{")
  File "/usr/lib/python3.12/json/__init__.py", line 1, in loads
    return _default_decoder.decode(s)
json.decoder.JSONDecodeError: Expecting property name enclosed in double quotes: line 1 column 2 (char 1)
"#;
        for script in [Some(Path::new("/tmp/job.py")), None] {
            let ctx = ErrorContext::from_traceback(source, script, traceback).unwrap();
            assert_eq!(ctx.line_number, 3);
            assert_eq!(ctx.line_text, "json.loads(\"{\")");
            assert!(ctx.function_name.is_none());
        }
    }

    #[test]
    fn test_from_traceback_without_matching_frame_has_no_line() {
        let traceback = "Traceback (most recent call last):\n  File \"other.py\", line 2, in g\n    x\nNameError: name 'x' is not defined\n";
        let ctx = ErrorContext::from_traceback(SOURCE, Some(Path::new("demo.py")), traceback).unwrap();
        assert_eq!(ctx.kind, ErrorKind::UndefinedName);
        assert_eq!(ctx.line_number, 0);
        assert_eq!(ctx.line_text, "");
    }

    #[test]
    fn test_error_kind_parsing() {
        assert_eq!("NameError".parse::<ErrorKind>().unwrap(), ErrorKind::UndefinedName);
        assert_eq!(
            "division-by-zero".parse::<ErrorKind>().unwrap(),
            ErrorKind::DivisionByZero
        );
        assert_eq!(
            "KeyError".parse::<ErrorKind>().unwrap(),
            ErrorKind::Other("KeyError".to_string())
        );
        assert_eq!(
            ErrorKind::from_exception("builtins.ModuleNotFoundError"),
            ErrorKind::ImportFailure
        );
    }

    #[test]
    fn test_context_line_text() {
        let ctx = ErrorContext::new(ErrorKind::IndexOutOfRange, "boom", SOURCE, 2)
            .with_local("lst", "[1, 2, 3]");
        assert_eq!(ctx.line_text, "    return lst[10]");
        assert_eq!(ctx.locals.get("lst").map(String::as_str), Some("[1, 2, 3]"));
    }
}
