mod agent_runner;
mod agents;
mod analyzer;
mod capture;
mod code_tools;
mod debugger;
mod generation;
mod pattern_patcher;
mod response_parser;
mod session_store;
mod syntax_tree;
mod transformation_loop;
mod validator;

pub use agent_runner::{
    replace_placeholders, AgentModelRegistry, AgentRegistry, AgentRunner, AgentRunnerError, Model,
    PopulateError, RegistryError,
};
pub use agents::{
    builtin_template, Agent, DebugPrompt, ReviewPrompt, TransformPrompt, BATCH_AGENT,
    DEBUGGER_AGENT, REVIEW_AGENT,
};
pub use analyzer::{analyze, find_smells, MAX_LINE_LENGTH};
pub use capture::{run_and_capture, run_python_script, IntoErrorContext, ScriptFailure};
pub use code_tools::{
    BlackFormatter, Diagnostic, Formatter, FormatterChain, Linter, LinterChain, PyflakesLinter,
    SmellLinter, ToolError, WhitespaceFormatter,
};
pub use debugger::{CheckReport, Debugger};
pub use generation::{
    generate_bounded, GenerationError, GenerationOptions, Generator, GroqGenerator,
    DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT,
};
pub use pattern_patcher::{patch, PatchOutcome, PATCH_CATEGORY};
pub use response_parser::{extract_changes, parse, ParsedResponse};
pub use session_store::{session_id, SessionStore};
pub use transformation_loop::{
    assemble_changes, assess_candidate, Assessment, Comparison, LoopState, TransformError,
    TransformationLoop, CONFIDENCE_FLOOR,
};
pub use validator::{
    check_preservation, extract_signatures, validate_syntax, PreservationReport, Signature,
    SignatureKind, SyntaxVerdict,
};
