use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod progress;

use progress::ProgressIndicator;
use reforge::contexts::{
    run_python_script, FormatterChain, GroqGenerator, IntoErrorContext, DEFAULT_TIMEOUT,
};
use reforge::data::{
    ErrorContext, TransformationIntent, TransformationRequest, TransformationResult,
    ALLOW_SIGNATURE_CHANGES, DEFAULT_MAX_ITERATIONS,
};
use reforge::report::TransformationReport;
use reforge::Reforge;

#[derive(Clone)]
pub struct Config {
    pub verbose: bool,
    pub dry_run: bool,
    pub model: Option<String>,
    pub timeout: Duration,
    pub agents_dir: Option<PathBuf>,
    pub save_reports: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            dry_run: false,
            model: None,
            timeout: DEFAULT_TIMEOUT,
            agents_dir: None,
            save_reports: true,
        }
    }
}

/// Request options shared by the optimising commands
#[derive(Clone, Debug)]
pub struct RequestOptions {
    pub query: String,
    pub intent: Option<String>,
    pub max_iterations: u32,
    pub allow_signature_changes: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            intent: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            allow_signature_changes: false,
        }
    }
}

const API_KEY_VAR: &str = "GROQ_API_KEY";
const BASE_URL_VAR: &str = "REFORGE_BASE_URL";
const DEFAULT_PYTHON: &str = "python3";

/// A JSON job file: `{ "code": ..., "query": ... }`
#[derive(Debug, Deserialize)]
struct JsonJob {
    code: String,
    query: String,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    max_iterations: Option<u32>,
}

pub async fn optimize(
    file: PathBuf,
    options: RequestOptions,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let code = read_source(&file)?;
    let request = build_request(code, &options)?;

    println!(
        "Optimizing {} for {} (max {} iteration(s))",
        file.display(),
        request.intent(),
        request.max_iterations()
    );

    if config.dry_run {
        println!("[DRY RUN] Would run the {} transformation loop", request.intent());
        return Ok(());
    }

    let framework = build_framework(config, true)?;
    let result = framework
        .optimize(&request)
        .await
        .with_context(|| format!("Failed to optimize {}", file.display()))?;

    println!("{}", result.summary());
    if config.verbose {
        print_attempts(&result);
    }
    save_report(&request, &result, config)?;

    if !result.is_accepted() {
        anyhow::bail!("No acceptable transformation for {}", file.display());
    }

    write_code(&result.final_code, output.as_deref(), config)?;
    println!("✓ Transformation accepted (confidence {:.2})", result.confidence);
    Ok(())
}

pub async fn compare(
    file: PathBuf,
    options: RequestOptions,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let code = read_source(&file)?;
    let request = build_request(code, &options)?;

    println!(
        "Comparing {} intent(s) on {}",
        TransformationIntent::ALL.len(),
        file.display()
    );

    if config.dry_run {
        println!("[DRY RUN] Would run one transformation loop per intent");
        return Ok(());
    }

    let framework = build_framework(config, true)?;
    let comparison = framework
        .compare_all(&request)
        .await
        .with_context(|| format!("Failed to compare intents on {}", file.display()))?;

    for result in &comparison.results {
        if result.is_accepted() {
            println!(
                "✓ {:<16} confidence {:.2}, {} change(s)",
                result.intent.as_str(),
                result.confidence,
                result.changes.len()
            );
        } else {
            let reason = result
                .failure()
                .map(|f| f.to_string())
                .unwrap_or_default();
            eprintln!("✗ {:<16} {}", result.intent.as_str(), reason);
        }
    }

    let best = comparison.into_best();
    println!("\nBest: {}", best.intent);
    println!("{}", best.summary());

    let best_request = request.clone().with_intent(best.intent);
    save_report(&best_request, &best, config)?;

    if !best.is_accepted() {
        anyhow::bail!("No intent produced an acceptable transformation");
    }
    write_code(&best.final_code, output.as_deref(), config)
}

/// Checks, optimises and re-checks the code of a JSON job file
pub async fn json_job(file: PathBuf, output: Option<PathBuf>, config: &Config) -> Result<()> {
    let content = fs::read_to_string(&file)
        .with_context(|| format!("Failed to read job file {}", file.display()))?;
    let job = parse_job(&content)
        .with_context(|| format!("Invalid job file {}", file.display()))?;

    let options = RequestOptions {
        query: job.query,
        intent: job.intent,
        max_iterations: job.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        allow_signature_changes: false,
    };
    let request = build_request(job.code, &options)?;

    if config.dry_run {
        println!(
            "[DRY RUN] Would check, optimize ({}) and re-check the code of {}",
            request.intent(),
            file.display()
        );
        return Ok(());
    }

    let framework = build_framework(config, true)?;
    let before = framework
        .check(request.code(), false)
        .await
        .context("Failed to check job code")?;
    let result = framework
        .optimize(&request)
        .await
        .context("Failed to optimize job code")?;
    let after = framework
        .check(&result.final_code, false)
        .await
        .context("Failed to check optimized code")?;

    let document = json!({
        "query": request.query(),
        "intent": request.intent(),
        "check_before": before,
        "result": result,
        "check_after": after,
    });
    let rendered = serde_json::to_string_pretty(&document).context("Failed to serialize job result")?;

    match output {
        Some(path) => {
            fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Job result written to: {}", path.display());
        }
        None => println!("{}", rendered),
    }
    save_report(&request, &result, config)
}

pub async fn check(file: PathBuf, review: bool, config: &Config) -> Result<()> {
    let code = read_source(&file)?;

    if config.dry_run && review {
        println!("[DRY RUN] Would check {} and request a review", file.display());
        return Ok(());
    }

    let framework = build_framework(config, review)?;
    let report = framework
        .check(&code, review)
        .await
        .with_context(|| format!("Failed to check {}", file.display()))?;

    println!("{}", report.render());
    if report.is_clean() {
        println!("✓ {} is clean", file.display());
    } else {
        eprintln!("✗ {} has findings", file.display());
    }
    Ok(())
}

pub async fn debug(
    file: PathBuf,
    traceback: Option<PathBuf>,
    python: Option<String>,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let source = read_source(&file)?;

    let ctx = match traceback {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read traceback {}", path.display()))?;
            ErrorContext::from_traceback(&source, Some(file.as_path()), &text)
                .with_context(|| format!("No Python traceback found in {}", path.display()))?
        }
        None => {
            let python = python.unwrap_or_else(|| DEFAULT_PYTHON.to_string());
            if config.dry_run {
                println!("[DRY RUN] Would run {} {} and diagnose any failure", python, file.display());
                return Ok(());
            }
            match run_python_script(&python, &file) {
                Ok(stdout) => {
                    if config.verbose {
                        print!("{}", stdout);
                    }
                    println!("✓ {} ran without errors", file.display());
                    return Ok(());
                }
                Err(failure) => failure.into_error_context(&source),
            }
        }
    };

    println!("Captured {} at line {}: {}", ctx.kind, ctx.line_number, ctx.message);

    if config.dry_run {
        println!("[DRY RUN] Would diagnose the captured error");
        return Ok(());
    }

    let framework = build_framework(config, true)?;
    let session = framework
        .debug(ctx)
        .await
        .context("Failed to diagnose error")?;
    let suggestion = &session.suggestion;

    println!("Session {} ({})", session.id, session.status);
    println!("Analysis:   {}", suggestion.analysis);
    println!("Fix:        {}", suggestion.proposed_fix);
    println!("Rationale:  {}", suggestion.rationale);
    println!("Confidence: {:.2}", suggestion.confidence);
    for alternative in &suggestion.alternatives {
        println!("  - {}", alternative);
    }
    if config.verbose {
        for note in &session.notes {
            println!("  note: {}", note);
        }
    }

    if suggestion.patched_code.trim().is_empty() || suggestion.patched_code == source {
        eprintln!("✗ No patch produced for {}", file.display());
        return Ok(());
    }
    if suggestion.patch_applied {
        println!("✓ Deterministic patch applied");
    }
    write_code(&suggestion.patched_code, output.as_deref(), config)
}

pub async fn batch(
    files: Vec<PathBuf>,
    options: RequestOptions,
    output_dir: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    if files.is_empty() {
        println!("No files to process");
        return Ok(());
    }

    println!("Optimizing {} file(s)", files.len());
    let mut progress = ProgressIndicator::new(files.len());

    let mut items = Vec::new();
    for file in &files {
        let name = file.display().to_string();
        let request = match read_source(file).and_then(|code| build_request(code, &options)) {
            Ok(request) => request,
            Err(e) => {
                progress.complete_item(&name, false, &e.to_string());
                continue;
            }
        };
        if config.dry_run {
            progress.skip_item(&name, &format!("[DRY RUN] would optimize for {}", request.intent()));
            continue;
        }
        progress.start_item(&name);
        items.push((name, request));
    }

    if !items.is_empty() {
        let requests: Vec<(PathBuf, TransformationRequest)> = items
            .iter()
            .map(|(name, request)| (PathBuf::from(name), request.clone()))
            .collect();

        let framework = build_framework(config, true)?;
        let outcomes = framework.batch(items).await.context("Batch run failed")?;

        for (outcome, (path, request)) in outcomes.into_iter().zip(requests) {
            match outcome.outcome {
                Ok(result) => {
                    save_report(&request, &result, config)?;
                    if result.is_accepted() {
                        if let Some(dir) = &output_dir {
                            let target = dir.join(path.file_name().unwrap_or(path.as_os_str()));
                            fs::create_dir_all(dir)
                                .with_context(|| format!("Failed to create {}", dir.display()))?;
                            write_code(&result.final_code, Some(&target), config)?;
                        }
                        progress.complete_item(
                            &outcome.name,
                            true,
                            &format!("{} (confidence {:.2})", result.intent, result.confidence),
                        );
                    } else {
                        let reason = result.failure().map(|f| f.to_string()).unwrap_or_default();
                        progress.complete_item(&outcome.name, false, &reason);
                    }
                }
                Err(e) => progress.complete_item(&outcome.name, false, &e.to_string()),
            }
        }
    }

    progress.finish();
    if progress.failed() > 0 {
        anyhow::bail!("{} file(s) were not transformed", progress.failed());
    }
    Ok(())
}

/// Builds the framework instance for one command
///
/// Ctrl-C cancels the in-flight generation call.
fn build_framework(config: &Config, require_key: bool) -> Result<Reforge> {
    let api_key = match std::env::var(API_KEY_VAR) {
        Ok(key) => key,
        Err(_) if !require_key => String::new(),
        Err(_) => anyhow::bail!("{} is not set (add it to the environment or .env)", API_KEY_VAR),
    };
    let base_url = std::env::var(BASE_URL_VAR).ok();
    let generator = GroqGenerator::new(api_key, base_url, config.timeout)
        .context("Failed to create generation client")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    Ok(Reforge::from_agents_dir(Arc::new(generator), config.agents_dir.clone())
        .with_timeout(config.timeout)
        .with_model_override(config.model.clone())
        .with_formatter(Arc::new(FormatterChain::standard()))
        .with_cancel(cancel_rx))
}

fn build_request(code: String, options: &RequestOptions) -> Result<TransformationRequest> {
    let mut request = TransformationRequest::new(code, options.query.clone())?;
    if let Some(intent) = &options.intent {
        request = request.with_intent(intent.parse()?);
    }
    request = request.with_max_iterations(options.max_iterations)?;
    if options.allow_signature_changes {
        request = request.with_constraint(ALLOW_SIGNATURE_CHANGES, json!(true));
    }
    Ok(request)
}

fn parse_job(content: &str) -> Result<JsonJob> {
    let job: JsonJob = serde_json::from_str(content).context("Expected an object with 'code' and 'query'")?;
    Ok(job)
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read source file {}", file.display()))
}

/// Writes code to `output`, or prints it when no path is given
fn write_code(code: &str, output: Option<&Path>, config: &Config) -> Result<()> {
    let Some(path) = output else {
        println!("\n{}", code.trim_end());
        return Ok(());
    };
    if config.dry_run {
        println!("[DRY RUN] Would write {}", path.display());
        return Ok(());
    }
    fs::write(path, code).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✓ Written to: {}", path.display());
    Ok(())
}

fn save_report(
    request: &TransformationRequest,
    result: &TransformationResult,
    config: &Config,
) -> Result<()> {
    if !config.save_reports {
        return Ok(());
    }
    let report = TransformationReport::new(request, result);
    let dir = TransformationReport::default_dir();
    if config.dry_run {
        println!("[DRY RUN] Would save report under {}", dir.display());
        return Ok(());
    }
    let path = report.save(&dir)?;
    if config.verbose {
        println!("✓ Report saved to: {}", path.display());
    }
    Ok(())
}

fn print_attempts(result: &TransformationResult) {
    for attempt in &result.attempts {
        match &attempt.rejection {
            Some(reason) => println!(
                "  iteration {}: {:?} ({:.2}) {}",
                attempt.iteration, attempt.outcome, attempt.confidence, reason
            ),
            None => println!(
                "  iteration {}: {:?} ({:.2})",
                attempt.iteration, attempt.outcome, attempt.confidence
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_with_explicit_intent() {
        let options = RequestOptions {
            query: "make it faster".to_string(),
            intent: Some("security".to_string()),
            max_iterations: 2,
            allow_signature_changes: true,
        };
        let request = build_request("x = 1\n".to_string(), &options).unwrap();
        assert_eq!(request.intent(), TransformationIntent::Security);
        assert_eq!(request.max_iterations(), 2);
        assert!(request.allows_signature_changes());
    }

    #[test]
    fn test_build_request_rejects_unknown_intent() {
        let options = RequestOptions {
            query: "anything".to_string(),
            intent: Some("speedy".to_string()),
            ..RequestOptions::default()
        };
        assert!(build_request("x = 1\n".to_string(), &options).is_err());
    }

    #[test]
    fn test_parse_job() {
        let job = parse_job(r#"{"code": "x = 1\n", "query": "tidy up", "max_iterations": 4}"#).unwrap();
        assert_eq!(job.query, "tidy up");
        assert_eq!(job.max_iterations, Some(4));
        assert!(job.intent.is_none());
        assert!(parse_job(r#"{"code": "x = 1"}"#).is_err());
    }

    #[test]
    fn test_write_code_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.py");
        write_code("x = 1\n", Some(&target), &Config::default()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "x = 1\n");
    }

    #[test]
    fn test_write_code_dry_run_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.py");
        let config = Config {
            dry_run: true,
            ..Config::default()
        };
        write_code("x = 1\n", Some(&target), &config).unwrap();
        assert!(!target.exists());
    }
}
