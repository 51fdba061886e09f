use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "reforge")]
#[command(about = "Iterative, validated transformation and debugging of Python code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Perform a dry run without calling the generation service")]
    dry_run: bool,

    #[arg(long, global = true, help = "Model used for every agent, overriding the registry")]
    model: Option<String>,

    #[arg(long, global = true, default_value_t = 60, help = "Generation timeout in seconds")]
    timeout: u64,

    #[arg(long, global = true, help = "Directory holding agent prompts and model_registry.yml")]
    agents_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Do not save a JSON report under .reforge/reports")]
    no_report: bool,
}

#[derive(Args)]
struct RequestArgs {
    #[arg(short, long, help = "What the transformation should achieve")]
    query: String,

    #[arg(long, help = "Force an intent (performance, memory, readability, maintainability, security, general)")]
    intent: Option<String>,

    #[arg(long, default_value_t = 3, help = "Maximum generate/validate iterations")]
    max_iterations: u32,

    #[arg(long, help = "Allow function and class signatures to change")]
    allow_signature_changes: bool,
}

impl From<RequestArgs> for cli::RequestOptions {
    fn from(args: RequestArgs) -> Self {
        cli::RequestOptions {
            query: args.query,
            intent: args.intent,
            max_iterations: args.max_iterations,
            allow_signature_changes: args.allow_signature_changes,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Transform a file toward the goal stated in the query")]
    Optimize {
        #[arg(help = "Python source file")]
        file: PathBuf,
        #[command(flatten)]
        request: RequestArgs,
        #[arg(short, long, help = "Write the transformed code here instead of stdout")]
        output: Option<PathBuf>,
    },

    #[command(about = "Run every intent on a file and keep the best result")]
    Compare {
        #[arg(help = "Python source file")]
        file: PathBuf,
        #[command(flatten)]
        request: RequestArgs,
        #[arg(short, long, help = "Write the best transformed code here instead of stdout")]
        output: Option<PathBuf>,
    },

    #[command(about = "Check, optimize and re-check the code of a JSON job file")]
    Json {
        #[arg(help = "JSON file with 'code' and 'query' fields")]
        file: PathBuf,
        #[arg(short, long, help = "Write the JSON result here instead of stdout")]
        output: Option<PathBuf>,
    },

    #[command(about = "Report syntax, metrics and static-analysis findings for a file")]
    Check {
        #[arg(help = "Python source file")]
        file: PathBuf,
        #[arg(long, help = "Also request a generated review")]
        review: bool,
    },

    #[command(about = "Diagnose a runtime error and propose a patch")]
    #[command(group(ArgGroup::new("capture").required(true).args(["traceback", "run"])))]
    Debug {
        #[arg(help = "Python source file")]
        file: PathBuf,
        #[arg(long, help = "File holding the traceback of a failed run")]
        traceback: Option<PathBuf>,
        #[arg(long, help = "Run the file with Python and capture the failure")]
        run: bool,
        #[arg(long, help = "Python interpreter used with --run (default python3)")]
        python: Option<String>,
        #[arg(short, long, help = "Write the patched code here instead of stdout")]
        output: Option<PathBuf>,
    },

    #[command(about = "Transform several files with one framework instance")]
    Batch {
        #[arg(required = true, help = "Python source files")]
        files: Vec<PathBuf>,
        #[command(flatten)]
        request: RequestArgs,
        #[arg(long, help = "Directory receiving the accepted files")]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reforge={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli::Config {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        model: cli.model,
        timeout: Duration::from_secs(cli.timeout),
        agents_dir: cli.agents_dir,
        save_reports: !cli.no_report,
    };

    match cli.command {
        Commands::Optimize { file, request, output } => {
            cli::optimize(file, request.into(), output, &config).await?;
        }
        Commands::Compare { file, request, output } => {
            cli::compare(file, request.into(), output, &config).await?;
        }
        Commands::Json { file, output } => {
            cli::json_job(file, output, &config).await?;
        }
        Commands::Check { file, review } => {
            cli::check(file, review, &config).await?;
        }
        Commands::Debug {
            file,
            traceback,
            run: _,
            python,
            output,
        } => {
            cli::debug(file, traceback, python, output, &config).await?;
        }
        Commands::Batch {
            files,
            request,
            output_dir,
        } => {
            cli::batch(files, request.into(), output_dir, &config).await?;
        }
    }

    Ok(())
}
