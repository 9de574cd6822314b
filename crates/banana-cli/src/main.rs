use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use banana_contracts::events::EventLog;
use banana_contracts::metadata;
use banana_contracts::models::ModelRegistry;
use banana_engine::{
    cleanup, cost, run_generation, GeminiConfig, GeminiGenerator, GenerateOptions,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const CLEAN_USAGE: &str =
    "find session files and report sizes (add -f to delete)\nusage: banana clean [-f] <directory>";

#[derive(Debug, Parser)]
#[command(
    name = "banana",
    version,
    about = "Generate and iteratively edit images from the command line"
)]
struct Cli {
    /// Debug logging on stderr. BANANA_LOG takes precedence when set.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image, optionally continuing an earlier session.
    Generate(GenerateArgs),
    /// Print the metadata embedded in a generated PNG.
    Meta(MetaArgs),
    /// Estimate spend for a session file or a directory of sessions.
    Cost(CostArgs),
    /// List session files in a directory; with -f, delete them.
    Clean(CleanArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(short, long)]
    prompt: String,
    #[arg(short, long)]
    output: PathBuf,
    /// Reference image; repeat for several.
    #[arg(short = 'i', long = "input")]
    inputs: Vec<PathBuf>,
    /// Session file to continue from. It is never modified.
    #[arg(short, long)]
    session: Option<PathBuf>,
    /// Where to write the new session (default: next to the output).
    #[arg(long)]
    session_out: Option<PathBuf>,
    #[arg(short, long, default_value = "flash")]
    model: String,
    #[arg(short, long, default_value = "1:1")]
    ratio: String,
    /// Output size: 1K, 2K or 4K.
    #[arg(short = 'z', long)]
    size: Option<String>,
    /// Overwrite an existing output or session file.
    #[arg(short, long)]
    force: bool,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct MetaArgs {
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct CostArgs {
    /// A session file or a directory of them.
    target: PathBuf,
}

#[derive(Debug, Parser)]
struct CleanArgs {
    /// Delete the validated session files instead of listing them.
    #[arg(short, long)]
    force: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Directory to scan. Anything after it is rejected, including -f.
    #[arg(value_name = "DIRECTORY", required = true, num_args = 1.., trailing_var_arg = true)]
    targets: Vec<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("banana: {}", error_chain(&err));
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let registry = ModelRegistry::builtin();
    match cli.command {
        Command::Generate(args) => run_generate(&registry, args),
        Command::Meta(args) => run_meta(&args),
        Command::Cost(args) => run_cost(&registry, &args),
        Command::Clean(args) => run_clean(&registry, &args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("BANANA_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_generate(registry: &ModelRegistry, args: GenerateArgs) -> Result<i32> {
    let events = args.events.as_ref().map(EventLog::new);
    let options = GenerateOptions {
        prompt: args.prompt,
        output: args.output,
        inputs: args.inputs,
        session: args.session,
        session_out: args.session_out,
        model: args.model,
        ratio: args.ratio,
        size: args.size,
        force: args.force,
    };

    let generator = GeminiGenerator::new(GeminiConfig::from_env()?)
        .context("failed to set up the generation client")?;
    let outcome = run_generation(registry, &generator, &options, events.as_ref())?;

    if !outcome.text.is_empty() {
        println!("{}", outcome.text);
    }
    eprintln!(
        "saved {} ({} bytes)",
        outcome.output.display(),
        outcome.output_bytes
    );
    eprintln!("session: {}", outcome.session.display());
    Ok(0)
}

fn run_meta(args: &MetaArgs) -> Result<i32> {
    let record = metadata::inspect(&args.image)?;
    print!("{}", metadata::report(&record));
    Ok(0)
}

fn run_cost(registry: &ModelRegistry, args: &CostArgs) -> Result<i32> {
    let meta = std::fs::metadata(&args.target)
        .with_context(|| format!("cannot access {}", args.target.display()))?;
    if !meta.is_dir() {
        let breakdown = cost::analyze(registry, &args.target)?;
        print!("{}", cost::render_file(&breakdown));
        return Ok(0);
    }

    let report = cost::analyze_dir(registry, &args.target)?;
    for (path, err) in &report.skipped {
        eprintln!("skip {}: {err}", file_label(path));
    }
    if report.rows.is_empty() {
        eprintln!("no session files found");
        return Ok(0);
    }
    print!("{}", cost::render_dir(&report));
    Ok(0)
}

fn run_clean(registry: &ModelRegistry, args: &CleanArgs) -> Result<i32> {
    let dir = Path::new(clean_directory(&args.targets)?);
    let scan = cleanup::scan(registry, dir)?;
    for (path, err) in &scan.skipped {
        eprintln!("skip {}: {err}", path.display());
    }
    if scan.candidates.is_empty() {
        eprintln!("no session files found");
        return Ok(0);
    }

    print!("{}", cleanup::render_candidates(&scan));
    if !args.force {
        print!("{}", cleanup::render_dry_run(&scan));
        return Ok(0);
    }

    let events = args.events.as_ref().map(EventLog::new);
    let outcome = cleanup::delete_candidates(&scan, events.as_ref());
    for (path, err) in &outcome.failures {
        eprintln!("failed to delete {}: {err}", path.display());
    }
    print!("{}", cleanup::render_outcome(&scan, &outcome));
    Ok(0)
}

/// The one directory `clean` operates on. A flag typed after the directory
/// would otherwise be swallowed as a second target and nothing deleted.
fn clean_directory(targets: &[String]) -> Result<&str> {
    match targets {
        [dir] => Ok(dir.as_str()),
        [_, rest @ ..] if rest.iter().any(|arg| arg == "-f" || arg == "--force") => {
            bail!("flag -f must appear before the directory\n{CLEAN_USAGE}")
        }
        _ => bail!("{CLEAN_USAGE}"),
    }
}

/// The error and its causes, joined by ": ". Causes whose text the message
/// already carries are not repeated.
fn error_chain(err: &anyhow::Error) -> String {
    let mut message = err.to_string();
    for cause in err.chain().skip(1) {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
    }
    message
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
