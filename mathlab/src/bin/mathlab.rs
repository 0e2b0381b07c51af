//! MathLab CLI - explain and chart a math question from the terminal
//!
//! Usage:
//!   mathlab <QUERY> [-o chart.svg] [--show-code] [--config <path>] [--verbose]
//!
//! Example:
//!   mathlab "Graph y = 3x - 2" -o line.svg --show-code

use anyhow::{Context, Result};
use colored::Colorize;
use mathlab::view::View;
use mathlab::{LabConfig, MathLab};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "mathlab.toml";
const DEFAULT_OUTPUT: &str = "chart.svg";

fn print_usage() {
    eprintln!(
        r#"
{} - Ask a math question, get an explanation and a chart

{}
    mathlab <QUERY> [OPTIONS]

{}
    <QUERY>    What you want to visualize

{}
    -o, --output <FILE>     Where to write the SVG chart (default: chart.svg)
    --show-code             Print the plot script the model wrote
    -c, --config <FILE>     Config file (default: mathlab.toml if present)
    -v, --verbose           Log pipeline steps
    -h, --help              Print this help message

{}
    mathlab "Graph y = 3x - 2"
    mathlab "Show me a circle with radius 5" -o circle.svg --show-code

{}
    GEMINI_API_KEY          API key for the default Gemini provider
"#,
        "MathLab CLI".bold(),
        "USAGE:".bold(),
        "ARGS:".bold(),
        "OPTIONS:".bold(),
        "EXAMPLES:".bold(),
        "ENVIRONMENT:".bold(),
    );
}

struct CliArgs {
    query: String,
    output: PathBuf,
    show_code: bool,
    config: Option<PathBuf>,
    verbose: bool,
}

fn parse_args() -> Result<CliArgs> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(if args.is_empty() { 1 } else { 0 });
    }

    let mut query: Option<String> = None;
    let mut output = PathBuf::from(DEFAULT_OUTPUT);
    let mut show_code = false;
    let mut config = None;
    let mut verbose = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--output" | "-o" => {
                output = iter.next().map(PathBuf::from).context("--output needs a file")?;
            }
            "--config" | "-c" => {
                config = Some(iter.next().map(PathBuf::from).context("--config needs a file")?);
            }
            "--show-code" => show_code = true,
            "--verbose" | "-v" => verbose = true,
            other if query.is_none() => query = Some(other.to_string()),
            other => anyhow::bail!("Unexpected argument: {}", other),
        }
    }

    Ok(CliArgs {
        // an empty query is allowed through so the lab reports it
        query: query.unwrap_or_default(),
        output,
        show_code,
        config,
        verbose,
    })
}

fn load_config(explicit: Option<&Path>) -> Result<LabConfig> {
    let path = match explicit {
        Some(p) => p,
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => return Ok(LabConfig::default()),
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    LabConfig::from_toml(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn print_view(view: &View, show_code: bool) {
    eprintln!();
    if let Some(explanation) = &view.explanation {
        eprintln!("{}", "Explanation:".bold());
        println!("{}", explanation.green());
        eprintln!();
    }

    if show_code {
        if let Some(code) = &view.code {
            eprintln!("{}", "Plot script:".bold());
            for line in code.lines() {
                eprintln!("  {}", line.yellow());
            }
            eprintln!();
        }
    }

    if let Some(error) = &view.error {
        eprintln!("{} {}", "Error:".red().bold(), error.red());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let default_level = if args.verbose { "mathlab=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref())?;
    let lab = MathLab::from_config(&config).context("Failed to create model client")?;
    if let Some(warning) = lab.config_warning() {
        eprintln!("{} {}", "Warning:".yellow().bold(), warning);
    }

    eprintln!("{}", "The AI is writing code for you...".dimmed());
    let outcome = lab.build(&args.query).await;
    let view = View::from_outcome(&outcome, lab.chart());
    print_view(&view, args.show_code);

    match &view.chart_svg {
        Some(svg) => {
            std::fs::write(&args.output, svg)
                .with_context(|| format!("Failed to write {}", args.output.display()))?;
            eprintln!(
                "{} {}",
                "Chart written to".green(),
                args.output.display().to_string().bold()
            );
            Ok(())
        }
        None => std::process::exit(1),
    }
}
