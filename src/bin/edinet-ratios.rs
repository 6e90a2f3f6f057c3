//! edinet-ratios CLI - ratio derivation and predictor search over EDINET filings
//!
//! ## Example Usage
//!
//! ```bash
//! # Run every step enabled in the configuration
//! edinet-ratios --config config/edinet.toml run
//!
//! # Derive ratios only, against another database
//! edinet-ratios --database data/test.db ratios
//!
//! # Search for predictors of two ratios at the 1% level
//! edinet-ratios search --alpha 0.01 --dependent Ratio_ROE --dependent Ratio_ROA
//!
//! # Dump a table to CSV
//! edinet-ratios export --table Standard_Data_Ratios_Aggregated --output out/agg.csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use edinet_ratios::config::{AppConfig, RatioConfig};
use edinet_ratios::data::store;
use edinet_ratios::orchestrator::{Orchestrator, RunReport, Step, StepOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

/// edinet-ratios: financial ratios and predictor search for EDINET filings
#[derive(Parser)]
#[command(name = "edinet-ratios")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Robert Fall")]
#[command(about = "Financial ratio derivation and significant-predictor search", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the steps enabled in the configuration
    Run {
        /// Run these steps instead (comma separated, e.g. generate_ratios,aggregate)
        #[arg(short = 's', long, value_delimiter = ',')]
        steps: Vec<String>,
    },

    /// Build the standardized facts table
    Standardize,

    /// Derive the per-entity ratio table
    Ratios {
        /// Drop the ratio table before deriving
        #[arg(long)]
        replace: bool,
    },

    /// Aggregate ratios to one row per entity
    Aggregate,

    /// Rank entities in the aggregated table
    Rank,

    /// Search every column pair for significant single-variable predictors
    Search {
        /// Table to search (default: ratio table)
        #[arg(short = 't', long)]
        table: Option<String>,

        /// Significance level
        #[arg(short = 'a', long)]
        alpha: Option<f64>,

        /// Restrict dependent variables (repeatable)
        #[arg(long = "dependent")]
        dependent: Vec<String>,
    },

    /// Fit the configured multivariate regression
    Regress {
        /// Explicit SQL query, overrides the configuration
        #[arg(short = 'q', long)]
        query: Option<String>,
    },

    /// Export a table to CSV
    Export {
        /// Table to export (default: ratio table)
        #[arg(short = 't', long)]
        table: Option<String>,

        /// Output CSV path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// SQL appended after `SELECT * FROM <table>`
        #[arg(long = "where")]
        modifier: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".edinet-ratios").join("config.toml"))
}

/// Explicit paths must load; the default location is optional
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return AppConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    if let Some(default) = default_config_path().filter(|p| p.exists()) {
        return AppConfig::load(&default).with_context(|| format!("loading {}", default.display()));
    }
    Ok(AppConfig::from_toml_str("")?)
}

fn parse_step(name: &str) -> Result<Step> {
    Step::ALL
        .into_iter()
        .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
        .with_context(|| format!("unknown step '{}'", name))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    let steps = match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Run { steps } if steps.is_empty() => Step::ALL
            .into_iter()
            .filter(|s| s.is_enabled(&config.steps))
            .collect(),
        Commands::Run { steps } => steps.iter().map(|s| parse_step(s)).collect::<Result<Vec<_>>>()?,
        Commands::Standardize => vec![Step::Standardize],
        Commands::Ratios { replace } => {
            config.ratios.replace_existing |= replace;
            vec![Step::GenerateRatios]
        }
        Commands::Aggregate => vec![Step::Aggregate],
        Commands::Rank => vec![Step::Rank],
        Commands::Search {
            table,
            alpha,
            dependent,
        } => {
            if table.is_some() {
                config.search.table = table;
            }
            if let Some(alpha) = alpha {
                config.search.alpha = alpha;
            }
            if !dependent.is_empty() {
                config.search.dependent_variables = dependent;
            }
            vec![Step::FindSignificantPredictors]
        }
        Commands::Regress { query } => {
            if query.is_some() {
                config.multivariate.sql_query = query;
            }
            vec![Step::MultivariateRegression]
        }
        Commands::Export {
            table,
            output,
            modifier,
        } => {
            if table.is_some() {
                config.export.table = table;
            }
            if let Some(output) = output {
                config.export.path = output;
            }
            if modifier.is_some() {
                config.export.modifier = modifier;
            }
            vec![Step::Export]
        }
    };
    config.validate()?;

    if steps.is_empty() {
        println!("{} No steps enabled", "Warning:".yellow());
        return Ok(());
    }

    // Ratio definitions are only read by the steps that use them
    let needs_definitions = steps
        .iter()
        .any(|s| matches!(s, Step::Standardize | Step::GenerateRatios));
    let ratio_config = if needs_definitions {
        RatioConfig::load(&config.ratio_definitions)
            .with_context(|| format!("loading {}", config.ratio_definitions.display()))?
    } else {
        RatioConfig::default()
    };

    if cli.verbose {
        println!("{} v{}", "edinet-ratios".cyan().bold(), env!("CARGO_PKG_VERSION"));
        println!("Database: {}", config.database.display().to_string().dimmed());
    }

    let conn = store::open(&config.database)
        .with_context(|| format!("opening {}", config.database.display()))?;
    let orchestrator = Orchestrator::new(&config, &ratio_config, &conn);

    let started = Instant::now();
    let pb = ProgressBar::new(steps.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut report = RunReport::default();
    for step in &steps {
        pb.set_message(step.name());
        report.steps.extend(orchestrator.run_steps(&[*step]).steps);
        pb.inc(1);
    }
    pb.finish_and_clear();

    print_report(&report);
    println!(
        "Finished in {}",
        format!("{:.1}s", started.elapsed().as_secs_f64()).cyan()
    );

    if !report.is_success() {
        anyhow::bail!("{} step(s) failed", report.failed().len());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", "Run Summary".green().bold());
    println!("{}", "===========".green());
    for (step, outcome) in &report.steps {
        match outcome {
            StepOutcome::Completed(detail) => {
                println!("  {} {:<28} {}", "✓".green().bold(), step.name(), detail)
            }
            StepOutcome::Skipped(detail) => {
                println!("  {} {:<28} {}", "-".yellow().bold(), step.name(), detail.dimmed())
            }
            StepOutcome::Failed(error) => {
                println!("  {} {:<28} {}", "✗".red().bold(), step.name(), error.red())
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["edinet-ratios", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { ref steps } if steps.is_empty()));
    }

    #[test]
    fn test_run_with_steps() {
        let cli = Cli::try_parse_from(["edinet-ratios", "run", "--steps", "generate_ratios,aggregate"]).unwrap();
        let Commands::Run { steps } = cli.command else {
            panic!("expected run");
        };
        let parsed: Vec<Step> = steps.iter().map(|s| parse_step(s).unwrap()).collect();
        assert_eq!(parsed, vec![Step::GenerateRatios, Step::Aggregate]);
    }

    #[test]
    fn test_search_command() {
        let cli = Cli::try_parse_from([
            "edinet-ratios",
            "--database",
            "test.db",
            "search",
            "--alpha",
            "0.01",
            "--dependent",
            "Ratio_ROE",
            "--dependent",
            "Ratio_ROA",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("test.db")));
        let Commands::Search { alpha, dependent, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(alpha, Some(0.01));
        assert_eq!(dependent.len(), 2);
    }

    #[test]
    fn test_unknown_step() {
        assert!(parse_step("backtest").is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        assert!(load_config(Some(Path::new("/nonexistent/edinet.toml"))).is_err());
    }
}
