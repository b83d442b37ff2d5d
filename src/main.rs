use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;
use treetrim::{prune, PruneConfig, PruneError, PruneReport, Ruleset, RulesSource};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Prune an assembled runtime tree down to a minimal distributable payload",
    long_about = None
)]
struct Args {
    /// Root of the runtime tree to prune
    #[arg(required_unless_present = "list_rules")]
    root: Option<PathBuf>,

    /// Ruleset file (TOML); defaults to the built-in MinGW/Python cleanup list
    #[arg(long, short)]
    rules: Option<PathBuf>,

    /// Report what would be removed without touching the tree
    #[arg(long)]
    dry_run: bool,

    /// Python interpreter used for bytecode compilation and the dependency check
    #[arg(long)]
    python: Option<PathBuf>,

    /// Dependency-check script run against the pruned tree; broken references abort
    #[arg(long)]
    depcheck: Option<PathBuf>,

    /// Print the ruleset and exit
    #[arg(long)]
    list_rules: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_line_number(verbose >= 3)
        .init();
}

fn print_rules(ruleset: &Ruleset) {
    for (index, rule) in ruleset.rules().iter().enumerate() {
        println!("{:>3}. {} [{}]", index + 1, rule.name.bold(), rule.action);
        if let Some(scope) = rule.scope() {
            println!("       within {}", scope);
        }
        if let Some(matcher) = rule.matcher() {
            println!("       match  {}", matcher);
        }
        for exception in rule.exceptions() {
            println!("       except {}", exception);
        }
        if let Some(extension) = rule.sibling_extension() {
            println!("       only if a .{} sibling exists", extension);
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    debug!("arguments: {:?}", args);

    let rules = match args.rules {
        Some(path) => RulesSource::File(path),
        None => RulesSource::Builtin,
    };

    if args.list_rules {
        let ruleset = rules.load().context("Failed to load ruleset")?;
        print_rules(&ruleset);
        return Ok(());
    }

    let Some(root) = args.root else {
        anyhow::bail!("no tree root given");
    };

    let mut config = PruneConfig::new(root);
    config.rules = rules;
    config.dry_run = args.dry_run;
    config.depcheck = args.depcheck;
    if let Some(python) = args.python {
        config.python = python;
    }

    let verbose = args.verbose > 0;

    match prune(&config) {
        Ok(report) => {
            show_report(&report, verbose);
            Ok(())
        }
        Err(PruneError::BrokenReferences { refs, report }) => {
            show_report(&report, verbose);
            Err(PruneError::BrokenReferences { refs, report })
                .context("Pruned tree is not safe to package")
        }
        Err(err) => Err(err).with_context(|| format!("Failed to prune {}", config.root.display())),
    }
}

fn show_report(report: &PruneReport, verbose: bool) {
    if verbose {
        print!("{report:#}");
    } else {
        print!("{report}");
    }
}
