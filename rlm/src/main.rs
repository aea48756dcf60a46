//! Command-line front end for the bounded reasoning loop.
//!
//! Loads `rlm.toml` (or `--config`), applies `RLM_*` overrides, and runs a
//! single step or a multi-turn loop. Summaries are printed as JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rlm::core::types::{Query, RlmSummary, Vertical};
use rlm::exit_codes;
use rlm::io::config::{BridgeConfig, load_config_with_env, render_config, save_config};
use rlm::looping::run_multi_turn;
use rlm::step::StepEngine;

#[derive(Parser)]
#[command(name = "rlm", version, about = "Bounded agentic reasoning loop")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "rlm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reasoning step and print the summary.
    Step(QueryArgs),
    /// Run steps until convergence or the turn budget is spent.
    Loop {
        #[command(flatten)]
        query: QueryArgs,
        /// Maximum number of steps.
        #[arg(long, default_value_t = 5)]
        max_turns: u32,
        /// Vertical for this run (research, codegen, code_review, personal).
        #[arg(long)]
        vertical: Option<Vertical>,
    },
    /// Print the effective configuration as TOML.
    Config {
        /// Save the effective configuration to this path instead of printing it.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Natural-language query.
    #[arg(long)]
    query: String,
    /// Accumulated prior reasoning.
    #[arg(long, default_value = "")]
    context: String,
    #[arg(long, default_value_t = 0)]
    depth: u32,
    /// Override the configured mock default.
    #[arg(long)]
    mock: Option<bool>,
}

impl QueryArgs {
    fn to_query(&self) -> Query {
        Query::new(self.query.clone())
            .with_context(self.context.clone())
            .with_depth(self.depth)
            .with_mock_mode(self.mock)
    }
}

fn main() {
    rlm::logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config_with_env(&cli.config)?;
    match cli.command {
        Command::Step(args) => cmd_step(config, &args),
        Command::Loop {
            query,
            max_turns,
            vertical,
        } => cmd_loop(config, &query, max_turns, vertical),
        Command::Config { write } => cmd_config(&config, write.as_deref()),
    }
}

fn cmd_step(config: BridgeConfig, args: &QueryArgs) -> Result<i32> {
    let engine = StepEngine::from_config(config)?;
    let summary = engine.step(&args.to_query());
    print_json(&summary)?;
    Ok(exit_code(Some(&summary)))
}

fn cmd_loop(
    config: BridgeConfig,
    args: &QueryArgs,
    max_turns: u32,
    vertical: Option<Vertical>,
) -> Result<i32> {
    let engine = StepEngine::from_config(config)?;
    let summaries = run_multi_turn(&engine, &args.to_query(), max_turns, vertical, |turn, summary| {
        eprintln!("turn {turn}: converged={}", summary.converged);
    });
    print_json(&summaries)?;
    Ok(exit_code(summaries.last()))
}

fn cmd_config(config: &BridgeConfig, write: Option<&Path>) -> Result<i32> {
    match write {
        Some(path) => {
            save_config(path, config)?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{}", render_config(config)?),
    }
    Ok(exit_codes::CONVERGED)
}

fn exit_code(last: Option<&RlmSummary>) -> i32 {
    match last {
        Some(summary) if summary.converged => exit_codes::CONVERGED,
        _ => exit_codes::NOT_CONVERGED,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize summary")?;
    println!("{rendered}");
    Ok(())
}
