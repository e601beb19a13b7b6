//! Simulation-run orchestrator CLI.
//!
//! `simrun list` previews which simulations a run would execute; `simrun run`
//! drives the whole lifecycle on the in-process serial engine and memory
//! storage, then reports the run's errors.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use simrun::coordinator::{Collaborators, RunCoordinator};
use simrun::core::discovery::find_all_simulation_names;
use simrun::exit_codes;
use simrun::io::config::{RunOptions, load_options};
use simrun::io::engine::{SerialEngine, run_direct_jobs};
use simrun::io::model_store::{JsonModelLoader, ModelLoader, PluginRegistry};
use simrun::io::storage::{MemoryStorage, StorageHandle};
use simrun::io::summary::write_summary;
use simrun::logging;
use tracing::info;

#[derive(Parser)]
#[command(name = "simrun", version, about = "Simulation-run orchestrator")]
struct Cli {
    /// Log simrun's own debug events to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the simulation names a run would execute, one per line.
    List {
        /// Model file (JSON).
        model: PathBuf,
        #[command(flatten)]
        selection: Selection,
    },
    /// Run discovery, simulations, post-simulation tools and tests.
    Run {
        /// Model file (JSON).
        model: PathBuf,
        /// Options file (TOML). Defaults apply when it does not exist.
        #[arg(long, default_value = "simrun.toml")]
        config: PathBuf,
        #[command(flatten)]
        selection: Selection,
        /// Do not queue simulations.
        #[arg(long)]
        no_simulations: bool,
        /// Skip post-simulation tools.
        #[arg(long)]
        no_tools: bool,
        /// Skip validation tests.
        #[arg(long)]
        no_tests: bool,
        /// Write a JSON run summary to this path.
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}

#[derive(Args)]
struct Selection {
    /// Run only simulations with this exact name (repeatable).
    #[arg(long = "name", value_name = "NAME")]
    names: Vec<String>,
    /// Run only simulations whose whole name matches this pattern.
    /// Takes precedence over --name.
    #[arg(long)]
    pattern: Option<String>,
    /// Path of the node to run (`Simulations/Folder`).
    #[arg(long)]
    scope: Option<String>,
}

impl Selection {
    fn apply(self, options: &mut RunOptions) {
        if !self.names.is_empty() {
            options.simulation_names = Some(self.names);
        }
        if self.pattern.is_some() {
            options.simulation_name_pattern = self.pattern;
        }
        if self.scope.is_some() {
            options.scope = self.scope;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::List { model, selection } => cmd_list(&model, selection),
        Command::Run {
            model,
            config,
            selection,
            no_simulations,
            no_tools,
            no_tests,
            summary,
        } => {
            let mut options = load_options(&config)?;
            selection.apply(&mut options);
            options.run_simulations &= !no_simulations;
            options.run_post_simulation_tools &= !no_tools;
            options.run_tests &= !no_tests;
            cmd_run(&model, options, summary.as_deref())
        }
    }
}

fn cmd_list(model: &Path, selection: Selection) -> Result<i32> {
    let mut options = RunOptions::default();
    selection.apply(&mut options);
    options.validate()?;

    let loader = JsonModelLoader::new(PluginRegistry::new());
    let loaded = loader
        .load(model)
        .with_context(|| format!("load model {}", model.display()))?;
    for message in &loaded.errors {
        eprintln!("warning: {message}");
    }
    let root = match &options.scope {
        Some(scope) => loaded
            .root
            .lineage(scope)
            .and_then(|lineage| lineage.last().copied())
            .with_context(|| format!("scope {scope} does not name a node"))?,
        None => &loaded.root,
    };
    let filter = options.filter()?;
    for name in find_all_simulation_names(root, &filter)? {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_run(model: &Path, options: RunOptions, summary_path: Option<&Path>) -> Result<i32> {
    if !model.exists() {
        bail!("model file {} does not exist", model.display());
    }
    let engine = Arc::new(SerialEngine::new());
    let storage = Arc::new(MemoryStorage::new());
    let collaborators = Collaborators::new(engine.clone()).with_storage(StorageHandle::new(storage));
    let loader = Arc::new(JsonModelLoader::new(PluginRegistry::new()));
    let coordinator = RunCoordinator::from_file(model, loader, options, collaborators)?;

    let failures = engine.run(&coordinator, run_direct_jobs);
    coordinator.join()?;

    for failure in &failures {
        eprintln!("job {} failed: {:#}", failure.job, failure.error);
    }
    let errors = coordinator.errors();
    for error in &errors {
        eprintln!("error: {error}");
    }
    println!("{}", coordinator.status());

    let summary = coordinator.summary();
    if let Some(path) = summary_path {
        write_summary(path, &summary)?;
    }
    info!(
        jobs_failed = failures.len(),
        errors = errors.len(),
        "simrun run finished"
    );
    if summary.succeeded && failures.is_empty() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILED)
    }
}
