//! `pipeline`: check interface definitions, print command lines, and run
//! workflow documents.

mod cli;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use pipeline::exit_codes;

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Run command-line tools as typed, cached workflow nodes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List built-in interfaces plus any loaded from `--interfaces`.
    List {
        /// Directory of extra `*.json` definitions.
        #[arg(long)]
        interfaces: Option<PathBuf>,
    },
    /// Validate interface definition files against the schema and invariants.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the command line an interface would run.
    Cmdline {
        /// Interface name (`fsl.bet`) or path to a definition file.
        interface: String,
        /// Input as `name=value`; the value is parsed as JSON, else taken as a string.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
        /// Directory generated output names resolve into.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Print the execution stages of a workflow, or its Graphviz DOT.
    Graph {
        workflow: PathBuf,
        #[arg(long)]
        dot: bool,
    },
    /// Run a workflow document.
    Run {
        workflow: PathBuf,
        /// Configuration file; defaults apply when it does not exist.
        #[arg(long, default_value = "pipeline.toml")]
        config: PathBuf,
        #[arg(long, value_enum)]
        plugin: Option<PluginArg>,
        #[arg(long)]
        n_procs: Option<usize>,
        /// Rerun every node even when its cache is current.
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove a workflow's working directory.
    Clean { workflow: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum PluginArg {
    Linear,
    Multiproc,
}

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::List { interfaces } => cli::list(interfaces.as_deref()),
        Command::Check { files } => cli::check(&files),
        Command::Cmdline {
            interface,
            set,
            cwd,
        } => cli::cmdline(&interface, &set, cwd.as_deref()),
        Command::Graph { workflow, dot } => cli::graph(&workflow, dot),
        Command::Run {
            workflow,
            config,
            plugin,
            n_procs,
            overwrite,
        } => cli::run(
            &workflow,
            &config,
            &cli::RunFlags {
                multiproc: plugin.map(|plugin| matches!(plugin, PluginArg::Multiproc)),
                n_procs,
                overwrite,
            },
        ),
        Command::Clean { workflow } => cli::clean(&workflow),
    }
}
