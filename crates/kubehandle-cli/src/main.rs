//! kubehandle CLI - create, wait on, edit and delete Kubernetes objects

use clap::{Parser, Subcommand};
use kubehandle_core::ApiVersion;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod exit_codes;

use commands::get::OutputFormat;
use commands::wait::WaitFor;
use commands::{Target, Timing};
use config::{CONFIG_ENV, Config};
use error::Result;

#[derive(Parser)]
#[command(name = "kubehandle")]
#[command(version)]
#[command(about = "Create, wait on, edit and delete Kubernetes objects with bounded polling", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (defaults to <config dir>/kubehandle/config.yaml)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the newest served apiVersion of a kind
    Resolve {
        /// Object kind, e.g. Deployment
        kind: String,

        /// API group (core group if omitted)
        #[arg(short, long, default_value = "")]
        group: String,

        /// Newest version to accept, e.g. v1
        #[arg(long)]
        max_version: Option<ApiVersion>,
    },

    /// Show an object
    Get {
        #[command(flatten)]
        target: Target,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Wait until an object exists, reaches a phase or reports a condition
    Wait {
        #[command(flatten)]
        target: Target,

        /// exists, status=PHASE or condition=TYPE[=STATUS]
        #[arg(long = "for", default_value = "exists")]
        until: WaitFor,

        #[command(flatten)]
        timing: Timing,
    },

    /// Delete an object
    Delete {
        #[command(flatten)]
        target: Target,

        /// Wait until the object is gone
        #[arg(long)]
        wait: bool,

        /// Clear finalizers while waiting so the deletion can complete
        #[arg(long, requires = "wait")]
        clear_finalizers: bool,

        #[command(flatten)]
        timing: Timing,
    },

    /// Validate manifests against local JSON schemas
    Validate {
        /// Manifest files (multi-document YAML)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory of <kind>.json schemas (overrides schemaDir)
        #[arg(long)]
        schema_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Patch objects, run a command, then restore the objects
    Edit {
        /// Patch file(s); each document names its target
        #[arg(short = 'p', long = "patch", required = true)]
        patches: Vec<PathBuf>,

        /// Command to run while the patches are applied
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve {
            kind,
            group,
            max_version,
        } => commands::resolve::run(&config, &group, &kind, max_version).await,

        Commands::Get { target, output } => commands::get::run(&config, &target, output).await,

        Commands::Wait {
            target,
            until,
            timing,
        } => commands::wait::run(&config, &target, &until, &timing).await,

        Commands::Delete {
            target,
            wait,
            clear_finalizers,
            timing,
        } => commands::delete::run(&config, &target, wait, clear_finalizers, &timing).await,

        Commands::Validate {
            files,
            schema_dir,
            json,
        } => commands::validate::run(&config, &files, schema_dir.as_deref(), json),

        Commands::Edit { patches, command } => commands::edit::run(&config, &patches, &command).await,
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
