//! SKIFF CLI
//!
//! Runs built-in programs with checkpoint triggers, exports snapshots, and
//! migrates computations between two peers.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use skiff_core::Word;
use skiff_runtime::{
    Coordinator, Exit, KeyAction, KeyListener, KeyMap, RunConfig, RunOptions, TriggerSelection,
};
use skiff_storage::{SnapshotFile, StoredSnapshot};
use skiff_vm::ProgramCatalog;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "skiff", version)]
#[command(about = "SKIFF - checkpoint, export and migrate running computations", long_about = None)]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program
    Run(RunArgs),
    /// Show the contents of a snapshot artifact
    Inspect {
        /// Artifact path
        path: PathBuf,
        /// Print the artifact as JSON
        #[arg(long)]
        json: bool,
    },
    /// List built-in programs
    Programs,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Program to run
    #[arg(short, long, default_value = "fib")]
    program: String,
    /// Entry argument, repeatable; overrides the program's defaults
    #[arg(long = "arg", value_name = "N", allow_hyphen_values = true)]
    args: Vec<Word>,
    /// Execution mode: local or remote
    #[arg(long, default_value = "local")]
    mode: String,
    /// Peer address (remote mode)
    #[arg(long)]
    peer: Option<String>,
    /// Listen address (remote mode)
    #[arg(long)]
    listen: Option<String>,
    /// Snapshot from the keyboard (r = run/resume, s = snapshot, q = abort)
    #[arg(short, long, visible_alias = "manual")]
    interactive: bool,
    /// Snapshot this many milliseconds after each run starts
    #[arg(long, value_name = "MS")]
    snapshot_ms: Option<u64>,
    /// Snapshot after every instruction
    #[arg(long)]
    all: bool,
    /// Continue from a snapshot artifact
    #[arg(long, value_name = "PATH")]
    from_snapshot: Option<PathBuf>,
    /// Export the first snapshot, then stop (local mode)
    #[arg(long)]
    export: bool,
    /// Where to write exported snapshots
    #[arg(long, value_name = "PATH")]
    export_path: Option<PathBuf>,
    /// Start the computation without waiting for the peer (remote mode)
    #[arg(long)]
    start: bool,
    /// Deadline for each peer call, in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Delay between the peer finishing and exiting, in milliseconds
    #[arg(long, value_name = "MS")]
    finish_grace_ms: Option<u64>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            program: self.program,
            args: self.args,
            mode: self.mode,
            peer: self.peer,
            listen: self.listen,
            trigger: TriggerSelection {
                manual: self.interactive,
                timeout: self.snapshot_ms.map(Duration::from_millis),
                step_all: self.all,
            },
            from_snapshot: self.from_snapshot,
            export_only: self.export,
            export_path: self.export_path,
            start_immediately: self.start,
            transport_timeout: self.timeout_ms.map(Duration::from_millis),
            finish_grace: self.finish_grace_ms.map(Duration::from_millis),
        }
    }
}

fn init_tracing(quiet: bool, format: LogFormat) -> Result<()> {
    let default = if quiet { "skiff=warn" } else { "skiff=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    }
    .wrap_err("failed to initialize tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.log_format)?;

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Inspect { path, json } => {
            let stored = SnapshotFile::new(&path)
                .read()
                .wrap_err_with(|| format!("cannot inspect {}", path.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inspect_json(&stored))?);
            } else {
                print!("{}", render_inspect(&stored));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Programs => {
            for program in ProgramCatalog::builtin()?.iter() {
                println!(
                    "{:<10} {:?}  {}",
                    program.name(),
                    program.default_args(),
                    program.description()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = Arc::new(RunConfig::from_options(args.into_options())?);
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&config))?);

    let (listener, keys) = if config.trigger.is_manual() {
        let (listener, keys) = KeyListener::spawn(KeyMap::default())?;
        (Some(listener), keys)
    } else {
        (None, interrupt_keys())
    };

    let result = coordinator.run(Some(keys)).await;
    // restore the terminal before printing
    drop(listener);

    let exit = match result {
        Ok(exit) => exit,
        Err(err) => {
            tracing::error!(kind = err.kind(), error = %err, "run failed");
            return Err(err.into());
        }
    };
    match &exit {
        Exit::Completed(results) => println!("result: {results:?}"),
        Exit::Finished => println!("finished on peer"),
        Exit::Exported(path) => println!("snapshot: {}", path.display()),
        Exit::Aborted => println!("aborted"),
    }
    Ok(ExitCode::from(u8::try_from(exit.code()).unwrap_or(1)))
}

/// Ctrl-C aborts when the keyboard is not in raw mode
fn interrupt_keys() -> mpsc::Receiver<KeyAction> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(KeyAction::Abort).await;
        }
    });
    rx
}

fn render_inspect(stored: &StoredSnapshot) -> String {
    let snapshot = &stored.snapshot;
    let mut out = format!(
        "program:  {}\nchecksum: {}\nsize:     {} bytes\nvalid:    {}\nentry:    {}\nframes:   {}\n",
        stored.program,
        stored.checksum,
        stored.size,
        snapshot.valid,
        snapshot.entry_function_index,
        snapshot.depth()
    );
    for (depth, frame) in snapshot.frames.iter().enumerate() {
        out.push_str(&format!(
            "  #{depth} {frame}  locals={:?} operands={:?}\n",
            frame.locals, frame.operands
        ));
    }
    out
}

fn inspect_json(stored: &StoredSnapshot) -> serde_json::Value {
    serde_json::json!({
        "program": stored.program,
        "checksum": stored.checksum,
        "size": stored.size,
        "snapshot": stored.snapshot,
    })
}
