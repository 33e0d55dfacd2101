use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use raises::RaisesPlugin;
use raises_harness::report::{write_json_report, write_text_report};
use raises_harness::{build_filter, run, HarnessConfig, RunOptions, Shard};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Run declarative tests with `raises`/`setup_raises` expectations")]
struct Cli {
  /// Config file (default: `raises.toml` in the working directory, if present)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  /// Enable tracing output (filtered by `RUST_LOG`, default `info`)
  #[arg(long, global = true)]
  trace: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Collect and run tests.
  Run(RunArgs),
  /// List registered markers.
  Markers,
}

#[derive(Args, Debug)]
struct RunArgs {
  /// Test files or directories
  paths: Vec<PathBuf>,

  /// Glob or regex over node ids
  #[arg(long)]
  filter: Option<String>,

  /// Run only a shard (zero-based): `i/n`
  #[arg(long)]
  shard: Option<Shard>,

  /// Write a JSON report to this path
  #[arg(long, value_name = "PATH")]
  json: Option<PathBuf>,

  /// Reject marks that are not registered
  #[arg(long)]
  strict_markers: bool,

  /// Print one line per test
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> ExitCode {
  match try_main() {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error: {err:#}");
      ExitCode::from(2)
    }
  }
}

fn try_main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_tracing(cli.trace);

  let cwd = std::env::current_dir()?;
  let mut config = HarnessConfig::load(cli.config.as_deref(), &cwd)?;

  match cli.command {
    Command::Markers => {
      let registry = config.marker_registry(&RaisesPlugin);
      let stdout = std::io::stdout();
      let mut out = stdout.lock();
      for (name, description) in registry.iter() {
        writeln!(out, "@{name}: {description}")?;
      }
      Ok(ExitCode::SUCCESS)
    }
    Command::Run(args) => {
      config.strict_markers |= args.strict_markers;
      let report = run(RunOptions {
        paths: args.paths,
        filter: build_filter(args.filter.as_deref())?,
        shard: args.shard,
        config,
      })?;

      if let Some(path) = &args.json {
        write_json_report(path, &report)?;
      }
      let stdout = std::io::stdout();
      write_text_report(&mut stdout.lock(), &report, args.verbose)?;

      Ok(if report.summary.should_fail() {
        ExitCode::from(1)
      } else {
        ExitCode::SUCCESS
      })
    }
  }
}

fn init_tracing(enable: bool) {
  if !enable {
    return;
  }

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr);
  if let Err(err) = builder.try_init() {
    eprintln!("failed to install tracing subscriber: {err}");
  }
}
