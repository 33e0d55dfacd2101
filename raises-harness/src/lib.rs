//! A small host runner for `raises`/`setup_raises` markers.
//!
//! Collects YAML test declarations, runs each item's setup and call phases through the
//! [`raises::RaisesPlugin`] hooks, and reports the results.

pub mod config;
pub mod declaration;
pub mod discover;
pub mod report;
pub mod runner;
pub mod select;

pub use config::HarnessConfig;
pub use report::{Report, Summary, TestOutcome, TestResult, REPORT_SCHEMA_VERSION};
pub use select::{build_filter, Filter, Shard};

use anyhow::{bail, Result};
use raises::{PhaseHooks, RaisesPlugin};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Files or directories to collect; falls back to `config.testpaths`.
  pub paths: Vec<PathBuf>,
  pub filter: Filter,
  pub shard: Option<Shard>,
  pub config: HarnessConfig,
}

pub fn run(options: RunOptions) -> Result<Report> {
  let paths = if options.paths.is_empty() {
    options.config.testpaths.clone()
  } else {
    options.paths
  };
  if paths.is_empty() {
    bail!("no test paths given and none configured in `testpaths`");
  }

  let plugin = RaisesPlugin;
  let markers = options.config.marker_registry(&plugin);
  let files = discover::discover_files(&paths)?;
  let cases = runner::collect_cases(&files, &markers)?;
  let cases = runner::select_cases(cases, &options.filter, options.shard)?;

  let hooks: Vec<Box<dyn PhaseHooks>> = vec![Box::new(plugin)];
  let results = runner::run_cases(cases, &hooks);
  Ok(Report::new(results))
}
