use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
  Passed,
  Failed,
  /// The test's setup raised, or a hook failed it during setup.
  Error,
  Skipped,
}

impl TestOutcome {
  pub fn is_fail_like(self) -> bool {
    matches!(self, Self::Failed | Self::Error)
  }
}

impl fmt::Display for TestOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let value = match self {
      TestOutcome::Passed => "PASSED",
      TestOutcome::Failed => "FAILED",
      TestOutcome::Error => "ERROR",
      TestOutcome::Skipped => "SKIPPED",
    };
    f.write_str(value)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
  pub nodeid: String,
  pub outcome: TestOutcome,
  /// Failure or error text; the skip reason for skipped tests.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Summary {
  pub total: usize,
  pub passed: usize,
  pub failed: usize,
  pub errors: usize,
  pub skipped: usize,
}

impl Summary {
  pub fn should_fail(&self) -> bool {
    self.failed + self.errors > 0
  }
}

impl fmt::Display for Summary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts = Vec::new();
    for (count, label) in [
      (self.failed, "failed"),
      (self.passed, "passed"),
      (self.skipped, "skipped"),
      (self.errors, "error"),
    ] {
      if count > 0 {
        parts.push(format!("{count} {label}"));
      }
    }
    if parts.is_empty() {
      return f.write_str("no tests ran");
    }
    f.write_str(&parts.join(", "))
  }
}

pub fn summarize(results: &[TestResult]) -> Summary {
  let mut summary = Summary::default();
  for result in results {
    summary.total += 1;
    match result.outcome {
      TestOutcome::Passed => summary.passed += 1,
      TestOutcome::Failed => summary.failed += 1,
      TestOutcome::Error => summary.errors += 1,
      TestOutcome::Skipped => summary.skipped += 1,
    }
  }
  summary
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
  pub schema_version: u32,
  pub summary: Summary,
  pub results: Vec<TestResult>,
}

impl Report {
  /// Results are expected in collection order, which is already deterministic.
  pub fn new(results: Vec<TestResult>) -> Self {
    Self {
      schema_version: REPORT_SCHEMA_VERSION,
      summary: summarize(&results),
      results,
    }
  }
}

/// Write a pretty, deterministic JSON report to `path`, creating parent directories as needed.
pub fn write_json_report(path: &Path, report: &Report) -> anyhow::Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
  }

  let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
  let mut writer = BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, report)
    .with_context(|| format!("write report to {}", path.display()))?;
  writeln!(writer).ok();
  writer.flush().ok();
  Ok(())
}

/// Human-readable output: one line per test when `verbose`, failure details, then the summary.
pub fn write_text_report<W: Write>(writer: &mut W, report: &Report, verbose: bool) -> io::Result<()> {
  if verbose {
    for result in &report.results {
      writeln!(writer, "{} {}", result.nodeid, result.outcome)?;
    }
  }

  for result in report.results.iter().filter(|r| r.outcome.is_fail_like()) {
    writeln!(writer)?;
    writeln!(writer, "____ {} [{}] ____", result.nodeid, result.outcome)?;
    if let Some(message) = &result.message {
      writeln!(writer, "{message}")?;
    }
  }

  writeln!(writer)?;
  writeln!(writer, "==== {} ====", report.summary)
}
